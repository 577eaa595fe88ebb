//! The lazily-bootstrapped Python runtime.
//!
//! The interpreter wasm is heavyweight, so nothing is fetched or compiled
//! until the first Python run. Bootstrap is single-flight: concurrent runs
//! that arrive while the runtime is still loading await the same in-flight
//! initialization instead of starting another download or compile. Once
//! ready, the compiled module is reused for every subsequent run and is
//! never torn down for the lifetime of the process.
//!
//! Unlike the script family there is no message boundary here: the runtime
//! executes in-process and its standard streams feed the console directly,
//! gated only on the run identifier. A trailing expression statement in the
//! user's source is evaluated separately by a small harness and surfaced as
//! a `success` entry, distinct from printed output.

pub mod fetch;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use wasmtime::{Engine, Module};

use crate::config::SandboxConfig;
use crate::console::{Console, LogLevel};
use crate::error::{Result, SandboxError};
use crate::exec;
use crate::exec::io::CapturedStream;
use crate::protocol::{RunGate, RunId};
use self::fetch::AssetFetcher;

/// Reserved line prefix the harness uses to hand the expression result back
/// to the host, distinct from ordinary printed output.
const RESULT_PREFIX: &str = "__lesson_result__:";

/// Upper bound on captured interpreter output per stream, per run.
const STREAM_CAPACITY: usize = 1024 * 1024;

/// Lifecycle of the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// Nothing fetched or compiled yet.
    Unloaded,
    /// Bootstrap in flight; later callers share it.
    Loading,
    /// Compiled and reusable for the rest of the process lifetime.
    Ready,
}

/// The page-lifetime Python virtual machine.
pub struct PythonRuntime {
    config: SandboxConfig,
    console: Console,
    gate: RunGate,
    engine: Engine,
    module: tokio::sync::OnceCell<Module>,
    fetcher: AssetFetcher,
    loading: AtomicBool,
    bootstrap_attempts: AtomicUsize,
}

impl PythonRuntime {
    /// Create the runtime shell. No asset is touched until the first run.
    pub fn new(config: SandboxConfig, console: Console, gate: RunGate) -> Result<Self> {
        let engine = Engine::new(&wasmtime::Config::new()).map_err(|e| {
            SandboxError::RuntimeInit(anyhow::anyhow!("failed to create engine: {}", e))
        })?;
        let fetcher = AssetFetcher::new(
            config.runtime_url.clone(),
            config.runtime_cache_dir.clone(),
        )?;

        Ok(Self {
            config,
            console,
            gate,
            engine,
            module: tokio::sync::OnceCell::new(),
            fetcher,
            loading: AtomicBool::new(false),
            bootstrap_attempts: AtomicUsize::new(0),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RuntimeState {
        if self.module.initialized() {
            RuntimeState::Ready
        } else if self.loading.load(Ordering::SeqCst) {
            RuntimeState::Loading
        } else {
            RuntimeState::Unloaded
        }
    }

    /// Fetch and compile the interpreter exactly once.
    async fn ensure_module(&self) -> Result<&Module> {
        self.module
            .get_or_try_init(|| async {
                self.loading.store(true, Ordering::SeqCst);
                let attempt = self.bootstrap_attempts.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::debug!(attempt, "bootstrapping Python runtime");

                let result = self.bootstrap().await;
                self.loading.store(false, Ordering::SeqCst);
                result
            })
            .await
    }

    async fn bootstrap(&self) -> Result<Module> {
        let path = self.fetcher.fetch().await?;
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || exec::compile_module(&engine, &path))
            .await
            .map_err(|_| SandboxError::ExecutionFailed("compile task failed".to_string()))?
    }

    /// Execute Python source for the given run.
    ///
    /// All output arrives through the console; bootstrap and execution
    /// failures become `error` entries and are never propagated. Appends are
    /// gated on the run still being current, so a superseded run goes quiet
    /// without interrupting the virtual machine itself.
    pub async fn execute(&self, source: &str, run_id: RunId) {
        if source.trim().is_empty() {
            self.append_if_current(run_id, "No Python code to run.", LogLevel::Warning);
            return;
        }

        // Only materially visible on first use, while the download runs.
        self.append_if_current(run_id, "Loading Python runtime…", LogLevel::Info);
        let module = match self.ensure_module().await {
            Ok(module) => module.clone(),
            Err(e) => {
                self.append_if_current(run_id, e.to_string(), LogLevel::Error);
                return;
            }
        };

        if !self.gate.is_current(run_id) {
            // Superseded while the runtime was loading.
            return;
        }
        self.append_if_current(run_id, "Running Python…", LogLevel::Info);

        let argv = vec![
            "python".to_string(),
            "-c".to_string(),
            harness(source),
        ];

        let mut stdout = CapturedStream::new(STREAM_CAPACITY);
        let mut stderr = CapturedStream::new(STREAM_CAPACITY);
        let stdout_pipe = stdout.pipe();
        let stderr_pipe = stderr.pipe();

        let engine = self.engine.clone();
        let max_memory = self.config.max_memory;
        let mut exec_task = tokio::task::spawn_blocking(move || {
            // No epoch deadline: the virtual machine is never interrupted
            // mid-run, supersession only stops its output.
            exec::run_guest(
                &engine,
                &module,
                &argv,
                stdout_pipe,
                stderr_pipe,
                max_memory,
                None,
            )
        });

        let result = loop {
            tokio::select! {
                res = &mut exec_task => break res,
                _ = tokio::time::sleep(self.config.stream_poll_interval) => {
                    self.deliver(run_id, &mut stdout, &mut stderr);
                }
            }
        };

        self.deliver(run_id, &mut stdout, &mut stderr);
        if let Some(rest) = stdout.drain_rest() {
            self.deliver_stdout_line(run_id, rest);
        }
        if let Some(rest) = stderr.drain_rest() {
            self.append_if_current(run_id, rest, LogLevel::Error);
        }

        match result {
            Ok(Ok(0)) => {}
            Ok(Ok(code)) => {
                self.append_if_current(
                    run_id,
                    format!("Python exited with status {code}"),
                    LogLevel::Error,
                );
            }
            Ok(Err(e)) if e.is_interrupted() => {}
            Ok(Err(e)) => {
                self.append_if_current(run_id, e.to_string(), LogLevel::Error);
            }
            Err(_join_err) => {
                self.append_if_current(run_id, "execution task failed", LogLevel::Error);
            }
        }
    }

    fn deliver(&self, run_id: RunId, stdout: &mut CapturedStream, stderr: &mut CapturedStream) {
        for line in stdout.drain_lines() {
            self.deliver_stdout_line(run_id, line);
        }
        for line in stderr.drain_lines() {
            self.append_if_current(run_id, line, LogLevel::Error);
        }
    }

    fn deliver_stdout_line(&self, run_id: RunId, line: String) {
        if let Some(result) = line.strip_prefix(RESULT_PREFIX) {
            if !result.is_empty() {
                self.append_if_current(run_id, result, LogLevel::Success);
            }
        } else {
            self.append_if_current(run_id, line, LogLevel::Info);
        }
    }

    fn append_if_current(&self, run_id: RunId, message: impl Into<String>, level: LogLevel) {
        if self.gate.is_current(run_id) {
            self.console.append(message, level);
        }
    }
}

/// Wrap user source in the execution harness.
///
/// The harness splits off a trailing expression statement, evaluates it
/// after the rest of the program and reports its non-`None` value on the
/// reserved result line. Exceptions are reduced to their message on stderr,
/// one line, so the console shows a single error entry.
fn harness(source: &str) -> String {
    // A JSON string literal is also a valid Python string literal.
    let literal = serde_json::to_string(source).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        r#"import ast as __ast
import sys as __sys
__source = {literal}
try:
    __tree = __ast.parse(__source, "<console>", "exec")
    __result = None
    __scope = {{}}
    if __tree.body and isinstance(__tree.body[-1], __ast.Expr):
        __last = __ast.Expression(__tree.body[-1].value)
        del __tree.body[-1]
        exec(compile(__tree, "<console>", "exec"), __scope)
        __result = eval(compile(__last, "<console>", "eval"), __scope)
    else:
        exec(compile(__tree, "<console>", "exec"), __scope)
    if __result is not None:
        __text = str(__result)
        if __text:
            print("{RESULT_PREFIX}" + __text)
except BaseException as __err:
    print(str(__err) or repr(__err), file=__sys.stderr)
"#
    )
}
