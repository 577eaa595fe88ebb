//! The sandbox host controller for the script/markup family.
//!
//! Each run gets a fresh isolated context: a new store of the script-engine
//! wasm with no filesystem, network or host access. The generated document
//! (instrumentation preamble + user script) is injected as the evaluation
//! argument, a relay task validates the protocol lines the context emits,
//! and the whole unit — context, relay, grace timer — is disposable as one
//! piece: a grace-period timer tears it down after dispatch, or a
//! superseding run tears it down immediately, never both.

pub mod document;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use wasmtime::{Engine, Module};

use crate::config::SandboxConfig;
use crate::console::{Console, LogLevel};
use crate::error::Result;
use crate::exec;
use crate::exec::io::CapturedStream;
use crate::protocol::{ProtocolMessage, RunGate, RunId};

/// Upper bound on captured guest output per stream, per run.
const STREAM_CAPACITY: usize = 1024 * 1024;

/// One line received from the isolated context.
enum RelayLine {
    Stdout(String),
    Stderr(String),
}

/// The disposable unit for one script-family run: isolated context,
/// relay/listener tasks and grace timer, torn down together.
pub struct ActiveRun {
    run_id: RunId,
    settled: Arc<AtomicBool>,
    disposed: Arc<AtomicBool>,
    tasks: Vec<AbortHandle>,
    engine: Option<Engine>,
}

impl ActiveRun {
    /// A unit whose setup already failed; settled from the start.
    fn failed(run_id: RunId) -> Self {
        Self {
            run_id,
            settled: Arc::new(AtomicBool::new(true)),
            disposed: Arc::new(AtomicBool::new(false)),
            tasks: Vec::new(),
            engine: None,
        }
    }

    /// The run this unit belongs to.
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Whether the context and listener are still live.
    pub fn is_live(&self) -> bool {
        !self.settled.load(Ordering::SeqCst) && !self.disposed.load(Ordering::SeqCst)
    }

    /// Tear the unit down immediately: abort the relay tasks and interrupt
    /// the guest. Idempotent; called when a newer run supersedes this one.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in &self.tasks {
            task.abort();
        }
        if let Some(engine) = &self.engine {
            // Traps the guest at its epoch deadline. The superseding run's
            // store is created only after this returns.
            engine.increment_epoch();
        }
        tracing::debug!(run_id = %self.run_id, "script context disposed");
    }
}

/// Creates and tears down isolated script contexts and relays their console
/// activity into the log model.
pub struct HostController {
    config: SandboxConfig,
    console: Console,
    gate: RunGate,
    engine: Engine,
    module: tokio::sync::OnceCell<Module>,
}

impl HostController {
    /// Create a controller. The script-engine module itself is compiled
    /// lazily on first dispatch.
    pub fn new(config: SandboxConfig, console: Console, gate: RunGate) -> Result<Self> {
        let mut engine_config = wasmtime::Config::new();
        engine_config.epoch_interruption(true);

        let engine = Engine::new(&engine_config).map_err(|e| {
            crate::error::SandboxError::RuntimeInit(anyhow::anyhow!(
                "failed to create engine: {}",
                e
            ))
        })?;

        Ok(Self {
            config,
            console,
            gate,
            engine,
            module: tokio::sync::OnceCell::new(),
        })
    }

    async fn module(&self) -> Result<&Module> {
        self.module
            .get_or_try_init(|| async { exec::compile_module(&self.engine, &self.config.engine_path) })
            .await
    }

    /// Run one script-family document in a fresh isolated context.
    ///
    /// Setup failures become a single `error` console entry; this never
    /// returns an error to the caller. The returned unit must be disposed
    /// by the scheduler when a newer run starts.
    pub async fn dispatch(&self, source: &str, run_id: RunId) -> ActiveRun {
        let module = match self.module().await {
            Ok(module) => module.clone(),
            Err(e) => {
                self.console
                    .append(format!("Error setting up console: {e}"), LogLevel::Error);
                return ActiveRun::failed(run_id);
            }
        };

        let document = document::build_document(run_id, source);
        let argv = vec!["qjs".to_string(), "-e".to_string(), document];

        let stdout = CapturedStream::new(STREAM_CAPACITY);
        let stderr = CapturedStream::new(STREAM_CAPACITY);
        let stdout_pipe = stdout.pipe();
        let stderr_pipe = stderr.pipe();

        let exec_engine = self.engine.clone();
        let max_memory = self.config.max_memory;
        let exec_task = tokio::task::spawn_blocking(move || {
            exec::run_guest(
                &exec_engine,
                &module,
                &argv,
                stdout_pipe,
                stderr_pipe,
                max_memory,
                // First epoch increment past dispatch traps the guest.
                Some(1),
            )
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let listener = tokio::spawn(relay_lines(rx, self.console.clone(), self.gate.clone()));

        let settled = Arc::new(AtomicBool::new(false));
        let disposed = Arc::new(AtomicBool::new(false));

        let timer_engine = self.engine.clone();
        let timer_settled = Arc::clone(&settled);
        let timer_disposed = Arc::clone(&disposed);
        let grace = self.config.grace_period;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if !timer_settled.load(Ordering::SeqCst)
                && !timer_disposed.swap(true, Ordering::SeqCst)
            {
                tracing::debug!("grace period elapsed; tearing down script context");
                timer_engine.increment_epoch();
            }
        });

        let supervisor = tokio::spawn(supervise(
            exec_task,
            stdout,
            stderr,
            tx,
            self.console.clone(),
            self.gate.clone(),
            run_id,
            self.config.stream_poll_interval,
            Arc::clone(&settled),
            timer.abort_handle(),
        ));

        tracing::debug!(%run_id, "script context dispatched");

        ActiveRun {
            run_id,
            settled,
            disposed,
            tasks: vec![
                supervisor.abort_handle(),
                listener.abort_handle(),
                timer.abort_handle(),
            ],
            engine: Some(self.engine.clone()),
        }
    }
}

/// Drive the guest to completion while draining its output incrementally.
#[allow(clippy::too_many_arguments)]
async fn supervise(
    mut exec_task: JoinHandle<Result<i32>>,
    mut stdout: CapturedStream,
    mut stderr: CapturedStream,
    tx: mpsc::UnboundedSender<RelayLine>,
    console: Console,
    gate: RunGate,
    run_id: RunId,
    poll: Duration,
    settled: Arc<AtomicBool>,
    timer: AbortHandle,
) {
    let result = loop {
        tokio::select! {
            res = &mut exec_task => break res,
            _ = tokio::time::sleep(poll) => {
                drain(&mut stdout, &mut stderr, &tx);
            }
        }
    };

    // Final drain, including any trailing partial line.
    drain(&mut stdout, &mut stderr, &tx);
    if let Some(rest) = stdout.drain_rest() {
        let _ = tx.send(RelayLine::Stdout(rest));
    }
    if let Some(rest) = stderr.drain_rest() {
        let _ = tx.send(RelayLine::Stderr(rest));
    }
    drop(tx);

    match result {
        Ok(Ok(_exit_code)) => {}
        // Teardown traps are expected under cancellation, not user failures.
        Ok(Err(e)) if e.is_interrupted() => {}
        Ok(Err(e)) => {
            if gate.is_current(run_id) {
                console.append(format!("Error running code: {e}"), LogLevel::Error);
            }
        }
        Err(join_err) => {
            if !join_err.is_cancelled() && gate.is_current(run_id) {
                console.append(
                    "Error running code: execution task failed".to_string(),
                    LogLevel::Error,
                );
            }
        }
    }

    timer.abort();
    settled.store(true, Ordering::SeqCst);
}

fn drain(
    stdout: &mut CapturedStream,
    stderr: &mut CapturedStream,
    tx: &mpsc::UnboundedSender<RelayLine>,
) {
    for line in stdout.drain_lines() {
        let _ = tx.send(RelayLine::Stdout(line));
    }
    for line in stderr.drain_lines() {
        let _ = tx.send(RelayLine::Stderr(line));
    }
}

/// Host-side message listener: parse, validate, append.
async fn relay_lines(
    mut rx: mpsc::UnboundedReceiver<RelayLine>,
    console: Console,
    gate: RunGate,
) {
    while let Some(line) = rx.recv().await {
        match line {
            RelayLine::Stdout(text) => {
                if let Some(msg) = ProtocolMessage::parse(&text) {
                    if msg.is_valid(&gate) {
                        console.append(msg.rendered(), msg.log_level());
                    } else {
                        tracing::debug!(line = %text, "dropped stale or foreign message");
                    }
                }
                // Non-protocol stdout is the guest's native output; it stays
                // on the raw stream and never reaches the console.
            }
            RelayLine::Stderr(text) => {
                tracing::debug!(line = %text, "guest stderr");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_setup() -> (HostController, Console, RunGate) {
        let config = SandboxConfig::builder()
            .engine_path("does/not/exist/quickjs.wasm")
            .build();
        let console = Console::new();
        let gate = RunGate::new();
        let controller =
            HostController::new(config, console.clone(), gate.clone()).unwrap();
        (controller, console, gate)
    }

    #[tokio::test]
    async fn test_setup_failure_becomes_console_entry() {
        let (controller, console, gate) = test_setup();
        let run = gate.mint();

        let unit = controller.dispatch("console.log('hi')", run).await;

        assert!(!unit.is_live());
        let entries = console.snapshot();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].level, LogLevel::Error);
        assert!(entries[0].message.starts_with("Error setting up console:"));
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let (controller, _console, gate) = test_setup();
        let unit = controller.dispatch("x", gate.mint()).await;

        unit.dispose();
        unit.dispose();
        assert!(!unit.is_live());
    }

    #[test]
    fn test_failed_unit_is_settled() {
        let unit = ActiveRun::failed(RunId::from_raw(3));
        assert_eq!(unit.run_id(), RunId::from_raw(3));
        assert!(!unit.is_live());
    }
}
