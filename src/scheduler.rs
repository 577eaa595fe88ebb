//! The execution scheduler: the façade the rest of the application calls.
//!
//! Owns run identity and dispatch. `run` clears the console, mints a fresh
//! run identifier — which supersedes the previous run and silences its late
//! output — and hands the source to the execution family selected by the
//! language. Nothing is returned synchronously; all output arrives through
//! the console.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::AbortHandle;

use crate::config::SandboxConfig;
use crate::console::Console;
use crate::error::Result;
use crate::host::{ActiveRun, HostController};
use crate::protocol::{RunGate, RunId};
use crate::runtime::PythonRuntime;

/// The execution family for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    /// Markup/script, executed in an isolated per-run context.
    Web,
    /// Python, executed on the lazily-bootstrapped virtual machine.
    Python,
}

impl Language {
    /// Normalize a course-language string. Unknown or missing values fall
    /// back to the web family.
    pub fn from_course(course_language: Option<&str>) -> Self {
        match course_language
            .unwrap_or("web")
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "python" => Language::Python,
            _ => Language::Web,
        }
    }
}

/// Observable lifecycle of the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// A debounced auto-run is scheduled but has not dispatched yet.
    Pending,
    /// Dispatched; output may still arrive.
    Streaming,
    /// Completed, superseded or torn down; no further output.
    Settled,
}

/// What the scheduler currently holds for teardown on supersession.
enum ActiveUnit {
    Host(ActiveRun),
    Runtime {
        run_id: RunId,
        done: Arc<AtomicBool>,
    },
}

impl ActiveUnit {
    fn run_id(&self) -> RunId {
        match self {
            ActiveUnit::Host(unit) => unit.run_id(),
            ActiveUnit::Runtime { run_id, .. } => *run_id,
        }
    }

    fn is_live(&self) -> bool {
        match self {
            ActiveUnit::Host(unit) => unit.is_live(),
            ActiveUnit::Runtime { done, .. } => !done.load(Ordering::SeqCst),
        }
    }

    fn dispose(&self) {
        match self {
            ActiveUnit::Host(unit) => unit.dispose(),
            // The virtual machine is never interrupted mid-run; superseding
            // only stops its output via the run-id gate.
            ActiveUnit::Runtime { .. } => {}
        }
    }
}

/// The public entry point of the sandbox subsystem.
pub struct Scheduler {
    console: Console,
    config: SandboxConfig,
    gate: RunGate,
    host: HostController,
    runtime: Arc<PythonRuntime>,
    active: Mutex<Option<ActiveUnit>>,
    debounce: Mutex<Option<AbortHandle>>,
}

impl Scheduler {
    /// Create a scheduler with its own console.
    pub fn new(config: SandboxConfig) -> Result<Arc<Self>> {
        let console = Console::new();
        let gate = RunGate::new();
        let host = HostController::new(config.clone(), console.clone(), gate.clone())?;
        let runtime = Arc::new(PythonRuntime::new(
            config.clone(),
            console.clone(),
            gate.clone(),
        )?);

        Ok(Arc::new(Self {
            console,
            config,
            gate,
            host,
            runtime,
            active: Mutex::new(None),
            debounce: Mutex::new(None),
        }))
    }

    /// The live console the UI collaborator renders.
    pub fn console(&self) -> &Console {
        &self.console
    }

    /// The currently active run, if any.
    pub fn current_run(&self) -> Option<RunId> {
        self.gate.current()
    }

    /// Observable status of the current run.
    pub fn status(&self) -> Option<RunStatus> {
        if self.debounce.lock().unwrap().is_some() {
            return Some(RunStatus::Pending);
        }
        self.active.lock().unwrap().as_ref().map(|unit| {
            if unit.is_live() {
                RunStatus::Streaming
            } else {
                RunStatus::Settled
            }
        })
    }

    /// Clear the console without running anything.
    pub fn clear(&self) {
        self.console.clear();
    }

    /// Run `source` as `language`.
    ///
    /// Immediately supersedes any prior run: its host resources are torn
    /// down here rather than by their own grace timer, and any message it
    /// produces later fails run-id validation and is dropped.
    pub async fn run(&self, source: &str, language: Language) -> RunId {
        self.console.clear();
        let run_id = self.gate.mint();
        tracing::debug!(%run_id, ?language, "run started");

        if let Some(previous) = self.active.lock().unwrap().take() {
            previous.dispose();
        }

        let unit = match language {
            Language::Python => {
                let runtime = Arc::clone(&self.runtime);
                let src = source.to_string();
                let done = Arc::new(AtomicBool::new(false));
                let task_done = Arc::clone(&done);
                tokio::spawn(async move {
                    runtime.execute(&src, run_id).await;
                    task_done.store(true, Ordering::SeqCst);
                });
                ActiveUnit::Runtime { run_id, done }
            }
            Language::Web => ActiveUnit::Host(self.host.dispatch(source, run_id).await),
        };

        *self.active.lock().unwrap() = Some(unit);
        run_id
    }

    /// Debounced auto-run for the web family, invoked on source changes.
    ///
    /// The python family never auto-runs: its first invocation pays a large
    /// one-time download, so it stays behind an explicit action.
    pub fn schedule_auto_run(self: &Arc<Self>, source: &str) {
        let mut slot = self.debounce.lock().unwrap();
        if let Some(previous) = slot.take() {
            previous.abort();
        }

        let this = Arc::clone(self);
        let src = source.to_string();
        let delay = self.config.debounce;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.debounce.lock().unwrap().take();
            this.run(&src, Language::Web).await;
        });
        *slot = Some(handle.abort_handle());
    }
}
