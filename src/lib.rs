//! # Lesson Sandbox
//!
//! A multi-language code execution sandbox with a streaming console, built
//! for a learning IDE. Source text a learner has written is executed in an
//! isolated context and structured output (info, warning, error, success)
//! streams back to the console in real time.
//!
//! Two execution families with very different runtime models sit behind one
//! uniform console:
//!
//! - **Script/markup**: each run gets a fresh, throwaway isolated context —
//!   a script-engine wasm instance with no filesystem, network or host
//!   access. An instrumentation preamble injected ahead of the user's code
//!   rebinds the console stream functions and forwards every call across
//!   the boundary as a validated protocol message.
//! - **Python**: a heavyweight interpreter wasm fetched on demand at first
//!   use, bootstrapped exactly once per process (single-flight) and reused
//!   for every subsequent run, with its standard streams redirected into
//!   the console.
//!
//! ## Example
//!
//! ```rust,ignore
//! use lesson_sandbox_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let scheduler = Scheduler::new(SandboxConfig::default())?;
//!
//!     scheduler.run("console.log(\"hi\")", Language::Web).await;
//!
//!     for entry in scheduler.console().snapshot() {
//!         println!("[{}] {}", entry.level, entry.message);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Cancellation model
//!
//! Starting a new run is the only cancellation mechanism. Each run carries a
//! fresh identifier; a message is appended to the console only while its run
//! is still the current one, so output from a superseded run is dropped by a
//! plain comparison rather than a teardown race. The previous run's isolated
//! context and listener are torn down immediately when a new run starts, or
//! by a grace-period timer if no new run arrives.

pub mod config;
pub mod console;
pub mod error;
pub mod exec;
pub mod host;
pub mod prelude;
pub mod protocol;
pub mod runtime;
pub mod scheduler;

// Re-export main types at crate root for convenience
pub use config::{SandboxConfig, SandboxConfigBuilder};
pub use console::{Console, LogEntry, LogLevel};
pub use error::{Result, SandboxError};
pub use protocol::{ProtocolMessage, RunGate, RunId, PROTOCOL_SOURCE};
pub use runtime::{PythonRuntime, RuntimeState};
pub use scheduler::{Language, RunStatus, Scheduler};
