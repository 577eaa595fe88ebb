//! Prelude module for convenient imports.

pub use crate::config::SandboxConfig;
pub use crate::console::{Console, LogEntry, LogLevel};
pub use crate::error::{Result, SandboxError};
pub use crate::scheduler::{Language, RunStatus, Scheduler};
