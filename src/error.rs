//! Error types for the lesson sandbox.
//!
//! Failures are terminal at component boundaries: the host controller,
//! runtime bootstrapper and scheduler convert every error below into a
//! console entry instead of propagating it, because the console exists to
//! show the learner's failures rather than the subsystem's own.

use thiserror::Error;

/// Errors that can occur while setting up or driving an execution.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// Failed to initialize the Wasm engine or link WASI.
    #[error("failed to initialize runtime: {0}")]
    RuntimeInit(#[source] anyhow::Error),

    /// Failed to compile or instantiate an interpreter module.
    #[error("failed to load interpreter module: {0}")]
    ModuleLoad(#[source] anyhow::Error),

    /// The interpreter wasm file was not found on disk.
    #[error("interpreter wasm not found at: {0}")]
    InterpreterNotFound(String),

    /// Downloading the secondary-language runtime asset failed.
    #[error("failed to fetch runtime asset from {url}: {reason}")]
    AssetFetch {
        /// The fixed, versioned asset location that was requested.
        url: String,
        /// Why the fetch failed (transport error, bad status, short body).
        reason: String,
    },

    /// The execution exceeded memory limits.
    #[error("memory limit exceeded: {0}")]
    MemoryLimitExceeded(String),

    /// The isolated context was torn down while the guest was still running,
    /// either by the grace-period timer or by a superseding run.
    #[error("execution interrupted by teardown")]
    Interrupted,

    /// The guest execution failed for a reason other than a clean exit.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// I/O error during setup or asset caching.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SandboxError {
    /// Check if this error represents a teardown interrupt.
    ///
    /// Interrupts are expected under normal cancellation and are never
    /// surfaced to the console.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, SandboxError::Interrupted)
    }

    /// Check if this error represents a memory limit violation.
    pub fn is_memory_limit(&self) -> bool {
        matches!(self, SandboxError::MemoryLimitExceeded(_))
    }

    /// Check if this error represents a missing or unfetchable runtime asset.
    pub fn is_asset_failure(&self) -> bool {
        matches!(
            self,
            SandboxError::AssetFetch { .. } | SandboxError::InterpreterNotFound(_)
        )
    }
}

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;
