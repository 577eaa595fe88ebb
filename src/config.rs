//! Sandbox configuration with builder pattern.

use std::path::PathBuf;
use std::time::Duration;

/// Pinned location of the secondary-language interpreter asset. Versioned
/// so a cached download stays valid for the lifetime of the pin.
pub const DEFAULT_RUNTIME_URL: &str =
    "https://github.com/RustPython/RustPython/releases/download/v0.4.0/rustpython.wasm";

/// Configuration for the sandbox subsystem.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// How long a script-family context may live after dispatch before it is
    /// torn down. Long enough for synchronous and near-immediate async
    /// output, short enough to bound resource growth.
    pub grace_period: Duration,
    /// Auto-run debounce for the script family on source changes.
    pub debounce: Duration,
    /// Maximum guest memory in bytes, per store.
    pub max_memory: u64,
    /// Poll interval for draining captured guest output into the console.
    pub stream_poll_interval: Duration,
    /// Path to the script-engine wasm (the script/markup family substrate).
    pub engine_path: PathBuf,
    /// Fixed, versioned URL of the secondary-language interpreter wasm.
    pub runtime_url: String,
    /// Override for the runtime asset cache directory. Defaults to the
    /// platform cache dir.
    pub runtime_cache_dir: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(1),
            debounce: Duration::from_millis(450),
            max_memory: 64 * 1024 * 1024, // 64MB
            stream_poll_interval: Duration::from_millis(25),
            engine_path: PathBuf::from("assets/quickjs.wasm"),
            runtime_url: DEFAULT_RUNTIME_URL.to_string(),
            runtime_cache_dir: None,
        }
    }
}

impl SandboxConfig {
    /// Create a new builder for `SandboxConfig`.
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }
}

/// Builder for creating `SandboxConfig` instances.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfigBuilder {
    grace_period: Option<Duration>,
    debounce: Option<Duration>,
    max_memory: Option<u64>,
    stream_poll_interval: Option<Duration>,
    engine_path: Option<PathBuf>,
    runtime_url: Option<String>,
    runtime_cache_dir: Option<PathBuf>,
}

impl SandboxConfigBuilder {
    /// Set the script-context grace period.
    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = Some(grace);
        self
    }

    /// Set the auto-run debounce interval.
    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = Some(debounce);
        self
    }

    /// Set the maximum guest memory limit in bytes.
    pub fn max_memory(mut self, bytes: u64) -> Self {
        self.max_memory = Some(bytes);
        self
    }

    /// Set the output drain poll interval.
    pub fn stream_poll_interval(mut self, interval: Duration) -> Self {
        self.stream_poll_interval = Some(interval);
        self
    }

    /// Set the path to the script-engine wasm.
    pub fn engine_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.engine_path = Some(path.into());
        self
    }

    /// Set the URL of the secondary-language interpreter asset.
    pub fn runtime_url(mut self, url: impl Into<String>) -> Self {
        self.runtime_url = Some(url.into());
        self
    }

    /// Set the runtime asset cache directory.
    pub fn runtime_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runtime_cache_dir = Some(dir.into());
        self
    }

    /// Build the `SandboxConfig`.
    pub fn build(self) -> SandboxConfig {
        let default = SandboxConfig::default();
        SandboxConfig {
            grace_period: self.grace_period.unwrap_or(default.grace_period),
            debounce: self.debounce.unwrap_or(default.debounce),
            max_memory: self.max_memory.unwrap_or(default.max_memory),
            stream_poll_interval: self
                .stream_poll_interval
                .unwrap_or(default.stream_poll_interval),
            engine_path: self.engine_path.unwrap_or(default.engine_path),
            runtime_url: self.runtime_url.unwrap_or(default.runtime_url),
            runtime_cache_dir: self.runtime_cache_dir.or(default.runtime_cache_dir),
        }
    }
}
