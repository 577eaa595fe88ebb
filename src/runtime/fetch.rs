//! On-demand download of the secondary-language interpreter asset.
//!
//! The interpreter wasm lives at a fixed, versioned URL and is cached on
//! disk under the platform cache directory. This is the subsystem's only
//! network dependency; once the asset is cached no further fetches happen
//! for the lifetime of the pin.

use std::path::PathBuf;

use crate::error::{Result, SandboxError};

/// Fetches the runtime asset into the local cache.
pub struct AssetFetcher {
    url: String,
    cache_dir: PathBuf,
}

impl AssetFetcher {
    /// Create a fetcher for `url`, caching under `cache_dir` or the
    /// platform default.
    pub fn new(url: impl Into<String>, cache_dir: Option<PathBuf>) -> Result<Self> {
        let cache_dir = match cache_dir {
            Some(dir) => dir,
            None => directories::ProjectDirs::from("", "", "lesson-sandbox")
                .ok_or_else(|| SandboxError::Config("no cache directory available".to_string()))?
                .cache_dir()
                .to_path_buf(),
        };
        Ok(Self {
            url: url.into(),
            cache_dir,
        })
    }

    /// Where the asset lands on disk, named after the last URL segment.
    pub fn cached_path(&self) -> PathBuf {
        let file_name = self
            .url
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("runtime.wasm");
        self.cache_dir.join(file_name)
    }

    /// Check whether the asset is already on disk.
    pub fn is_cached(&self) -> bool {
        self.cached_path().is_file()
    }

    /// Return the cached asset, downloading it first if necessary.
    pub async fn fetch(&self) -> Result<PathBuf> {
        let path = self.cached_path();
        if path.is_file() {
            return Ok(path);
        }

        std::fs::create_dir_all(&self.cache_dir)?;

        tracing::info!(url = %self.url, "downloading runtime asset");
        let response = reqwest::get(&self.url)
            .await
            .map_err(|e| self.fetch_error(e.to_string()))?
            .error_for_status()
            .map_err(|e| self.fetch_error(e.to_string()))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.fetch_error(e.to_string()))?;
        if bytes.is_empty() {
            return Err(self.fetch_error("empty response body".to_string()));
        }

        // Partial downloads never land at the final path.
        let partial = path.with_extension("part");
        std::fs::write(&partial, &bytes)?;
        std::fs::rename(&partial, &path)?;

        tracing::info!(path = %path.display(), "runtime asset cached");
        Ok(path)
    }

    fn fetch_error(&self, reason: String) -> SandboxError {
        SandboxError::AssetFetch {
            url: self.url.clone(),
            reason,
        }
    }
}
