//! Resource limiting for guest stores.

use wasmtime::ResourceLimiter;

/// Resource limiter enforcing memory and table growth limits on one store.
pub struct ContextLimiter {
    max_memory: u64,
    current_memory: u64,
    max_table_elements: u64,
    limit_exceeded: bool,
}

impl ContextLimiter {
    /// Create a limiter with the given memory ceiling.
    pub fn new(max_memory: u64) -> Self {
        Self {
            max_memory,
            current_memory: 0,
            max_table_elements: 10_000,
            limit_exceeded: false,
        }
    }

    /// Check whether any limit has been exceeded.
    pub fn limit_exceeded(&self) -> bool {
        self.limit_exceeded
    }

    /// Current guest memory allocation in bytes.
    pub fn current_memory(&self) -> u64 {
        self.current_memory
    }
}

impl ResourceLimiter for ContextLimiter {
    fn memory_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        let desired = desired as u64;
        if desired > self.max_memory {
            self.limit_exceeded = true;
            return Ok(false);
        }
        self.current_memory = desired;
        Ok(true)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        if desired as u64 > self.max_table_elements {
            self.limit_exceeded = true;
            return Ok(false);
        }
        Ok(true)
    }
}

/// Store data carried by every guest store: the limiter plus the WASI context.
pub struct StoreData {
    /// The resource limiter.
    pub limiter: ContextLimiter,
    /// WASI Preview 1 context for the guest.
    pub wasi: wasmtime_wasi::preview1::WasiP1Ctx,
}

impl StoreData {
    /// Create store data with the given memory limit and WASI context.
    pub fn new(max_memory: u64, wasi: wasmtime_wasi::preview1::WasiP1Ctx) -> Self {
        Self {
            limiter: ContextLimiter::new(max_memory),
            wasi,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_allows_within_limit() {
        let mut limiter = ContextLimiter::new(1024 * 1024);
        assert!(limiter.memory_growing(0, 512 * 1024, None).unwrap());
        assert!(!limiter.limit_exceeded());
        assert_eq!(limiter.current_memory(), 512 * 1024);
    }

    #[test]
    fn test_limiter_denies_over_limit() {
        let mut limiter = ContextLimiter::new(1024 * 1024);
        assert!(!limiter.memory_growing(0, 2 * 1024 * 1024, None).unwrap());
        assert!(limiter.limit_exceeded());
    }

    #[test]
    fn test_table_growth_bounded() {
        let mut limiter = ContextLimiter::new(1024 * 1024);
        assert!(limiter.table_growing(0, 100, None).unwrap());
        assert!(!limiter.table_growing(0, 1_000_000, None).unwrap());
        assert!(limiter.limit_exceeded());
    }
}
