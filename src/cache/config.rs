//! SSR cache sizing.

use std::num::NonZeroUsize;
use std::time::Duration;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 1024;
/// Capacity used when a TTL is set but the entry limit is left at zero.
pub const FALLBACK_CACHE_MAX_ENTRIES: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SsrCacheConfig {
    /// Lifetime of a cached fragment. Zero disables the cache.
    pub ttl: Duration,
    /// Maximum cached fragments. Zero falls back to 256.
    pub max_entries: usize,
}

impl Default for SsrCacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CACHE_TTL,
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
        }
    }
}

impl SsrCacheConfig {
    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries)
            .or(NonZeroUsize::new(FALLBACK_CACHE_MAX_ENTRIES))
            .unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = SsrCacheConfig::default();
        assert!(config.is_enabled());
        assert_eq!(config.ttl, Duration::from_secs(300));
        assert_eq!(config.max_entries_non_zero().get(), 1024);
    }

    #[test]
    fn zero_ttl_disables_cache() {
        let config = SsrCacheConfig {
            ttl: Duration::ZERO,
            ..Default::default()
        };
        assert!(!config.is_enabled());
    }

    #[test]
    fn zero_capacity_falls_back() {
        let config = SsrCacheConfig {
            max_entries: 0,
            ..Default::default()
        };
        assert_eq!(config.max_entries_non_zero().get(), 256);
    }
}
