//! SSR fragment cache.
//!
//! Rendered `{head, body}` fragments are keyed by the SHA-256 digest of the
//! page JSON that produced them, so identical pages reuse one render.
//!
//! ```toml
//! [ssr]
//! cache_ttl_secs = 300     # 0 disables the cache
//! cache_max_entries = 1024 # 0 falls back to 256
//! ```

mod config;
mod keys;
pub(crate) mod lock;
mod store;

pub use config::{
    DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_CACHE_TTL, FALLBACK_CACHE_MAX_ENTRIES, SsrCacheConfig,
};
pub use keys::content_digest;
pub use store::SsrCache;
