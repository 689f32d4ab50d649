//! Bounded, TTL-aware store for SSR fragments.
//!
//! Every access (reads included, since they update recency) goes through one
//! mutex around an `lru::LruCache`. On insert at capacity the oldest expired
//! entry is evicted first; only when nothing has expired does the least
//! recently used entry go.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use metrics::counter;
use tracing::debug;

use crate::domain::page::SsrFragment;

use super::config::SsrCacheConfig;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::store";

#[derive(Debug, Clone)]
struct CacheEntry {
    value: SsrFragment,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug)]
pub struct SsrCache {
    ttl: Duration,
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl SsrCache {
    /// Returns `None` when the configuration disables caching.
    pub fn new(config: &SsrCacheConfig) -> Option<Self> {
        if !config.is_enabled() {
            return None;
        }
        Some(Self {
            ttl: config.ttl,
            entries: Mutex::new(LruCache::new(config.max_entries_non_zero())),
        })
    }

    pub fn get(&self, key: &str) -> Option<SsrFragment> {
        self.get_at(key, Instant::now())
    }

    pub fn set(&self, key: &str, value: &SsrFragment) {
        self.set_at(key, value, Instant::now());
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "capacity").cap().get()
    }

    pub(crate) fn get_at(&self, key: &str, now: Instant) -> Option<SsrFragment> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "get");
        let expired = match entries.peek(key) {
            None => {
                counter!("inertia_ssr_cache_miss_total").increment(1);
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            entries.pop(key);
            counter!("inertia_ssr_cache_miss_total").increment(1);
            debug!(
                target = SOURCE,
                op = "get",
                result = "expired",
                "Purged expired SSR fragment"
            );
            return None;
        }

        counter!("inertia_ssr_cache_hit_total").increment(1);
        entries.get(key).map(|entry| entry.value.clone())
    }

    pub(crate) fn set_at(&self, key: &str, value: &SsrFragment, now: Instant) {
        let entry = CacheEntry {
            value: value.clone(),
            expires_at: now + self.ttl,
        };
        let mut entries = mutex_lock(&self.entries, SOURCE, "set");

        if entries.contains(key) {
            entries.put(key.to_string(), entry);
            return;
        }

        if entries.len() >= entries.cap().get() {
            evict_one(&mut entries, now);
        }
        entries.put(key.to_string(), entry);
    }
}

fn evict_one(entries: &mut LruCache<String, CacheEntry>, now: Instant) {
    // `iter().rev()` walks from least to most recently used.
    let expired = entries
        .iter()
        .rev()
        .find(|(_, entry)| entry.is_expired(now))
        .map(|(key, _)| key.clone());

    let reason = match expired {
        Some(key) => {
            entries.pop(&key);
            "expired"
        }
        None => {
            entries.pop_lru();
            "lru"
        }
    };

    counter!("inertia_ssr_cache_evict_total", "reason" => reason).increment(1);
    debug!(
        target = SOURCE,
        op = "evict",
        reason,
        "Evicted SSR fragment to make room"
    );
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    fn fragment(body: &str) -> SsrFragment {
        SsrFragment {
            head: vec![format!("<title>{body}</title>")],
            body: body.to_string(),
        }
    }

    fn cache(ttl_secs: u64, max_entries: usize) -> SsrCache {
        SsrCache::new(&SsrCacheConfig {
            ttl: Duration::from_secs(ttl_secs),
            max_entries,
        })
        .expect("cache enabled")
    }

    #[test]
    fn disabled_when_ttl_is_zero() {
        assert!(
            SsrCache::new(&SsrCacheConfig {
                ttl: Duration::ZERO,
                max_entries: 10,
            })
            .is_none()
        );
    }

    #[test]
    fn zero_capacity_uses_fallback() {
        assert_eq!(cache(60, 0).capacity(), 256);
    }

    #[test]
    fn returns_owned_copies() {
        let store = cache(60, 4);
        store.set("k", &fragment("a"));

        let mut first = store.get("k").expect("cached fragment");
        first.body.push_str("-mutated");
        first.head.clear();

        let second = store.get("k").expect("cached fragment");
        assert_eq!(second, fragment("a"));
    }

    #[test]
    fn expired_entry_is_purged_on_read() {
        let store = cache(60, 4);
        let start = Instant::now();
        store.set_at("k", &fragment("a"), start);

        assert!(store.get_at("k", start + Duration::from_secs(30)).is_some());
        assert!(store.get_at("k", start + Duration::from_secs(61)).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn evicts_least_recently_used_when_nothing_expired() {
        let store = cache(60, 2);
        let now = Instant::now();
        store.set_at("a", &fragment("a"), now);
        store.set_at("b", &fragment("b"), now);

        // Touch "a" so "b" becomes the LRU entry.
        assert!(store.get_at("a", now).is_some());
        store.set_at("c", &fragment("c"), now);

        assert_eq!(store.len(), 2);
        assert!(store.get_at("a", now).is_some());
        assert!(store.get_at("b", now).is_none());
        assert!(store.get_at("c", now).is_some());
    }

    #[test]
    fn prefers_evicting_expired_entries() {
        let store = cache(60, 3);
        let start = Instant::now();
        store.set_at("old", &fragment("old"), start);
        let later = start + Duration::from_secs(50);
        store.set_at("fresh-1", &fragment("f1"), later);
        store.set_at("fresh-2", &fragment("f2"), later);

        // Make "fresh-1" the LRU entry while "old" stays more recent.
        let check = later + Duration::from_secs(5);
        store.get_at("fresh-2", check);
        let mut guard = mutex_lock(&store.entries, SOURCE, "test");
        guard.promote("old");
        drop(guard);

        let insert_at = start + Duration::from_secs(61);
        store.set_at("new", &fragment("new"), insert_at);

        assert_eq!(store.len(), 3);
        assert!(store.get_at("fresh-1", insert_at).is_some());
        assert!(store.get_at("fresh-2", insert_at).is_some());
        assert!(store.get_at("new", insert_at).is_some());
        assert!(store.get_at("old", insert_at).is_none());
    }

    #[test]
    fn updating_refreshes_value_and_ttl() {
        let store = cache(60, 2);
        let start = Instant::now();
        store.set_at("k", &fragment("v1"), start);
        store.set_at("k", &fragment("v2"), start + Duration::from_secs(40));

        let read_at = start + Duration::from_secs(90);
        assert_eq!(store.get_at("k", read_at), Some(fragment("v2")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn update_promotes_existing_key() {
        let store = cache(60, 2);
        let now = Instant::now();
        store.set_at("a", &fragment("a"), now);
        store.set_at("b", &fragment("b"), now);
        store.set_at("a", &fragment("a2"), now);
        store.set_at("c", &fragment("c"), now);

        assert!(store.get_at("a", now).is_some());
        assert!(store.get_at("b", now).is_none());
    }

    #[test]
    fn recovers_from_poisoned_lock() {
        let store = cache(60, 2);
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store.entries.lock().expect("entries lock should be acquired");
            panic!("poison entries lock");
        }));

        store.set("k", &fragment("a"));
        assert!(store.get("k").is_some());
    }
}
