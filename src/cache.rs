//! Process-wide result cache with per-entry expiration.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default time-to-live for cached entries.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Entry count at which a write first sweeps out every expired entry.
pub const SWEEP_THRESHOLD: usize = 256;

struct Entry {
    value: Arc<dyn Any + Send + Sync>,
    expires_at: Instant,
}

/// Thread-safe key/value cache shared by every component.
///
/// Values of any `Clone + Send + Sync + 'static` type can be stored; a lookup
/// with the wrong type behaves like a miss. Expired entries are evicted when
/// read, and a write into a cache holding [`SWEEP_THRESHOLD`] or more entries
/// drops all expired ones first. Writes are unconditional: the last writer for
/// a key wins.
///
/// Cloning a `ResultCache` is cheap and yields a handle to the same storage.
#[derive(Clone)]
pub struct ResultCache {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    default_ttl: Duration,
}

impl ResultCache {
    /// Create an empty cache using [`DEFAULT_TTL`].
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    /// Create an empty cache whose entries expire after `default_ttl` unless a
    /// ttl is given explicitly on [`set`](Self::set).
    pub fn with_ttl(default_ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            default_ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fetch a live entry. Returns `None` for blank keys, misses, expired
    /// entries, and entries stored with a different type.
    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &str) -> Option<T> {
        if key.trim().is_empty() {
            return None;
        }

        let mut entries = self.lock();
        let expired = match entries.get(key) {
            None => return None,
            Some(entry) => entry.expires_at <= Instant::now(),
        };
        if expired {
            entries.remove(key);
            tracing::debug!("Evicted expired cache entry \"{key}\"");
            return None;
        }

        entries
            .get(key)
            .and_then(|entry| entry.value.downcast_ref::<T>())
            .cloned()
    }

    /// Store `value` under `key` for `ttl` (or the default ttl), returning the
    /// value back to the caller. Blank keys are not stored.
    pub fn set<T: Clone + Send + Sync + 'static>(&self, key: &str, value: T, ttl: Option<Duration>) -> T {
        if key.trim().is_empty() {
            tracing::warn!("Attempted to cache a value under a blank key. Skipped.");
            return value;
        }

        let ttl = ttl.unwrap_or(self.default_ttl);
        let now = Instant::now();
        let mut entries = self.lock();
        if entries.len() >= SWEEP_THRESHOLD {
            sweep_expired(&mut entries, now);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Arc::new(value.clone()),
                expires_at: now + ttl,
            },
        );
        drop(entries);
        tracing::debug!(
            "Cached value of type {} with key \"{key}\" for {ttl:?}",
            std::any::type_name::<T>()
        );
        value
    }

    /// Remove the entry for `key`, if any.
    pub fn remove(&self, key: &str) {
        if key.trim().is_empty() {
            return;
        }
        if self.lock().remove(key).is_some() {
            tracing::debug!("Removed cache entry \"{key}\"");
        }
    }

    /// Drop every expired entry now.
    pub fn purge_expired(&self) {
        sweep_expired(&mut self.lock(), Instant::now());
    }

    /// Number of stored entries, including ones that expired but were not yet
    /// evicted.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn sweep_expired(entries: &mut HashMap<String, Entry>, now: Instant) {
    let before = entries.len();
    entries.retain(|_, entry| entry.expires_at > now);
    let evicted = before - entries.len();
    if evicted > 0 {
        tracing::debug!("Swept {evicted} expired cache entries");
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_entries_are_swept_on_write() {
        let cache = ResultCache::new();
        cache.set("live", 1_u8, None);
        for i in 0..1000 {
            cache.set(&format!("CleanDescriptionHtml_Allo_/m_{i:016x}"), i, Some(Duration::ZERO));
        }

        assert!(cache.len() <= SWEEP_THRESHOLD);
        assert_eq!(cache.get::<u8>("live"), Some(1));
    }

    #[test]
    fn purge_drops_only_expired_entries() {
        let cache = ResultCache::new();
        cache.set("live", 1_u8, None);
        cache.set("stale", 2_u8, Some(Duration::ZERO));

        cache.purge_expired();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get::<u8>("live"), Some(1));
    }

    #[test]
    fn set_then_get_returns_value() {
        let cache = ResultCache::new();
        let stored = cache.set("Document_Allo_https://allo.ua/x", "<p>x</p>".to_string(), None);
        assert_eq!(stored, "<p>x</p>");
        assert_eq!(
            cache.get::<String>("Document_Allo_https://allo.ua/x").as_deref(),
            Some("<p>x</p>")
        );
    }

    #[test]
    fn wrong_type_is_a_miss() {
        let cache = ResultCache::new();
        cache.set("k", 42_u32, None);
        assert!(cache.get::<String>("k").is_none());
        assert_eq!(cache.get::<u32>("k"), Some(42));
    }

    #[test]
    fn expired_entries_are_evicted() {
        let cache = ResultCache::new();
        cache.set("short", 1_u8, Some(Duration::ZERO));
        assert!(cache.get::<u8>("short").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn blank_keys_are_ignored() {
        let cache = ResultCache::new();
        cache.set("  ", 1_u8, None);
        assert!(cache.is_empty());
        assert!(cache.get::<u8>("").is_none());
    }

    #[test]
    fn last_writer_wins_and_remove_clears() {
        let cache = ResultCache::new();
        cache.set("k", "first".to_string(), None);
        cache.set("k", "second".to_string(), None);
        assert_eq!(cache.get::<String>("k").as_deref(), Some("second"));

        cache.remove("k");
        assert!(cache.get::<String>("k").is_none());
    }

    #[test]
    fn clones_share_storage_across_threads() {
        let cache = ResultCache::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    cache.set(&format!("key-{i}"), i, None);
                    cache.get::<i32>(&format!("key-{i}"))
                })
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().unwrap(), Some(i as i32));
        }
        assert_eq!(cache.len(), 8);
    }
}
