use indexmap::IndexMap;
use std::{future::Future, hash::Hash, sync::Arc};
use tokio::{
    sync::Mutex,
    time::{Duration, Instant},
};
use tracing::debug;

/// Capacity and TTL bounded key/value store.
///
/// Entries live in an insertion-ordered map: the front is the least recently
/// used entry, a hit is moved to the back. Expired entries are dropped lazily
/// when they are looked up.
pub struct TtlCache<K, V> {
    entries: Mutex<IndexMap<K, CacheEntry<V>>>,
    max_entries: usize,
    default_ttl: Duration,
}

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(IndexMap::new()),
            max_entries: max_entries.max(1),
            default_ttl,
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.entries.lock().await;
        let entry = guard.shift_remove(key)?;
        if entry.is_expired(Instant::now()) {
            return None;
        }
        let value = entry.value.clone();
        guard.insert(key.clone(), entry);
        Some(value)
    }

    pub async fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.default_ttl).await;
    }

    pub async fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let mut guard = self.entries.lock().await;
        let replaced = guard.shift_remove(&key).is_some();
        if !replaced && guard.len() >= self.max_entries {
            guard.shift_remove_index(0);
            debug!(target = "flipscout.cache", capacity = self.max_entries, "cache_evicted_lru");
        }
        guard.insert(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Membership check. Does not promote the entry.
    pub async fn has(&self, key: &K) -> bool {
        let mut guard = self.entries.lock().await;
        let expired = match guard.get(key) {
            Some(entry) => entry.is_expired(Instant::now()),
            None => return false,
        };
        if expired {
            guard.shift_remove(key);
        }
        !expired
    }

    pub async fn delete(&self, key: &K) -> bool {
        self.entries.lock().await.shift_remove(key).is_some()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Returns the cached value or runs `lookup` and stores its success.
    /// Errors pass through untouched and are never cached. The lock is not held
    /// while `lookup` runs, so two concurrent misses may both call it.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: K, lookup: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(hit) = self.get(&key).await {
            return Ok(hit);
        }
        let value = lookup().await?;
        self.set(key, value.clone()).await;
        Ok(value)
    }
}

/// Wraps a single-argument async lookup so repeated calls hit the cache.
pub struct Memoized<K, V, F> {
    cache: Arc<TtlCache<K, V>>,
    lookup: F,
}

impl<K, V, F> Memoized<K, V, F>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(cache: Arc<TtlCache<K, V>>, lookup: F) -> Self {
        Self { cache, lookup }
    }

    pub async fn call<Fut, E>(&self, arg: K) -> Result<V, E>
    where
        F: Fn(K) -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let lookup = &self.lookup;
        let key = arg.clone();
        self.cache
            .get_or_try_insert_with(key, || lookup(arg))
            .await
    }

    pub fn cache(&self) -> &TtlCache<K, V> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn evicts_first_inserted_when_full() {
        let cache = TtlCache::new(3, Duration::from_secs(60));
        for key in ["a", "b", "c", "d"] {
            cache.set(key.to_string(), key.len()).await;
        }
        assert!(!cache.has(&"a".to_string()).await);
        assert!(cache.has(&"b".to_string()).await);
        assert!(cache.has(&"d".to_string()).await);
        assert_eq!(cache.len().await, 3);
    }

    #[tokio::test]
    async fn read_promotes_entry_past_next_eviction() {
        let cache = TtlCache::new(3, Duration::from_secs(60));
        cache.set("a", 1).await;
        cache.set("b", 2).await;
        cache.set("c", 3).await;
        assert_eq!(cache.get(&"a").await, Some(1));
        cache.set("d", 4).await;
        assert_eq!(cache.get(&"a").await, Some(1));
        assert_eq!(cache.get(&"b").await, None);
    }

    #[tokio::test]
    async fn overwriting_existing_key_does_not_evict() {
        let cache = TtlCache::new(2, Duration::from_secs(60));
        cache.set("a", 1).await;
        cache.set("b", 2).await;
        cache.set("a", 10).await;
        assert_eq!(cache.get(&"a").await, Some(10));
        assert_eq!(cache.get(&"b").await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_miss() {
        let cache = TtlCache::new(8, Duration::from_secs(30));
        cache.set("short", 1).await;
        cache.set_with_ttl("long", 2, Duration::from_secs(120)).await;
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.get(&"short").await, None);
        assert_eq!(cache.get(&"long").await, Some(2));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let cache = TtlCache::new(4, Duration::from_secs(60));
        cache.set(1u32, "x").await;
        cache.set(2u32, "y").await;
        assert!(cache.delete(&1).await);
        assert!(!cache.delete(&1).await);
        cache.clear().await;
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn memoized_lookup_runs_once_per_key() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let memo = Memoized::new(
            Arc::new(TtlCache::new(16, Duration::from_secs(60))),
            move |query: String| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<usize, String>(query.len())
                }
            },
        );
        assert_eq!(memo.call("iphone".to_string()).await, Ok(6));
        assert_eq!(memo.call("iphone".to_string()).await, Ok(6));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn memoized_errors_are_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let memo = Memoized::new(
            Arc::new(TtlCache::new(16, Duration::from_secs(60))),
            move |_query: String| {
                let counter = counter.clone();
                async move {
                    let attempt = counter.fetch_add(1, Ordering::SeqCst);
                    if attempt == 0 {
                        Err("upstream timeout".to_string())
                    } else {
                        Ok(42usize)
                    }
                }
            },
        );
        assert!(memo.call("switch".to_string()).await.is_err());
        assert_eq!(memo.call("switch".to_string()).await, Ok(42));
        assert_eq!(memo.cache().len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_respect_capacity() {
        let cache = Arc::new(TtlCache::new(8, Duration::from_secs(60)));
        let mut handles = Vec::new();
        for task in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for round in 0..20 {
                    let key = format!("{task}-{round}");
                    cache.set(key.clone(), round).await;
                    let _ = cache.get(&key).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(cache.len().await, 8);
    }
}
