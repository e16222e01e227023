//! Time-bounded caches with in-flight deduplication

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use strand_core::Result;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, Clone)]
struct Entry<T> {
    value: T,
    fetched_at: Instant,
}

/// One cached value with a time-to-live.
///
/// The slot lock is held across the fetch, so concurrent callers queue
/// behind one request and then share its result.
#[derive(Debug)]
pub struct TtlCache<T> {
    ttl: Duration,
    slot: AsyncMutex<Option<Entry<T>>>,
    fetches: AtomicU64,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: AsyncMutex::new(None),
            fetches: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached value if fresh, otherwise the result of `fetch`.
    ///
    /// `force` skips the freshness check, but a fetch that completed while
    /// this caller was waiting still counts as fresh.
    pub async fn get_or_fetch<F, Fut>(&self, force: bool, fetch: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let observed = self.fetches.load(Ordering::SeqCst);
        let mut slot = self.slot.lock().await;

        if let Some(entry) = slot.as_ref() {
            let refreshed_while_waiting = self.fetches.load(Ordering::SeqCst) != observed;
            if refreshed_while_waiting || (!force && entry.fetched_at.elapsed() < self.ttl) {
                return Ok(entry.value.clone());
            }
        }

        let value = fetch().await?;
        *slot = Some(Entry {
            value: value.clone(),
            fetched_at: Instant::now(),
        });
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    }

    /// Last value regardless of age
    pub async fn peek(&self) -> Option<T> {
        self.slot.lock().await.as_ref().map(|e| e.value.clone())
    }

    /// Replace the cached value without fetching
    pub async fn set(&self, value: T) {
        *self.slot.lock().await = Some(Entry {
            value,
            fetched_at: Instant::now(),
        });
    }

    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }

    pub async fn fetched_at(&self) -> Option<Instant> {
        self.slot.lock().await.as_ref().map(|e| e.fetched_at)
    }

    /// Completed fetches since creation
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Empty or past its TTL; a slot locked by a running fetch is never stale
    fn is_stale(&self) -> bool {
        match self.slot.try_lock() {
            Ok(slot) => slot
                .as_ref()
                .map_or(true, |entry| entry.fetched_at.elapsed() >= self.ttl),
            Err(_) => false,
        }
    }
}

/// A [`TtlCache`] per key.
///
/// Inserting a new key drops every other entry that is stale and not in use,
/// so the map holds at most the keys seen within one TTL.
#[derive(Debug)]
pub struct KeyedTtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, Arc<TtlCache<V>>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> KeyedTtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_or_fetch<F, Fut>(&self, key: &K, force: bool, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let cache = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            if !entries.contains_key(key) {
                entries.retain(|_, cache| Arc::strong_count(cache) > 1 || !cache.is_stale());
            }
            Arc::clone(
                entries
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(TtlCache::new(self.ttl))),
            )
        };
        cache.get_or_fetch(force, fetch).await
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use strand_core::StrandError;

    #[tokio::test]
    async fn test_fresh_value_is_reused() {
        let cache = TtlCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_fetch(false, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await
                .unwrap();
            assert_eq!(value, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_value_is_refetched() {
        let cache = TtlCache::new(Duration::ZERO);
        cache.get_or_fetch(false, || async { Ok(1) }).await.unwrap();
        let value = cache.get_or_fetch(false, || async { Ok(2) }).await.unwrap();
        assert_eq!(value, 2);
        assert_eq!(cache.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_force_and_invalidate() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.get_or_fetch(false, || async { Ok("a") }).await.unwrap();

        let forced = cache.get_or_fetch(true, || async { Ok("b") }).await.unwrap();
        assert_eq!(forced, "b");

        cache.invalidate().await;
        assert!(cache.peek().await.is_none());
        let value = cache.get_or_fetch(false, || async { Ok("c") }).await.unwrap();
        assert_eq!(value, "c");
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_value() {
        let cache = TtlCache::new(Duration::ZERO);
        cache.get_or_fetch(false, || async { Ok(1) }).await.unwrap();

        let err = cache
            .get_or_fetch(false, || async { Err::<i32, _>(StrandError::Transport("down".to_string())) })
            .await;
        assert!(err.is_err());
        assert_eq!(cache.peek().await, Some(1));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let cache = Arc::new(TtlCache::new(Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch(true, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(42)
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_keyed_cache_separates_keys() {
        let cache: KeyedTtlCache<String, u32> = KeyedTtlCache::new(Duration::from_secs(60));
        let a = cache
            .get_or_fetch(&"a".to_string(), false, || async { Ok(1) })
            .await
            .unwrap();
        let b = cache
            .get_or_fetch(&"b".to_string(), false, || async { Ok(2) })
            .await
            .unwrap();
        let a_again = cache
            .get_or_fetch(&"a".to_string(), false, || async { Ok(3) })
            .await
            .unwrap();

        assert_eq!((a, b, a_again), (1, 2, 1));
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_keyed_cache_drops_expired_entries_on_insert() {
        let cache: KeyedTtlCache<String, u32> = KeyedTtlCache::new(Duration::ZERO);
        for (i, key) in ["a", "b", "c"].into_iter().enumerate() {
            cache
                .get_or_fetch(&key.to_string(), false, || async move { Ok(i as u32) })
                .await
                .unwrap();
            assert_eq!(cache.len(), 1);
        }

        let fresh: KeyedTtlCache<String, u32> = KeyedTtlCache::new(Duration::from_secs(60));
        for key in ["a", "b", "c"] {
            fresh
                .get_or_fetch(&key.to_string(), false, || async { Ok(0) })
                .await
                .unwrap();
        }
        assert_eq!(fresh.len(), 3);
    }
}
