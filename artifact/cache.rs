//! Process-local, write-once memoization for downloaded bytes and decoded
//! predictors.
//!
//! Entries are never evicted or refreshed. A failed load leaves no entry behind,
//! so the next request simply tries again.

use ahash::AHashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

/// A keyed cache whose values are computed at most once per key.
#[derive(Debug)]
pub struct MemoCache<K, V> {
    entries: Mutex<AHashMap<K, Arc<V>>>,
}

impl<K, V> Default for MemoCache<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(AHashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone, V> MemoCache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value for `key`, running `loader` only on the first
    /// successful request for that key.
    ///
    /// The lock is held across `loader`, so callers racing on a cold key load
    /// it once.
    pub fn get_or_load<E, F>(&self, key: K, loader: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = entries.get(&key) {
            return Ok(Arc::clone(value));
        }
        let value = Arc::new(loader()?);
        entries.insert(key, Arc::clone(&value));
        Ok(value)
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
    use std::cell::Cell;

    #[test]
    fn loader_runs_once_per_key() {
        let cache: MemoCache<String, u32> = MemoCache::new();
        let calls = Cell::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_load::<(), _>("a".to_string(), || {
                    calls.set(calls.get() + 1);
                    Ok(7)
                })
                .unwrap();
            assert_eq!(*value, 7);
        }

        assert_eq!(calls.get(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn distinct_keys_load_independently() {
        let cache: MemoCache<&'static str, String> = MemoCache::new();
        let a = cache
            .get_or_load::<(), _>("a", || Ok("first".to_string()))
            .unwrap();
        let b = cache
            .get_or_load::<(), _>("b", || Ok("second".to_string()))
            .unwrap();
        assert_eq!(a.as_str(), "first");
        assert_eq!(b.as_str(), "second");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn failures_are_not_cached() {
        let cache: MemoCache<u8, u8> = MemoCache::new();
        let err = cache.get_or_load(1, || Err("offline")).unwrap_err();
        assert_eq!(err, "offline");
        assert!(cache.is_empty());

        let value = cache.get_or_load::<&str, _>(1, || Ok(9)).unwrap();
        assert_eq!(*value, 9);
        let again = cache.get_or_load::<&str, _>(1, || Err("not reached")).unwrap();
        assert!(Arc::ptr_eq(&value, &again));
        assert_eq!(cache.len(), 1);
    }
}
