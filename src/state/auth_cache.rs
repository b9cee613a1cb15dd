use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::util::mask_credential;

struct Entry<S> {
    session: Arc<S>,
    last_used: u64,
}

struct Inner<S> {
    entries: FxHashMap<String, Entry<S>>,
    tick: u64,
}

/// Bounded LRU of per-tenant sessions keyed by refresh token.
///
/// Lookup and insertion happen under one lock, so concurrent first requests
/// for a key construct exactly one session.
pub(crate) struct AuthCache<S> {
    max_size: usize,
    inner: Mutex<Inner<S>>,
}

impl<S> AuthCache<S> {
    #[must_use]
    pub(crate) fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            inner: Mutex::new(Inner {
                entries: FxHashMap::default(),
                tick: 0,
            }),
        }
    }

    pub(crate) fn get_or_create_with(&self, key: &str, make: impl FnOnce() -> S) -> Arc<S> {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;

        if let Some(entry) = inner.entries.get_mut(key) {
            entry.last_used = tick;
            return Arc::clone(&entry.session);
        }

        if inner.entries.len() >= self.max_size {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                inner.entries.remove(&oldest);
                tracing::debug!(
                    evicted = %mask_credential(&oldest),
                    max_size = self.max_size,
                    "auth cache full, evicted least recently used session"
                );
            }
        }

        let session = Arc::new(make());
        inner.entries.insert(
            key.to_string(),
            Entry {
                session: Arc::clone(&session),
                last_used: tick,
            },
        );
        tracing::info!(
            key = %mask_credential(key),
            cached = inner.entries.len(),
            "created tenant session"
        );
        session
    }

    pub(crate) fn remove(&self, key: &str) -> bool {
        self.inner.lock().entries.remove(key).is_some()
    }

    pub(crate) fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn returns_same_session_for_same_key() {
        let cache = AuthCache::new(4);
        let first = cache.get_or_create_with("token-a", || 1);
        let second = cache.get_or_create_with("token-a", || 2);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*second, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = AuthCache::new(2);
        cache.get_or_create_with("a", || "a");
        cache.get_or_create_with("b", || "b");
        // touch a so b becomes the oldest
        cache.get_or_create_with("a", || "unused");
        cache.get_or_create_with("c", || "c");

        assert_eq!(cache.len(), 2);
        assert!(cache.remove("a"));
        assert!(!cache.remove("b"));
        assert!(cache.remove("c"));
    }

    #[test]
    fn clear_drops_everything() {
        let cache = AuthCache::new(3);
        cache.get_or_create_with("a", || 0);
        cache.get_or_create_with("b", || 0);
        cache.clear();
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn concurrent_first_requests_construct_once() {
        let cache = Arc::new(AuthCache::new(8));
        let constructed = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let constructed = Arc::clone(&constructed);
                std::thread::spawn(move || {
                    cache.get_or_create_with("shared", || {
                        constructed.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(std::time::Duration::from_millis(5));
                        7
                    })
                })
            })
            .collect();
        let sessions: Vec<Arc<i32>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(constructed.load(Ordering::SeqCst), 1);
        assert!(sessions.iter().all(|s| Arc::ptr_eq(s, &sessions[0])));
    }
}
