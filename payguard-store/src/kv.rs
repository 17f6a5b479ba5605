//! In-process TTL key/value store with atomic per-key operations.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct KvInner {
    counters: HashMap<String, Entry<i64>>,
    strings: HashMap<String, Entry<String>>,
    marks: HashMap<String, Entry<()>>,
    windows: HashMap<String, VecDeque<Instant>>,
}

/// Shared key/value substrate.
///
/// Every operation takes the inner lock exactly once, which makes each call
/// atomic with respect to all concurrent callers on the same store. Expired
/// entries are evicted lazily on access.
#[derive(Debug, Default)]
pub struct KvStore {
    inner: Mutex<KvInner>,
}

impl KvStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically checks a counter against a cap and increments it.
    ///
    /// Refuses without mutating when `current + amount > cap`. On the first
    /// write for a key the supplied expiry is attached; later increments
    /// keep the original expiry. Returns `Ok(new_total)` or `Err(current)`.
    pub fn incr_capped(
        &self,
        key: &str,
        amount: i64,
        cap: i64,
        ttl: Duration,
    ) -> Result<i64, i64> {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("kv lock poisoned");

        let current = match inner.counters.get(key) {
            Some(entry) if !entry.expired(now) => entry.value,
            _ => 0,
        };
        if current + amount > cap {
            return Err(current);
        }

        let new_total = current + amount;
        match inner.counters.get_mut(key) {
            Some(entry) if !entry.expired(now) => entry.value = new_total,
            _ => {
                inner.counters.insert(
                    key.to_owned(),
                    Entry {
                        value: new_total,
                        expires_at: Some(now + ttl),
                    },
                );
            }
        }
        Ok(new_total)
    }

    /// Decrements a counter by `amount`, flooring at zero.
    pub fn decr(&self, key: &str, amount: i64) {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("kv lock poisoned");
        if let Some(entry) = inner.counters.get_mut(key) {
            if !entry.expired(now) {
                entry.value = (entry.value - amount).max(0);
            }
        }
    }

    /// Reads a counter, returning zero for absent or expired keys.
    #[must_use]
    pub fn counter(&self, key: &str) -> i64 {
        let now = Instant::now();
        let inner = self.inner.lock().expect("kv lock poisoned");
        match inner.counters.get(key) {
            Some(entry) if !entry.expired(now) => entry.value,
            _ => 0,
        }
    }

    /// Atomically sets a presence mark with expiry when absent.
    ///
    /// Returns `true` when the mark was newly set, `false` when a live mark
    /// already existed. Mark and expiry are written in the same step, so a
    /// crash can never leave an unexpiring mark behind.
    pub fn set_mark_if_absent(&self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("kv lock poisoned");
        match inner.marks.get(key) {
            Some(entry) if !entry.expired(now) => false,
            _ => {
                inner.marks.insert(
                    key.to_owned(),
                    Entry {
                        value: (),
                        expires_at: Some(now + ttl),
                    },
                );
                true
            }
        }
    }

    /// Stores a string value with expiry, replacing any previous value.
    pub fn set_string(&self, key: &str, value: impl Into<String>, ttl: Duration) {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("kv lock poisoned");
        inner.strings.insert(
            key.to_owned(),
            Entry {
                value: value.into(),
                expires_at: Some(now + ttl),
            },
        );
    }

    /// Reads a string value, returning `None` for absent or expired keys.
    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let inner = self.inner.lock().expect("kv lock poisoned");
        match inner.strings.get(key) {
            Some(entry) if !entry.expired(now) => Some(entry.value.clone()),
            _ => None,
        }
    }

    /// Records an event in a sliding window and checks it against a limit.
    ///
    /// Events older than `window` are dropped first; the new event is only
    /// recorded when the limit is not yet reached. Returns the admission
    /// outcome and the number of live events after the call.
    pub fn window_incr(&self, key: &str, window: Duration, max: u32) -> (bool, u32) {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("kv lock poisoned");
        let events = inner.windows.entry(key.to_owned()).or_default();
        while events
            .front()
            .is_some_and(|at| now.duration_since(*at) >= window)
        {
            events.pop_front();
        }

        let count = u32::try_from(events.len()).unwrap_or(u32::MAX);
        if count >= max {
            return (false, count);
        }
        events.push_back(now);
        (true, count + 1)
    }

    /// Drops all expired entries. Intended for a periodic maintenance sweep.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("kv lock poisoned");
        inner.counters.retain(|_, entry| !entry.expired(now));
        inner.strings.retain(|_, entry| !entry.expired(now));
        inner.marks.retain(|_, entry| !entry.expired(now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn incr_capped_refuses_without_mutating() {
        let kv = KvStore::new();
        assert_eq!(kv.incr_capped("budget:a:20260101", 600, 1_000, TTL), Ok(600));
        assert_eq!(
            kv.incr_capped("budget:a:20260101", 500, 1_000, TTL),
            Err(600)
        );
        assert_eq!(kv.counter("budget:a:20260101"), 600);
        assert_eq!(
            kv.incr_capped("budget:a:20260101", 400, 1_000, TTL),
            Ok(1_000)
        );
    }

    #[test]
    fn decr_floors_at_zero() {
        let kv = KvStore::new();
        kv.incr_capped("c", 100, 1_000, TTL).unwrap();
        kv.decr("c", 500);
        assert_eq!(kv.counter("c"), 0);
    }

    #[test]
    fn mark_claims_once() {
        let kv = KvStore::new();
        assert!(kv.set_mark_if_absent("idem:pout_1", TTL));
        assert!(!kv.set_mark_if_absent("idem:pout_1", TTL));
        assert!(kv.set_mark_if_absent("idem:pout_2", TTL));
    }

    #[test]
    fn expired_entries_read_as_absent() {
        let kv = KvStore::new();
        let ttl = Duration::from_millis(5);
        kv.incr_capped("c", 10, 100, ttl).unwrap();
        kv.set_mark_if_absent("m", ttl);
        kv.set_string("s", "value", ttl);
        std::thread::sleep(Duration::from_millis(15));

        assert_eq!(kv.counter("c"), 0);
        assert!(kv.set_mark_if_absent("m", TTL));
        assert_eq!(kv.get_string("s"), None);
    }

    #[test]
    fn window_enforces_limit() {
        let kv = KvStore::new();
        let window = Duration::from_secs(60);
        assert_eq!(kv.window_incr("w", window, 2), (true, 1));
        assert_eq!(kv.window_incr("w", window, 2), (true, 2));
        assert_eq!(kv.window_incr("w", window, 2), (false, 2));
    }

    #[test]
    fn window_slides() {
        let kv = KvStore::new();
        let window = Duration::from_millis(10);
        assert_eq!(kv.window_incr("w", window, 1), (true, 1));
        assert!(!kv.window_incr("w", window, 1).0);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(kv.window_incr("w", window, 1), (true, 1));
    }

    #[test]
    fn concurrent_incr_capped_never_oversubscribes() {
        use std::sync::Arc;

        let kv = Arc::new(KvStore::new());
        let mut handles = Vec::new();
        for _ in 0..20 {
            let kv = Arc::clone(&kv);
            handles.push(std::thread::spawn(move || {
                kv.incr_capped("budget:a:20260101", 100, 1_000, TTL).is_ok()
            }));
        }

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 10);
        assert_eq!(kv.counter("budget:a:20260101"), 1_000);
    }
}
