//! TTL bookkeeping: which key expires when
//!
//! Expiries live in a skip list ordered by instant, so the sweep only ever
//! looks at the front. A map from key to skip-list handle gives O(1)
//! overwrite and removal.

use std::collections::HashMap;
use std::time::Instant;

use ahash::RandomState;
use furyds::{DupList, Handle};
use parking_lot::Mutex;

/// Returned by [`TtlControl::get_ttl`] for keys without an expiry
pub const NO_TTL: f64 = -1.0;

/// Thread-safe expiry index
pub struct TtlControl {
    inner: Mutex<TtlInner>,
}

struct TtlInner {
    list: DupList<Instant, String>,
    entries: HashMap<String, Handle, RandomState>,
}

impl TtlControl {
    /// Create an empty index
    ///
    /// # Panics
    /// If `max_height` is not in `2..64`.
    pub fn new(max_height: usize, seed: Option<u64>) -> Self {
        let list = match seed {
            Some(seed) => DupList::with_seed(max_height, seed),
            None => DupList::new(max_height),
        };

        Self {
            inner: Mutex::new(TtlInner {
                list,
                entries: HashMap::default(),
            }),
        }
    }

    /// Set the expiry of `key`, replacing any previous one
    pub fn set_expiry(&self, key: &str, at: Instant) {
        let mut inner = self.inner.lock();

        if let Some(old) = inner.entries.remove(key) {
            inner.list.remove(old);
        }
        let handle = inner.list.insert(at, key.to_owned());
        inner.entries.insert(key.to_owned(), handle);
    }

    /// Drop the expiry of `key`; returns whether it had one
    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();

        match inner.entries.remove(key) {
            Some(handle) => {
                inner.list.remove(handle);
                true
            }
            None => false,
        }
    }

    /// Expiry instant of `key`
    pub fn expiry(&self, key: &str) -> Option<Instant> {
        let inner = self.inner.lock();
        let handle = *inner.entries.get(key)?;
        inner.list.key(handle).copied()
    }

    /// Seconds until each key expires, in argument order
    ///
    /// [`NO_TTL`] for keys without an expiry, `0.0` for keys already due but
    /// not yet swept.
    pub fn get_ttl<S: AsRef<str>>(&self, keys: &[S]) -> Vec<f64> {
        let now = Instant::now();
        let inner = self.inner.lock();

        keys.iter()
            .map(|key| {
                inner
                    .entries
                    .get(key.as_ref())
                    .and_then(|handle| inner.list.key(*handle))
                    .map_or(NO_TTL, |at| at.saturating_duration_since(now).as_secs_f64())
            })
            .collect()
    }

    /// Check whether the earliest expiry is at or before `now`
    pub fn peek_expired(&self, now: Instant) -> bool {
        let inner = self.inner.lock();
        matches!(inner.list.peek_first(), Some((at, _)) if *at <= now)
    }

    /// Remove and return every key expiring at or before `now`, earliest first
    pub fn pop_expired(&self, now: Instant) -> Vec<String> {
        let mut inner = self.inner.lock();
        let mut expired = Vec::new();

        while matches!(inner.list.peek_first(), Some((at, _)) if *at <= now) {
            if let Some((_, key)) = inner.list.remove_first() {
                inner.entries.remove(&key);
                expired.push(key);
            }
        }

        expired
    }

    /// Number of keys with an expiry
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Check whether no key has an expiry
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
