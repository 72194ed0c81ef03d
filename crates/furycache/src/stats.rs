//! Access statistics feeding the eviction policy
//!
//! Every read touches its key: the count-min sketch counts it, and the key
//! becomes "relevant", held in a recency list (oldest first) and in a skip
//! list ordered by approximate count. A periodic sweep demotes keys whose
//! last touch fell outside the relevance window into the "irrelevant" pool,
//! another count-ordered skip list. Eviction drains the irrelevant pool
//! first, least counted first, and only then the relevant one.
//!
//! Statistics are eventually consistent with the payload map: touches arrive
//! asynchronously and may name keys that were never cached.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use ahash::RandomState;
use furyds::{DupList, Handle, RecencyHandle, RecencyList, MIN_HEIGHT};
use parking_lot::{Mutex, MutexGuard};

use crate::sketch::CountMinSketch;

#[derive(Debug, Clone, Copy)]
struct RelevantTuple {
    recency: RecencyHandle,
    freq: Handle,
}

/// Thread-safe access statistics
pub struct AccessStats {
    inner: Mutex<StatsInner>,
}

pub(crate) struct StatsInner {
    sketch: CountMinSketch,
    recency: RecencyList,
    relevant: HashMap<String, RelevantTuple, RandomState>,
    relevant_by_freq: DupList<u64, String>,
    irrelevant: DupList<u64, String>,
    irrelevant_map: HashMap<String, Handle, RandomState>,
    window: Duration,
}

impl AccessStats {
    /// Create empty statistics
    ///
    /// # Arguments
    /// * `window` - Keys untouched for longer than this are demoted
    /// * `max_height` - Height of the relevant pool's skip list; the
    ///   irrelevant pool uses one level less
    /// * `seed` - Fixes skip-list heights when set
    pub fn new(window: Duration, max_height: usize, seed: Option<u64>) -> Self {
        let irrelevant_height = max_height.saturating_sub(1).max(MIN_HEIGHT);

        let (relevant_by_freq, irrelevant) = match seed {
            Some(seed) => (
                DupList::with_seed(max_height, seed.wrapping_add(1)),
                DupList::with_seed(irrelevant_height, seed.wrapping_add(2)),
            ),
            None => (
                DupList::new(max_height),
                DupList::new(irrelevant_height),
            ),
        };

        Self {
            inner: Mutex::new(StatsInner {
                sketch: CountMinSketch::default(),
                recency: RecencyList::new(),
                relevant: HashMap::default(),
                relevant_by_freq,
                irrelevant,
                irrelevant_map: HashMap::default(),
                window,
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, StatsInner> {
        self.inner.lock()
    }

    /// Record an access to `key` now
    pub fn touch(&self, key: &str) {
        let mut inner = self.inner.lock();
        inner.touch_at(key, Instant::now());
    }

    /// Record an access to `key` at `now`
    pub fn touch_at(&self, key: &str, now: Instant) {
        self.inner.lock().touch_at(key, now);
    }

    /// Drop everything known about `key`
    pub fn forget(&self, key: &str) {
        self.inner.lock().forget(key);
    }

    /// Demote keys last touched more than one window before `now`
    ///
    /// Returns the number of demoted keys.
    pub fn demote_stale(&self, now: Instant) -> usize {
        self.inner.lock().demote_stale(now)
    }

    /// Check whether `key` was touched within the window
    pub fn is_relevant(&self, key: &str) -> bool {
        self.inner.lock().relevant.contains_key(key)
    }

    /// Check whether `key` sits in the irrelevant pool
    pub fn is_irrelevant(&self, key: &str) -> bool {
        self.inner.lock().irrelevant_map.contains_key(key)
    }

    /// Approximate access count of `key`
    pub fn count(&self, key: &str) -> u64 {
        self.inner.lock().sketch.count(key)
    }

    /// Number of relevant keys
    pub fn relevant_len(&self) -> usize {
        self.inner.lock().relevant.len()
    }

    /// Number of irrelevant keys
    pub fn irrelevant_len(&self) -> usize {
        self.inner.lock().irrelevant_map.len()
    }

    /// Relevant keys, least recently touched first
    pub fn relevant_keys(&self) -> Vec<String> {
        let inner = self.inner.lock();
        inner.recency.iter().map(|(_, e)| e.key.clone()).collect()
    }

    /// Relevant keys in eviction order
    pub fn relevant_by_frequency(&self) -> Vec<String> {
        let inner = self.inner.lock();
        inner.relevant_by_freq.iter().map(|(_, _, k)| k.clone()).collect()
    }

    /// Irrelevant keys in eviction order
    pub fn irrelevant_keys(&self) -> Vec<String> {
        let inner = self.inner.lock();
        inner.irrelevant.iter().map(|(_, _, k)| k.clone()).collect()
    }

    /// Configured relevance window
    pub fn window(&self) -> Duration {
        self.inner.lock().window
    }
}

impl StatsInner {
    pub(crate) fn touch_at(&mut self, key: &str, now: Instant) {
        self.sketch.add(key);

        if let Some(old) = self.relevant.remove(key) {
            self.recency.remove(old.recency);
            self.relevant_by_freq.remove(old.freq);
        }

        let count = self.sketch.count(key);
        let freq = self.relevant_by_freq.insert(count, key.to_owned());
        let recency = self.recency.push_back_at(key, now);
        self.relevant
            .insert(key.to_owned(), RelevantTuple { recency, freq });

        self.delete_irrelevant(key);
    }

    pub(crate) fn forget(&mut self, key: &str) {
        self.sketch.remove_all(key);
        self.delete_relevant(key);
        self.delete_irrelevant(key);
    }

    pub(crate) fn demote_stale(&mut self, now: Instant) -> usize {
        let mut demoted = 0;

        loop {
            let stale = match self.recency.front() {
                Some((_, entry)) => entry
                    .touched
                    .checked_add(self.window)
                    .map_or(false, |deadline| deadline < now),
                None => false,
            };
            if !stale {
                break;
            }

            let Some(entry) = self.recency.pop_front() else {
                break;
            };
            if let Some(tuple) = self.relevant.remove(&entry.key) {
                self.relevant_by_freq.remove(tuple.freq);
            }
            self.upsert_irrelevant(&entry.key);
            demoted += 1;
        }

        demoted
    }

    /// Least valuable key other than `spare`: irrelevant pool first, then
    /// relevant
    pub(crate) fn next_victim(&self, spare: Option<&str>) -> Option<String> {
        let eligible = |key: &&String| Some(key.as_str()) != spare;

        self.irrelevant
            .iter()
            .map(|(_, _, key)| key)
            .find(eligible)
            .or_else(|| {
                self.relevant_by_freq
                    .iter()
                    .map(|(_, _, key)| key)
                    .find(eligible)
            })
            .cloned()
    }

    fn delete_relevant(&mut self, key: &str) {
        if let Some(tuple) = self.relevant.remove(key) {
            self.recency.remove(tuple.recency);
            self.relevant_by_freq.remove(tuple.freq);
        }
    }

    fn delete_irrelevant(&mut self, key: &str) {
        if let Some(handle) = self.irrelevant_map.remove(key) {
            self.irrelevant.remove(handle);
        }
    }

    fn upsert_irrelevant(&mut self, key: &str) {
        self.delete_irrelevant(key);
        let count = self.sketch.count(key);
        let handle = self.irrelevant.insert(count, key.to_owned());
        self.irrelevant_map.insert(key.to_owned(), handle);
    }
}
