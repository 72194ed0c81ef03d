//! Fury engine: read-through cache in front of an [`Origin`]
//!
//! One reader-writer lock guards the payload map, the fills in progress and
//! the running payload total. TTL control and access statistics carry their
//! own locks. Lock order is engine, then statistics, then TTL; the inner
//! locks are never held while waiting for the engine lock.

use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ahash::RandomState;
use bytes::Bytes;
use crossbeam_channel::{select, Receiver, Sender, TrySendError};
use furyds::max_height_for;
use parking_lot::RwLock;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::fill::Fill;
use crate::metrics::Metrics;
use crate::options::Options;
use crate::origin::{Fetched, Origin};
use crate::stats::{AccessStats, StatsInner};
use crate::ttl::TtlControl;

/// Touches queued beyond this are dropped
const TOUCH_QUEUE_CAPACITY: usize = 64 * 1024;

/// Extra time a waiter gives the fetch thread past the fetch timeout
const FILL_GRACE: Duration = Duration::from_millis(50);

/// Read-through cache engine
pub struct Engine {
    inner: Arc<Inner>,
    touches: Sender<String>,
    pending_touches: Receiver<String>,
    shutdown: Option<Sender<()>>,
    workers: Vec<JoinHandle<()>>,
}

struct Inner {
    state: RwLock<State>,
    ttl: TtlControl,
    stats: Arc<AccessStats>,
    origin: Arc<dyn Origin>,
    timeout: Duration,
    max_payload_total: u64,
    metrics: Metrics,
}

#[derive(Default)]
struct State {
    data: HashMap<String, Bytes, RandomState>,
    fills: HashMap<String, Arc<Fill>, RandomState>,
    payload_total: u64,
}

impl Engine {
    /// Create an engine and start its TTL and statistics loops
    ///
    /// # Arguments
    /// * `options` - Validated before anything is started
    /// * `origin` - Source of payloads on a miss
    ///
    /// # Returns
    /// * `Result<Engine>` - `Error::Config` for out-of-range options
    pub fn new(options: Options, origin: Arc<dyn Origin>) -> Result<Self> {
        options.validate()?;

        let height = max_height_for(options.expected_len);
        let stats = Arc::new(AccessStats::new(
            options.stats_relevance_window,
            height,
            options.seed,
        ));

        let inner = Arc::new(Inner {
            state: RwLock::new(State::default()),
            ttl: TtlControl::new(height, options.seed),
            stats,
            origin,
            timeout: options.fetch_timeout,
            max_payload_total: options.max_payload_total_bytes,
            metrics: Metrics::new(),
        });

        let (touches, pending_touches) = crossbeam_channel::bounded(TOUCH_QUEUE_CAPACITY);
        let (shutdown, shutdown_rx) = crossbeam_channel::bounded::<()>(0);

        let mut engine = Engine {
            inner,
            touches,
            pending_touches,
            shutdown: Some(shutdown),
            workers: Vec::with_capacity(2),
        };

        engine.workers.push(spawn_ttl_loop(
            Arc::clone(&engine.inner),
            options.ttl_tick,
            shutdown_rx.clone(),
        )?);
        engine.workers.push(spawn_stats_loop(
            Arc::clone(&engine.inner.stats),
            engine.pending_touches.clone(),
            options.stats_tick,
            shutdown_rx,
        )?);

        info!(
            max_payload_total = options.max_payload_total_bytes,
            skiplist_height = height,
            fetch_timeout_ms = options.fetch_timeout.as_millis() as u64,
            "engine started"
        );

        Ok(engine)
    }

    /// Get the payload for `key`, fetching it from the origin on a miss
    ///
    /// Concurrent misses on the same key share a single fetch and all see
    /// its outcome. A failed fetch caches nothing.
    pub fn get(&self, key: &str) -> Result<Bytes> {
        self.record_touch(key);

        if let Some(bytes) = self.inner.try_get(key) {
            self.inner.metrics.record_hit();
            return Ok(bytes);
        }

        self.inner.metrics.record_miss();
        self.inner.cache_fill(key)
    }

    /// Delete payload, TTL and statistics of every key in `keys`
    ///
    /// Meant for manual purges; routine expiry belongs in origin TTLs.
    pub fn invalidate<S: AsRef<str>>(&self, keys: &[S]) {
        let mut state = self.inner.state.write();
        let mut stats = self.inner.stats.lock();

        let mut removed = 0;
        for key in keys {
            if self.inner.delete_entry(&mut state, &mut stats, key.as_ref()) {
                removed += 1;
            }
        }

        self.inner.metrics.record_invalidations(removed);
        debug!(requested = keys.len(), removed, "invalidated keys");
    }

    /// Seconds until each key expires, in argument order; `-1.0` for keys
    /// without a TTL
    pub fn get_ttl<S: AsRef<str>>(&self, keys: &[S]) -> Vec<f64> {
        self.inner.ttl.get_ttl(keys)
    }

    /// Check whether `key` is cached, without touching it
    pub fn contains(&self, key: &str) -> bool {
        self.inner.state.read().data.contains_key(key)
    }

    /// Number of cached keys
    pub fn len(&self) -> usize {
        self.inner.state.read().data.len()
    }

    /// Check whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of all cached payload lengths
    pub fn payload_total(&self) -> u64 {
        self.inner.state.read().payload_total
    }

    /// Configured payload budget
    pub fn max_payload_total(&self) -> u64 {
        self.inner.max_payload_total
    }

    /// Engine counters
    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    /// Access statistics behind the eviction policy
    pub fn access_stats(&self) -> &AccessStats {
        &self.inner.stats
    }

    /// Apply queued statistics touches now instead of waiting for the
    /// statistics loop
    pub fn sync_stats(&self) {
        while let Ok(key) = self.pending_touches.try_recv() {
            self.inner.stats.touch(&key);
        }
    }

    fn record_touch(&self, key: &str) {
        if let Err(TrySendError::Full(_)) = self.touches.try_send(key.to_owned()) {
            trace!(key, "touch queue full, dropping touch");
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("Engine")
            .field("len", &state.data.len())
            .field("fills", &state.fills.len())
            .field("payload_total", &state.payload_total)
            .field("max_payload_total", &self.inner.max_payload_total)
            .finish()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        drop(self.shutdown.take());

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("background loop panicked");
            }
        }
        debug!("engine stopped");
    }
}

impl Inner {
    fn try_get(&self, key: &str) -> Option<Bytes> {
        self.state.read().data.get(key).cloned()
    }

    fn cache_fill(self: &Arc<Self>, key: &str) -> Result<Bytes> {
        let (fill, first) = {
            let mut state = self.state.write();

            // A fill may have completed since the shared-lock lookup
            if let Some(bytes) = state.data.get(key) {
                return Ok(bytes.clone());
            }

            match state.fills.get(key) {
                Some(fill) => {
                    fill.join();
                    (Arc::clone(fill), false)
                }
                None => {
                    let fill = Arc::new(Fill::new());
                    state.fills.insert(key.to_owned(), Arc::clone(&fill));
                    (fill, true)
                }
            }
        };

        if first {
            self.spawn_fetch(key, Arc::clone(&fill));
        } else {
            self.metrics.record_coalesced();
        }

        self.await_fill(key, &fill)
    }

    fn await_fill(&self, key: &str, fill: &Arc<Fill>) -> Result<Bytes> {
        let deadline = fill.started() + self.timeout + FILL_GRACE;
        let outcome = match fill.wait_until(deadline) {
            Some(outcome) => outcome,
            None => self.abandon_fill(key, fill),
        };
        fill.leave();
        outcome
    }

    // Times the fill out unless the fetch thread took the exclusive lock first
    fn abandon_fill(&self, key: &str, fill: &Arc<Fill>) -> Result<Bytes> {
        let mut state = self.state.write();

        if is_registered(&state, key, fill) {
            state.fills.remove(key);
            self.forget_unless_cached(&state, key);
            self.metrics.record_fetch_error();
            fill.publish(Err(Error::Timeout(self.timeout)));
            warn!(
                key,
                waiters = fill.waiters(),
                elapsed_ms = fill.started().elapsed().as_millis() as u64,
                "fill timed out"
            );
        }
        drop(state);

        fill.outcome()
            .unwrap_or_else(|| Err(Error::Timeout(self.timeout)))
    }

    fn spawn_fetch(self: &Arc<Self>, key: &str, fill: Arc<Fill>) {
        let inner = Arc::clone(self);
        let owned = key.to_owned();

        let spawned = thread::Builder::new()
            .name("fury-fill".into())
            .spawn(move || inner.fetch(owned, fill));

        if let Err(err) = spawned {
            warn!(key, error = %err, "failed to start fetch thread");
            let mut state = self.state.write();
            if let Some(fill) = state.fills.remove(key) {
                fill.publish(Err(Error::from(err)));
            }
        }
    }

    fn fetch(&self, key: String, fill: Arc<Fill>) {
        let started = Instant::now();
        let fetched = match self.read_origin(&key) {
            Ok(_) if started.elapsed() > self.timeout => Err(Error::Timeout(self.timeout)),
            other => other,
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        self.complete(&key, &fill, fetched, elapsed_ms);
    }

    /// Commit or drop a finished fetch and publish its outcome
    ///
    /// A fill no longer registered was already timed out by its waiters; the
    /// fetched bytes are discarded so the cache agrees with what they saw.
    fn complete(
        &self,
        key: &str,
        fill: &Arc<Fill>,
        fetched: Result<(Bytes, Option<Instant>)>,
        elapsed_ms: u64,
    ) {
        let mut state = self.state.write();

        if !is_registered(&state, key, fill) {
            debug!(
                key,
                succeeded = fetched.is_ok(),
                elapsed_ms,
                "fill already timed out, discarding fetch"
            );
            return;
        }
        state.fills.remove(key);

        let outcome = match fetched {
            Ok((bytes, expiry)) => {
                self.metrics.record_fetch();
                self.commit(&mut state, key, &bytes, expiry);
                debug!(
                    key,
                    size = bytes.len(),
                    waiters = fill.waiters(),
                    elapsed_ms,
                    "cache filled"
                );
                Ok(bytes)
            }
            Err(err) => {
                self.metrics.record_fetch_error();
                self.forget_unless_cached(&state, key);
                warn!(
                    key,
                    error = %err,
                    waiters = fill.waiters(),
                    elapsed_ms,
                    "fetch failed"
                );
                Err(err)
            }
        };

        fill.publish(outcome);
    }

    // Statistics of a key that never made it into the cache
    fn forget_unless_cached(&self, state: &State, key: &str) {
        if !state.data.contains_key(key) {
            self.stats.lock().forget(key);
        }
    }

    fn read_origin(&self, key: &str) -> Result<(Bytes, Option<Instant>)> {
        let Fetched { mut body, expiry } = self
            .origin
            .fetch(key, self.timeout)
            .map_err(|err| Error::from_origin(err, self.timeout))?;

        let mut buf = Vec::new();
        body.read_to_end(&mut buf)
            .map_err(|err| Error::from_read(err, self.timeout))?;

        Ok((Bytes::from(buf), expiry))
    }

    // Caller holds the exclusive engine lock
    fn commit(&self, state: &mut State, key: &str, bytes: &Bytes, expiry: Option<Instant>) {
        let size = bytes.len() as u64;

        if size > self.max_payload_total {
            warn!(
                key,
                size,
                max_payload_total = self.max_payload_total,
                "payload larger than the payload budget, serving it uncached"
            );
            return;
        }

        if matches!(expiry, Some(at) if at <= Instant::now()) {
            debug!(key, "payload already expired, serving it uncached");
            return;
        }

        if let Some(old) = state.data.remove(key) {
            state.payload_total -= old.len() as u64;
        }

        if size != 0 && state.payload_total + size > self.max_payload_total {
            let twice = size.saturating_mul(2);
            let wanted = if twice > self.max_payload_total {
                self.max_payload_total
            } else {
                twice
            };
            self.evict_until_free(state, wanted, Some(key));
        }

        state.data.insert(key.to_owned(), bytes.clone());
        state.payload_total += size;

        if let Some(at) = expiry {
            self.ttl.set_expiry(key, at);
        }
    }

    /// Evict until at least `wanted` bytes of the budget are free
    ///
    /// Irrelevant keys go first, least counted first, then relevant keys,
    /// then cached keys the statistics have not caught up with. `spare` is
    /// the key being committed; its statistics are left alone.
    ///
    /// # Panics
    /// If `wanted` exceeds the payload budget.
    fn evict_until_free(&self, state: &mut State, wanted: u64, spare: Option<&str>) {
        assert!(
            wanted <= self.max_payload_total,
            "eviction target of {} bytes exceeds the payload budget of {} bytes",
            wanted,
            self.max_payload_total
        );

        let mut stats = self.stats.lock();
        let mut evicted = 0;

        while self.free_space(state) < wanted {
            let victim = match stats.next_victim(spare) {
                Some(key) => key,
                None => match state.data.keys().next() {
                    Some(key) => key.clone(),
                    None => break,
                },
            };

            if self.delete_entry(state, &mut stats, &victim) {
                evicted += 1;
            }
        }

        self.metrics.record_evictions(evicted);
        trace!(
            evicted,
            wanted,
            payload_total = state.payload_total,
            "evicted under memory pressure"
        );
    }

    fn free_space(&self, state: &State) -> u64 {
        self.max_payload_total.saturating_sub(state.payload_total)
    }

    // Caller holds the exclusive engine lock and the statistics lock
    fn delete_entry(&self, state: &mut State, stats: &mut StatsInner, key: &str) -> bool {
        let removed = match state.data.remove(key) {
            Some(bytes) => {
                state.payload_total -= bytes.len() as u64;
                true
            }
            None => false,
        };

        self.ttl.remove(key);
        stats.forget(key);
        removed
    }

    /// Drop every payload whose expiry is at or before `now`
    fn expire(&self, now: Instant) -> u64 {
        let due = {
            let _state = self.state.read();
            self.ttl.peek_expired(now)
        };
        if !due {
            return 0;
        }

        let mut state = self.state.write();
        let keys = self.ttl.pop_expired(now);
        if keys.is_empty() {
            return 0;
        }

        let mut stats = self.stats.lock();
        let mut expired = 0;
        for key in &keys {
            if let Some(bytes) = state.data.remove(key) {
                state.payload_total -= bytes.len() as u64;
                expired += 1;
            }
            stats.forget(key);
        }

        self.metrics.record_expirations(expired);
        trace!(expired, "ttl sweep");
        expired
    }
}

fn is_registered(state: &State, key: &str, fill: &Arc<Fill>) -> bool {
    matches!(state.fills.get(key), Some(current) if Arc::ptr_eq(current, fill))
}

fn spawn_ttl_loop(
    inner: Arc<Inner>,
    tick: Duration,
    shutdown: Receiver<()>,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("fury-ttl".into())
        .spawn(move || {
            let ticker = crossbeam_channel::tick(tick);
            loop {
                select! {
                    recv(ticker) -> _ => {
                        inner.expire(Instant::now());
                    }
                    recv(shutdown) -> _ => break,
                }
            }
            trace!("ttl loop stopped");
        })?;

    Ok(handle)
}

fn spawn_stats_loop(
    stats: Arc<AccessStats>,
    touches: Receiver<String>,
    tick: Duration,
    shutdown: Receiver<()>,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("fury-stats".into())
        .spawn(move || {
            let ticker = crossbeam_channel::tick(tick);
            loop {
                select! {
                    recv(touches) -> key => match key {
                        Ok(key) => stats.touch(&key),
                        Err(_) => break,
                    },
                    recv(ticker) -> _ => {
                        let demoted = stats.demote_stale(Instant::now());
                        if demoted > 0 {
                            trace!(demoted, "stats sweep");
                        }
                    }
                    recv(shutdown) -> _ => break,
                }
            }
            trace!("stats loop stopped");
        })?;

    Ok(handle)
}
