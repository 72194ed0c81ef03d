//! Engine options

use std::time::Duration;

use crate::error::{Error, Result};

/// Smallest accepted `expected_len`
pub const MIN_EXPECTED_LEN: u64 = 1024;

/// Smallest accepted payload budget (bytes)
pub const MIN_PAYLOAD_TOTAL_BYTES: u64 = 10 * 1000 * 1000;

/// Smallest accepted fetch timeout
pub const MIN_FETCH_TIMEOUT: Duration = Duration::from_millis(10);

/// Smallest accepted sweep tick for both background loops
pub const MIN_TICK: Duration = Duration::from_millis(1);

/// Smallest accepted relevance window
pub const MIN_RELEVANCE_WINDOW: Duration = Duration::from_millis(100);

/// Options passed to [`Engine::new`](crate::Engine::new)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Number of entries the cache is expected to hold. Sizes the skip
    /// lists; overestimating is cheaper than underestimating.
    pub expected_len: u64,

    /// Ceiling on the sum of all cached payload lengths
    pub max_payload_total_bytes: u64,

    /// Deadline handed to the origin for every fetch
    pub fetch_timeout: Duration,

    /// Interval of the TTL sweep
    pub ttl_tick: Duration,

    /// Interval of the access-statistics sweep
    pub stats_tick: Duration,

    /// Keys untouched for longer than this become eviction candidates
    pub stats_relevance_window: Duration,

    /// Seed for skip-list heights; `None` draws from OS entropy
    pub seed: Option<u64>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            expected_len: 10 * 1000 * 1000,
            max_payload_total_bytes: 1000 * 1000 * 1000,
            fetch_timeout: Duration::from_millis(250),
            ttl_tick: Duration::from_millis(250),
            stats_tick: Duration::from_secs(1),
            stats_relevance_window: Duration::from_secs(24 * 3600),
            seed: None,
        }
    }
}

impl Options {
    /// Set `expected_len`
    pub fn with_expected_len(mut self, expected_len: u64) -> Self {
        self.expected_len = expected_len;
        self
    }

    /// Set `max_payload_total_bytes`
    pub fn with_max_payload_total_bytes(mut self, bytes: u64) -> Self {
        self.max_payload_total_bytes = bytes;
        self
    }

    /// Set `fetch_timeout`
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Set `ttl_tick`
    pub fn with_ttl_tick(mut self, tick: Duration) -> Self {
        self.ttl_tick = tick;
        self
    }

    /// Set `stats_tick`
    pub fn with_stats_tick(mut self, tick: Duration) -> Self {
        self.stats_tick = tick;
        self
    }

    /// Set `stats_relevance_window`
    pub fn with_stats_relevance_window(mut self, window: Duration) -> Self {
        self.stats_relevance_window = window;
        self
    }

    /// Set `seed`
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Check every option against its accepted range
    pub fn validate(&self) -> Result<()> {
        if self.expected_len < MIN_EXPECTED_LEN {
            return Err(Error::Config("expected_len must be >= 1024".into()));
        }

        if self.max_payload_total_bytes < MIN_PAYLOAD_TOTAL_BYTES {
            return Err(Error::Config(
                "max_payload_total_bytes must be >= 10*1000*1000".into(),
            ));
        }

        if self.fetch_timeout < MIN_FETCH_TIMEOUT {
            return Err(Error::Config("fetch_timeout must be >= 10ms".into()));
        }

        if self.ttl_tick < MIN_TICK {
            return Err(Error::Config("ttl_tick must be >= 1ms".into()));
        }

        if self.stats_tick < MIN_TICK || self.stats_tick > self.stats_relevance_window {
            return Err(Error::Config(
                "stats_tick must be >= 1ms and <= stats_relevance_window".into(),
            ));
        }

        if self.stats_relevance_window < MIN_RELEVANCE_WINDOW {
            return Err(Error::Config(
                "stats_relevance_window must be >= 100ms".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(opts: Options) -> String {
        match opts.validate() {
            Err(Error::Config(msg)) => msg,
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(Options::default().validate().is_ok());
    }

    #[test]
    fn test_each_rule() {
        let base = Options::default();

        assert_eq!(
            message(base.clone().with_expected_len(999)),
            "expected_len must be >= 1024"
        );
        assert_eq!(
            message(base.clone().with_max_payload_total_bytes(9 * 1000 * 1000)),
            "max_payload_total_bytes must be >= 10*1000*1000"
        );
        assert_eq!(
            message(base.clone().with_fetch_timeout(Duration::from_millis(9))),
            "fetch_timeout must be >= 10ms"
        );
        assert_eq!(
            message(base.clone().with_ttl_tick(Duration::from_micros(999))),
            "ttl_tick must be >= 1ms"
        );
        assert_eq!(
            message(base.clone().with_stats_tick(Duration::from_micros(999))),
            "stats_tick must be >= 1ms and <= stats_relevance_window"
        );
        assert_eq!(
            message(
                base.clone()
                    .with_stats_relevance_window(Duration::from_millis(99))
                    .with_stats_tick(Duration::from_millis(1))
            ),
            "stats_relevance_window must be >= 100ms"
        );
        assert_eq!(
            message(
                base.with_stats_relevance_window(Duration::from_millis(100))
                    .with_stats_tick(Duration::from_millis(101))
            ),
            "stats_tick must be >= 1ms and <= stats_relevance_window"
        );
    }

    #[test]
    fn test_boundaries_accepted() {
        let opts = Options::default()
            .with_expected_len(1024)
            .with_max_payload_total_bytes(10 * 1000 * 1000)
            .with_fetch_timeout(Duration::from_millis(10))
            .with_ttl_tick(Duration::from_millis(1))
            .with_stats_tick(Duration::from_millis(100))
            .with_stats_relevance_window(Duration::from_millis(100));
        assert!(opts.validate().is_ok());
    }
}
