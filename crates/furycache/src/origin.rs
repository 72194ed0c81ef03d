//! The slow data source the engine fronts

use std::io::Read;
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes};

use crate::error::OriginError;

/// Source of payloads on a cache miss
///
/// `fetch` is called at most once at a time per key, on a dedicated fetch
/// thread. Implementations should give up once `timeout` has passed and
/// report it as an `io::ErrorKind::TimedOut` error (or
/// [`Error::Timeout`](crate::Error::Timeout)), either from `fetch` itself or
/// from the returned stream. A fetch that overruns the timeout is reported as
/// a timeout by the engine regardless.
pub trait Origin: Send + Sync {
    /// Fetch the payload for `key`
    fn fetch(&self, key: &str, timeout: Duration) -> Result<Fetched, OriginError>;
}

impl<F> Origin for F
where
    F: Fn(&str, Duration) -> Result<Fetched, OriginError> + Send + Sync,
{
    fn fetch(&self, key: &str, timeout: Duration) -> Result<Fetched, OriginError> {
        self(key, timeout)
    }
}

/// Payload stream plus optional expiry returned by an [`Origin`]
pub struct Fetched {
    /// Payload, read to the end by the engine
    pub body: Box<dyn Read + Send>,

    /// Instant after which the payload must no longer be served
    pub expiry: Option<Instant>,
}

impl Fetched {
    /// Wrap a stream without expiry
    pub fn new(body: impl Read + Send + 'static) -> Self {
        Self {
            body: Box::new(body),
            expiry: None,
        }
    }

    /// Wrap bytes already in memory
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::new(bytes.into().reader())
    }

    /// Attach an expiry instant
    pub fn with_expiry(mut self, expiry: Instant) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Attach an expiry `ttl` from now
    pub fn expires_in(self, ttl: Duration) -> Self {
        self.with_expiry(Instant::now() + ttl)
    }
}

impl std::fmt::Debug for Fetched {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetched")
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}
