//! Error types for furycache

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for furycache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error an [`Origin`](crate::Origin) may fail with
pub type OriginError = Box<dyn std::error::Error + Send + Sync>;

/// Error types for engine operations
///
/// Cloneable: every caller coalesced onto one fetch receives the same error.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Options rejected at construction
    #[error("invalid options: {0}")]
    Config(String),

    /// Origin failed, or its stream failed while being read
    #[error("origin error: {0}")]
    Origin(Arc<dyn std::error::Error + Send + Sync>),

    /// Fetch did not finish within the configured timeout
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error outside the origin (e.g. starting a worker thread)
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
}

impl Error {
    /// Check whether this is a fetch timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// Classify an origin failure
    ///
    /// Timed-out reads and origin-reported [`Error::Timeout`] become
    /// `Timeout(timeout)`; anything else is an `Origin` error.
    pub(crate) fn from_origin(err: OriginError, timeout: Duration) -> Self {
        if let Some(own) = err.downcast_ref::<Error>() {
            return own.clone();
        }
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::TimedOut {
                return Error::Timeout(timeout);
            }
        }
        Error::Origin(Arc::from(err))
    }

    pub(crate) fn from_read(err: io::Error, timeout: Duration) -> Self {
        if err.kind() == io::ErrorKind::TimedOut {
            return Error::Timeout(timeout);
        }
        // Readers may wrap an origin error inside io::Error
        match err.get_ref().and_then(|inner| inner.downcast_ref::<Error>()) {
            Some(own) => own.clone(),
            None => Error::Origin(Arc::new(err)),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}
