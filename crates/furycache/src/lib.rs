//! # furycache
//!
//! In-process read-through cache engine in front of a slow origin.
//!
//! ## Architecture
//! - **Payload map**: AHash map of key to `Bytes`, one reader-writer lock
//! - **Fills**: concurrent misses on a key share one origin fetch
//! - **TTL control**: expiries ordered in a skip list, swept on a tick
//! - **Access statistics**: count-min sketch plus relevant/irrelevant pools;
//!   eviction drains irrelevant keys first, least counted first
//! - **Budget**: the sum of cached payload lengths never exceeds
//!   `max_payload_total_bytes`
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use furycache::{Engine, Fetched, Options, OriginError};
//!
//! let origin = |key: &str, _timeout: Duration| -> Result<Fetched, OriginError> {
//!     Ok(Fetched::from_bytes(format!("value of {}", key)).expires_in(Duration::from_secs(60)))
//! };
//!
//! let engine = Engine::new(Options::default(), Arc::new(origin)).unwrap();
//! let body = engine.get("water").unwrap();
//! assert_eq!(&body[..], b"value of water");
//! ```

#![warn(missing_docs)]

mod engine;
mod error;
mod fill;
mod metrics;
mod options;
mod origin;
mod sketch;
mod stats;
mod ttl;

pub use engine::Engine;
pub use error::{Error, OriginError, Result};
pub use metrics::Metrics;
pub use options::{
    Options, MIN_EXPECTED_LEN, MIN_FETCH_TIMEOUT, MIN_PAYLOAD_TOTAL_BYTES, MIN_RELEVANCE_WINDOW,
    MIN_TICK,
};
pub use origin::{Fetched, Origin};
pub use sketch::CountMinSketch;
pub use stats::AccessStats;
pub use ttl::{TtlControl, NO_TTL};
