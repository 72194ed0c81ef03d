//! # furyds
//!
//! Ordered structures behind the Fury cache engine.
//!
//! ## Contents
//! - **DupList**: skip list that keeps duplicate keys (newest duplicate
//!   leftmost) with O(1) removal by handle. Keyed by expiry instant for TTL
//!   and by approximate access count for eviction candidates.
//! - **RecencyList**: doubly linked list of touched keys, oldest first
//! - **HeightGenerator**: per-list coin flipper for skip-list heights

#![warn(missing_docs)]

pub mod duplist;
pub mod height;
pub mod recency;

pub use duplist::{max_height_for, DupList, Handle, HEIGHT_LIMIT, MIN_HEIGHT};
pub use height::HeightGenerator;
pub use recency::{RecencyEntry, RecencyHandle, RecencyList};
