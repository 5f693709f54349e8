//! Ocean module - size-classed buffer arena and leased buckets.
//!
//! - [`ArenaConfig`] describes the size classes
//! - [`Ocean`] owns the backing region and serves `take` requests
//! - [`Bucket`] is the scoped lease handed to callers

mod arena;
mod bucket;
mod config;

pub use arena::Ocean;
pub use bucket::Bucket;
pub use config::{ArenaConfig, SizeClass};
