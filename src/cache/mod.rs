//! Generation-based offline cache.
//!
//! This module provides the caching policy for the page:
//! - Pre-caches a fixed asset manifest into a named generation on install
//! - Serves requests cache-first, falling back to the network on a miss
//! - Drops every generation but the current one on activate

mod controller;
mod storage;
#[cfg(test)]
pub mod testing;
mod traits;

pub use controller::CacheController;
pub use storage::{CacheStorage, SqliteStorage};
pub use traits::{ActivationReport, CacheResult, CacheSource, Request, Response};
