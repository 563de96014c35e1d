//! # Cache Listener
//!
//! Callback seam for download-progress observers.

use std::path::Path;

/// Observer of cache availability for one URL.
///
/// Percentages delivered to one listener are non-decreasing and end in
/// exactly one `100` per completed fetch cycle, even when the cache is
/// read across several sessions.
pub trait CacheListener: Send + Sync {
    /// Called when the cached share of the source changed.
    ///
    /// `file` is the current backing file, when the cache has one.
    fn on_cache_available(&self, file: Option<&Path>, url: &str, percent: i32);
}
