//! # Patch Model
//!
//! Contiguous byte ranges already fetched for a URL, and the pure
//! interval algebra used to decide which ranges still have to be
//! downloaded. No I/O, no locking.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// End marker for a window whose upper bound is not known yet.
pub const OPEN_END: u64 = u64::MAX;

/// A recorded contiguous byte range `[start, end)` fetched for one URL.
///
/// Identity is `(url, start, end)`; whether the patch made it to durable
/// metadata storage does not change what range it describes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patch {
    /// URL (cache key) this range belongs to.
    pub url: String,
    /// First byte covered.
    pub start: u64,
    /// First byte past the covered range.
    pub end: u64,
    /// Already written to durable metadata storage.
    #[serde(skip)]
    pub persisted: bool,
}

impl Patch {
    pub fn new(url: impl Into<String>, start: u64, end: u64) -> Self {
        Self {
            url: url.into(),
            start,
            end,
            persisted: false,
        }
    }
}

impl PartialEq for Patch {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start && self.end == other.end && self.url == other.url
    }
}

impl Eq for Patch {}

impl Hash for Patch {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
        self.start.hash(state);
        self.end.hash(state);
    }
}

/// Sub-intervals of `[start, end)` not covered by any patch.
///
/// Collects the boundary values of every patch overlapping the window
/// (plus the window bounds themselves), then tests the midpoint of each
/// adjacent boundary pair: pairs no patch covers are the gaps. The
/// midpoint test keeps touching boundaries from being double-counted,
/// and the result is independent of the input patch order.
pub fn gaps(patches: &[Patch], url: &str, start: u64, end: u64) -> Vec<Patch> {
    let subset: Vec<&Patch> = patches
        .iter()
        .filter(|p| p.start <= end && start <= p.end)
        .collect();

    let mut keys: Vec<u64> = subset
        .iter()
        .flat_map(|p| [p.start, p.end])
        .chain([start, end])
        .filter(|v| (start..=end).contains(v))
        .collect();
    keys.sort_unstable();
    keys.dedup();

    let mut result = Vec::new();
    for pair in keys.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        // Patches are half-open, so the integer midpoint needs a
        // half-open containment test to keep a patch ending exactly at
        // `lo` from swallowing a one-byte gap.
        let mid = lo + (hi - lo) / 2;
        let covered = subset.iter().any(|p| p.start <= mid && mid < p.end);
        if !covered {
            result.push(Patch::new(url, lo, hi));
        }
    }
    result
}

/// True when the patches, merged, cover `[0, length)` without a gap.
///
/// Adjacent or overlapping patches count as contiguous.
pub fn is_complete(patches: &[Patch], length: u64) -> bool {
    if patches.is_empty() {
        return false;
    }
    let mut sorted: Vec<&Patch> = patches.iter().collect();
    sorted.sort_by_key(|p| p.start);
    if sorted[0].start != 0 || sorted[sorted.len() - 1].end != length {
        return false;
    }
    sorted.windows(2).all(|pair| pair[0].end >= pair[1].start)
}
