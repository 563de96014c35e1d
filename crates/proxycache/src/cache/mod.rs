//! # Cache Store
//!
//! Byte-addressable stores for one URL's partially downloaded data,
//! together with the patch bookkeeping that records which ranges are
//! already present.

mod disk_usage;
mod file;
mod memory;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Result;
use crate::patch::Patch;

pub use disk_usage::{DiskUsage, UnlimitedDiskUsage};
pub use file::FileCache;
pub use memory::MemoryCache;

/// A cache store for one URL.
///
/// All mutating operations are serialized internally, so `read` is safe
/// to call concurrently with `write` from different tasks.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Random-access read at `offset`, never blocking on the network.
    ///
    /// Returns `Ok(0)` at or past the end of the written data.
    async fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Write `data` at `offset`.
    ///
    /// Completed caches are read-only; writing to one fails with
    /// [`ProxyCacheError::CacheState`](crate::error::ProxyCacheError).
    async fn write(&self, data: &[u8], offset: u64) -> Result<()>;

    /// Record that `[start, end)` has been fetched.
    ///
    /// A contiguous run extends the in-memory tail patch in place;
    /// durable storage sees a patch only once its run is broken, which
    /// amortizes storage writes to one per run instead of one per chunk.
    async fn put_patch(&self, start: u64, end: u64) -> Result<()>;

    /// Sub-ranges of `[start, end)` not yet covered by any patch.
    async fn uncovered(&self, start: u64, end: u64) -> Vec<Patch>;

    /// Whether the recorded patches cover `[0, length)` without a gap.
    async fn is_ready_to_complete(&self, length: Option<u64>) -> bool;

    /// Transition the store to its completed, read-only state.
    ///
    /// No-op when already completed.
    async fn complete(&self) -> Result<()>;

    /// Flush unpersisted patch state and release the backing handle.
    async fn close(&self) -> Result<()>;

    /// True once the store has been through [`Cache::complete`].
    fn is_completed(&self) -> bool;

    /// Current backing file, temp or final; `None` for in-memory stores.
    fn file_path(&self) -> Option<PathBuf>;
}
