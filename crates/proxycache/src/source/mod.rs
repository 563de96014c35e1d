//! # Source
//!
//! Seekable, sequential-read byte providers. The engine only depends on
//! this contract; the concrete transport (HTTP, memory, a lazily built
//! wrapper) is interchangeable.

mod http;
mod lazy;
mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use http::HttpSource;
pub use lazy::LazySource;
pub use memory::MemorySource;

/// Snapshot of what a source reported about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInfo {
    pub url: String,
    /// Total byte length; `None` for chunked/streamed sources.
    pub length: Option<u64>,
    pub mime: Option<String>,
}

/// A remote byte provider that can be opened at an arbitrary offset and
/// then read sequentially.
#[async_trait]
pub trait Source: Send + Sync {
    /// URL this source reads from.
    fn url(&self) -> &str;

    /// Total length in bytes, when the source advertises one.
    async fn length(&self) -> Result<Option<u64>>;

    /// MIME type, when the source advertises one.
    async fn mime(&self) -> Result<Option<String>>;

    /// Start (or restart) reading at `offset`. Nonzero offsets must be
    /// honored exactly; a source that cannot resume fails instead of
    /// silently restarting from zero.
    async fn open(&self, offset: u64) -> Result<()>;

    /// Read the next bytes into `buf`; `Ok(0)` means end of stream.
    async fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Release the open connection, if any.
    async fn close(&self) -> Result<()>;
}
