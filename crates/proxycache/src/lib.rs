//! # Proxycache Engine
//!
//! A local caching proxy engine for progressively downloaded remote
//! byte streams (video, audio, large blobs). A client reads byte ranges
//! through the engine; already-cached bytes are served immediately,
//! missing bytes are fetched once by a background task and persisted,
//! and concurrent readers share the download instead of re-fetching it.
//!
//! ## Features
//!
//! - Sparse byte-range tracking (patches) with pure gap/coverage algebra
//! - Single-fetcher / many-readers coordination with bounded waits
//! - File-backed cache with a temp-name lifecycle and resumable state
//! - Pluggable sources (HTTP, memory, lazily built wrappers)
//! - Byte-exact HTTP range responses with a cache-bypass path for seeks

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod listener;
pub mod patch;
pub mod request;
pub mod response;
pub mod source;
pub mod storage;

pub use cache::{Cache, DiskUsage, FileCache, MemoryCache, UnlimitedDiskUsage};
pub use config::ProxyCacheConfig;
pub use engine::ProxyCache;
pub use error::{ProxyCacheError, Result};
pub use listener::CacheListener;
pub use patch::{OPEN_END, Patch, gaps, is_complete};
pub use request::RangeRequest;
pub use response::RangeResponder;
pub use source::{CacheInfo, HttpSource, LazySource, MemorySource, Source};
pub use storage::{MemoryStorage, MetadataStorage, NoStorage};
