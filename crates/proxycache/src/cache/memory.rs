//! # Memory Cache
//!
//! Append-oriented in-memory cache store. Coverage is derived from the
//! buffer length, so it suits sequential fills and tests; sparse fills
//! belong in [`FileCache`](super::FileCache).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{ProxyCacheError, Result};
use crate::patch::{self, Patch};

use super::Cache;

/// Cache store backed by a byte vector.
#[derive(Debug, Default)]
pub struct MemoryCache {
    url: String,
    data: RwLock<Vec<u8>>,
    completed: AtomicBool,
}

impl MemoryCache {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            data: RwLock::new(Vec::new()),
            completed: AtomicBool::new(false),
        }
    }

    pub fn with_data(url: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.into(),
            data: RwLock::new(data.into()),
            completed: AtomicBool::new(false),
        }
    }

    fn coverage(&self) -> Vec<Patch> {
        let len = self.data.read().len() as u64;
        if len == 0 {
            Vec::new()
        } else {
            vec![Patch::new(&self.url, 0, len)]
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let data = self.data.read();
        if offset >= data.len() as u64 {
            return Ok(0);
        }
        let offset = offset as usize;
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    async fn write(&self, chunk: &[u8], offset: u64) -> Result<()> {
        if self.is_completed() {
            return Err(ProxyCacheError::CacheState(format!(
                "memory cache for {} is completed and read-only",
                self.url
            )));
        }
        let mut data = self.data.write();
        let offset = usize::try_from(offset).map_err(|_| {
            ProxyCacheError::InvalidArgument(format!("offset {offset} too large for memory cache"))
        })?;
        let end = offset + chunk.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(chunk);
        Ok(())
    }

    async fn put_patch(&self, _start: u64, _end: u64) -> Result<()> {
        // Coverage is implied by the buffer length.
        Ok(())
    }

    async fn uncovered(&self, start: u64, end: u64) -> Vec<Patch> {
        patch::gaps(&self.coverage(), &self.url, start, end)
    }

    async fn is_ready_to_complete(&self, length: Option<u64>) -> bool {
        match length {
            Some(length) => patch::is_complete(&self.coverage(), length),
            None => false,
        }
    }

    async fn complete(&self) -> Result<()> {
        self.completed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    fn file_path(&self) -> Option<PathBuf> {
        None
    }
}
