//! # Metadata Storage
//!
//! Durable bookkeeping collaborator: what the source reported about
//! itself, and which byte ranges of it are already on disk. Backends
//! are last-write-wins per URL; database-backed implementations live
//! outside this crate.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::Result;
use crate::patch::Patch;
use crate::source::CacheInfo;

/// Durable storage for cache metadata (source info and fetched patches).
#[async_trait]
pub trait MetadataStorage: Send + Sync {
    /// Look up the stored source info for a URL.
    async fn get_info(&self, url: &str) -> Result<Option<CacheInfo>>;

    /// Store (or replace) the source info for a URL.
    async fn put_info(&self, url: &str, info: CacheInfo) -> Result<()>;

    /// All patches recorded for a URL.
    async fn get_patches(&self, url: &str) -> Result<Vec<Patch>>;

    /// Record one more patch for a URL.
    async fn put_patch(&self, url: &str, patch: Patch) -> Result<()>;

    /// Drop every patch recorded for a URL.
    async fn clear_patches(&self, url: &str) -> Result<()>;

    /// Release backend resources.
    async fn release(&self) -> Result<()>;
}

/// Storage that keeps nothing.
#[derive(Debug, Default, Clone)]
pub struct NoStorage;

#[async_trait]
impl MetadataStorage for NoStorage {
    async fn get_info(&self, _url: &str) -> Result<Option<CacheInfo>> {
        Ok(None)
    }

    async fn put_info(&self, _url: &str, _info: CacheInfo) -> Result<()> {
        Ok(())
    }

    async fn get_patches(&self, _url: &str) -> Result<Vec<Patch>> {
        Ok(Vec::new())
    }

    async fn put_patch(&self, _url: &str, _patch: Patch) -> Result<()> {
        Ok(())
    }

    async fn clear_patches(&self, _url: &str) -> Result<()> {
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        Ok(())
    }
}

/// In-process storage backed by hash maps.
///
/// Survives only for the process lifetime; deployments that can afford
/// to refetch after a restart can use it as-is, and tests use it to
/// observe what the cache store persists.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    info: RwLock<HashMap<String, CacheInfo>>,
    patches: RwLock<HashMap<String, Vec<Patch>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStorage for MemoryStorage {
    async fn get_info(&self, url: &str) -> Result<Option<CacheInfo>> {
        Ok(self.info.read().get(url).cloned())
    }

    async fn put_info(&self, url: &str, info: CacheInfo) -> Result<()> {
        self.info.write().insert(url.to_owned(), info);
        Ok(())
    }

    async fn get_patches(&self, url: &str) -> Result<Vec<Patch>> {
        Ok(self.patches.read().get(url).cloned().unwrap_or_default())
    }

    async fn put_patch(&self, url: &str, patch: Patch) -> Result<()> {
        self.patches
            .write()
            .entry(url.to_owned())
            .or_default()
            .push(patch);
        Ok(())
    }

    async fn clear_patches(&self, url: &str) -> Result<()> {
        self.patches.write().remove(url);
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "http://example.com/a.mp4";

    #[tokio::test]
    async fn test_memory_storage_info_roundtrip() {
        let storage = MemoryStorage::new();
        assert!(storage.get_info(URL).await.unwrap().is_none());

        let info = CacheInfo {
            url: URL.to_owned(),
            length: Some(42),
            mime: Some("video/mp4".to_owned()),
        };
        storage.put_info(URL, info.clone()).await.unwrap();
        assert_eq!(storage.get_info(URL).await.unwrap(), Some(info));
    }

    #[tokio::test]
    async fn test_memory_storage_put_info_replaces() {
        let storage = MemoryStorage::new();
        let first = CacheInfo {
            url: URL.to_owned(),
            length: None,
            mime: None,
        };
        let second = CacheInfo {
            url: URL.to_owned(),
            length: Some(7),
            mime: None,
        };
        storage.put_info(URL, first).await.unwrap();
        storage.put_info(URL, second.clone()).await.unwrap();
        assert_eq!(storage.get_info(URL).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_memory_storage_patches() {
        let storage = MemoryStorage::new();
        assert!(storage.get_patches(URL).await.unwrap().is_empty());

        storage.put_patch(URL, Patch::new(URL, 0, 5)).await.unwrap();
        storage
            .put_patch(URL, Patch::new(URL, 8, 12))
            .await
            .unwrap();
        let patches = storage.get_patches(URL).await.unwrap();
        assert_eq!(patches, vec![Patch::new(URL, 0, 5), Patch::new(URL, 8, 12)]);

        storage.clear_patches(URL).await.unwrap();
        assert!(storage.get_patches(URL).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_storage_swallows_everything() {
        let storage = NoStorage;
        storage.put_patch(URL, Patch::new(URL, 0, 5)).await.unwrap();
        assert!(storage.get_patches(URL).await.unwrap().is_empty());
        assert!(storage.get_info(URL).await.unwrap().is_none());
    }
}
