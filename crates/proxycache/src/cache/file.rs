//! # File Cache
//!
//! Disk-backed cache store. Data is written to `<name>.download` while
//! the fetch is in flight; the file is renamed to its final name exactly
//! once, when the recorded patches cover the whole source.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::{ProxyCacheError, Result};
use crate::patch::{self, Patch};
use crate::storage::MetadataStorage;

use super::{Cache, DiskUsage};

/// Suffix carried by the backing file until completion.
const TEMP_SUFFIX: &str = ".download";

struct IoState {
    /// `None` once the store has been closed.
    file: Option<fs::File>,
    /// Ascending by start; only the tail may still be unpersisted.
    patches: Vec<Patch>,
}

/// Cache store that keeps its data in a file.
pub struct FileCache {
    key: String,
    storage: Arc<dyn MetadataStorage>,
    disk_usage: Arc<dyn DiskUsage>,
    /// Current backing path, temp or final.
    path: parking_lot::Mutex<PathBuf>,
    io: tokio::sync::Mutex<IoState>,
}

impl FileCache {
    /// Open (or create) the store whose final name is `file`.
    ///
    /// A pre-existing final file means the download already finished: it
    /// is opened read-only and the store starts out completed. Otherwise
    /// the temp-named file is opened read-write, and patches recorded by
    /// a previous session are loaded from `storage` so the fetch can
    /// resume where it left off.
    pub async fn new(
        file: impl Into<PathBuf>,
        key: impl Into<String>,
        storage: Arc<dyn MetadataStorage>,
        disk_usage: Arc<dyn DiskUsage>,
    ) -> Result<Self> {
        let file: PathBuf = file.into();
        let key = key.into();
        if let Some(dir) = file.parent() {
            fs::create_dir_all(dir).await?;
        }

        let completed = fs::try_exists(&file).await?;
        let path = if completed { file.clone() } else { temp_path(&file)? };
        let existed = completed || fs::try_exists(&path).await?;

        let handle = if completed {
            fs::File::open(&path).await?
        } else {
            fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .await?
        };

        let patches = if existed {
            let mut patches = match storage.get_patches(&key).await {
                Ok(patches) => patches,
                Err(e) => {
                    warn!(key = %key, error = %e, "failed to load persisted patches");
                    Vec::new()
                }
            };
            for patch in &mut patches {
                patch.persisted = true;
            }
            patches
        } else {
            // Fresh backing file: any patches left over from a deleted
            // cache file no longer describe real data.
            if let Err(e) = storage.clear_patches(&key).await {
                warn!(key = %key, error = %e, "failed to clear stale patches");
            }
            Vec::new()
        };

        Ok(Self {
            key,
            storage,
            disk_usage,
            path: parking_lot::Mutex::new(path),
            io: tokio::sync::Mutex::new(IoState {
                file: Some(handle),
                patches,
            }),
        })
    }

    /// Flush the tail patch to durable storage if it has not been yet.
    async fn persist_tail(&self, patches: &mut [Patch]) {
        if let Some(last) = patches.last_mut()
            && !last.persisted
        {
            match self.storage.put_patch(&self.key, last.clone()).await {
                Ok(()) => last.persisted = true,
                Err(e) => warn!(key = %self.key, error = %e, "failed to persist patch"),
            }
        }
    }

    async fn touch(&self, file: &Path) {
        if let Err(e) = self.disk_usage.touch(file).await {
            warn!(file = %file.display(), error = %e, "disk usage touch failed");
        }
    }
}

#[async_trait]
impl Cache for FileCache {
    async fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut io = self.io.lock().await;
        let file = io.file.as_mut().ok_or_else(|| {
            ProxyCacheError::CacheState(format!("cache for {} is closed", self.key))
        })?;
        file.seek(SeekFrom::Start(offset)).await?;
        Ok(file.read(buf).await?)
    }

    async fn write(&self, data: &[u8], offset: u64) -> Result<()> {
        let mut io = self.io.lock().await;
        // Checked under the io lock: completion swaps in a read-only
        // handle, and a racing write must see that as a state error,
        // not as a failed write on the new handle.
        if self.is_completed() {
            return Err(ProxyCacheError::CacheState(format!(
                "cache file {} is completed and read-only",
                self.path.lock().display()
            )));
        }
        let file = io.file.as_mut().ok_or_else(|| {
            ProxyCacheError::CacheState(format!("cache for {} is closed", self.key))
        })?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        Ok(())
    }

    async fn put_patch(&self, start: u64, end: u64) -> Result<()> {
        let mut io = self.io.lock().await;
        if let Some(last) = io.patches.last_mut()
            && last.end == start
        {
            // Same contiguous run, extend in place.
            last.end = end;
            return Ok(());
        }
        // The run broke (or this is the first patch): the previous tail
        // is final now, so it can go to storage.
        self.persist_tail(&mut io.patches).await;
        let patch = Patch::new(&self.key, start, end);
        io.patches.push(patch);
        Ok(())
    }

    async fn uncovered(&self, start: u64, end: u64) -> Vec<Patch> {
        let io = self.io.lock().await;
        patch::gaps(&io.patches, &self.key, start, end)
    }

    async fn is_ready_to_complete(&self, length: Option<u64>) -> bool {
        let Some(length) = length else {
            return false;
        };
        let io = self.io.lock().await;
        patch::is_complete(&io.patches, length)
    }

    async fn complete(&self) -> Result<()> {
        let mut io = self.io.lock().await;
        if self.is_completed() {
            return Ok(());
        }
        self.persist_tail(&mut io.patches).await;
        if let Some(file) = io.file.take() {
            file.sync_all().await?;
        }

        let temp = self.path.lock().clone();
        let final_path = final_path(&temp)?;
        fs::rename(&temp, &final_path).await.map_err(|e| {
            ProxyCacheError::CacheState(format!(
                "renaming {} to {} failed: {e}",
                temp.display(),
                final_path.display()
            ))
        })?;
        debug!(file = %final_path.display(), "cache completed");

        io.file = Some(fs::File::open(&final_path).await?);
        *self.path.lock() = final_path.clone();
        self.touch(&final_path).await;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut io = self.io.lock().await;
        self.persist_tail(&mut io.patches).await;
        if let Some(file) = io.file.take() {
            if let Err(e) = file.sync_all().await {
                warn!(key = %self.key, error = %e, "failed to sync cache file");
            }
        }
        let path = self.path.lock().clone();
        self.touch(&path).await;
        Ok(())
    }

    fn is_completed(&self) -> bool {
        let path = self.path.lock();
        !path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(TEMP_SUFFIX))
    }

    fn file_path(&self) -> Option<PathBuf> {
        Some(self.path.lock().clone())
    }
}

fn temp_path(file: &Path) -> Result<PathBuf> {
    let Some(name) = file.file_name() else {
        return Err(ProxyCacheError::InvalidArgument(format!(
            "cache path {} has no file name",
            file.display()
        )));
    };
    let mut name = name.to_os_string();
    name.push(TEMP_SUFFIX);
    Ok(file.with_file_name(name))
}

fn final_path(temp: &Path) -> Result<PathBuf> {
    let name = temp
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_suffix(TEMP_SUFFIX))
        .ok_or_else(|| {
            ProxyCacheError::CacheState(format!(
                "{} does not carry the temp suffix",
                temp.display()
            ))
        })?;
    Ok(temp.with_file_name(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::UnlimitedDiskUsage;
    use crate::storage::{MemoryStorage, NoStorage};

    const KEY: &str = "http://example.com/a.mp4";

    async fn new_cache(dir: &Path, storage: Arc<dyn MetadataStorage>) -> FileCache {
        FileCache::new(
            dir.join("a.mp4"),
            KEY,
            storage,
            Arc::new(UnlimitedDiskUsage),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_read_write_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = new_cache(dir.path(), Arc::new(NoStorage)).await;

        cache.write(b"hello world", 0).await.unwrap();
        let mut buf = [0u8; 5];
        let read = cache.read(&mut buf, 6).await.unwrap();
        assert_eq!(read, 5);
        assert_eq!(&buf, b"world");
    }

    #[tokio::test]
    async fn test_read_past_end_returns_zero() {
        let dir = tempfile::tempdir().unwrap();
        let cache = new_cache(dir.path(), Arc::new(NoStorage)).await;

        cache.write(b"abc", 0).await.unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(cache.read(&mut buf, 10).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_uses_temp_name_until_completed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = new_cache(dir.path(), Arc::new(NoStorage)).await;

        assert!(!cache.is_completed());
        let path = cache.file_path().unwrap();
        assert!(path.to_str().unwrap().ends_with(".download"));
        assert!(fs::try_exists(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_complete_renames_and_becomes_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let cache = new_cache(dir.path(), Arc::new(NoStorage)).await;

        cache.write(b"0123456789", 0).await.unwrap();
        cache.put_patch(0, 10).await.unwrap();
        cache.complete().await.unwrap();

        assert!(cache.is_completed());
        assert_eq!(cache.file_path().unwrap(), dir.path().join("a.mp4"));
        assert!(!fs::try_exists(dir.path().join("a.mp4.download")).await.unwrap());

        // Completed caches still serve reads.
        let mut buf = [0u8; 10];
        assert_eq!(cache.read(&mut buf, 0).await.unwrap(), 10);
        assert_eq!(&buf, b"0123456789");

        // But refuse writes.
        assert!(matches!(
            cache.write(b"x", 0).await,
            Err(ProxyCacheError::CacheState(_))
        ));
    }

    #[tokio::test]
    async fn test_complete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = new_cache(dir.path(), Arc::new(NoStorage)).await;

        cache.write(b"ab", 0).await.unwrap();
        cache.put_patch(0, 2).await.unwrap();
        cache.complete().await.unwrap();
        cache.complete().await.unwrap();
        assert!(cache.is_completed());
    }

    #[tokio::test]
    async fn test_write_racing_complete_sees_state_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(new_cache(dir.path(), Arc::new(NoStorage)).await);
        cache.write(b"0123456789", 0).await.unwrap();
        cache.put_patch(0, 10).await.unwrap();

        let writer = {
            let cache = cache.clone();
            tokio::spawn(async move {
                let mut results = Vec::new();
                for _ in 0..100 {
                    results.push(cache.write(b"0", 0).await);
                    tokio::task::yield_now().await;
                }
                results
            })
        };
        cache.complete().await.unwrap();

        // Writes either land before completion or fail as a state
        // error; the read-only reopened handle must never leak through
        // as a plain I/O failure.
        for result in writer.await.unwrap() {
            match result {
                Ok(()) | Err(ProxyCacheError::CacheState(_)) => {}
                Err(e) => panic!("racing write surfaced {e}"),
            }
        }
    }

    #[tokio::test]
    async fn test_preexisting_final_file_starts_completed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.mp4"), b"cached").await.unwrap();

        let cache = new_cache(dir.path(), Arc::new(NoStorage)).await;
        assert!(cache.is_completed());

        let mut buf = [0u8; 6];
        assert_eq!(cache.read(&mut buf, 0).await.unwrap(), 6);
        assert_eq!(&buf, b"cached");
    }

    #[tokio::test]
    async fn test_put_patch_extends_tail_without_storage_write() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(MemoryStorage::new());
        let cache = new_cache(dir.path(), storage.clone()).await;

        cache.put_patch(0, 4).await.unwrap();
        cache.put_patch(4, 8).await.unwrap();
        cache.put_patch(8, 12).await.unwrap();

        // One contiguous run, nothing flushed yet.
        assert!(storage.get_patches(KEY).await.unwrap().is_empty());
        assert!(cache.uncovered(0, 12).await.is_empty());
    }

    #[tokio::test]
    async fn test_put_patch_flushes_broken_run() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(MemoryStorage::new());
        let cache = new_cache(dir.path(), storage.clone()).await;

        cache.put_patch(0, 4).await.unwrap();
        cache.put_patch(10, 14).await.unwrap();

        // Breaking the run persists the finished tail.
        assert_eq!(
            storage.get_patches(KEY).await.unwrap(),
            vec![Patch::new(KEY, 0, 4)]
        );
        assert_eq!(
            cache.uncovered(0, 14).await,
            vec![Patch::new(KEY, 4, 10)]
        );
    }

    #[tokio::test]
    async fn test_close_flushes_tail_patch() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(MemoryStorage::new());
        let cache = new_cache(dir.path(), storage.clone()).await;

        cache.put_patch(0, 4).await.unwrap();
        cache.close().await.unwrap();

        assert_eq!(
            storage.get_patches(KEY).await.unwrap(),
            vec![Patch::new(KEY, 0, 4)]
        );
        // Closed caches reject further reads.
        let mut buf = [0u8; 1];
        assert!(matches!(
            cache.read(&mut buf, 0).await,
            Err(ProxyCacheError::CacheState(_))
        ));
    }

    #[tokio::test]
    async fn test_reopen_resumes_persisted_patches() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(MemoryStorage::new());
        {
            let cache = new_cache(dir.path(), storage.clone()).await;
            cache.write(b"0123", 0).await.unwrap();
            cache.put_patch(0, 4).await.unwrap();
            cache.close().await.unwrap();
        }

        let cache = new_cache(dir.path(), storage.clone()).await;
        assert!(!cache.is_completed());
        assert_eq!(
            cache.uncovered(0, 10).await,
            vec![Patch::new(KEY, 4, 10)]
        );
        let mut buf = [0u8; 4];
        assert_eq!(cache.read(&mut buf, 0).await.unwrap(), 4);
        assert_eq!(&buf, b"0123");
    }

    #[tokio::test]
    async fn test_fresh_file_clears_stale_patches() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(MemoryStorage::new());
        storage.put_patch(KEY, Patch::new(KEY, 0, 100)).await.unwrap();

        let cache = new_cache(dir.path(), storage.clone()).await;
        assert!(storage.get_patches(KEY).await.unwrap().is_empty());
        assert_eq!(
            cache.uncovered(0, 10).await,
            vec![Patch::new(KEY, 0, 10)]
        );
    }

    #[tokio::test]
    async fn test_is_ready_to_complete() {
        let dir = tempfile::tempdir().unwrap();
        let cache = new_cache(dir.path(), Arc::new(NoStorage)).await;

        assert!(!cache.is_ready_to_complete(Some(10)).await);
        cache.put_patch(0, 10).await.unwrap();
        assert!(cache.is_ready_to_complete(Some(10)).await);
        assert!(!cache.is_ready_to_complete(Some(20)).await);
        assert!(!cache.is_ready_to_complete(None).await);
    }

    #[tokio::test]
    async fn test_touches_disk_usage_on_close_and_complete() {
        use parking_lot::Mutex;

        #[derive(Default)]
        struct Recorder(Mutex<Vec<PathBuf>>);

        #[async_trait]
        impl DiskUsage for Recorder {
            async fn touch(&self, file: &Path) -> Result<()> {
                self.0.lock().push(file.to_path_buf());
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let cache = FileCache::new(
            dir.path().join("a.mp4"),
            KEY,
            Arc::new(NoStorage),
            recorder.clone(),
        )
        .await
        .unwrap();

        cache.write(b"ab", 0).await.unwrap();
        cache.put_patch(0, 2).await.unwrap();
        cache.complete().await.unwrap();
        cache.close().await.unwrap();

        let touched = recorder.0.lock().clone();
        assert_eq!(
            touched,
            vec![dir.path().join("a.mp4"), dir.path().join("a.mp4")]
        );
    }
}
