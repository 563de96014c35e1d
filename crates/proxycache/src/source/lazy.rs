//! # Lazy Source
//!
//! Delegating source wrapper: the inner source is built by a factory on
//! first use, and metadata queries go to durable storage before they
//! touch the network. Cloning yields a fresh, unopened wrapper over the
//! same factory, which is what the bypass path uses.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::storage::MetadataStorage;

use super::{CacheInfo, Source};

struct LazyState<S> {
    source: Option<S>,
    pointer: u64,
    opened: bool,
}

/// Source wrapper with lazy construction and storage-backed metadata.
pub struct LazySource<S> {
    url: String,
    factory: Arc<dyn Fn() -> S + Send + Sync>,
    storage: Arc<dyn MetadataStorage>,
    info: Mutex<Option<CacheInfo>>,
    state: tokio::sync::Mutex<LazyState<S>>,
}

impl<S: Source> LazySource<S> {
    pub fn new(
        url: impl Into<String>,
        storage: Arc<dyn MetadataStorage>,
        factory: impl Fn() -> S + Send + Sync + 'static,
    ) -> Self {
        Self {
            url: url.into(),
            factory: Arc::new(factory),
            storage,
            info: Mutex::new(None),
            state: tokio::sync::Mutex::new(LazyState {
                source: None,
                pointer: 0,
                opened: false,
            }),
        }
    }

    fn init<'a>(&self, state: &'a mut LazyState<S>) -> &'a mut S {
        state.source.get_or_insert_with(|| {
            debug!(url = %self.url, "building inner source");
            (self.factory)()
        })
    }

    /// Snapshot the inner source's metadata into storage and the local
    /// cell. Best-effort: a failed probe leaves the previous snapshot.
    async fn save_info(&self, source: &S) {
        let (length, mime) = match (source.length().await, source.mime().await) {
            (Ok(length), Ok(mime)) => (length, mime),
            _ => return,
        };
        let info = CacheInfo {
            url: self.url.clone(),
            length,
            mime,
        };
        if let Err(e) = self.storage.put_info(&self.url, info.clone()).await {
            debug!(url = %self.url, error = %e, "failed to store source info");
        }
        *self.info.lock() = Some(info);
    }

    async fn fetch_info(&self) -> Result<Option<CacheInfo>> {
        if let Some(info) = self.info.lock().clone() {
            return Ok(Some(info));
        }
        if let Ok(Some(info)) = self.storage.get_info(&self.url).await {
            *self.info.lock() = Some(info.clone());
            return Ok(Some(info));
        }
        let mut state = self.state.lock().await;
        let source = self.init(&mut state);
        // Split the borrows: save_info only needs &S.
        let source = &*source;
        self.save_info(source).await;
        Ok(self.info.lock().clone())
    }
}

impl<S: Source> Clone for LazySource<S> {
    fn clone(&self) -> Self {
        Self {
            url: self.url.clone(),
            factory: self.factory.clone(),
            storage: self.storage.clone(),
            info: Mutex::new(None),
            state: tokio::sync::Mutex::new(LazyState {
                source: None,
                pointer: 0,
                opened: false,
            }),
        }
    }
}

#[async_trait]
impl<S: Source> Source for LazySource<S> {
    fn url(&self) -> &str {
        &self.url
    }

    async fn length(&self) -> Result<Option<u64>> {
        Ok(self.fetch_info().await?.and_then(|info| info.length))
    }

    async fn mime(&self) -> Result<Option<String>> {
        Ok(self.fetch_info().await?.and_then(|info| info.mime))
    }

    async fn open(&self, offset: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.opened && state.pointer == offset {
            // Already positioned there, keep the open stream.
            return Ok(());
        }
        let source = self.init(&mut state);
        let source = &*source;
        self.save_info(source).await;
        source.open(offset).await?;
        state.pointer = offset;
        state.opened = true;
        Ok(())
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock().await;
        let source = self.init(&mut state);
        let n = source.read(buf).await?;
        state.pointer += n as u64;
        Ok(n)
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.opened = false;
        if let Some(source) = &state.source {
            source.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::source::MemorySource;
    use crate::storage::{MemoryStorage, NoStorage};

    const URL: &str = "mem://a";

    fn counted_factory(
        counter: Arc<AtomicUsize>,
    ) -> impl Fn() -> MemorySource + Send + Sync + 'static {
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            MemorySource::new(URL, &b"0123456789"[..]).with_mime("video/mp4")
        }
    }

    #[tokio::test]
    async fn test_stored_info_skips_the_factory() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .put_info(
                URL,
                CacheInfo {
                    url: URL.to_owned(),
                    length: Some(10),
                    mime: Some("video/mp4".to_owned()),
                },
            )
            .await
            .unwrap();

        let built = Arc::new(AtomicUsize::new(0));
        let source = LazySource::new(URL, storage, counted_factory(built.clone()));

        assert_eq!(source.length().await.unwrap(), Some(10));
        assert_eq!(source.mime().await.unwrap(), Some("video/mp4".to_owned()));
        assert_eq!(built.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_probe_saves_info_to_storage() {
        let storage = Arc::new(MemoryStorage::new());
        let built = Arc::new(AtomicUsize::new(0));
        let source = LazySource::new(URL, storage.clone(), counted_factory(built.clone()));

        assert_eq!(source.length().await.unwrap(), Some(10));
        assert_eq!(built.load(Ordering::SeqCst), 1);
        let stored = storage.get_info(URL).await.unwrap().unwrap();
        assert_eq!(stored.length, Some(10));
        assert_eq!(stored.mime, Some("video/mp4".to_owned()));

        // Second query is answered from the local cell.
        assert_eq!(source.mime().await.unwrap(), Some("video/mp4".to_owned()));
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_skip_when_already_positioned() {
        let built = Arc::new(AtomicUsize::new(0));
        let source = LazySource::new(
            URL,
            Arc::new(NoStorage),
            counted_factory(built.clone()),
        );

        source.open(4).await.unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(source.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf, b"45");

        // Reads advanced the pointer to 6; re-opening at 6 keeps the
        // stream, re-opening elsewhere repositions it.
        source.open(6).await.unwrap();
        assert_eq!(source.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf, b"67");

        source.open(0).await.unwrap();
        assert_eq!(source.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf, b"01");
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clone_is_fresh() {
        let built = Arc::new(AtomicUsize::new(0));
        let source = LazySource::new(
            URL,
            Arc::new(NoStorage),
            counted_factory(built.clone()),
        );
        source.open(5).await.unwrap();

        let clone = source.clone();
        clone.open(0).await.unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(clone.read(&mut buf).await.unwrap(), 3);
        assert_eq!(&buf, b"012");
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_close_allows_reopen_at_same_offset() {
        let built = Arc::new(AtomicUsize::new(0));
        let source = LazySource::new(
            URL,
            Arc::new(NoStorage),
            counted_factory(built.clone()),
        );
        source.open(0).await.unwrap();
        source.close().await.unwrap();

        // The skip check does not apply to a closed stream.
        source.open(0).await.unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(source.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf, b"01");
    }
}
