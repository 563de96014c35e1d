//! In-memory source, used directly in tests and wherever the bytes are
//! already at hand.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{ProxyCacheError, Result};

use super::Source;

struct State {
    pos: u64,
    opened: bool,
}

/// Source backed by a byte buffer.
pub struct MemorySource {
    url: String,
    data: Bytes,
    mime: Option<String>,
    /// When false, `length()` reports unknown, mimicking a chunked
    /// transfer of a known body.
    advertise_length: bool,
    state: Mutex<State>,
}

impl MemorySource {
    pub fn new(url: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            url: url.into(),
            data: data.into(),
            mime: None,
            advertise_length: true,
            state: Mutex::new(State {
                pos: 0,
                opened: false,
            }),
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    pub fn with_unknown_length(mut self) -> Self {
        self.advertise_length = false;
        self
    }
}

impl Clone for MemorySource {
    /// A clone is a fresh, unopened source over the same bytes.
    fn clone(&self) -> Self {
        Self {
            url: self.url.clone(),
            data: self.data.clone(),
            mime: self.mime.clone(),
            advertise_length: self.advertise_length,
            state: Mutex::new(State {
                pos: 0,
                opened: false,
            }),
        }
    }
}

#[async_trait]
impl Source for MemorySource {
    fn url(&self) -> &str {
        &self.url
    }

    async fn length(&self) -> Result<Option<u64>> {
        Ok(self.advertise_length.then_some(self.data.len() as u64))
    }

    async fn mime(&self) -> Result<Option<String>> {
        Ok(self.mime.clone())
    }

    async fn open(&self, offset: u64) -> Result<()> {
        if offset > self.data.len() as u64 {
            return Err(ProxyCacheError::SourceIo(format!(
                "offset {offset} beyond source of {} bytes",
                self.data.len()
            )));
        }
        let mut state = self.state.lock();
        state.pos = offset;
        state.opened = true;
        Ok(())
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        if !state.opened {
            return Err(ProxyCacheError::SourceIo(format!(
                "source {} is not opened",
                self.url
            )));
        }
        let pos = state.pos as usize;
        if pos >= self.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.data.len() - pos);
        buf[..n].copy_from_slice(&self.data[pos..pos + n]);
        state.pos += n as u64;
        Ok(n)
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().opened = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_read_from_offset() {
        let source = MemorySource::new("mem://a", &b"0123456789"[..]);
        source.open(4).await.unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(source.read(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"4567");
        assert_eq!(source.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"89");
        assert_eq!(source.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_before_open_fails() {
        let source = MemorySource::new("mem://a", &b"abc"[..]);
        let mut buf = [0u8; 3];
        assert!(matches!(
            source.read(&mut buf).await,
            Err(ProxyCacheError::SourceIo(_))
        ));
    }

    #[tokio::test]
    async fn test_length_and_mime() {
        let source = MemorySource::new("mem://a", &b"abc"[..]).with_mime("video/mp4");
        assert_eq!(source.length().await.unwrap(), Some(3));
        assert_eq!(source.mime().await.unwrap(), Some("video/mp4".to_owned()));

        let unknown = MemorySource::new("mem://a", &b"abc"[..]).with_unknown_length();
        assert_eq!(unknown.length().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clone_resets_position() {
        let source = MemorySource::new("mem://a", &b"0123"[..]);
        source.open(2).await.unwrap();

        let clone = source.clone();
        clone.open(0).await.unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(clone.read(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"0123");
    }
}
