//! # HTTP Source
//!
//! Remote byte provider over `reqwest`. Opening at a nonzero offset
//! issues a ranged GET; the response stream is consumed chunk by chunk
//! with leftover-chunk buffering.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE, RANGE};
use reqwest::{Client, StatusCode};
use std::pin::Pin;
use tracing::debug;
use url::Url;

use crate::error::{ProxyCacheError, Result};

use super::{CacheInfo, Source};

struct OpenStream {
    stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    chunk: Option<Bytes>,
    pos: usize,
}

/// Source reading from a remote HTTP(S) URL.
pub struct HttpSource {
    url: Url,
    client: Client,
    info: Mutex<Option<CacheInfo>>,
    stream: tokio::sync::Mutex<Option<OpenStream>>,
}

impl HttpSource {
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| ProxyCacheError::InvalidArgument(format!("invalid url {url}: {e}")))?;
        Ok(Self::with_client(url, Client::new()))
    }

    /// Use a pre-built client, e.g. one carrying injected headers or
    /// proxy settings.
    pub fn with_client(url: Url, client: Client) -> Self {
        Self {
            url,
            client,
            info: Mutex::new(None),
            stream: tokio::sync::Mutex::new(None),
        }
    }

    /// Probe the source metadata without keeping a body stream open.
    async fn fetch_info(&self) -> Result<CacheInfo> {
        if let Some(info) = self.info.lock().clone() {
            return Ok(info);
        }
        debug!(url = %self.url, "probing source info");
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await?
            .error_for_status()?;
        let info = CacheInfo {
            url: self.url.to_string(),
            length: response.content_length(),
            mime: header_str(response.headers().get(CONTENT_TYPE)),
        };
        *self.info.lock() = Some(info.clone());
        Ok(info)
    }
}

impl Clone for HttpSource {
    /// A clone is a fresh, unopened source for the same URL.
    fn clone(&self) -> Self {
        Self::with_client(self.url.clone(), self.client.clone())
    }
}

#[async_trait::async_trait]
impl Source for HttpSource {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn length(&self) -> Result<Option<u64>> {
        Ok(self.fetch_info().await?.length)
    }

    async fn mime(&self) -> Result<Option<String>> {
        Ok(self.fetch_info().await?.mime)
    }

    async fn open(&self, offset: u64) -> Result<()> {
        let mut request = self.client.get(self.url.clone());
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        let response = request.send().await?;
        let status = response.status();

        // A server ignoring the range and replying 200 would hand us the
        // body from byte zero; consuming it as if it started at `offset`
        // corrupts the cache, so it is an error.
        if offset > 0 && status != StatusCode::PARTIAL_CONTENT {
            return Err(ProxyCacheError::SourceIo(format!(
                "ranged request at offset {offset} for {} answered with {status}",
                self.url
            )));
        }
        if !status.is_success() {
            return Err(ProxyCacheError::SourceIo(format!(
                "opening {} failed with {status}",
                self.url
            )));
        }

        let length = if status == StatusCode::PARTIAL_CONTENT {
            header_str(response.headers().get(CONTENT_RANGE))
                .as_deref()
                .and_then(content_range_total)
        } else {
            response.content_length()
        };
        *self.info.lock() = Some(CacheInfo {
            url: self.url.to_string(),
            length,
            mime: header_str(response.headers().get(CONTENT_TYPE)),
        });

        debug!(url = %self.url, offset, status = %status, "opened http source");
        *self.stream.lock().await = Some(OpenStream {
            stream: Box::pin(response.bytes_stream()),
            chunk: None,
            pos: 0,
        });
        Ok(())
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut guard = self.stream.lock().await;
        let open = guard.as_mut().ok_or_else(|| {
            ProxyCacheError::SourceIo(format!("source {} is not opened", self.url))
        })?;

        loop {
            if let Some(chunk) = &open.chunk {
                if open.pos < chunk.len() {
                    let n = buf.len().min(chunk.len() - open.pos);
                    buf[..n].copy_from_slice(&chunk[open.pos..open.pos + n]);
                    open.pos += n;
                    return Ok(n);
                }
                open.chunk = None;
                open.pos = 0;
            }

            match open.stream.next().await {
                Some(Ok(chunk)) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    open.chunk = Some(chunk);
                    open.pos = 0;
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(0),
            }
        }
    }

    async fn close(&self) -> Result<()> {
        *self.stream.lock().await = None;
        Ok(())
    }
}

fn header_str(value: Option<&reqwest::header::HeaderValue>) -> Option<String> {
    value.and_then(|v| v.to_str().ok()).map(str::to_owned)
}

/// Total length from a `Content-Range: bytes a-b/total` value; `None`
/// when the total is `*` or the value is malformed.
fn content_range_total(value: &str) -> Option<u64> {
    value.strip_prefix("bytes ")?.rsplit('/').next()?.parse().ok()
}
