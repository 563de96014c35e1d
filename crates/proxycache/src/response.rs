//! # Range Response Composer
//!
//! Builds the outbound HTTP response for a byte-range request and
//! streams the body, either through the engine (so the bytes land in
//! the shared cache) or straight from a private source instance.
//!
//! The bypass path exists for seeks: a partial request against a source
//! of known length is unlikely to profit from the sequential cache and
//! should not stall behind its fetch, so it gets a fresh source opened
//! at the requested offset and the shared cache is left untouched.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::cache::Cache;
use crate::engine::ProxyCache;
use crate::error::{ProxyCacheError, Result};
use crate::request::RangeRequest;
use crate::source::Source;

/// Serves range requests for one engine.
pub struct RangeResponder<S, C> {
    engine: ProxyCache<S, C>,
    chunk_size: usize,
}

impl<S, C> RangeResponder<S, C>
where
    S: Source + Clone + 'static,
    C: Cache + 'static,
{
    pub fn new(engine: ProxyCache<S, C>, chunk_size: usize) -> Self {
        Self { engine, chunk_size }
    }

    /// Write status line, headers and body for `request` into `sink`.
    ///
    /// Sink failures surface as [`ProxyCacheError::Transport`]; read
    /// failures keep the engine's own error kinds. Once headers are
    /// written, only a hard error truncates the body.
    pub async fn serve<W>(&self, request: &RangeRequest, sink: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let source = self.engine.source();
        let length = source.length().await.ok().flatten();
        let mime = source.mime().await.ok().flatten();

        let headers = response_headers(request, length, mime.as_deref());
        sink.write_all(headers.as_bytes())
            .await
            .map_err(ProxyCacheError::Transport)?;

        let length_known = length.is_some_and(|len| len > 0);
        if !length_known || !request.partial {
            self.serve_from_cache(request.offset, sink).await
        } else {
            self.serve_bypassing_cache(request.offset, sink).await
        }
    }

    async fn serve_from_cache<W>(&self, offset: u64, sink: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut buf = vec![0u8; self.chunk_size];
        let mut pointer = offset;
        loop {
            let read = self.engine.read(&mut buf, pointer).await?;
            if read == 0 {
                return Ok(());
            }
            sink.write_all(&buf[..read])
                .await
                .map_err(ProxyCacheError::Transport)?;
            sink.flush().await.map_err(ProxyCacheError::Transport)?;
            pointer += read as u64;
        }
    }

    /// Stream from a fresh source instance, leaving the shared cache
    /// alone. The private source is closed on every exit path.
    async fn serve_bypassing_cache<W>(&self, offset: u64, sink: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        debug!(url = %self.engine.source().url(), offset, "bypassing cache for seek request");
        let source = self.engine.source().clone();
        let result = stream_source(&source, offset, sink, self.chunk_size).await;
        if let Err(e) = source.close().await {
            warn!(url = %source.url(), error = %e, "error closing bypass source");
        }
        result
    }
}

async fn stream_source<S, W>(source: &S, offset: u64, sink: &mut W, chunk_size: usize) -> Result<()>
where
    S: Source,
    W: AsyncWrite + Unpin + Send,
{
    source.open(offset).await?;
    let mut buf = vec![0u8; chunk_size];
    loop {
        let read = source.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        sink.write_all(&buf[..read])
            .await
            .map_err(ProxyCacheError::Transport)?;
    }
    sink.flush().await.map_err(ProxyCacheError::Transport)
}

/// Byte-exact response header block.
fn response_headers(request: &RangeRequest, length: Option<u64>, mime: Option<&str>) -> String {
    let mut headers = String::new();
    headers.push_str(if request.partial {
        "HTTP/1.1 206 PARTIAL CONTENT\n"
    } else {
        "HTTP/1.1 200 OK\n"
    });
    headers.push_str("Accept-Ranges: bytes\n");
    if let Some(length) = length {
        let content_length = if request.partial {
            length.saturating_sub(request.offset)
        } else {
            length
        };
        headers.push_str(&format!("Content-Length: {content_length}\n"));
        if request.partial && length > 0 {
            headers.push_str(&format!(
                "Content-Range: bytes {}-{}/{}\n",
                request.offset,
                length - 1,
                length
            ));
        }
    }
    if let Some(mime) = mime {
        headers.push_str(&format!("Content-Type: {mime}\n"));
    }
    headers.push('\n');
    headers
}
