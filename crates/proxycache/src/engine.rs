//! # Proxy Cache Engine
//!
//! Orchestrates one [`Source`] and one [`Cache`]: readers block until
//! the bytes they asked for are cached, a single background task fetches
//! whatever is missing, and a listener observes download progress.
//!
//! Readers never fetch themselves. A read that finds a gap starts the
//! fetch task (at most one per engine) and then waits on the progress
//! signal, re-checking its window after every wakeup or timeout. Fetch
//! failures surface to blocked readers once the error count reaches the
//! configured threshold.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::cache::Cache;
use crate::config::ProxyCacheConfig;
use crate::error::{ProxyCacheError, Result};
use crate::listener::CacheListener;
use crate::patch::OPEN_END;
use crate::source::Source;

/// Caching proxy for one source.
///
/// Cheap to share: the engine itself is a handle around shared state,
/// so `read` and `shutdown` take `&self` from any task.
pub struct ProxyCache<S, C> {
    inner: Arc<Inner<S, C>>,
}

struct Inner<S, C> {
    source: S,
    cache: C,
    config: ProxyCacheConfig,
    listener: parking_lot::RwLock<Option<Arc<dyn CacheListener>>>,
    stopped: AtomicBool,
    /// Last percentage forwarded to the listener; -1 before the first.
    last_percent: AtomicI32,
    read_errors: AtomicU32,
    /// Wakes blocked readers after every fetched chunk.
    progress: Notify,
    /// Serializes chunk commits, completion and shutdown.
    stop_lock: tokio::sync::Mutex<()>,
    /// Advisory, observed by the fetch task at chunk boundaries.
    cancel: CancellationToken,
    /// EOF position learned while fetching a source of unknown length;
    /// `OPEN_END` until discovered. Readers clamp their window to it.
    discovered_end: AtomicU64,
    fetch: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl<S, C> Clone for ProxyCache<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S, C> ProxyCache<S, C>
where
    S: Source + 'static,
    C: Cache + 'static,
{
    pub fn new(source: S, cache: C) -> Self {
        Self::with_config(source, cache, ProxyCacheConfig::default())
    }

    pub fn with_config(source: S, cache: C, config: ProxyCacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                cache,
                config,
                listener: parking_lot::RwLock::new(None),
                stopped: AtomicBool::new(false),
                last_percent: AtomicI32::new(-1),
                read_errors: AtomicU32::new(0),
                progress: Notify::new(),
                stop_lock: tokio::sync::Mutex::new(()),
                cancel: CancellationToken::new(),
                discovered_end: AtomicU64::new(OPEN_END),
                fetch: parking_lot::Mutex::new(None),
            }),
        }
    }

    pub fn register_listener(&self, listener: Arc<dyn CacheListener>) {
        *self.inner.listener.write() = Some(listener);
    }

    pub fn source(&self) -> &S {
        &self.inner.source
    }

    pub fn cache(&self) -> &C {
        &self.inner.cache
    }

    /// Read `buf.len()` bytes of the source starting at `offset`,
    /// waiting for the background fetch to cover the window first.
    ///
    /// Returns the number of bytes read, `Ok(0)` at end of stream.
    pub async fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let inner = &self.inner;
        let Some(end) = offset.checked_add(buf.len() as u64) else {
            return Err(ProxyCacheError::InvalidArgument(format!(
                "read window at {offset} overflows"
            )));
        };

        loop {
            if inner.cache.is_completed() || inner.is_stopped() {
                break;
            }
            let end = end.min(inner.discovered_end.load(Ordering::SeqCst));
            if inner.cache.uncovered(offset, end).await.is_empty() {
                break;
            }

            // Register for the wakeup before starting the fetch so a
            // notification between the gap check and the wait is not
            // lost. `enable` is what actually registers the waiter; a
            // merely created Notified future would miss notify_waiters
            // until first polled. The wait is bounded regardless.
            let mut wakeup = std::pin::pin!(inner.progress.notified());
            wakeup.as_mut().enable();
            inner.start_fetch(offset);
            let _ = tokio::time::timeout(inner.config.wait_timeout, wakeup).await;

            let errors = inner.read_errors.load(Ordering::SeqCst);
            if errors >= inner.config.max_source_read_attempts {
                inner.read_errors.store(0, Ordering::SeqCst);
                return Err(ProxyCacheError::SourceRead { attempts: errors });
            }
        }

        let read = inner.cache.read(buf, offset).await?;
        if inner.cache.is_completed() && inner.last_percent.swap(100, Ordering::SeqCst) != 100 {
            inner.notify_listener(100);
        }
        Ok(read)
    }

    /// Stop the engine: cancel the in-flight fetch (it finishes its
    /// current chunk), reject further fetch starts, close the cache.
    ///
    /// Never fails; internal errors are reported and swallowed.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        let _guard = inner.stop_lock.lock().await;
        debug!(url = %inner.source.url(), "shutting down proxy cache");
        inner.stopped.store(true, Ordering::SeqCst);
        inner.cancel.cancel();
        // The task observes the token at its next chunk boundary; no
        // need to keep the handle around.
        inner.fetch.lock().take();
        if let Err(e) = inner.cache.close().await {
            error!(url = %inner.source.url(), error = %e, "error closing cache");
        }
        inner.progress.notify_waiters();
    }
}

impl<S, C> Inner<S, C>
where
    S: Source + 'static,
    C: Cache + 'static,
{
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst) || self.cancel.is_cancelled()
    }

    /// Start the fetch task unless one is already live. The handle slot
    /// lock makes the check-and-spawn atomic with respect to other
    /// starters.
    fn start_fetch(self: &Arc<Self>, offset: u64) {
        let mut slot = self.fetch.lock();
        let running = slot.as_ref().is_some_and(|handle| !handle.is_finished());
        if running || self.is_stopped() || self.cache.is_completed() {
            return;
        }
        debug!(url = %self.source.url(), offset, "starting background fetch");
        let task = self.clone();
        *slot = Some(tokio::spawn(async move { task.fetch(offset).await }));
    }

    async fn fetch(self: Arc<Self>, offset: u64) {
        if let Err(e) = self.fetch_gaps(offset).await {
            self.read_errors.fetch_add(1, Ordering::SeqCst);
            error!(url = %self.source.url(), error = %e, "background fetch failed");
        }
        if let Err(e) = self.source.close().await {
            warn!(url = %self.source.url(), error = %e, "error closing source");
        }
        // Wake every waiter even on early return, so no reader waits
        // past a terminated fetch.
        self.progress.notify_waiters();
    }

    async fn fetch_gaps(&self, offset: u64) -> Result<()> {
        let length = self.source.length().await?;
        let end = length.unwrap_or(OPEN_END);
        let gaps = self.cache.uncovered(offset, end).await;
        let mut buf = vec![0u8; self.config.chunk_size];

        for gap in gaps {
            let mut pos = gap.start;
            self.source.open(pos).await?;
            loop {
                if self.cancel.is_cancelled() {
                    return Ok(());
                }
                let n = self.source.read(&mut buf).await?;
                if n == 0 {
                    if length.is_none() {
                        self.discovered_end.store(pos, Ordering::SeqCst);
                    }
                    break;
                }
                {
                    let _guard = self.stop_lock.lock().await;
                    if self.is_stopped() {
                        return Ok(());
                    }
                    self.cache.write(&buf[..n], pos).await?;
                    self.cache.put_patch(pos, pos + n as u64).await?;
                }
                pos += n as u64;
                self.notify_progress(pos, length);
                if pos >= gap.end {
                    break;
                }
            }
        }

        self.try_complete(length).await?;

        // Guaranteed completion callback for this fetch cycle. The swap
        // guard keeps it to exactly one 100 even when the last chunk
        // notification already reported it.
        if self.last_percent.swap(100, Ordering::SeqCst) != 100 {
            self.notify_listener(100);
        }
        Ok(())
    }

    async fn try_complete(&self, length: Option<u64>) -> Result<()> {
        let _guard = self.stop_lock.lock().await;
        if self.is_stopped() {
            return Ok(());
        }
        let discovered = self.discovered_end.load(Ordering::SeqCst);
        let final_length = length.or((discovered != OPEN_END).then_some(discovered));
        if self.cache.is_ready_to_complete(final_length).await {
            self.cache.complete().await?;
        }
        Ok(())
    }

    /// Forward a progress event to the listener when the percentage
    /// changed, then wake blocked readers.
    fn notify_progress(&self, available: u64, length: Option<u64>) {
        if let Some(length) = length {
            let percent = if length == 0 {
                100
            } else {
                (u128::from(available) * 100 / u128::from(length)) as i32
            };
            if self.last_percent.swap(percent, Ordering::SeqCst) != percent {
                self.notify_listener(percent);
            }
        }
        self.progress.notify_waiters();
    }

    fn notify_listener(&self, percent: i32) {
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener.on_cache_available(
                self.cache.file_path().as_deref(),
                self.source.url(),
                percent,
            );
        }
    }
}
