//! # Disk Usage
//!
//! Hook through which the cache store reports file activity to an
//! eviction policy. Policies themselves (LRU by total size, by file
//! count, ...) live outside this crate.

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;

/// Collaborator notified whenever a cache file is closed or completed.
#[async_trait]
pub trait DiskUsage: Send + Sync {
    /// Record that `file` was used just now.
    async fn touch(&self, file: &Path) -> Result<()>;
}

/// Disk usage policy that never evicts anything.
#[derive(Debug, Default, Clone)]
pub struct UnlimitedDiskUsage;

#[async_trait]
impl DiskUsage for UnlimitedDiskUsage {
    async fn touch(&self, _file: &Path) -> Result<()> {
        Ok(())
    }
}
