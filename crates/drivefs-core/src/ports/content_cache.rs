//! Content cache port (driven/secondary port)
//!
//! Maps `(resource_id, content_hash)` to a local byte blob. How the blobs
//! are laid out on disk and which ones get evicted is the adapter's concern.

use std::path::{Path, PathBuf};

use crate::domain::{CacheArea, CacheRecord, ContentHash, FileResult, ResourceId, StoreMode};

/// Port trait for the local content cache
#[async_trait::async_trait]
pub trait IContentCache: Send + Sync {
    /// Local path of present content
    ///
    /// # Errors
    /// `FileError::NotFound` when the record is absent or not present
    async fn get_file(&self, resource_id: &ResourceId, hash: &ContentHash)
        -> FileResult<PathBuf>;

    /// The cache record, if one exists
    async fn get_cache_entry(
        &self,
        resource_id: &ResourceId,
        hash: &ContentHash,
    ) -> Option<CacheRecord>;

    /// Make room for `bytes` more content, evicting if necessary
    ///
    /// # Returns
    /// `false` when the space cannot be freed
    async fn free_disk_space_if_needed_for(&self, bytes: u64) -> bool;

    /// Take ownership of `source` as the content of `(resource_id, hash)`
    async fn store(
        &self,
        resource_id: &ResourceId,
        hash: &ContentHash,
        source: &Path,
        mode: StoreMode,
    ) -> FileResult<()>;

    /// Flag the content as locally modified
    async fn mark_dirty(&self, resource_id: &ResourceId, hash: &ContentHash) -> FileResult<()>;

    /// Hand dirty content over for write-back
    async fn commit_dirty(&self, resource_id: &ResourceId, hash: &ContentHash)
        -> FileResult<()>;

    /// Mark dirty content as written back
    async fn clear_dirty(&self, resource_id: &ResourceId, hash: &ContentHash) -> FileResult<()>;

    async fn pin(&self, resource_id: &ResourceId, hash: &ContentHash) -> FileResult<()>;

    async fn unpin(&self, resource_id: &ResourceId, hash: &ContentHash) -> FileResult<()>;

    /// Drop every record of `resource_id`
    async fn remove(&self, resource_id: &ResourceId) -> FileResult<()>;

    /// Absolute path of a scratch area
    fn cache_directory(&self, area: CacheArea) -> PathBuf;
}
