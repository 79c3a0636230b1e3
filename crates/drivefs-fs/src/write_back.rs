//! Write-back of locally modified content
//!
//! Closing a file commits its dirty cache record; the [`WriteBack`] then
//! uploads the committed bytes, mirrors the returned metadata into the
//! tree and re-keys the cached content under the new revision.
//!
//! A file reopened while its upload is in flight keeps its dirty record.
//! The next close uploads it again.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, instrument, warn};

use drivefs_core::domain::{DrivePath, FileError, FileResult, ResourceId, StoreMode};
use drivefs_core::events::{EventBus, FileSystemEvent};
use drivefs_core::ports::{ClientContext, IContentCache, IMetadataStore, IRemoteStore};

/// Paths currently open for writing
pub(crate) type OpenFiles = Arc<Mutex<HashSet<DrivePath>>>;

/// Uploads dirty content back to the remote store
#[derive(Clone)]
pub struct WriteBack {
    remote: Arc<dyn IRemoteStore>,
    metadata: Arc<dyn IMetadataStore>,
    cache: Arc<dyn IContentCache>,
    events: EventBus,
    open_files: OpenFiles,
}

impl WriteBack {
    pub(crate) fn new(
        remote: Arc<dyn IRemoteStore>,
        metadata: Arc<dyn IMetadataStore>,
        cache: Arc<dyn IContentCache>,
        events: EventBus,
        open_files: OpenFiles,
    ) -> Self {
        Self {
            remote,
            metadata,
            cache,
            events,
            open_files,
        }
    }

    fn is_open(&self, path: &DrivePath) -> bool {
        self.open_files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(path)
    }

    /// Upload in the background; failures leave the content committed
    pub(crate) fn spawn(&self, resource_id: ResourceId) {
        let write_back = self.clone();
        tokio::spawn(async move {
            if let Err(err) = write_back
                .update_file_by_id(&resource_id, ClientContext::background())
                .await
            {
                warn!(resource_id = %resource_id, error = %err, "Write-back failed");
            }
        });
    }

    /// Upload the locally modified content of `resource_id`
    ///
    /// # Errors
    /// - `NotFound` when the entry or its cached content is unknown
    /// - `InvalidOperation` for directories, hosted documents and clean content
    #[instrument(level = "info", skip_all, fields(resource_id = %resource_id))]
    pub async fn update_file_by_id(
        &self,
        resource_id: &ResourceId,
        context: ClientContext,
    ) -> FileResult<()> {
        let (path, entry) = self.metadata.get_entry_by_id(resource_id).await?;
        if !entry.is_regular_file() {
            return Err(FileError::InvalidOperation);
        }
        let hash = entry.content_hash().cloned().ok_or(FileError::NotFound)?;
        let record = self
            .cache
            .get_cache_entry(resource_id, &hash)
            .await
            .ok_or(FileError::NotFound)?;
        if !record.is_dirty {
            return Err(FileError::InvalidOperation);
        }
        let local = self.cache.get_file(resource_id, &hash).await?;

        let updated = self.remote.update_file(resource_id, &local, context).await?;
        if self.is_open(&path) {
            debug!(path = %path, "File reopened during upload, keeping it dirty");
            return Ok(());
        }

        let new_hash = updated.content_hash().cloned();
        let (new_path, _) = self.metadata.refresh_entry(updated).await?;
        self.cache.clear_dirty(resource_id, &hash).await?;
        if let Some(new_hash) = new_hash.filter(|new_hash| *new_hash != hash) {
            self.cache
                .store(resource_id, &new_hash, &local, StoreMode::Copy)
                .await?;
        }

        if let Some(parent) = new_path.parent() {
            self.events.publish(FileSystemEvent::DirectoryChanged(parent));
        }
        info!(path = %new_path, "Uploaded local modifications");
        Ok(())
    }
}
