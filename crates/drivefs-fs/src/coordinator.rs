//! File system coordinator - the public surface of drivefs
//!
//! [`FileSystemCoordinator`] answers path and id based requests by
//! consulting the entry tree first, falling back to the
//! [`ChangeSynchronizer`] to populate it, and delegating content retrieval
//! to the [`Materializer`].
//!
//! ## Open files
//!
//! A path may be open at most once. `open_file` materializes the content
//! and flags it dirty; `close_file` commits it, releases the path whatever
//! the commit outcome and hands committed content to the [`WriteBack`].
//!
//! ## Notifications
//!
//! Every structural change to a directory is announced once per call with
//! [`FileSystemEvent::DirectoryChanged`]. Observers register with
//! [`FileSystemCoordinator::subscribe`].

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use drivefs_core::config::Config;
use drivefs_core::domain::{
    Changestamp, DirectoryFetchSpec, DrivePath, Entry, FileError, FileResult, ResourceId,
};
use drivefs_core::events::{EventBus, EventSubscription, FileSystemEvent};
use drivefs_core::ports::{ClientContext, IContentCache, IMetadataStore, IRemoteStore};
use drivefs_sync::{ChangeSynchronizer, SyncScheduler};

use crate::materialize::{MaterializedFile, Materializer};
use crate::write_back::{OpenFiles, WriteBack};

// ============================================================================
// Reports
// ============================================================================

/// Remote storage quota
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub total: u64,
    pub used: u64,
}

impl Quota {
    pub fn available(&self) -> u64 {
        self.total.saturating_sub(self.used)
    }
}

/// Snapshot of the synchronization state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemMetadata {
    pub loaded: bool,
    pub refreshing: bool,
    pub push_notification_enabled: bool,
    pub polling_interval: Duration,
    pub last_update_check_time: Option<DateTime<Utc>>,
    pub last_update_check_error: Option<FileError>,
    pub largest_changestamp: Changestamp,
}

// ============================================================================
// FileSystemCoordinator
// ============================================================================

/// Orchestrates the entry tree, the content cache and the remote store
pub struct FileSystemCoordinator {
    pub(crate) config: Config,
    pub(crate) remote: Arc<dyn IRemoteStore>,
    pub(crate) metadata: Arc<dyn IMetadataStore>,
    pub(crate) cache: Arc<dyn IContentCache>,
    pub(crate) events: EventBus,
    pub(crate) synchronizer: Arc<ChangeSynchronizer>,
    scheduler: SyncScheduler,
    materializer: Materializer,
    write_back: WriteBack,
    open_files: OpenFiles,
    pub(crate) hide_hosted_documents: AtomicBool,
}

impl FileSystemCoordinator {
    pub fn new(
        config: Config,
        remote: Arc<dyn IRemoteStore>,
        metadata: Arc<dyn IMetadataStore>,
        cache: Arc<dyn IContentCache>,
    ) -> Self {
        let events = EventBus::new(config.file_system.event_capacity);
        let synchronizer = Arc::new(ChangeSynchronizer::new(
            Arc::clone(&remote),
            Arc::clone(&metadata),
            events.clone(),
        ));
        let scheduler = SyncScheduler::new(Arc::clone(&synchronizer), &config.sync);
        let materializer = Materializer::new(
            Arc::clone(&remote),
            Arc::clone(&metadata),
            Arc::clone(&cache),
            events.clone(),
        );
        let open_files: OpenFiles = Arc::new(Mutex::new(HashSet::new()));
        let write_back = WriteBack::new(
            Arc::clone(&remote),
            Arc::clone(&metadata),
            Arc::clone(&cache),
            events.clone(),
            Arc::clone(&open_files),
        );

        info!(
            hide_hosted_documents = config.file_system.hide_hosted_documents,
            "File system coordinator created"
        );

        Self {
            hide_hosted_documents: AtomicBool::new(config.file_system.hide_hosted_documents),
            config,
            remote,
            metadata,
            cache,
            events,
            synchronizer,
            scheduler,
            materializer,
            write_back,
            open_files,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Register an observer for file system events
    pub fn subscribe(&self) -> EventSubscription {
        self.events.subscribe()
    }

    pub fn synchronizer(&self) -> &Arc<ChangeSynchronizer> {
        &self.synchronizer
    }

    fn open_files(&self) -> MutexGuard<'_, HashSet<DrivePath>> {
        self.open_files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_open(&self, path: &DrivePath) -> bool {
        self.open_files().contains(path)
    }

    /// Announce each directory once
    pub(crate) fn notify_directories(&self, directories: impl IntoIterator<Item = DrivePath>) {
        let unique: BTreeSet<DrivePath> = directories.into_iter().collect();
        for path in unique {
            self.events.publish(FileSystemEvent::DirectoryChanged(path));
        }
    }

    pub(crate) fn hides_hosted_documents(&self) -> bool {
        self.hide_hosted_documents.load(Ordering::Relaxed)
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Resolve `path` to its entry, loading the tree if needed
    ///
    /// A file with locally modified content reports the size and modified
    /// time of the cached copy.
    #[instrument(level = "debug", skip_all, fields(path = %path))]
    pub async fn get_entry_info(&self, path: &DrivePath) -> FileResult<Entry> {
        let entry = match self.metadata.get_entry_by_path(path).await {
            Ok(entry) => entry,
            Err(FileError::NotFound) => {
                debug!("Entry not in tree, loading");
                self.synchronizer.load_if_needed(None).await?;
                self.metadata.get_entry_by_path(path).await?
            }
            Err(err) => return Err(err),
        };
        self.apply_local_modifications(entry).await
    }

    /// Resolve a resource id to its path and entry, loading the tree if needed
    #[instrument(level = "debug", skip_all, fields(resource_id = %resource_id))]
    pub async fn get_entry_info_by_id(
        &self,
        resource_id: &ResourceId,
    ) -> FileResult<(DrivePath, Entry)> {
        let (path, entry) = match self.metadata.get_entry_by_id(resource_id).await {
            Ok(found) => found,
            Err(FileError::NotFound) => {
                self.synchronizer.load_if_needed(None).await?;
                self.metadata.get_entry_by_id(resource_id).await?
            }
            Err(err) => return Err(err),
        };
        Ok((path, self.apply_local_modifications(entry).await?))
    }

    async fn apply_local_modifications(&self, mut entry: Entry) -> FileResult<Entry> {
        if !entry.is_regular_file() {
            return Ok(entry);
        }
        let Some(hash) = entry.content_hash().cloned() else {
            return Ok(entry);
        };
        let dirty = self
            .cache
            .get_cache_entry(&entry.resource_id, &hash)
            .await
            .is_some_and(|record| record.is_dirty);
        if !dirty {
            return Ok(entry);
        }

        let local = self
            .cache
            .get_file(&entry.resource_id, &hash)
            .await
            .map_err(|_| FileError::NotFound)?;
        let probed = tokio::task::spawn_blocking(move || std::fs::metadata(local))
            .await?
            .map_err(|_| FileError::NotFound)?;
        entry.size = probed.len();
        if let Ok(modified) = probed.modified() {
            entry.modified_time = DateTime::<Utc>::from(modified);
        }
        Ok(entry)
    }

    /// List a directory
    ///
    /// The directory itself is fetched ahead of the full tree when the
    /// tree is still loading.
    #[instrument(level = "debug", skip_all, fields(path = %path))]
    pub async fn read_directory(&self, path: &DrivePath) -> FileResult<Vec<Entry>> {
        let directory = self.get_entry_info(path).await?;
        if !directory.is_directory {
            return Err(FileError::NotADirectory);
        }

        self.synchronizer
            .load_if_needed(Some(DirectoryFetchSpec::for_directory(&directory)))
            .await?;

        let mut children = self.metadata.read_directory(path).await?;
        if self.hides_hosted_documents() {
            children.retain(|child| !child.is_hosted_document());
        }
        Ok(children)
    }

    /// Reload one directory's children from the remote store
    #[instrument(level = "debug", skip_all, fields(path = %path))]
    pub async fn refresh_directory(&self, path: &DrivePath) -> FileResult<()> {
        let directory = self.get_entry_info(path).await?;
        if !directory.is_directory {
            return Err(FileError::NotADirectory);
        }
        self.synchronizer
            .load_directory_from_server(&directory.resource_id)
            .await
            .map(|_| ())
    }

    // ========================================================================
    // Content
    // ========================================================================

    /// Produce a local file for the entry at `path`
    #[instrument(level = "debug", skip_all, fields(path = %path))]
    pub async fn get_file(
        &self,
        path: &DrivePath,
        context: ClientContext,
    ) -> FileResult<MaterializedFile> {
        let entry = self.get_entry_info(path).await?;
        self.materializer.materialize(path, entry, context).await
    }

    /// Produce a local file for the entry with `resource_id`
    #[instrument(level = "debug", skip_all, fields(resource_id = %resource_id))]
    pub async fn get_file_by_id(
        &self,
        resource_id: &ResourceId,
        context: ClientContext,
    ) -> FileResult<MaterializedFile> {
        let (path, entry) = self.get_entry_info_by_id(resource_id).await?;
        self.materializer.materialize(&path, entry, context).await
    }

    /// Abort a materialization in flight for `path`
    pub async fn cancel_get_file(&self, path: &DrivePath) {
        self.materializer.cancel(path).await;
    }

    /// Open a file for writing
    ///
    /// # Errors
    /// - `InUse` when the path is already open
    /// - `InvalidOperation` for directories and hosted documents
    #[instrument(level = "info", skip_all, fields(path = %path))]
    pub async fn open_file(&self, path: &DrivePath) -> FileResult<PathBuf> {
        if !self.open_files().insert(path.clone()) {
            return Err(FileError::InUse);
        }

        let result = self.open_file_inner(path).await;
        if result.is_err() {
            self.open_files().remove(path);
        }
        result
    }

    async fn open_file_inner(&self, path: &DrivePath) -> FileResult<PathBuf> {
        let entry = self.get_entry_info(path).await?;
        if entry.is_directory || entry.is_hosted_document() {
            return Err(FileError::InvalidOperation);
        }
        let file = self
            .materializer
            .materialize(path, entry, ClientContext::user_initiated())
            .await?;
        self.cache
            .mark_dirty(&file.resource_id, &file.content_hash)
            .await?;
        Ok(file.local_path)
    }

    /// Close a file opened with [`open_file`](Self::open_file)
    ///
    /// The path is released even when committing the content fails. A
    /// successful commit starts the upload in the background.
    #[instrument(level = "info", skip_all, fields(path = %path))]
    pub async fn close_file(&self, path: &DrivePath) -> FileResult<()> {
        if !self.is_open(path) {
            return Err(FileError::NotFound);
        }

        let result = self.commit_open_file(path).await;
        self.open_files().remove(path);
        match result {
            Ok(resource_id) => {
                self.write_back.spawn(resource_id);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "Failed to commit closed file");
                Err(err)
            }
        }
    }

    async fn commit_open_file(&self, path: &DrivePath) -> FileResult<ResourceId> {
        let entry = self.metadata.get_entry_by_path(path).await?;
        let hash = entry.content_hash().ok_or(FileError::NotFound)?;
        self.cache.commit_dirty(&entry.resource_id, hash).await?;
        Ok(entry.resource_id)
    }

    /// Upload the locally modified content of `resource_id` now
    pub async fn update_file_by_id(
        &self,
        resource_id: &ResourceId,
        context: ClientContext,
    ) -> FileResult<()> {
        self.write_back.update_file_by_id(resource_id, context).await
    }

    // ========================================================================
    // Synchronization
    // ========================================================================

    /// Kick off the first full load without waiting for it
    pub fn start_initial_feed_fetch(&self) {
        let synchronizer = Arc::clone(&self.synchronizer);
        tokio::spawn(async move {
            if let Err(err) = synchronizer.load_if_needed(None).await {
                warn!(error = %err, "Initial feed fetch failed");
            }
        });
    }

    /// Forget the tree and load it again from scratch
    #[instrument(level = "info", skip(self))]
    pub async fn reload(&self) -> FileResult<()> {
        self.metadata.reset().await;
        self.synchronizer.reset();
        self.synchronizer.load_if_needed(None).await
    }

    pub async fn check_for_updates(&self) -> FileResult<()> {
        self.synchronizer.check_for_updates().await
    }

    pub fn start_polling(&self) {
        self.scheduler.start();
    }

    pub async fn stop_polling(&self) {
        self.scheduler.stop().await;
    }

    pub fn set_push_notification_enabled(&self, enabled: bool) {
        self.scheduler.set_push_notification_enabled(enabled);
    }

    // ========================================================================
    // Settings and reports
    // ========================================================================

    /// Show or hide hosted documents in listings and local searches
    pub fn set_hide_hosted_documents(&self, hide: bool) {
        let previous = self.hide_hosted_documents.swap(hide, Ordering::Relaxed);
        if previous != hide {
            info!(hide, "Hosted document visibility changed");
            self.events
                .publish(FileSystemEvent::DirectoryChanged(DrivePath::root()));
        }
    }

    pub async fn get_available_space(&self) -> FileResult<Quota> {
        let about = self.remote.get_about().await?;
        Ok(Quota {
            total: about.quota_total,
            used: about.quota_used,
        })
    }

    pub async fn get_metadata(&self) -> FileSystemMetadata {
        let last_check = self.synchronizer.last_update_check();
        FileSystemMetadata {
            loaded: self.synchronizer.is_loaded(),
            refreshing: self.synchronizer.is_refreshing(),
            push_notification_enabled: self.scheduler.push_notification_enabled(),
            polling_interval: self.scheduler.polling_interval(),
            last_update_check_time: last_check.as_ref().map(|check| check.checked_at),
            last_update_check_error: last_check.and_then(|check| check.error),
            largest_changestamp: self.metadata.largest_changestamp().await,
        }
    }

    pub fn notify_mounted(&self) {
        self.events.publish(FileSystemEvent::Mounted);
    }

    pub fn notify_to_be_unmounted(&self) {
        self.events.publish(FileSystemEvent::Unmounted);
    }
}
