//! File materialization - turning an entry into a local file
//!
//! Provides the [`Materializer`], which produces a local path for a file
//! entry:
//!
//! - **Hosted documents** become a small JSON stub in the documents scratch
//!   area, holding the edit URL and the resource id.
//! - **Regular files** are served from the content cache, or downloaded
//!   into it first.
//!
//! ```text
//! get_file ──► cache hit? ──yes──► RegularFile
//!                  │
//!                  no
//!                  ▼
//!   fresh metadata ─► refresh tree ─► reserve space ─► temp file
//!                                                         │
//!                              store ◄── download ◄───────┘
//!                                │
//!                                ▼
//!                 DirectoryChanged(parent) ─► RegularFile
//! ```
//!
//! Concurrent requests for the same `(resource_id, content_hash)` share one
//! pipeline run. Every request registers its own [`CancellationToken`] under
//! the drive path it was made for, so [`Materializer::cancel`] releases only
//! the requests for that path. The shared run is aborted once its last
//! waiter has cancelled.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use drivefs_core::domain::entry::HOSTED_DOCUMENT_STUB_MIME_TYPE;
use drivefs_core::domain::{
    CacheArea, ContentHash, DrivePath, Entry, FileError, FileResult, FileSpecificInfo,
    RemoteError, ResourceId, StoreMode,
};
use drivefs_core::events::{EventBus, FileSystemEvent};
use drivefs_core::ports::{ClientContext, IContentCache, IMetadataStore, IRemoteStore};

// ============================================================================
// MaterializedFile
// ============================================================================

/// What kind of local file a materialization produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// The cached bytes of a regular file
    RegularFile,
    /// A JSON stub pointing at a hosted document
    HostedDocument,
}

/// A local file standing in for a remote entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedFile {
    pub local_path: PathBuf,
    pub mime_type: String,
    pub kind: FileKind,
    pub resource_id: ResourceId,
    /// Revision of the content at `local_path`
    pub content_hash: ContentHash,
}

#[derive(Serialize)]
struct HostedDocumentStub<'a> {
    url: &'a str,
    resource_id: &'a str,
}

type Key = (ResourceId, ContentHash);
type Outcome = Option<FileResult<MaterializedFile>>;

/// One pipeline run, shared by every request for the same revision
#[derive(Clone)]
struct Run {
    id: u64,
    outcome: watch::Receiver<Outcome>,
    /// Requests still waiting on the outcome
    waiters: Arc<AtomicUsize>,
    /// Fired when the last waiter cancels
    abort: CancellationToken,
}

// ============================================================================
// Materializer
// ============================================================================

/// Runs the materialization pipeline with request coalescing
#[derive(Clone)]
pub struct Materializer {
    remote: Arc<dyn IRemoteStore>,
    metadata: Arc<dyn IMetadataStore>,
    cache: Arc<dyn IContentCache>,
    events: EventBus,
    /// Pipelines in flight, keyed by content revision
    in_flight: Arc<DashMap<Key, Run>>,
    /// Per-request cancellation handles, keyed by the drive path of the request
    cancellations: Arc<DashMap<DrivePath, Vec<(u64, CancellationToken)>>>,
    next_id: Arc<AtomicU64>,
}

impl Materializer {
    pub fn new(
        remote: Arc<dyn IRemoteStore>,
        metadata: Arc<dyn IMetadataStore>,
        cache: Arc<dyn IContentCache>,
        events: EventBus,
    ) -> Self {
        Self {
            remote,
            metadata,
            cache,
            events,
            in_flight: Arc::new(DashMap::new()),
            cancellations: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of download pipelines currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of requests waiting on download pipelines
    pub fn waiters(&self) -> usize {
        self.in_flight
            .iter()
            .map(|run| run.waiters.load(Ordering::SeqCst))
            .sum()
    }

    /// Produce a local file for `entry`, found at `path`
    ///
    /// # Errors
    /// - `NotFound` when the entry carries no file information
    /// - `AccessDenied` when the remote store offers no download locator
    /// - `NoSpace` when the cache cannot make room for the content
    /// - `Cancelled` when [`Materializer::cancel`] was called for `path`
    pub async fn materialize(
        &self,
        path: &DrivePath,
        entry: Entry,
        context: ClientContext,
    ) -> FileResult<MaterializedFile> {
        let Some(info) = entry.file_info.clone() else {
            return Err(FileError::NotFound);
        };

        if info.is_hosted_document {
            return self.stage_hosted_document(&entry, &info).await;
        }

        if let Ok(local_path) = self
            .cache
            .get_file(&entry.resource_id, &info.content_hash)
            .await
        {
            debug!(path = %path, "Serving file from cache");
            return Ok(MaterializedFile {
                local_path,
                mime_type: info.mime_type,
                kind: FileKind::RegularFile,
                resource_id: entry.resource_id,
                content_hash: info.content_hash,
            });
        }

        let key = (entry.resource_id.clone(), info.content_hash.clone());
        let run = match self.in_flight.entry(key.clone()) {
            MapEntry::Occupied(occupied) if !occupied.get().abort.is_cancelled() => {
                debug!(path = %path, "Joining download already in flight");
                let run = occupied.get().clone();
                run.waiters.fetch_add(1, Ordering::SeqCst);
                run
            }
            MapEntry::Occupied(mut occupied) => {
                let run = self.spawn_pipeline(key.clone(), path.clone(), entry, context);
                occupied.insert(run.clone());
                run
            }
            MapEntry::Vacant(vacant) => {
                let run = self.spawn_pipeline(key.clone(), path.clone(), entry, context);
                vacant.insert(run.clone());
                run
            }
        };

        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.cancellations
            .entry(path.clone())
            .or_default()
            .push((request_id, token.clone()));

        let result = tokio::select! {
            outcome = Self::wait(run.outcome.clone()) => outcome,
            _ = token.cancelled() => {
                debug!(path = %path, "Request cancelled");
                self.leave(&key, &run);
                Err(FileError::Cancelled)
            }
        };

        self.cancellations.remove_if_mut(path, |_, tokens| {
            tokens.retain(|(registered, _)| *registered != request_id);
            tokens.is_empty()
        });
        result
    }

    async fn wait(mut rx: watch::Receiver<Outcome>) -> FileResult<MaterializedFile> {
        loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone().unwrap_or_else(|| {
                    Err(FileError::Failed("materialization task dropped".to_string()))
                });
            }
        }
    }

    /// Drop a cancelled waiter, aborting the run when it was the last one
    fn leave(&self, key: &Key, run: &Run) {
        // Holding the map entry keeps joins out while the count reaches zero
        let Some(current) = self.in_flight.get_mut(key) else {
            return;
        };
        if current.id == run.id && run.waiters.fetch_sub(1, Ordering::SeqCst) == 1 {
            debug!("Last waiter cancelled, aborting download");
            run.abort.cancel();
        }
    }

    fn spawn_pipeline(
        &self,
        key: Key,
        path: DrivePath,
        entry: Entry,
        context: ClientContext,
    ) -> Run {
        let (tx, rx) = watch::channel(None);
        let run = Run {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            outcome: rx,
            waiters: Arc::new(AtomicUsize::new(1)),
            abort: CancellationToken::new(),
        };

        let this = self.clone();
        let (run_id, abort) = (run.id, run.abort.clone());
        tokio::spawn(async move {
            let result = this.download_pipeline(&path, entry, context, &abort).await;
            match &result {
                Ok(file) => info!(path = %path, local = %file.local_path.display(), "File materialized"),
                Err(err) => warn!(path = %path, error = %err, "Materialization failed"),
            }

            this.in_flight.remove_if(&key, |_, current| current.id == run_id);
            let _ = tx.send(Some(result));
        });
        run
    }

    /// Cancel every request made for `path`
    ///
    /// Without a tracked request the remote store is asked to cancel
    /// whatever it runs for `path`.
    pub async fn cancel(&self, path: &DrivePath) {
        match self.cancellations.remove(path) {
            Some((_, tokens)) => {
                debug!(path = %path, requests = tokens.len(), "Cancelling materialization");
                for (_, token) in tokens {
                    token.cancel();
                }
            }
            None => self.remote.cancel(path).await,
        }
    }

    // ------------------------------------------------------------------------
    // Pipeline stages
    // ------------------------------------------------------------------------

    async fn download_pipeline(
        &self,
        path: &DrivePath,
        entry: Entry,
        context: ClientContext,
        token: &CancellationToken,
    ) -> FileResult<MaterializedFile> {
        let remote_entry = tokio::select! {
            _ = token.cancelled() => {
                self.remote.cancel(path).await;
                return Err(FileError::Cancelled);
            }
            fetched = self.remote.get_entry(&entry.resource_id, context) => fetched?,
        };
        if remote_entry.download_url.is_empty() {
            return Err(FileError::AccessDenied);
        }
        if token.is_cancelled() {
            return Err(FileError::Cancelled);
        }

        let (fresh_path, fresh) = self.metadata.refresh_entry(remote_entry.entry).await?;
        let Some(info) = fresh.file_info.clone() else {
            return Err(FileError::NotFound);
        };
        let resource_id = fresh.resource_id.clone();

        if !self.cache.free_disk_space_if_needed_for(fresh.size).await {
            warn!(path = %path, size = fresh.size, "Not enough space for download");
            return Err(FileError::NoSpace);
        }

        let destination = self.create_download_target().await?;
        debug!(path = %path, destination = %destination.display(), "Downloading");
        let downloaded = tokio::select! {
            _ = token.cancelled() => {
                self.remote.cancel(path).await;
                Err(RemoteError::Cancelled)
            }
            result = self.remote.download(path, &destination, &remote_entry.download_url, context) => result,
        };

        let downloaded = match downloaded {
            Ok(downloaded) => downloaded,
            Err(RemoteError::Cancelled) => {
                self.unpin_if_pinned(&resource_id, &info.content_hash).await;
                self.discard(destination).await;
                return Err(FileError::Cancelled);
            }
            Err(err) => {
                self.discard(destination).await;
                return Err(err.into());
            }
        };

        if let Err(err) = self
            .cache
            .store(&resource_id, &info.content_hash, &downloaded, StoreMode::Move)
            .await
        {
            self.discard(downloaded).await;
            return Err(err);
        }

        if let Some(parent) = fresh_path.parent() {
            self.events.publish(FileSystemEvent::DirectoryChanged(parent));
        }

        let local_path = self.cache.get_file(&resource_id, &info.content_hash).await?;
        Ok(MaterializedFile {
            local_path,
            mime_type: info.mime_type,
            kind: FileKind::RegularFile,
            resource_id,
            content_hash: info.content_hash,
        })
    }

    /// A cancelled pinned download would otherwise be retried forever
    async fn unpin_if_pinned(&self, resource_id: &ResourceId, hash: &ContentHash) {
        let pinned = self
            .cache
            .get_cache_entry(resource_id, hash)
            .await
            .is_some_and(|record| record.is_pinned);
        if pinned {
            if let Err(err) = self.cache.unpin(resource_id, hash).await {
                warn!(resource_id = %resource_id, error = %err, "Failed to unpin cancelled file");
            }
        }
    }

    async fn create_download_target(&self) -> FileResult<PathBuf> {
        let dir = self.cache.cache_directory(CacheArea::TmpDownloads);
        let path = tokio::task::spawn_blocking(move || -> io::Result<PathBuf> {
            fs::create_dir_all(&dir)?;
            let file = tempfile::Builder::new()
                .prefix("download-")
                .tempfile_in(&dir)?;
            let (_, path) = file.keep()?;
            Ok(path)
        })
        .await??;
        Ok(path)
    }

    async fn discard(&self, path: PathBuf) {
        let result = tokio::task::spawn_blocking(move || match fs::remove_file(&path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err((path, err)),
            _ => Ok(()),
        })
        .await;
        if let Ok(Err((path, err))) = result {
            warn!(path = %path.display(), error = %err, "Failed to delete download");
        }
    }

    async fn stage_hosted_document(
        &self,
        entry: &Entry,
        info: &FileSpecificInfo,
    ) -> FileResult<MaterializedFile> {
        let dir = self.cache.cache_directory(CacheArea::TmpDocuments);
        let url = info.alternate_url.clone();
        let resource_id = entry.resource_id.to_string();

        let local_path = tokio::task::spawn_blocking(move || -> io::Result<PathBuf> {
            fs::create_dir_all(&dir)?;
            let mut file = tempfile::Builder::new()
                .prefix("document-")
                .suffix(".json")
                .tempfile_in(&dir)?;
            let stub = HostedDocumentStub {
                url: &url,
                resource_id: &resource_id,
            };
            serde_json::to_writer(&mut file, &stub)?;
            let (_, path) = file.keep()?;
            Ok(path)
        })
        .await??;

        debug!(resource_id = %entry.resource_id, stub = %local_path.display(), "Staged hosted document stub");
        Ok(MaterializedFile {
            local_path,
            mime_type: HOSTED_DOCUMENT_STUB_MIME_TYPE.to_string(),
            kind: FileKind::HostedDocument,
            resource_id: entry.resource_id.clone(),
            content_hash: info.content_hash.clone(),
        })
    }
}
