//! Remote store port (driven/secondary port)
//!
//! This module defines the interface to the remote document store: feed
//! listings, per-entry metadata, content transfers and quota.
//!
//! ## Design Notes
//!
//! - Uses [`RemoteError`] rather than `anyhow::Result`: every remote status
//!   must map onto exactly one `FileError` kind, so the classification
//!   has to survive the port boundary.
//! - Downloads are cancellable by the drive path they were issued for.
//! - [`ClientContext`] is passed through untouched; only the adapter
//!   interprets the priority.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{ChangeBatch, Changestamp, DrivePath, Entry, RemoteError, ResourceId};

// ============================================================================
// Request context
// ============================================================================

/// Scheduling priority of a remote request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextPriority {
    /// A user is waiting on the result
    #[default]
    UserInitiated,
    /// Prefetch or sync work that may be deprioritized
    Background,
}

/// Caller-supplied intent attached to remote requests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientContext {
    pub priority: ContextPriority,
}

impl ClientContext {
    pub fn user_initiated() -> Self {
        Self {
            priority: ContextPriority::UserInitiated,
        }
    }

    pub fn background() -> Self {
        Self {
            priority: ContextPriority::Background,
        }
    }
}

// ============================================================================
// DTOs
// ============================================================================

/// Account-level information about the remote store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AboutResource {
    /// Latest changestamp of the remote change history
    pub largest_changestamp: Changestamp,
    /// Total quota in bytes
    pub quota_total: u64,
    /// Used quota in bytes
    pub quota_used: u64,
    /// Resource id of the root directory
    pub root_id: ResourceId,
}

/// Fresh metadata of a single entry plus its download locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub entry: Entry,
    /// Empty when the content may not be downloaded
    pub download_url: String,
}

// ============================================================================
// IRemoteStore trait
// ============================================================================

/// Port trait for the remote document store
///
/// ## Implementation Notes
///
/// - Paged methods return one [`ChangeBatch`] per call; callers follow
///   `next_page_token` until it is `None`.
/// - `download` must honor [`IRemoteStore::cancel`] for the same drive path
///   and resolve with [`RemoteError::Cancelled`] in that case.
#[async_trait::async_trait]
pub trait IRemoteStore: Send + Sync {
    /// Fetch account information (quota, latest changestamp, root id)
    async fn get_about(&self) -> Result<AboutResource, RemoteError>;

    /// Fetch a page of the change feed
    ///
    /// `start_changestamp` of `None` lists the full tree; `Some(cs)` lists
    /// changes from `cs` onwards.
    async fn get_changes(
        &self,
        start_changestamp: Option<Changestamp>,
        page_token: Option<&str>,
    ) -> Result<ChangeBatch, RemoteError>;

    /// Fetch a page of the direct children of one directory
    async fn get_directory_listing(
        &self,
        directory_id: &ResourceId,
        page_token: Option<&str>,
    ) -> Result<ChangeBatch, RemoteError>;

    /// Fetch fresh metadata and the download locator of one entry
    async fn get_entry(
        &self,
        resource_id: &ResourceId,
        context: ClientContext,
    ) -> Result<RemoteEntry, RemoteError>;

    /// Download content from `download_url` into `destination`
    ///
    /// # Returns
    /// The final local path of the downloaded bytes
    async fn download(
        &self,
        drive_path: &DrivePath,
        destination: &Path,
        download_url: &str,
        context: ClientContext,
    ) -> Result<PathBuf, RemoteError>;

    /// Cancel the in-flight request issued for `drive_path`, if any
    async fn cancel(&self, drive_path: &DrivePath);

    /// Full-text search, one page per call
    async fn search(&self, query: &str, page_token: Option<&str>)
        -> Result<ChangeBatch, RemoteError>;

    /// Create an empty file
    async fn create_file(
        &self,
        parent_id: &ResourceId,
        title: &str,
        mime_type: &str,
    ) -> Result<Entry, RemoteError>;

    /// Upload a new file from local disk
    async fn upload_new_file(
        &self,
        parent_id: &ResourceId,
        title: &str,
        source: &Path,
        mime_type: &str,
    ) -> Result<Entry, RemoteError>;

    /// Replace the content of an existing file with `source`
    ///
    /// # Returns
    /// The entry's metadata after the upload, carrying the new content hash
    async fn update_file(
        &self,
        resource_id: &ResourceId,
        source: &Path,
        context: ClientContext,
    ) -> Result<Entry, RemoteError>;

    /// Create a directory
    async fn create_directory(
        &self,
        parent_id: &ResourceId,
        title: &str,
    ) -> Result<Entry, RemoteError>;

    /// Server-side copy of a file into `new_parent_id` as `new_title`
    async fn copy_entry(
        &self,
        resource_id: &ResourceId,
        new_parent_id: &ResourceId,
        new_title: &str,
    ) -> Result<Entry, RemoteError>;

    /// Rename and/or re-parent an entry
    async fn move_entry(
        &self,
        resource_id: &ResourceId,
        new_parent_id: &ResourceId,
        new_title: &str,
    ) -> Result<Entry, RemoteError>;

    /// Remove an entry (recursively for directories)
    async fn remove_entry(&self, resource_id: &ResourceId) -> Result<(), RemoteError>;
}
