//! Metadata store port (driven/secondary port)
//!
//! This module defines the asynchronous lookup/mutate interface over the
//! entry tree.
//!
//! ## Design Notes
//!
//! - Paths are always derived by the store; callers never supply a path
//!   for an entry they insert.
//! - Mutations report the directory paths whose child sets changed so the
//!   caller can notify observers once per directory.

use crate::domain::{Changestamp, DrivePath, Entry, FileResult, ResourceId};

/// Filters for [`IMetadataStore::search_metadata`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchOptions {
    /// Skip hosted documents
    pub exclude_hosted_documents: bool,
    /// Skip directories
    pub exclude_directories: bool,
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn excluding_hosted_documents(mut self) -> Self {
        self.exclude_hosted_documents = true;
        self
    }

    pub fn excluding_directories(mut self) -> Self {
        self.exclude_directories = true;
        self
    }
}

/// Port trait for the entry tree
#[async_trait::async_trait]
pub trait IMetadataStore: Send + Sync {
    /// Resource id of the root directory
    async fn root_id(&self) -> ResourceId;

    async fn get_entry_by_path(&self, path: &DrivePath) -> FileResult<Entry>;

    async fn get_entry_by_id(&self, resource_id: &ResourceId) -> FileResult<(DrivePath, Entry)>;

    /// Children of a directory
    ///
    /// # Errors
    /// `NotFound` for unknown paths, `NotADirectory` for files
    async fn read_directory(&self, path: &DrivePath) -> FileResult<Vec<Entry>>;

    /// Insert a new entry under its parent
    ///
    /// # Errors
    /// `NotFound` if the parent is unknown, `Exists` if the id is taken
    async fn add_entry(&self, entry: Entry) -> FileResult<DrivePath>;

    /// Replace the metadata of a known entry, keeping the tree shape rules
    async fn refresh_entry(&self, entry: Entry) -> FileResult<(DrivePath, Entry)>;

    /// Remove an entry and its descendants
    ///
    /// # Returns
    /// The path the entry had before removal
    async fn remove_entry(&self, resource_id: &ResourceId) -> FileResult<DrivePath>;

    /// Insert, update, move or delete according to one feed entry
    ///
    /// # Errors
    /// `NotFound` when the entry's parent is not in the tree yet
    ///
    /// # Returns
    /// The directories whose child sets changed
    async fn apply_change(&self, entry: Entry) -> FileResult<Vec<DrivePath>>;

    /// Make `children` the exact child set of a directory
    ///
    /// Children not in `children` are removed. The directory changestamp is
    /// raised to `changestamp`.
    async fn replace_directory_children(
        &self,
        directory_id: &ResourceId,
        children: Vec<Entry>,
        changestamp: Changestamp,
    ) -> FileResult<DrivePath>;

    async fn set_directory_changestamp(
        &self,
        directory_id: &ResourceId,
        changestamp: Changestamp,
    ) -> FileResult<()>;

    async fn largest_changestamp(&self) -> Changestamp;

    async fn set_largest_changestamp(&self, changestamp: Changestamp);

    /// Case-insensitive title search, most recently modified first
    async fn search_metadata(
        &self,
        query: &str,
        options: SearchOptions,
        limit: usize,
    ) -> FileResult<Vec<(DrivePath, Entry)>>;

    /// Forget every entry except the root
    async fn reset(&self);
}
