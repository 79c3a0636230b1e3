//! Namespace mutations: create, copy, move, remove and transfers
//!
//! Each operation checks the current tree state first, then asks the
//! remote store to perform the change and mirrors the confirmed result
//! into the tree. Directory notifications are sent once per call.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, info, instrument, warn};

use drivefs_core::domain::{DrivePath, Entry, FileError, FileResult, StoreMode};
use drivefs_core::ports::ClientContext;

use crate::coordinator::FileSystemCoordinator;

/// MIME type for files created without further information
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Split `path` into its parent directory and the new entry's title
fn split(path: &DrivePath) -> FileResult<(DrivePath, &str)> {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(title)) => Ok((parent, title)),
        _ => Err(FileError::InvalidOperation),
    }
}

/// The path and every ancestor below the root, outermost first
fn ancestry(path: &DrivePath) -> FileResult<Vec<DrivePath>> {
    let mut current = DrivePath::root();
    let mut chain = Vec::new();
    for component in path.components() {
        current = current.join(component)?;
        chain.push(current.clone());
    }
    Ok(chain)
}

impl FileSystemCoordinator {
    /// `Ok(None)` when nothing exists at `path`
    async fn lookup(&self, path: &DrivePath) -> FileResult<Option<Entry>> {
        match self.get_entry_info(path).await {
            Ok(entry) => Ok(Some(entry)),
            Err(FileError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn directory_at(&self, path: &DrivePath) -> FileResult<Entry> {
        let entry = self.get_entry_info(path).await?;
        if !entry.is_directory {
            return Err(FileError::NotADirectory);
        }
        Ok(entry)
    }

    /// Insert an entry the remote store just created and announce it
    async fn insert_created(&self, entry: Entry) -> FileResult<DrivePath> {
        let path = self.metadata.add_entry(entry).await?;
        self.notify_directories(path.parent());
        Ok(path)
    }

    // ========================================================================
    // Create
    // ========================================================================

    /// Create an empty file
    ///
    /// An existing entry fails with `Exists` when `exclusive`. Otherwise an
    /// existing regular file is accepted as is, and an existing directory or
    /// hosted document fails with `InvalidOperation`.
    #[instrument(level = "info", skip(self, path), fields(path = %path))]
    pub async fn create_file(&self, path: &DrivePath, exclusive: bool) -> FileResult<()> {
        if let Some(existing) = self.lookup(path).await? {
            if exclusive {
                return Err(FileError::Exists);
            }
            if existing.is_directory || existing.is_hosted_document() {
                return Err(FileError::InvalidOperation);
            }
            debug!("File already exists");
            return Ok(());
        }

        let (parent_path, title) = split(path)?;
        let parent = self.directory_at(&parent_path).await?;
        let created = self
            .remote
            .create_file(&parent.resource_id, title, DEFAULT_MIME_TYPE)
            .await?;
        self.insert_created(created).await?;
        Ok(())
    }

    /// Create a directory, and its missing ancestors when `recursive`
    #[instrument(level = "info", skip(self, path), fields(path = %path))]
    pub async fn create_directory(
        &self,
        path: &DrivePath,
        exclusive: bool,
        recursive: bool,
    ) -> FileResult<()> {
        if let Some(existing) = self.lookup(path).await? {
            return if exclusive || !existing.is_directory {
                Err(FileError::Exists)
            } else {
                Ok(())
            };
        }

        let mut parent = self.directory_at(&DrivePath::root()).await?;
        let mut created = Vec::new();
        for current in ancestry(path)? {
            match self.lookup(&current).await? {
                Some(existing) if existing.is_directory => parent = existing,
                Some(_) => return Err(FileError::NotADirectory),
                None if current != *path && !recursive => return Err(FileError::NotFound),
                None => {
                    let title = current.file_name().ok_or(FileError::InvalidOperation)?;
                    let directory = self
                        .remote
                        .create_directory(&parent.resource_id, title)
                        .await?;
                    let inserted = self.metadata.add_entry(directory.clone()).await?;
                    created.extend(inserted.parent());
                    parent = directory;
                }
            }
        }

        info!(created = created.len(), "Directory created");
        self.notify_directories(created);
        Ok(())
    }

    // ========================================================================
    // Copy / move / remove
    // ========================================================================

    /// Server-side copy of a file to `dest`
    #[instrument(level = "info", skip_all, fields(src = %src, dest = %dest))]
    pub async fn copy(&self, src: &DrivePath, dest: &DrivePath) -> FileResult<()> {
        let source = self.get_entry_info(src).await?;
        if source.is_directory {
            return Err(FileError::InvalidOperation);
        }
        if self.lookup(dest).await?.is_some() {
            return Err(FileError::Exists);
        }
        let (dest_parent, title) = split(dest)?;
        let parent = self.directory_at(&dest_parent).await?;

        let copied = self
            .remote
            .copy_entry(&source.resource_id, &parent.resource_id, title)
            .await?;
        self.insert_created(copied).await?;
        Ok(())
    }

    /// Rename and/or re-parent an entry
    #[instrument(level = "info", skip_all, fields(src = %src, dest = %dest))]
    pub async fn move_entry(&self, src: &DrivePath, dest: &DrivePath) -> FileResult<()> {
        if src.is_root() || dest.as_str().starts_with(&format!("{}/", src.as_str())) {
            return Err(FileError::InvalidOperation);
        }
        let source = self.get_entry_info(src).await?;
        if src == dest {
            return Ok(());
        }
        if self.lookup(dest).await?.is_some() {
            return Err(FileError::Exists);
        }
        let (dest_parent, title) = split(dest)?;
        let parent = self.directory_at(&dest_parent).await?;

        let moved = self
            .remote
            .move_entry(&source.resource_id, &parent.resource_id, title)
            .await?;
        let affected = self.metadata.apply_change(moved).await?;
        self.notify_directories(affected);
        Ok(())
    }

    /// Remove an entry
    ///
    /// A non-empty directory is only removed when `recursive`.
    #[instrument(level = "info", skip(self, path), fields(path = %path))]
    pub async fn remove(&self, path: &DrivePath, recursive: bool) -> FileResult<()> {
        if path.is_root() {
            return Err(FileError::InvalidOperation);
        }
        let entry = self.get_entry_info(path).await?;
        if entry.is_directory && !recursive && !self.metadata.read_directory(path).await?.is_empty()
        {
            return Err(FileError::InvalidOperation);
        }

        self.remote.remove_entry(&entry.resource_id).await?;
        let removed = self.metadata.remove_entry(&entry.resource_id).await?;
        if !entry.is_directory {
            if let Err(err) = self.cache.remove(&entry.resource_id).await {
                warn!(error = %err, "Failed to drop cached content of removed file");
            }
        }
        self.notify_directories(removed.parent());
        Ok(())
    }

    // ========================================================================
    // Uploads and transfers
    // ========================================================================

    /// Record a freshly uploaded file and take its content into the cache
    ///
    /// # Returns
    /// The path of the new entry
    #[instrument(level = "info", skip_all, fields(resource_id = %entry.resource_id))]
    pub async fn add_uploaded_content(
        &self,
        entry: Entry,
        local_content: &Path,
        mode: StoreMode,
    ) -> FileResult<DrivePath> {
        let resource_id = entry.resource_id.clone();
        let hash = entry.content_hash().cloned();
        let cacheable = entry.is_regular_file();

        let path = self.insert_created(entry).await?;
        if let (Some(hash), true) = (hash, cacheable) {
            self.cache
                .store(&resource_id, &hash, local_content, mode)
                .await?;
        }
        Ok(path)
    }

    /// Copy the content of a remote file to a local path
    #[instrument(level = "info", skip_all, fields(remote = %remote_path))]
    pub async fn transfer_file_from_remote_to_local(
        &self,
        remote_path: &DrivePath,
        local_dest: &Path,
    ) -> FileResult<()> {
        let file = self
            .get_file(remote_path, ClientContext::user_initiated())
            .await?;
        let dest = local_dest.to_path_buf();
        let bytes = tokio::task::spawn_blocking(move || fs::copy(&file.local_path, dest)).await??;
        debug!(bytes, "Transferred file to local disk");
        Ok(())
    }

    /// Upload a local file as a new remote file at `remote_dest`
    #[instrument(level = "info", skip_all, fields(remote = %remote_dest))]
    pub async fn transfer_file_from_local_to_remote(
        &self,
        local_src: &Path,
        remote_dest: &DrivePath,
    ) -> FileResult<()> {
        let source = local_src.to_path_buf();
        let is_file = tokio::task::spawn_blocking(move || -> io::Result<bool> {
            Ok(fs::metadata(source)?.is_file())
        })
        .await?
        .map_err(|_| FileError::NotFound)?;
        if !is_file {
            return Err(FileError::InvalidOperation);
        }

        if self.lookup(remote_dest).await?.is_some() {
            return Err(FileError::Exists);
        }
        let (parent_path, title) = split(remote_dest)?;
        let parent = self.directory_at(&parent_path).await?;

        let uploaded = self
            .remote
            .upload_new_file(&parent.resource_id, title, local_src, DEFAULT_MIME_TYPE)
            .await?;
        self.add_uploaded_content(uploaded, local_src, StoreMode::Copy)
            .await?;
        Ok(())
    }
}
