//! In-memory `IMetadataStore` adapter
//!
//! Wraps an [`EntryTree`] behind an async `RwLock`. Snapshots can be
//! written to and restored from a JSON file so a restart does not need a
//! full feed before the tree is browsable.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use drivefs_core::domain::{Changestamp, DrivePath, Entry, FileError, FileResult, ResourceId};
use drivefs_core::ports::{IMetadataStore, SearchOptions};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::tree::{EntryTree, TreeSnapshot};

/// Metadata store keeping the whole tree in memory
#[derive(Debug)]
pub struct MemoryMetadataStore {
    tree: RwLock<EntryTree>,
}

impl MemoryMetadataStore {
    /// Create a store holding only the root directory
    pub fn new(root_id: ResourceId) -> Self {
        Self::from_tree(EntryTree::new(root_id))
    }

    pub fn from_tree(tree: EntryTree) -> Self {
        Self {
            tree: RwLock::new(tree),
        }
    }

    /// Number of known entries, root included
    pub async fn len(&self) -> usize {
        self.tree.read().await.len()
    }

    /// Write the current tree to `path` as JSON
    pub async fn save_snapshot(&self, path: &Path) -> anyhow::Result<()> {
        let snapshot = self.tree.read().await.snapshot();
        let path = path.to_path_buf();
        let count = snapshot.entries.len();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let json = serde_json::to_vec(&snapshot)?;
            std::fs::write(&path, json)
                .with_context(|| format!("writing snapshot {}", path.display()))?;
            Ok(())
        })
        .await??;
        debug!(entries = count, "Saved metadata snapshot");
        Ok(())
    }

    /// Restore a store from a snapshot written by [`save_snapshot`](Self::save_snapshot)
    pub async fn load_snapshot(path: &Path) -> anyhow::Result<Self> {
        let path = path.to_path_buf();
        let snapshot = tokio::task::spawn_blocking(move || -> anyhow::Result<TreeSnapshot> {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("reading snapshot {}", path.display()))?;
            Ok(serde_json::from_slice(&bytes)?)
        })
        .await??;
        let tree = EntryTree::from_snapshot(snapshot);
        info!(
            entries = tree.len(),
            changestamp = %tree.largest_changestamp(),
            "Loaded metadata snapshot"
        );
        Ok(Self::from_tree(tree))
    }
}

#[async_trait]
impl IMetadataStore for MemoryMetadataStore {
    async fn root_id(&self) -> ResourceId {
        self.tree.read().await.root_id().clone()
    }

    async fn get_entry_by_path(&self, path: &DrivePath) -> FileResult<Entry> {
        self.tree
            .read()
            .await
            .resolve(path)
            .cloned()
            .ok_or(FileError::NotFound)
    }

    async fn get_entry_by_id(&self, resource_id: &ResourceId) -> FileResult<(DrivePath, Entry)> {
        let tree = self.tree.read().await;
        let entry = tree.get(resource_id).ok_or(FileError::NotFound)?;
        let path = tree.path_of(resource_id).ok_or(FileError::NotFound)?;
        Ok((path, entry.clone()))
    }

    async fn read_directory(&self, path: &DrivePath) -> FileResult<Vec<Entry>> {
        let tree = self.tree.read().await;
        let dir = tree.resolve(path).ok_or(FileError::NotFound)?;
        if !dir.is_directory {
            return Err(FileError::NotADirectory);
        }
        Ok(tree
            .children(&dir.resource_id)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn add_entry(&self, entry: Entry) -> FileResult<DrivePath> {
        self.tree.write().await.insert(entry)
    }

    async fn refresh_entry(&self, entry: Entry) -> FileResult<(DrivePath, Entry)> {
        let resource_id = entry.resource_id.clone();
        let mut tree = self.tree.write().await;
        tree.update(entry)?;
        let path = tree.path_of(&resource_id).ok_or(FileError::NotFound)?;
        let refreshed = tree.get(&resource_id).cloned().ok_or(FileError::NotFound)?;
        Ok((path, refreshed))
    }

    async fn remove_entry(&self, resource_id: &ResourceId) -> FileResult<DrivePath> {
        self.tree.write().await.remove(resource_id)
    }

    async fn apply_change(&self, entry: Entry) -> FileResult<Vec<DrivePath>> {
        self.tree.write().await.apply(entry)
    }

    async fn replace_directory_children(
        &self,
        directory_id: &ResourceId,
        children: Vec<Entry>,
        changestamp: Changestamp,
    ) -> FileResult<DrivePath> {
        self.tree
            .write()
            .await
            .replace_children(directory_id, children, changestamp)
    }

    async fn set_directory_changestamp(
        &self,
        directory_id: &ResourceId,
        changestamp: Changestamp,
    ) -> FileResult<()> {
        self.tree
            .write()
            .await
            .set_directory_changestamp(directory_id, changestamp)
    }

    async fn largest_changestamp(&self) -> Changestamp {
        self.tree.read().await.largest_changestamp()
    }

    async fn set_largest_changestamp(&self, changestamp: Changestamp) {
        self.tree.write().await.set_largest_changestamp(changestamp);
    }

    async fn search_metadata(
        &self,
        query: &str,
        options: SearchOptions,
        limit: usize,
    ) -> FileResult<Vec<(DrivePath, Entry)>> {
        Ok(self.tree.read().await.search(query, options, limit))
    }

    async fn reset(&self) {
        self.tree.write().await.reset();
        debug!("Metadata store reset");
    }
}
