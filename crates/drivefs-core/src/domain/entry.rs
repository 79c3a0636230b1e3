//! Entry - one node of the synchronized namespace
//!
//! An [`Entry`] carries everything the remote store reports about a file or
//! directory except its path. Paths are derived by walking parent links in
//! the entry tree, so a rename or move only touches the moved node.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{Changestamp, ContentHash, ResourceId};

/// Fixed mime type of the locally materialized stub of a hosted document
pub const HOSTED_DOCUMENT_STUB_MIME_TYPE: &str = "application/json";

/// File-only facet of an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSpecificInfo {
    /// Content-versioning token of the current revision
    pub content_hash: ContentHash,
    pub mime_type: String,
    /// Content is a remote-edit reference rather than downloadable bytes
    pub is_hosted_document: bool,
    /// URL that opens a hosted document in the remote editor
    pub alternate_url: String,
}

/// Directory-only facet of an entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorySpecificInfo {
    /// Change sequence number through which the children are known complete
    pub changestamp: Changestamp,
}

/// A file or directory as known to the local tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub resource_id: ResourceId,
    /// `None` only for the root directory
    pub parent_id: Option<ResourceId>,
    /// Display name, the last component of the derived path
    pub title: String,
    pub is_directory: bool,
    pub size: u64,
    pub modified_time: DateTime<Utc>,
    /// Set on delta-feed entries that report a removal
    #[serde(default)]
    pub deleted: bool,
    pub file_info: Option<FileSpecificInfo>,
    pub directory_info: Option<DirectorySpecificInfo>,
}

impl Entry {
    /// Create a directory entry with a zero changestamp
    pub fn new_directory(
        resource_id: ResourceId,
        parent_id: Option<ResourceId>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            resource_id,
            parent_id,
            title: title.into(),
            is_directory: true,
            size: 0,
            modified_time: Utc::now(),
            deleted: false,
            file_info: None,
            directory_info: Some(DirectorySpecificInfo::default()),
        }
    }

    /// Create a regular file entry
    pub fn new_file(
        resource_id: ResourceId,
        parent_id: ResourceId,
        title: impl Into<String>,
        content_hash: ContentHash,
        mime_type: impl Into<String>,
        size: u64,
    ) -> Self {
        Self {
            resource_id,
            parent_id: Some(parent_id),
            title: title.into(),
            is_directory: false,
            size,
            modified_time: Utc::now(),
            deleted: false,
            file_info: Some(FileSpecificInfo {
                content_hash,
                mime_type: mime_type.into(),
                is_hosted_document: false,
                alternate_url: String::new(),
            }),
            directory_info: None,
        }
    }

    /// Create a hosted document entry pointing at `alternate_url`
    pub fn new_hosted_document(
        resource_id: ResourceId,
        parent_id: ResourceId,
        title: impl Into<String>,
        content_hash: ContentHash,
        alternate_url: impl Into<String>,
    ) -> Self {
        let mut entry = Self::new_file(
            resource_id,
            parent_id,
            title,
            content_hash,
            "application/vnd.google-apps.document",
            0,
        );
        if let Some(info) = entry.file_info.as_mut() {
            info.is_hosted_document = true;
            info.alternate_url = alternate_url.into();
        }
        entry
    }

    /// Whether the entry is a hosted document
    pub fn is_hosted_document(&self) -> bool {
        self.file_info
            .as_ref()
            .is_some_and(|info| info.is_hosted_document)
    }

    /// Whether the entry is a regular (downloadable) file
    pub fn is_regular_file(&self) -> bool {
        !self.is_directory && !self.is_hosted_document()
    }

    pub fn content_hash(&self) -> Option<&ContentHash> {
        self.file_info.as_ref().map(|info| &info.content_hash)
    }

    /// The directory changestamp, `ZERO` for files and never-fetched directories
    pub fn directory_changestamp(&self) -> Changestamp {
        self.directory_info
            .map(|info| info.changestamp)
            .unwrap_or_default()
    }

    /// Raise the directory changestamp, never lowering it
    pub fn bump_directory_changestamp(&mut self, changestamp: Changestamp) {
        if let Some(info) = self.directory_info.as_mut() {
            if changestamp > info.changestamp {
                info.changestamp = changestamp;
            }
        }
    }

    /// Mark the entry as a deletion record
    pub fn into_deleted(mut self) -> Self {
        self.deleted = true;
        self
    }
}
