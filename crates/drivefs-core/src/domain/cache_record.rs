//! Content cache bookkeeping types

use serde::{Deserialize, Serialize};

/// State of one `(resource_id, content_hash)` record in the content cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Bytes are on local disk
    pub is_present: bool,
    /// Locally modified, not yet written back
    pub is_dirty: bool,
    /// Kept resident even under eviction pressure
    pub is_pinned: bool,
}

impl CacheRecord {
    pub fn present() -> Self {
        Self {
            is_present: true,
            ..Self::default()
        }
    }

    /// Whether the eviction sweep may drop this record
    pub fn is_evictable(&self) -> bool {
        !self.is_pinned && !self.is_dirty
    }
}

/// How `store` takes ownership of the source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreMode {
    /// Rename the source into the cache (source disappears)
    Move,
    /// Copy the source, leaving it in place
    Copy,
}

/// Scratch areas managed by the content cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheArea {
    /// Partial downloads before they are stored
    TmpDownloads,
    /// Hosted-document stubs
    TmpDocuments,
}

impl CacheArea {
    /// Directory name of the area below the cache root
    pub fn dir_name(&self) -> &'static str {
        match self {
            CacheArea::TmpDownloads => "tmp/downloads",
            CacheArea::TmpDocuments => "tmp/documents",
        }
    }
}
