//! Change batches and directory fetch requests

use serde::{Deserialize, Serialize};

use super::entry::Entry;
use super::newtypes::{Changestamp, ResourceId};

/// One page of a full, delta or directory listing
///
/// Entries are in feed order. Deleted entries carry `deleted = true`;
/// moves are entries whose `parent_id` differs from the local tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBatch {
    pub entries: Vec<Entry>,
    /// Token for the next page, `None` on the last page
    pub next_page_token: Option<String>,
    /// Changestamp the feed reaches once this batch is applied
    pub largest_changestamp: Changestamp,
}

impl ChangeBatch {
    pub fn new(entries: Vec<Entry>, largest_changestamp: Changestamp) -> Self {
        Self {
            entries,
            next_page_token: None,
            largest_changestamp,
        }
    }

    pub fn with_next_page(mut self, token: impl Into<String>) -> Self {
        self.next_page_token = Some(token.into());
        self
    }

    pub fn is_last_page(&self) -> bool {
        self.next_page_token.is_none()
    }
}

/// "Ensure this directory's children are loaded as of at least this changestamp"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DirectoryFetchSpec {
    pub directory_id: ResourceId,
    pub changestamp: Changestamp,
}

impl DirectoryFetchSpec {
    pub fn new(directory_id: ResourceId, changestamp: Changestamp) -> Self {
        Self {
            directory_id,
            changestamp,
        }
    }

    /// Build the fetch request for a directory entry
    pub fn for_directory(entry: &Entry) -> Self {
        Self::new(entry.resource_id.clone(), entry.directory_changestamp())
    }
}
