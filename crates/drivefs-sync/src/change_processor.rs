//! Applies change batches to the metadata store in dependency order
//!
//! Within one batch, deletions are applied first. Insertions and moves are
//! then applied in passes: an entry whose parent is not in the tree yet is
//! deferred to the next pass, until a pass makes no progress.

use std::collections::BTreeSet;
use std::sync::Arc;

use drivefs_core::domain::{DrivePath, Entry, FileError, FileResult};
use drivefs_core::ports::IMetadataStore;
use tracing::{debug, warn};

/// Outcome of applying one batch
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangeSummary {
    /// Entries inserted, updated or deleted
    pub applied: usize,
    /// Entries dropped because their parent never appeared or the tree rejected them
    pub skipped: usize,
    /// Directories whose child sets changed
    pub changed_directories: BTreeSet<DrivePath>,
}

impl ChangeSummary {
    pub fn merge(&mut self, other: ChangeSummary) {
        self.applied += other.applied;
        self.skipped += other.skipped;
        self.changed_directories.extend(other.changed_directories);
    }
}

/// Applies feed entries to an [`IMetadataStore`]
pub struct ChangeProcessor {
    metadata: Arc<dyn IMetadataStore>,
}

impl ChangeProcessor {
    pub fn new(metadata: Arc<dyn IMetadataStore>) -> Self {
        Self { metadata }
    }

    /// Apply a batch of feed entries
    ///
    /// # Errors
    /// Only failures other than "parent missing" or "rejected by the tree"
    /// abort the batch.
    pub async fn apply_batch(&self, entries: Vec<Entry>) -> FileResult<ChangeSummary> {
        let mut summary = ChangeSummary::default();
        let (deletions, mut pending): (Vec<Entry>, Vec<Entry>) =
            entries.into_iter().partition(|e| e.deleted);

        for entry in deletions {
            let resource_id = entry.resource_id.clone();
            match self.metadata.apply_change(entry).await {
                Ok(dirs) => {
                    summary.applied += 1;
                    summary.changed_directories.extend(dirs);
                }
                Err(FileError::NotFound) => {}
                Err(FileError::InvalidOperation) => {
                    warn!(resource_id = %resource_id, "Ignoring deletion of the root");
                    summary.skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }

        let mut pass = 0usize;
        while !pending.is_empty() {
            pass += 1;
            let before = pending.len();
            let mut deferred = Vec::new();
            for entry in pending {
                match self.metadata.apply_change(entry.clone()).await {
                    Ok(dirs) => {
                        summary.applied += 1;
                        summary.changed_directories.extend(dirs);
                    }
                    Err(FileError::NotFound) => deferred.push(entry),
                    Err(err @ (FileError::NotADirectory | FileError::InvalidOperation)) => {
                        warn!(
                            resource_id = %entry.resource_id,
                            error = %err,
                            "Tree rejected change entry"
                        );
                        summary.skipped += 1;
                    }
                    Err(err) => return Err(err),
                }
            }
            if deferred.len() == before {
                for orphan in &deferred {
                    warn!(
                        resource_id = %orphan.resource_id,
                        parent_id = ?orphan.parent_id.as_ref().map(|p| p.as_str()),
                        "Dropping change entry without parent"
                    );
                }
                summary.skipped += deferred.len();
                break;
            }
            pending = deferred;
        }

        debug!(
            applied = summary.applied,
            skipped = summary.skipped,
            passes = pass,
            directories = summary.changed_directories.len(),
            "Applied change batch"
        );
        Ok(summary)
    }
}
