//! Remote full-text search and local title search

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use drivefs_core::domain::{DrivePath, Entry, FileError, FileResult};
use drivefs_core::ports::SearchOptions;

use crate::coordinator::FileSystemCoordinator;

/// One search hit, resolved against the local tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResultInfo {
    pub path: DrivePath,
    pub entry: Entry,
}

/// A page of remote search results
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResults {
    pub entries: Vec<SearchResultInfo>,
    /// Token for the next page, `None` on the last page
    pub next_page_token: Option<String>,
}

impl FileSystemCoordinator {
    /// Full-text search on the remote store
    ///
    /// Every hit is refreshed into the tree. Hits the tree does not know
    /// yet are dropped from the page and an update check is started in the
    /// background.
    #[instrument(level = "debug", skip(self))]
    pub async fn search(&self, query: &str, page_token: Option<&str>) -> FileResult<SearchResults> {
        let batch = self.remote.search(query, page_token).await?;

        let mut entries = Vec::with_capacity(batch.entries.len());
        let mut missing = 0usize;
        for entry in batch.entries.into_iter().filter(|e| !e.deleted) {
            match self.metadata.refresh_entry(entry).await {
                Ok((path, entry)) => entries.push(SearchResultInfo { path, entry }),
                Err(FileError::NotFound) => missing += 1,
                Err(err) => return Err(err),
            }
        }

        if missing > 0 {
            warn!(missing, "Search returned entries unknown to the tree");
            let synchronizer = Arc::clone(&self.synchronizer);
            tokio::spawn(async move {
                if let Err(err) = synchronizer.check_for_updates().await {
                    debug!(error = %err, "Update check after search failed");
                }
            });
        }

        Ok(SearchResults {
            entries,
            next_page_token: batch.next_page_token,
        })
    }

    /// Case-insensitive title search over the local tree
    ///
    /// Results are ordered by most recent modification and truncated to
    /// `limit`. Hosted documents are left out while they are hidden.
    #[instrument(level = "debug", skip(self, options))]
    pub async fn search_metadata(
        &self,
        query: &str,
        options: SearchOptions,
        limit: usize,
    ) -> FileResult<Vec<SearchResultInfo>> {
        let options = if self.hides_hosted_documents() {
            options.excluding_hosted_documents()
        } else {
            options
        };
        let hits = self.metadata.search_metadata(query, options, limit).await?;
        Ok(hits
            .into_iter()
            .map(|(path, entry)| SearchResultInfo { path, entry })
            .collect())
    }
}
