//! Change synchronizer - keeps the entry tree in step with the remote store
//!
//! The synchronizer owns the load state machine:
//!
//! ```text
//! Unloaded --load_if_needed--> Loading --ok--> Loaded --check_for_updates--> Refreshing
//!    ^                            |                ^                              |
//!    +----------- error ----------+                +------------ done ------------+
//! ```
//!
//! Loads run in spawned tasks so that a dropped caller never strands the
//! state machine in `Loading` or `Refreshing`. Every caller that asks while
//! a load is in flight is parked on a oneshot waiter and resolved with the
//! outcome of that same load.
//!
//! [`ChangeSynchronizer::reset`] bumps a generation counter. A load started
//! before the reset stops at its next page boundary and leaves the state of
//! the newer generation untouched.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use drivefs_core::domain::{
    Changestamp, DirectoryFetchSpec, DrivePath, Entry, FileError, FileResult, ResourceId,
};
use drivefs_core::events::{EventBus, FileSystemEvent};
use drivefs_core::ports::{IMetadataStore, IRemoteStore};

use crate::change_processor::{ChangeProcessor, ChangeSummary};

// ============================================================================
// State
// ============================================================================

/// Load phase of the entry tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Nothing loaded yet, or the last full load failed
    Unloaded,
    /// A full load is in flight
    Loading,
    /// The tree mirrors the remote store as of the last applied changestamp
    Loaded,
    /// A delta refresh is in flight on top of a loaded tree
    Refreshing,
}

/// Result of the most recent delta refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCheck {
    pub checked_at: DateTime<Utc>,
    pub error: Option<FileError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadKind {
    Full,
    Delta,
}

type Waiter = oneshot::Sender<FileResult<()>>;

struct SyncState {
    phase: SyncPhase,
    generation: u64,
    waiters: Vec<Waiter>,
    initial_load_finished: bool,
    last_update_check: Option<UpdateCheck>,
}

// ============================================================================
// ChangeSynchronizer
// ============================================================================

/// Loads the full feed once, then applies deltas on request
pub struct ChangeSynchronizer {
    remote: Arc<dyn IRemoteStore>,
    metadata: Arc<dyn IMetadataStore>,
    processor: ChangeProcessor,
    events: EventBus,
    state: Mutex<SyncState>,
}

impl ChangeSynchronizer {
    pub fn new(
        remote: Arc<dyn IRemoteStore>,
        metadata: Arc<dyn IMetadataStore>,
        events: EventBus,
    ) -> Self {
        Self {
            remote,
            processor: ChangeProcessor::new(Arc::clone(&metadata)),
            metadata,
            events,
            state: Mutex::new(SyncState {
                phase: SyncPhase::Unloaded,
                generation: 0,
                waiters: Vec::new(),
                initial_load_finished: false,
                last_update_check: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> SyncPhase {
        self.state().phase
    }

    /// True once a full load has completed and the tree is usable
    pub fn is_loaded(&self) -> bool {
        matches!(self.phase(), SyncPhase::Loaded | SyncPhase::Refreshing)
    }

    pub fn is_refreshing(&self) -> bool {
        self.phase() == SyncPhase::Refreshing
    }

    pub fn last_update_check(&self) -> Option<UpdateCheck> {
        self.state().last_update_check.clone()
    }

    // ------------------------------------------------------------------------
    // Full load
    // ------------------------------------------------------------------------

    /// Make sure the tree is loaded
    ///
    /// With a `fetch_spec`, the named directory is fetched on its own while
    /// the full load continues in the background, and the call returns as
    /// soon as that directory is current.
    pub async fn load_if_needed(
        self: &Arc<Self>,
        fetch_spec: Option<DirectoryFetchSpec>,
    ) -> FileResult<()> {
        let waiter = {
            let mut state = self.state();
            match state.phase {
                SyncPhase::Loaded | SyncPhase::Refreshing => return Ok(()),
                SyncPhase::Unloaded => {
                    state.phase = SyncPhase::Loading;
                    let generation = state.generation;
                    info!(generation, "Starting full load");
                    tokio::spawn(Arc::clone(self).run_load(LoadKind::Full, generation));
                    Self::park(&mut state, fetch_spec.is_none())
                }
                SyncPhase::Loading => Self::park(&mut state, fetch_spec.is_none()),
            }
        };

        match (fetch_spec, waiter) {
            (Some(spec), _) => self.fast_fetch(spec).await,
            (None, Some(rx)) => Self::wait(rx).await,
            (None, None) => Ok(()),
        }
    }

    fn park(state: &mut SyncState, wait: bool) -> Option<oneshot::Receiver<FileResult<()>>> {
        if !wait {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        state.waiters.push(tx);
        Some(rx)
    }

    async fn wait(rx: oneshot::Receiver<FileResult<()>>) -> FileResult<()> {
        rx.await
            .unwrap_or_else(|_| Err(FileError::Failed("load task dropped".to_string())))
    }

    /// Fetch one directory unless it is already as new as the remote store
    async fn fast_fetch(&self, spec: DirectoryFetchSpec) -> FileResult<()> {
        let about = self.remote.get_about().await?;
        if spec.changestamp > Changestamp::ZERO && spec.changestamp >= about.largest_changestamp {
            debug!(
                directory_id = %spec.directory_id,
                changestamp = %spec.changestamp,
                "Directory is current, skipping fast fetch"
            );
            return Ok(());
        }
        self.fetch_directory(&spec.directory_id, about.largest_changestamp)
            .await
            .map(|_| ())
    }

    /// Replace the children of one directory with a fresh server listing
    ///
    /// # Returns
    /// The path of the refreshed directory
    pub async fn load_directory_from_server(
        &self,
        directory_id: &ResourceId,
    ) -> FileResult<DrivePath> {
        let about = self.remote.get_about().await?;
        self.fetch_directory(directory_id, about.largest_changestamp)
            .await
    }

    async fn fetch_directory(
        &self,
        directory_id: &ResourceId,
        changestamp: Changestamp,
    ) -> FileResult<DrivePath> {
        let mut children: Vec<Entry> = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let batch = self
                .remote
                .get_directory_listing(directory_id, page_token.as_deref())
                .await?;
            children.extend(batch.entries);
            match batch.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        let count = children.len();
        let path = self
            .metadata
            .replace_directory_children(directory_id, children, changestamp)
            .await?;
        debug!(path = %path, children = count, changestamp = %changestamp, "Fetched directory");
        self.events
            .publish(FileSystemEvent::DirectoryChanged(path.clone()));
        Ok(path)
    }

    // ------------------------------------------------------------------------
    // Delta refresh
    // ------------------------------------------------------------------------

    /// Apply remote changes made since the last applied changestamp
    ///
    /// A no-op unless the tree is loaded. A call made while a refresh is in
    /// flight resolves with the outcome of that refresh.
    pub async fn check_for_updates(self: &Arc<Self>) -> FileResult<()> {
        let rx = {
            let mut state = self.state();
            match state.phase {
                SyncPhase::Unloaded | SyncPhase::Loading => {
                    debug!(phase = ?state.phase, "Tree not loaded, skipping update check");
                    return Ok(());
                }
                SyncPhase::Loaded => {
                    self.begin_refresh(&mut state);
                    Self::park(&mut state, true)
                }
                SyncPhase::Refreshing => Self::park(&mut state, true),
            }
        };
        match rx {
            Some(rx) => Self::wait(rx).await,
            None => Ok(()),
        }
    }

    /// Start a refresh without waiting for it
    ///
    /// # Returns
    /// `false` when the tree is not loaded or a refresh is already running
    pub fn try_start_refresh(self: &Arc<Self>) -> bool {
        let mut state = self.state();
        if state.phase != SyncPhase::Loaded {
            return false;
        }
        self.begin_refresh(&mut state);
        true
    }

    fn begin_refresh(self: &Arc<Self>, state: &mut SyncState) {
        state.phase = SyncPhase::Refreshing;
        let generation = state.generation;
        debug!(generation, "Starting delta refresh");
        tokio::spawn(Arc::clone(self).run_load(LoadKind::Delta, generation));
    }

    // ------------------------------------------------------------------------
    // Reset
    // ------------------------------------------------------------------------

    /// Return to `Unloaded`, abandoning any load in flight
    ///
    /// Callers waiting on the abandoned load resolve with `Cancelled`.
    pub fn reset(&self) {
        let waiters = {
            let mut state = self.state();
            state.generation += 1;
            state.phase = SyncPhase::Unloaded;
            state.initial_load_finished = false;
            std::mem::take(&mut state.waiters)
        };
        info!(abandoned_waiters = waiters.len(), "Synchronizer reset");
        for waiter in waiters {
            let _ = waiter.send(Err(FileError::Cancelled));
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.state().generation == generation
    }

    // ------------------------------------------------------------------------
    // Load task
    // ------------------------------------------------------------------------

    async fn run_load(self: Arc<Self>, kind: LoadKind, generation: u64) {
        let result = match kind {
            LoadKind::Full => self.full_load(generation).await,
            LoadKind::Delta => self.delta_load(generation).await,
        };
        self.finish_load(kind, generation, result);
    }

    async fn full_load(&self, generation: u64) -> FileResult<ChangeSummary> {
        let about = self.remote.get_about().await?;
        let summary = self.apply_feed(None, generation).await?;
        // The feed may be newer than `about`; replaying the overlap later is harmless.
        self.metadata
            .set_largest_changestamp(about.largest_changestamp)
            .await;
        info!(
            entries = summary.applied,
            skipped = summary.skipped,
            changestamp = %about.largest_changestamp,
            "Full feed applied"
        );
        Ok(summary)
    }

    async fn delta_load(&self, generation: u64) -> FileResult<ChangeSummary> {
        let start = self.metadata.largest_changestamp().await;
        let summary = self.apply_feed(Some(start), generation).await?;
        info!(
            entries = summary.applied,
            directories = summary.changed_directories.len(),
            from = %start,
            "Delta feed applied"
        );
        Ok(summary)
    }

    /// Page through the change feed, applying every page
    ///
    /// `since` is the last applied changestamp; `None` requests the full feed.
    async fn apply_feed(
        &self,
        since: Option<Changestamp>,
        generation: u64,
    ) -> FileResult<ChangeSummary> {
        let start = since.map(|cs| cs.next());
        let mut summary = ChangeSummary::default();
        let mut largest = since.unwrap_or(Changestamp::ZERO);
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let batch = self
                .remote
                .get_changes(start, page_token.as_deref())
                .await?;
            if !self.is_current(generation) {
                return Err(FileError::Cancelled);
            }
            pages += 1;
            largest = largest.max(batch.largest_changestamp);
            summary.merge(self.processor.apply_batch(batch.entries).await?);
            match batch.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        if let Some(since) = since {
            if largest > since {
                self.metadata.set_largest_changestamp(largest).await;
            }
        }
        debug!(pages, largest = %largest, "Change feed exhausted");
        Ok(summary)
    }

    fn finish_load(&self, kind: LoadKind, generation: u64, result: FileResult<ChangeSummary>) {
        let (waiters, first_load) = {
            let mut state = self.state();
            if state.generation != generation {
                debug!(generation, ?kind, "Discarding result of abandoned load");
                return;
            }
            let mut first_load = false;
            state.phase = match (kind, &result) {
                (LoadKind::Full, Ok(_)) => {
                    first_load = !state.initial_load_finished;
                    state.initial_load_finished = true;
                    SyncPhase::Loaded
                }
                (LoadKind::Full, Err(_)) => SyncPhase::Unloaded,
                (LoadKind::Delta, _) => SyncPhase::Loaded,
            };
            if kind == LoadKind::Delta {
                state.last_update_check = Some(UpdateCheck {
                    checked_at: Utc::now(),
                    error: result.as_ref().err().cloned(),
                });
            }
            (std::mem::take(&mut state.waiters), first_load)
        };

        let outcome = match result {
            Ok(summary) => {
                self.events.publish(FileSystemEvent::FeedFromServerLoaded);
                if kind == LoadKind::Delta {
                    self.notify_directories(summary.changed_directories);
                }
                if first_load {
                    self.events.publish(FileSystemEvent::InitialLoadFinished);
                }
                Ok(())
            }
            Err(err) => {
                warn!(?kind, error = %err, "Load failed");
                Err(err)
            }
        };

        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    fn notify_directories(&self, directories: BTreeSet<DrivePath>) {
        for path in directories {
            self.events.publish(FileSystemEvent::DirectoryChanged(path));
        }
    }
}
