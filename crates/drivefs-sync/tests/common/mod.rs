//! Shared fakes for synchronizer and scheduler tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;

use drivefs_core::domain::{
    ChangeBatch, Changestamp, ContentHash, DrivePath, Entry, RemoteError, ResourceId,
};
use drivefs_core::events::EventBus;
use drivefs_core::ports::{AboutResource, ClientContext, IRemoteStore, RemoteEntry};
use drivefs_metadata::MemoryMetadataStore;
use drivefs_sync::ChangeSynchronizer;

pub const ROOT: &str = "root";

pub fn id(s: &str) -> ResourceId {
    ResourceId::new(s).unwrap()
}

pub fn path(s: &str) -> DrivePath {
    DrivePath::new(s).unwrap()
}

pub fn dir(resource_id: &str, parent: &str, title: &str) -> Entry {
    Entry::new_directory(id(resource_id), Some(id(parent)), title)
}

pub fn file(resource_id: &str, parent: &str, title: &str) -> Entry {
    Entry::new_file(
        id(resource_id),
        id(parent),
        title,
        ContentHash::new("h1").unwrap(),
        "text/plain",
        10,
    )
}

fn page_index(token: Option<&str>) -> usize {
    token.and_then(|t| t.parse().ok()).unwrap_or(0)
}

fn page(pages: &[ChangeBatch], index: usize) -> ChangeBatch {
    let mut batch = pages.get(index).cloned().unwrap_or_default();
    batch.next_page_token = (index + 1 < pages.len()).then(|| (index + 1).to_string());
    batch
}

/// In-memory remote store serving canned feeds
pub struct FakeRemote {
    pub largest_changestamp: Mutex<Changestamp>,
    pub full_feed: Mutex<Vec<ChangeBatch>>,
    pub delta_feed: Mutex<Vec<ChangeBatch>>,
    pub listings: Mutex<HashMap<ResourceId, Vec<Entry>>>,
    /// When set, the full feed waits for a permit before answering
    pub full_feed_gate: Option<Arc<Semaphore>>,
    pub fail_full_feed: AtomicBool,
    pub fail_delta_feed: AtomicBool,
    pub full_feed_calls: AtomicUsize,
    pub delta_calls: AtomicUsize,
    pub listing_calls: AtomicUsize,
    pub delta_starts: Mutex<Vec<Changestamp>>,
}

impl FakeRemote {
    pub fn new(largest: i64) -> Self {
        Self {
            largest_changestamp: Mutex::new(Changestamp::new(largest)),
            full_feed: Mutex::new(Vec::new()),
            delta_feed: Mutex::new(Vec::new()),
            listings: Mutex::new(HashMap::new()),
            full_feed_gate: None,
            fail_full_feed: AtomicBool::new(false),
            fail_delta_feed: AtomicBool::new(false),
            full_feed_calls: AtomicUsize::new(0),
            delta_calls: AtomicUsize::new(0),
            listing_calls: AtomicUsize::new(0),
            delta_starts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.full_feed_gate = Some(gate);
        self
    }

    pub fn set_full_feed(&self, pages: Vec<ChangeBatch>) {
        *self.full_feed.lock().unwrap() = pages;
    }

    pub fn push_delta(&self, entries: Vec<Entry>, largest: i64) {
        *self.largest_changestamp.lock().unwrap() = Changestamp::new(largest);
        self.delta_feed
            .lock()
            .unwrap()
            .push(ChangeBatch::new(entries, Changestamp::new(largest)));
    }

    pub fn set_listing(&self, directory: &str, children: Vec<Entry>) {
        self.listings.lock().unwrap().insert(id(directory), children);
    }

    pub fn delta_calls(&self) -> usize {
        self.delta_calls.load(Ordering::SeqCst)
    }
}

fn unsupported<T>() -> Result<T, RemoteError> {
    Err(RemoteError::Other("unsupported".to_string()))
}

#[async_trait::async_trait]
impl IRemoteStore for FakeRemote {
    async fn get_about(&self) -> Result<AboutResource, RemoteError> {
        Ok(AboutResource {
            largest_changestamp: *self.largest_changestamp.lock().unwrap(),
            quota_total: 1000,
            quota_used: 100,
            root_id: id(ROOT),
        })
    }

    async fn get_changes(
        &self,
        start_changestamp: Option<Changestamp>,
        page_token: Option<&str>,
    ) -> Result<ChangeBatch, RemoteError> {
        let index = page_index(page_token);
        match start_changestamp {
            None => {
                self.full_feed_calls.fetch_add(1, Ordering::SeqCst);
                if let Some(gate) = &self.full_feed_gate {
                    gate.acquire().await.unwrap().forget();
                }
                if self.fail_full_feed.load(Ordering::SeqCst) {
                    return Err(RemoteError::NoConnection);
                }
                Ok(page(&self.full_feed.lock().unwrap(), index))
            }
            Some(start) => {
                if index == 0 {
                    self.delta_calls.fetch_add(1, Ordering::SeqCst);
                    self.delta_starts.lock().unwrap().push(start);
                }
                if self.fail_delta_feed.load(Ordering::SeqCst) {
                    return Err(RemoteError::Server(503));
                }
                let mut pages = self.delta_feed.lock().unwrap();
                let batch = page(&pages, index);
                if batch.next_page_token.is_none() {
                    pages.clear();
                }
                Ok(batch)
            }
        }
    }

    async fn get_directory_listing(
        &self,
        directory_id: &ResourceId,
        _page_token: Option<&str>,
    ) -> Result<ChangeBatch, RemoteError> {
        self.listing_calls.fetch_add(1, Ordering::SeqCst);
        let children = self
            .listings
            .lock()
            .unwrap()
            .get(directory_id)
            .cloned()
            .ok_or(RemoteError::NotFound)?;
        Ok(ChangeBatch::new(children, Changestamp::ZERO))
    }

    async fn get_entry(
        &self,
        _resource_id: &ResourceId,
        _context: ClientContext,
    ) -> Result<RemoteEntry, RemoteError> {
        unsupported()
    }

    async fn download(
        &self,
        _drive_path: &DrivePath,
        _destination: &Path,
        _download_url: &str,
        _context: ClientContext,
    ) -> Result<PathBuf, RemoteError> {
        unsupported()
    }

    async fn cancel(&self, _drive_path: &DrivePath) {}

    async fn search(
        &self,
        _query: &str,
        _page_token: Option<&str>,
    ) -> Result<ChangeBatch, RemoteError> {
        unsupported()
    }

    async fn create_file(
        &self,
        _parent_id: &ResourceId,
        _title: &str,
        _mime_type: &str,
    ) -> Result<Entry, RemoteError> {
        unsupported()
    }

    async fn upload_new_file(
        &self,
        _parent_id: &ResourceId,
        _title: &str,
        _source: &Path,
        _mime_type: &str,
    ) -> Result<Entry, RemoteError> {
        unsupported()
    }

    async fn update_file(
        &self,
        _resource_id: &ResourceId,
        _source: &Path,
        _context: ClientContext,
    ) -> Result<Entry, RemoteError> {
        unsupported()
    }

    async fn create_directory(
        &self,
        _parent_id: &ResourceId,
        _title: &str,
    ) -> Result<Entry, RemoteError> {
        unsupported()
    }

    async fn copy_entry(
        &self,
        _resource_id: &ResourceId,
        _new_parent_id: &ResourceId,
        _new_title: &str,
    ) -> Result<Entry, RemoteError> {
        unsupported()
    }

    async fn move_entry(
        &self,
        _resource_id: &ResourceId,
        _new_parent_id: &ResourceId,
        _new_title: &str,
    ) -> Result<Entry, RemoteError> {
        unsupported()
    }

    async fn remove_entry(&self, _resource_id: &ResourceId) -> Result<(), RemoteError> {
        unsupported()
    }
}

pub struct Harness {
    pub remote: Arc<FakeRemote>,
    pub metadata: Arc<MemoryMetadataStore>,
    pub events: EventBus,
    pub sync: Arc<ChangeSynchronizer>,
}

pub fn harness(remote: FakeRemote) -> Harness {
    let remote = Arc::new(remote);
    let metadata = Arc::new(MemoryMetadataStore::new(id(ROOT)));
    let events = EventBus::new(64);
    let sync = Arc::new(ChangeSynchronizer::new(
        remote.clone(),
        metadata.clone(),
        events.clone(),
    ));
    Harness {
        remote,
        metadata,
        events,
        sync,
    }
}
