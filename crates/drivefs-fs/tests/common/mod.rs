//! Shared fakes for coordinator tests
//!
//! `FakeRemoteStore` keeps a server-side tree and serves feeds, listings,
//! downloads and mutations from it. `MockContentCache` keeps records in
//! memory and content under a temp directory, recording the calls the
//! pipeline makes.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::Semaphore;

use drivefs_core::config::{Config, ConfigBuilder};
use drivefs_core::domain::{
    CacheArea, CacheRecord, ChangeBatch, Changestamp, ContentHash, DrivePath, Entry, FileError,
    FileResult, RemoteError, ResourceId, StoreMode,
};
use drivefs_core::ports::{
    AboutResource, ClientContext, IContentCache, IRemoteStore, RemoteEntry,
};
use drivefs_fs::FileSystemCoordinator;
use drivefs_metadata::MemoryMetadataStore;

pub const ROOT: &str = "root";

pub fn id(s: &str) -> ResourceId {
    ResourceId::new(s).unwrap()
}

pub fn hash(s: &str) -> ContentHash {
    ContentHash::new(s).unwrap()
}

pub fn path(s: &str) -> DrivePath {
    DrivePath::new(s).unwrap()
}

pub fn dir(resource_id: &str, parent: &str, title: &str) -> Entry {
    Entry::new_directory(id(resource_id), Some(id(parent)), title)
}

pub fn file(resource_id: &str, parent: &str, title: &str, content_hash: &str) -> Entry {
    Entry::new_file(
        id(resource_id),
        id(parent),
        title,
        hash(content_hash),
        "text/plain",
        5,
    )
}

pub fn hosted(resource_id: &str, parent: &str, title: &str) -> Entry {
    Entry::new_hosted_document(
        id(resource_id),
        id(parent),
        title,
        hash("hdoc"),
        format!("https://docs.example.test/{resource_id}/edit"),
    )
}

pub fn download_url(resource_id: &ResourceId) -> String {
    format!("https://content.example.test/{resource_id}")
}

// ============================================================================
// FakeRemoteStore
// ============================================================================

pub struct FakeRemoteStore {
    pub server: Mutex<HashMap<ResourceId, Entry>>,
    pub largest_changestamp: Mutex<Changestamp>,
    pub pending_changes: Mutex<Vec<Entry>>,
    /// Entries whose download locator is withheld
    pub no_download: Mutex<HashSet<ResourceId>>,
    /// Error every download resolves with, if set
    pub download_error: Mutex<Option<RemoteError>>,
    /// When set, downloads wait for a permit on `download_gate`
    pub gate_downloads: AtomicBool,
    pub download_gate: Semaphore,
    /// When set, content updates wait for a permit on `upload_gate`
    pub gate_uploads: AtomicBool,
    pub upload_gate: Semaphore,
    /// Error every content update resolves with, if set
    pub update_error: Mutex<Option<RemoteError>>,
    /// Content received by `update_file`, in call order
    pub uploads: Mutex<Vec<(ResourceId, String)>>,
    pub update_calls: AtomicUsize,
    pub get_entry_calls: AtomicUsize,
    pub download_calls: AtomicUsize,
    pub mutation_calls: AtomicUsize,
    pub cancelled: Mutex<Vec<DrivePath>>,
    next_id: AtomicUsize,
}

impl FakeRemoteStore {
    /// Server tree:
    ///
    /// ```text
    /// /docs/a.txt   (a, ha)
    /// /b.txt        (b, hb)
    /// /report       (hosted document)
    /// ```
    pub fn new() -> Self {
        let remote = Self {
            server: Mutex::new(HashMap::new()),
            largest_changestamp: Mutex::new(Changestamp::new(100)),
            pending_changes: Mutex::new(Vec::new()),
            no_download: Mutex::new(HashSet::new()),
            download_error: Mutex::new(None),
            gate_downloads: AtomicBool::new(false),
            download_gate: Semaphore::new(0),
            gate_uploads: AtomicBool::new(false),
            upload_gate: Semaphore::new(0),
            update_error: Mutex::new(None),
            uploads: Mutex::new(Vec::new()),
            update_calls: AtomicUsize::new(0),
            get_entry_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
            mutation_calls: AtomicUsize::new(0),
            cancelled: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        };
        remote.put(dir("docs", ROOT, "docs"));
        remote.put(file("a", "docs", "a.txt", "ha"));
        remote.put(file("b", ROOT, "b.txt", "hb"));
        remote.put(hosted("gdoc", ROOT, "report"));
        remote
    }

    /// Place an entry on the server without publishing a change
    pub fn put(&self, entry: Entry) {
        self.server
            .lock()
            .unwrap()
            .insert(entry.resource_id.clone(), entry);
    }

    /// Place an entry on the server and publish it as a change
    pub fn push_change(&self, entry: Entry) {
        let mut largest = self.largest_changestamp.lock().unwrap();
        *largest = largest.next();
        if entry.deleted {
            self.server.lock().unwrap().remove(&entry.resource_id);
        } else {
            self.put(entry.clone());
        }
        self.pending_changes.lock().unwrap().push(entry);
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn new_id(&self, prefix: &str) -> ResourceId {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        id(&format!("{prefix}-{n}"))
    }

    fn mutated(&self, entry: Entry) -> Entry {
        self.mutation_calls.fetch_add(1, Ordering::SeqCst);
        self.put(entry.clone());
        entry
    }

    fn server_entry(&self, resource_id: &ResourceId) -> Result<Entry, RemoteError> {
        self.server
            .lock()
            .unwrap()
            .get(resource_id)
            .cloned()
            .ok_or(RemoteError::NotFound)
    }
}

#[async_trait::async_trait]
impl IRemoteStore for FakeRemoteStore {
    async fn get_about(&self) -> Result<AboutResource, RemoteError> {
        Ok(AboutResource {
            largest_changestamp: *self.largest_changestamp.lock().unwrap(),
            quota_total: 15_000,
            quota_used: 2_500,
            root_id: id(ROOT),
        })
    }

    async fn get_changes(
        &self,
        start_changestamp: Option<Changestamp>,
        _page_token: Option<&str>,
    ) -> Result<ChangeBatch, RemoteError> {
        let largest = *self.largest_changestamp.lock().unwrap();
        let entries = match start_changestamp {
            None => {
                self.pending_changes.lock().unwrap().clear();
                self.server.lock().unwrap().values().cloned().collect()
            }
            Some(_) => std::mem::take(&mut *self.pending_changes.lock().unwrap()),
        };
        Ok(ChangeBatch::new(entries, largest))
    }

    async fn get_directory_listing(
        &self,
        directory_id: &ResourceId,
        _page_token: Option<&str>,
    ) -> Result<ChangeBatch, RemoteError> {
        let children = self
            .server
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.parent_id.as_ref() == Some(directory_id))
            .cloned()
            .collect();
        Ok(ChangeBatch::new(children, Changestamp::ZERO))
    }

    async fn get_entry(
        &self,
        resource_id: &ResourceId,
        _context: ClientContext,
    ) -> Result<RemoteEntry, RemoteError> {
        self.get_entry_calls.fetch_add(1, Ordering::SeqCst);
        let entry = self.server_entry(resource_id)?;
        let download_url = if self.no_download.lock().unwrap().contains(resource_id) {
            String::new()
        } else {
            download_url(resource_id)
        };
        Ok(RemoteEntry {
            entry,
            download_url,
        })
    }

    async fn download(
        &self,
        _drive_path: &DrivePath,
        destination: &Path,
        download_url: &str,
        _context: ClientContext,
    ) -> Result<PathBuf, RemoteError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        if self.gate_downloads.load(Ordering::SeqCst) {
            self.download_gate
                .acquire()
                .await
                .map_err(|_| RemoteError::Cancelled)?
                .forget();
        }
        let error = self.download_error.lock().unwrap().clone();
        if let Some(err) = error {
            return Err(err);
        }
        fs::write(destination, download_url.as_bytes())
            .map_err(|e| RemoteError::Other(e.to_string()))?;
        Ok(destination.to_path_buf())
    }

    async fn cancel(&self, drive_path: &DrivePath) {
        self.cancelled.lock().unwrap().push(drive_path.clone());
    }

    async fn search(
        &self,
        query: &str,
        _page_token: Option<&str>,
    ) -> Result<ChangeBatch, RemoteError> {
        let mut hits: Vec<Entry> = self
            .server
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.title.contains(query))
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(ChangeBatch::new(hits, Changestamp::ZERO).with_next_page("next"))
    }

    async fn create_file(
        &self,
        parent_id: &ResourceId,
        title: &str,
        mime_type: &str,
    ) -> Result<Entry, RemoteError> {
        let entry = Entry::new_file(
            self.new_id("file"),
            parent_id.clone(),
            title,
            hash("empty"),
            mime_type,
            0,
        );
        Ok(self.mutated(entry))
    }

    async fn upload_new_file(
        &self,
        parent_id: &ResourceId,
        title: &str,
        source: &Path,
        mime_type: &str,
    ) -> Result<Entry, RemoteError> {
        let size = fs::metadata(source)
            .map_err(|e| RemoteError::Other(e.to_string()))?
            .len();
        let entry = Entry::new_file(
            self.new_id("upload"),
            parent_id.clone(),
            title,
            hash("uploaded"),
            mime_type,
            size,
        );
        Ok(self.mutated(entry))
    }

    async fn update_file(
        &self,
        resource_id: &ResourceId,
        source: &Path,
        _context: ClientContext,
    ) -> Result<Entry, RemoteError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if self.gate_uploads.load(Ordering::SeqCst) {
            self.upload_gate
                .acquire()
                .await
                .map_err(|_| RemoteError::Cancelled)?
                .forget();
        }
        let error = self.update_error.lock().unwrap().clone();
        if let Some(err) = error {
            return Err(err);
        }
        let content =
            fs::read_to_string(source).map_err(|e| RemoteError::Other(e.to_string()))?;
        let mut entry = self.server_entry(resource_id)?;
        let revision = self.new_id(resource_id.as_str());
        if let Some(info) = entry.file_info.as_mut() {
            info.content_hash = hash(revision.as_str());
        }
        entry.size = content.len() as u64;
        self.uploads
            .lock()
            .unwrap()
            .push((resource_id.clone(), content));
        self.put(entry.clone());
        Ok(entry)
    }

    async fn create_directory(
        &self,
        parent_id: &ResourceId,
        title: &str,
    ) -> Result<Entry, RemoteError> {
        let entry = Entry::new_directory(self.new_id("dir"), Some(parent_id.clone()), title);
        Ok(self.mutated(entry))
    }

    async fn copy_entry(
        &self,
        resource_id: &ResourceId,
        new_parent_id: &ResourceId,
        new_title: &str,
    ) -> Result<Entry, RemoteError> {
        let mut entry = self.server_entry(resource_id)?;
        entry.resource_id = self.new_id("copy");
        entry.parent_id = Some(new_parent_id.clone());
        entry.title = new_title.to_string();
        Ok(self.mutated(entry))
    }

    async fn move_entry(
        &self,
        resource_id: &ResourceId,
        new_parent_id: &ResourceId,
        new_title: &str,
    ) -> Result<Entry, RemoteError> {
        let mut entry = self.server_entry(resource_id)?;
        entry.parent_id = Some(new_parent_id.clone());
        entry.title = new_title.to_string();
        Ok(self.mutated(entry))
    }

    async fn remove_entry(&self, resource_id: &ResourceId) -> Result<(), RemoteError> {
        self.mutation_calls.fetch_add(1, Ordering::SeqCst);
        self.server
            .lock()
            .unwrap()
            .remove(resource_id)
            .map(|_| ())
            .ok_or(RemoteError::NotFound)
    }
}

// ============================================================================
// MockContentCache
// ============================================================================

type Key = (ResourceId, ContentHash);

pub struct MockContentCache {
    root: PathBuf,
    records: Mutex<HashMap<Key, (CacheRecord, Option<PathBuf>)>>,
    pub reserve_ok: AtomicBool,
    pub fail_store: AtomicBool,
    pub fail_commit: AtomicBool,
    pub reserve_calls: AtomicUsize,
    pub unpin_calls: AtomicUsize,
    pub commit_calls: AtomicUsize,
}

impl MockContentCache {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            records: Mutex::new(HashMap::new()),
            reserve_ok: AtomicBool::new(true),
            fail_store: AtomicBool::new(false),
            fail_commit: AtomicBool::new(false),
            reserve_calls: AtomicUsize::new(0),
            unpin_calls: AtomicUsize::new(0),
            commit_calls: AtomicUsize::new(0),
        }
    }

    fn content_path(&self, resource_id: &ResourceId, content_hash: &ContentHash) -> PathBuf {
        self.root.join("files").join(format!("{resource_id}-{content_hash}"))
    }

    /// Put present content into the cache
    pub fn seed(&self, resource_id: &str, content_hash: &str, content: &str) -> PathBuf {
        let (rid, h) = (id(resource_id), hash(content_hash));
        let target = self.content_path(&rid, &h);
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, content).unwrap();
        self.records
            .lock()
            .unwrap()
            .insert((rid, h), (CacheRecord::present(), Some(target.clone())));
        target
    }

    pub fn record(&self, resource_id: &str, content_hash: &str) -> Option<CacheRecord> {
        self.records
            .lock()
            .unwrap()
            .get(&(id(resource_id), hash(content_hash)))
            .map(|(record, _)| *record)
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl IContentCache for MockContentCache {
    async fn get_file(
        &self,
        resource_id: &ResourceId,
        hash: &ContentHash,
    ) -> FileResult<PathBuf> {
        match self
            .records
            .lock()
            .unwrap()
            .get(&(resource_id.clone(), hash.clone()))
        {
            Some((record, Some(path))) if record.is_present => Ok(path.clone()),
            _ => Err(FileError::NotFound),
        }
    }

    async fn get_cache_entry(
        &self,
        resource_id: &ResourceId,
        hash: &ContentHash,
    ) -> Option<CacheRecord> {
        self.records
            .lock()
            .unwrap()
            .get(&(resource_id.clone(), hash.clone()))
            .map(|(record, _)| *record)
    }

    async fn free_disk_space_if_needed_for(&self, _bytes: u64) -> bool {
        self.reserve_calls.fetch_add(1, Ordering::SeqCst);
        self.reserve_ok.load(Ordering::SeqCst)
    }

    async fn store(
        &self,
        resource_id: &ResourceId,
        hash: &ContentHash,
        source: &Path,
        mode: StoreMode,
    ) -> FileResult<()> {
        if self.fail_store.load(Ordering::SeqCst) {
            return Err(FileError::Failed("store failed".to_string()));
        }
        let target = self.content_path(resource_id, hash);
        fs::create_dir_all(&self.root.join("files"))?;
        match mode {
            StoreMode::Move => fs::rename(source, &target)?,
            StoreMode::Copy => {
                fs::copy(source, &target)?;
            }
        }
        let mut records = self.records.lock().unwrap();
        let slot = records
            .entry((resource_id.clone(), hash.clone()))
            .or_insert((CacheRecord::default(), None));
        slot.0.is_present = true;
        slot.1 = Some(target);
        Ok(())
    }

    async fn mark_dirty(&self, resource_id: &ResourceId, hash: &ContentHash) -> FileResult<()> {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(&(resource_id.clone(), hash.clone())) {
            Some((record, _)) if record.is_present => {
                record.is_dirty = true;
                Ok(())
            }
            _ => Err(FileError::NotFound),
        }
    }

    async fn commit_dirty(
        &self,
        resource_id: &ResourceId,
        hash: &ContentHash,
    ) -> FileResult<()> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(FileError::Failed("commit failed".to_string()));
        }
        match self
            .records
            .lock()
            .unwrap()
            .get(&(resource_id.clone(), hash.clone()))
        {
            Some((record, _)) if record.is_dirty => Ok(()),
            _ => Err(FileError::InvalidOperation),
        }
    }

    async fn clear_dirty(&self, resource_id: &ResourceId, hash: &ContentHash) -> FileResult<()> {
        match self
            .records
            .lock()
            .unwrap()
            .get_mut(&(resource_id.clone(), hash.clone()))
        {
            Some((record, _)) => {
                record.is_dirty = false;
                Ok(())
            }
            None => Err(FileError::NotFound),
        }
    }

    async fn pin(&self, resource_id: &ResourceId, hash: &ContentHash) -> FileResult<()> {
        self.records
            .lock()
            .unwrap()
            .entry((resource_id.clone(), hash.clone()))
            .or_insert((CacheRecord::default(), None))
            .0
            .is_pinned = true;
        Ok(())
    }

    async fn unpin(&self, resource_id: &ResourceId, hash: &ContentHash) -> FileResult<()> {
        self.unpin_calls.fetch_add(1, Ordering::SeqCst);
        match self
            .records
            .lock()
            .unwrap()
            .get_mut(&(resource_id.clone(), hash.clone()))
        {
            Some((record, _)) => {
                record.is_pinned = false;
                Ok(())
            }
            None => Err(FileError::NotFound),
        }
    }

    async fn remove(&self, resource_id: &ResourceId) -> FileResult<()> {
        self.records
            .lock()
            .unwrap()
            .retain(|(rid, _), _| rid != resource_id);
        Ok(())
    }

    fn cache_directory(&self, area: CacheArea) -> PathBuf {
        self.root.join(area.dir_name())
    }
}

// ============================================================================
// Fixture
// ============================================================================

pub struct Fixture {
    pub dir: TempDir,
    pub remote: Arc<FakeRemoteStore>,
    pub metadata: Arc<MemoryMetadataStore>,
    pub cache: Arc<MockContentCache>,
    pub fs: Arc<FileSystemCoordinator>,
}

pub fn config(dir: &TempDir) -> Config {
    ConfigBuilder::new()
        .cache_dir(dir.path().join("cache"))
        .build()
}

pub fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let remote = Arc::new(FakeRemoteStore::new());
    let metadata = Arc::new(MemoryMetadataStore::new(id(ROOT)));
    let cache = Arc::new(MockContentCache::new(&dir.path().join("cache")));
    let fs = Arc::new(FileSystemCoordinator::new(
        config(&dir),
        remote.clone(),
        metadata.clone(),
        cache.clone(),
    ));
    Fixture {
        dir,
        remote,
        metadata,
        cache,
        fs,
    }
}

/// Wait until `condition` holds, giving spawned and blocking tasks a chance to run
pub async fn until(mut condition: impl FnMut() -> bool) {
    for _ in 0..2000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition never became true");
}
