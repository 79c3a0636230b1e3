//! Disk content cache.
//!
//! Content is stored in a hash-based directory structure:
//! `{cache_dir}/files/{first_2_chars_of_hash}/{rest_of_hash}` where the hash
//! is the SHA-256 of the `(resource_id, content_hash)` key.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use drivefs_core::config::CacheConfig;
use drivefs_core::domain::{
    CacheArea, CacheRecord, ContentHash, FileError, FileResult, ResourceId, StoreMode,
};
use drivefs_core::ports::IContentCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::space::available_space;

const INDEX_FILE: &str = "index.json";

type RecordKey = (ResourceId, ContentHash);

#[derive(Debug, Clone)]
struct CachedBlob {
    record: CacheRecord,
    size: u64,
    last_access: u64,
    /// Dirty content handed over for write-back
    committed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexRecord {
    resource_id: ResourceId,
    content_hash: ContentHash,
    record: CacheRecord,
    size: u64,
}

/// Content cache on local disk with an LRU size budget
pub struct DiskContentCache {
    cache_dir: PathBuf,
    files_dir: PathBuf,
    max_size_bytes: u64,
    min_free_bytes: u64,
    records: DashMap<RecordKey, CachedBlob>,
    access_clock: AtomicU64,
    /// Serializes index snapshots so the newest one lands last
    index_lock: Mutex<()>,
}

impl DiskContentCache {
    /// Open the cache described by `config`
    pub fn open(config: &CacheConfig) -> io::Result<Self> {
        Self::with_limits(
            config.cache_dir.clone(),
            config.max_size_bytes(),
            config.min_free_space_bytes(),
        )
    }

    /// Open a cache rooted at `cache_dir`, creating its layout if needed
    ///
    /// Scratch areas are emptied; records are restored from the index for
    /// content that is still on disk.
    pub fn with_limits(
        cache_dir: PathBuf,
        max_size_bytes: u64,
        min_free_bytes: u64,
    ) -> io::Result<Self> {
        let files_dir = cache_dir.join("files");
        fs::create_dir_all(&files_dir)?;
        for area in [CacheArea::TmpDownloads, CacheArea::TmpDocuments] {
            let dir = cache_dir.join(area.dir_name());
            if dir.exists() {
                fs::remove_dir_all(&dir)?;
            }
            fs::create_dir_all(&dir)?;
        }

        let cache = Self {
            cache_dir,
            files_dir,
            max_size_bytes,
            min_free_bytes,
            records: DashMap::new(),
            access_clock: AtomicU64::new(0),
            index_lock: Mutex::new(()),
        };
        cache.load_index()?;
        info!(
            cache_dir = %cache.cache_dir.display(),
            records = cache.records.len(),
            usage = cache.usage(),
            "Content cache opened"
        );
        Ok(cache)
    }

    /// Compute the content path of a record using a SHA-256 hash of its key
    pub fn content_path(&self, resource_id: &ResourceId, hash: &ContentHash) -> PathBuf {
        let digest = Self::hash_key(resource_id, hash);
        let (prefix, rest) = digest.split_at(2);
        self.files_dir.join(prefix).join(rest)
    }

    /// Bytes of present content tracked by the records
    pub fn usage(&self) -> u64 {
        self.records
            .iter()
            .filter(|blob| blob.record.is_present)
            .map(|blob| blob.size)
            .sum()
    }

    /// Number of tracked records
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Calculate total disk usage of the content directory.
    pub fn disk_usage(&self) -> io::Result<u64> {
        let mut total = 0u64;
        if self.files_dir.exists() {
            for shard in fs::read_dir(&self.files_dir)? {
                let shard = shard?;
                if shard.file_type()?.is_dir() {
                    for file in fs::read_dir(shard.path())? {
                        let file = file?;
                        if file.file_type()?.is_file() {
                            total += file.metadata()?.len();
                        }
                    }
                }
            }
        }
        Ok(total)
    }

    /// Dirty content committed for write-back, oldest access first
    pub fn pending_uploads(&self) -> Vec<(ResourceId, ContentHash, PathBuf)> {
        let mut pending: Vec<(u64, ResourceId, ContentHash)> = self
            .records
            .iter()
            .filter(|blob| blob.committed && blob.record.is_dirty)
            .map(|blob| (blob.last_access, blob.key().0.clone(), blob.key().1.clone()))
            .collect();
        pending.sort_by_key(|(access, _, _)| *access);
        pending
            .into_iter()
            .map(|(_, id, hash)| {
                let path = self.content_path(&id, &hash);
                (id, hash, path)
            })
            .collect()
    }

    fn hash_key(resource_id: &ResourceId, hash: &ContentHash) -> String {
        let mut hasher = Sha256::new();
        hasher.update(resource_id.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(hash.as_str().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn tick(&self) -> u64 {
        self.access_clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn load_index(&self) -> io::Result<()> {
        let path = self.cache_dir.join(INDEX_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err),
        };
        let index: Vec<IndexRecord> = match serde_json::from_slice(&bytes) {
            Ok(index) => index,
            Err(err) => {
                warn!(error = %err, "Discarding unreadable cache index");
                return Ok(());
            }
        };

        for item in index {
            let mut record = item.record;
            record.is_present =
                record.is_present && self.content_path(&item.resource_id, &item.content_hash).is_file();
            if !record.is_present {
                record.is_dirty = false;
                if !record.is_pinned {
                    continue;
                }
            }
            self.records.insert(
                (item.resource_id, item.content_hash),
                CachedBlob {
                    record,
                    size: item.size,
                    last_access: self.tick(),
                    committed: false,
                },
            );
        }
        Ok(())
    }

    async fn persist_index(&self) -> FileResult<()> {
        let _guard = self.index_lock.lock().await;
        let snapshot: Vec<IndexRecord> = self
            .records
            .iter()
            .map(|blob| IndexRecord {
                resource_id: blob.key().0.clone(),
                content_hash: blob.key().1.clone(),
                record: blob.record,
                size: blob.size,
            })
            .collect();
        let dir = self.cache_dir.clone();
        tokio::task::spawn_blocking(move || -> io::Result<()> {
            let json = serde_json::to_vec(&snapshot).map_err(io::Error::other)?;
            let mut tmp = NamedTempFile::new_in(&dir)?;
            tmp.write_all(&json)?;
            tmp.persist(dir.join(INDEX_FILE))?;
            Ok(())
        })
        .await??;
        Ok(())
    }

    async fn delete_files(paths: Vec<PathBuf>) {
        if paths.is_empty() {
            return;
        }
        let result = tokio::task::spawn_blocking(move || {
            for path in paths {
                if let Err(err) = fs::remove_file(&path) {
                    if err.kind() != io::ErrorKind::NotFound {
                        warn!(path = %path.display(), error = %err, "Failed to delete cached content");
                    }
                }
            }
        })
        .await;
        if let Err(err) = result {
            warn!(error = %err, "Content deletion task failed");
        }
    }

    fn fits(&self, usage: u64, available: u64, bytes: u64) -> bool {
        usage.saturating_add(bytes) <= self.max_size_bytes
            && available >= bytes.saturating_add(self.min_free_bytes)
    }
}

#[async_trait]
impl IContentCache for DiskContentCache {
    async fn get_file(&self, resource_id: &ResourceId, hash: &ContentHash) -> FileResult<PathBuf> {
        let key = (resource_id.clone(), hash.clone());
        match self.records.get_mut(&key) {
            Some(mut blob) if blob.record.is_present => {
                blob.last_access = self.tick();
            }
            _ => return Err(FileError::NotFound),
        }
        Ok(self.content_path(resource_id, hash))
    }

    async fn get_cache_entry(
        &self,
        resource_id: &ResourceId,
        hash: &ContentHash,
    ) -> Option<CacheRecord> {
        self.records
            .get(&(resource_id.clone(), hash.clone()))
            .map(|blob| blob.record)
    }

    async fn free_disk_space_if_needed_for(&self, bytes: u64) -> bool {
        let mut usage = self.usage();
        let mut available = available_space(&self.cache_dir).unwrap_or_else(|err| {
            warn!(error = %err, "Free space probe failed, assuming enough space");
            u64::MAX
        });
        if self.fits(usage, available, bytes) {
            return true;
        }

        let mut candidates: Vec<(RecordKey, u64, u64)> = self
            .records
            .iter()
            .filter(|blob| blob.record.is_present && blob.record.is_evictable())
            .map(|blob| (blob.key().clone(), blob.last_access, blob.size))
            .collect();
        candidates.sort_by_key(|(_, access, _)| *access);

        let mut evicted = Vec::new();
        for (key, _, size) in candidates {
            if self.fits(usage, available, bytes) {
                break;
            }
            if self
                .records
                .remove_if(&key, |_, blob| blob.record.is_evictable())
                .is_none()
            {
                continue;
            }
            evicted.push(self.content_path(&key.0, &key.1));
            usage = usage.saturating_sub(size);
            available = available.saturating_add(size);
        }

        let evicted_count = evicted.len();
        Self::delete_files(evicted).await;
        if evicted_count > 0 {
            if let Err(err) = self.persist_index().await {
                warn!(error = %err, "Failed to persist cache index after eviction");
            }
        }

        let ok = self.fits(usage, available, bytes);
        if ok {
            debug!(bytes, evicted = evicted_count, "Freed cache space");
        } else {
            warn!(bytes, usage, evicted = evicted_count, "Not enough cache space");
        }
        ok
    }

    async fn store(
        &self,
        resource_id: &ResourceId,
        hash: &ContentHash,
        source: &Path,
        mode: StoreMode,
    ) -> FileResult<()> {
        let dest = self.content_path(resource_id, hash);
        let source = source.to_path_buf();
        let size = tokio::task::spawn_blocking(move || -> io::Result<u64> {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            match mode {
                StoreMode::Move => {
                    if fs::rename(&source, &dest).is_err() {
                        fs::copy(&source, &dest)?;
                        fs::remove_file(&source)?;
                    }
                }
                StoreMode::Copy => {
                    fs::copy(&source, &dest)?;
                }
            }
            Ok(fs::metadata(&dest)?.len())
        })
        .await??;

        // A new revision supersedes clean older ones of the same entry.
        let superseded: Vec<RecordKey> = self
            .records
            .iter()
            .filter(|blob| {
                let (id, old_hash) = blob.key();
                id == resource_id && old_hash != hash && !blob.record.is_dirty
            })
            .map(|blob| blob.key().clone())
            .collect();
        let mut pinned = self
            .records
            .get(&(resource_id.clone(), hash.clone()))
            .is_some_and(|blob| blob.record.is_pinned);
        let mut stale_files = Vec::new();
        for key in superseded {
            if let Some((key, blob)) = self.records.remove(&key) {
                pinned |= blob.record.is_pinned;
                stale_files.push(self.content_path(&key.0, &key.1));
            }
        }
        Self::delete_files(stale_files).await;

        self.records.insert(
            (resource_id.clone(), hash.clone()),
            CachedBlob {
                record: CacheRecord {
                    is_present: true,
                    is_dirty: false,
                    is_pinned: pinned,
                },
                size,
                last_access: self.tick(),
                committed: false,
            },
        );
        debug!(resource_id = %resource_id, hash = %hash, size, ?mode, "Stored content");
        self.persist_index().await
    }

    async fn mark_dirty(&self, resource_id: &ResourceId, hash: &ContentHash) -> FileResult<()> {
        {
            let mut blob = self
                .records
                .get_mut(&(resource_id.clone(), hash.clone()))
                .ok_or(FileError::NotFound)?;
            if !blob.record.is_present {
                return Err(FileError::NotFound);
            }
            blob.record.is_dirty = true;
            blob.committed = false;
        }
        debug!(resource_id = %resource_id, "Marked content dirty");
        self.persist_index().await
    }

    async fn commit_dirty(
        &self,
        resource_id: &ResourceId,
        hash: &ContentHash,
    ) -> FileResult<()> {
        let mut blob = self
            .records
            .get_mut(&(resource_id.clone(), hash.clone()))
            .ok_or(FileError::NotFound)?;
        if !blob.record.is_dirty {
            return Err(FileError::InvalidOperation);
        }
        blob.committed = true;
        debug!(resource_id = %resource_id, "Committed dirty content for write-back");
        Ok(())
    }

    async fn clear_dirty(&self, resource_id: &ResourceId, hash: &ContentHash) -> FileResult<()> {
        {
            let mut blob = self
                .records
                .get_mut(&(resource_id.clone(), hash.clone()))
                .ok_or(FileError::NotFound)?;
            blob.record.is_dirty = false;
            blob.committed = false;
        }
        debug!(resource_id = %resource_id, "Cleared dirty flag after write-back");
        self.persist_index().await
    }

    async fn pin(&self, resource_id: &ResourceId, hash: &ContentHash) -> FileResult<()> {
        self.records
            .entry((resource_id.clone(), hash.clone()))
            .or_insert_with(|| CachedBlob {
                record: CacheRecord::default(),
                size: 0,
                last_access: 0,
                committed: false,
            })
            .record
            .is_pinned = true;
        self.persist_index().await
    }

    async fn unpin(&self, resource_id: &ResourceId, hash: &ContentHash) -> FileResult<()> {
        let key = (resource_id.clone(), hash.clone());
        {
            let mut blob = self.records.get_mut(&key).ok_or(FileError::NotFound)?;
            blob.record.is_pinned = false;
        }
        self.records
            .remove_if(&key, |_, blob| !blob.record.is_present && !blob.record.is_dirty);
        self.persist_index().await
    }

    async fn remove(&self, resource_id: &ResourceId) -> FileResult<()> {
        let keys: Vec<RecordKey> = self
            .records
            .iter()
            .filter(|blob| &blob.key().0 == resource_id)
            .map(|blob| blob.key().clone())
            .collect();
        if keys.is_empty() {
            return Ok(());
        }
        let files = keys
            .iter()
            .filter_map(|key| self.records.remove(key))
            .map(|(key, _)| self.content_path(&key.0, &key.1))
            .collect();
        Self::delete_files(files).await;
        debug!(resource_id = %resource_id, "Removed cached content");
        self.persist_index().await
    }

    fn cache_directory(&self, area: CacheArea) -> PathBuf {
        self.cache_dir.join(area.dir_name())
    }
}
