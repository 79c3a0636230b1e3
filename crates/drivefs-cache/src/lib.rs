//! drivefs Cache - Local content storage
//!
//! Disk-backed implementation of the `IContentCache` port:
//! - Content blobs keyed by `(resource_id, content_hash)` in a
//!   SHA-256-sharded layout under `{cache_dir}/files`
//! - Scratch areas for partial downloads and hosted-document stubs
//! - Present / dirty / pinned bookkeeping persisted in `index.json`
//! - A size budget enforced by least-recently-used eviction
//!
//! ## Usage
//!
//! ```no_run
//! use drivefs_cache::DiskContentCache;
//! use drivefs_core::config::CacheConfig;
//!
//! # fn example() -> std::io::Result<()> {
//! let cache = DiskContentCache::open(&CacheConfig::default())?;
//! println!("cache uses {} bytes", cache.usage());
//! # Ok(())
//! # }
//! ```

pub mod disk;
pub mod space;

pub use disk::DiskContentCache;
