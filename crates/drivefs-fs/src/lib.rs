//! drivefs FS - The file system coordinator
//!
//! This crate is the public surface of the drivefs engine. It composes the
//! ports from `drivefs-core` with the synchronizer from `drivefs-sync`:
//!
//! - [`FileSystemCoordinator`]: path and id lookups, directory listings,
//!   open/close bookkeeping, namespace mutations, search
//! - [`Materializer`](materialize::Materializer): produces local files for
//!   entries, downloading into the content cache when needed
//! - [`WriteBack`](write_back::WriteBack): uploads content modified through
//!   open files
//! - [`logging::init_tracing`]: subscriber bootstrap
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use drivefs_core::config::Config;
//! use drivefs_core::domain::DrivePath;
//! use drivefs_core::ports::{IContentCache, IMetadataStore, IRemoteStore};
//! use drivefs_fs::FileSystemCoordinator;
//!
//! # async fn example(
//! #     remote: Arc<dyn IRemoteStore>,
//! #     metadata: Arc<dyn IMetadataStore>,
//! #     cache: Arc<dyn IContentCache>,
//! # ) -> Result<(), drivefs_core::domain::FileError> {
//! let fs = FileSystemCoordinator::new(Config::default(), remote, metadata, cache);
//! fs.start_polling();
//! for entry in fs.read_directory(&DrivePath::root()).await? {
//!     println!("{}", entry.title);
//! }
//! # Ok(())
//! # }
//! ```

pub mod coordinator;
pub mod logging;
pub mod materialize;
pub mod operations;
pub mod search;
pub mod write_back;

pub use coordinator::{FileSystemCoordinator, FileSystemMetadata, Quota};
pub use materialize::{FileKind, MaterializedFile};
pub use search::{SearchResultInfo, SearchResults};
