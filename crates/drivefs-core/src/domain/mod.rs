//! Domain entities
//!
//! This module contains the core data types of drivefs:
//! - Newtypes for validated identifiers, paths and versioning tokens
//! - The `Entry` namespace node and its file/directory facets
//! - Change batches and directory fetch specifications
//! - Cache records as reported by the content cache
//! - The `FileError` vocabulary and its remote-status mapping

pub mod cache_record;
pub mod change;
pub mod entry;
pub mod errors;
pub mod newtypes;

// Re-export commonly used types
pub use cache_record::{CacheArea, CacheRecord, StoreMode};
pub use change::{ChangeBatch, DirectoryFetchSpec};
pub use entry::{DirectorySpecificInfo, Entry, FileSpecificInfo};
pub use errors::{DomainError, FileError, FileResult, RemoteError};
pub use newtypes::*;
