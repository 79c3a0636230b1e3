//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the traits the orchestration crates depend on and
//! whose implementations live in adapter crates or the embedding application.
//!
//! ## Ports Overview
//!
//! - [`IRemoteStore`] - Remote document store (metadata, feeds, transfers)
//! - [`IContentCache`] - Local content cache keyed by (resource id, content hash)
//! - [`IMetadataStore`] - The entry tree, looked up and mutated asynchronously

pub mod content_cache;
pub mod metadata_store;
pub mod remote_store;

pub use content_cache::IContentCache;
pub use metadata_store::{IMetadataStore, SearchOptions};
pub use remote_store::{AboutResource, ClientContext, ContextPriority, IRemoteStore, RemoteEntry};
