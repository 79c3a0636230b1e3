//! drivefs Metadata - the entry tree
//!
//! In-memory model of the remote namespace:
//! - [`EntryTree`] - entries indexed by resource id with a child index;
//!   paths are derived by walking parent links
//! - [`MemoryMetadataStore`] - the `IMetadataStore` adapter over an
//!   `EntryTree`, with optional JSON snapshots
//!
//! ## Architecture
//!
//! This crate implements the `IMetadataStore` port from `drivefs-core`.
//! It is a driven (secondary) adapter in the hexagonal architecture.

pub mod store;
pub mod tree;

pub use store::MemoryMetadataStore;
pub use tree::EntryTree;
