//! drivefs Core - Domain types, ports and configuration
//!
//! This crate contains the hexagonal core of the drivefs sync/cache engine:
//! - **Domain entities** - `Entry`, `ChangeBatch`, `DirectoryFetchSpec`, `CacheRecord`
//! - **Errors** - `FileError`, the single error vocabulary of every public operation
//! - **Port definitions** - Traits for collaborators: `IRemoteStore`, `IContentCache`,
//!   `IMetadataStore`
//! - **Events** - `EventBus`, the multi-subscriber broadcast of file system events
//!
//! # Architecture
//!
//! The domain module is pure data with no I/O. Ports define the narrow
//! async interfaces the orchestration crates (`drivefs-sync`, `drivefs-fs`)
//! depend on; adapter crates (`drivefs-metadata`, `drivefs-cache`) or
//! embedding applications provide the implementations.

pub mod config;
pub mod domain;
pub mod events;
pub mod ports;
