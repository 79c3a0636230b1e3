//! drivefs Sync - Keeping the entry tree current
//!
//! - [`ChangeSynchronizer`]: full load, directory fast-fetch and delta
//!   refresh of the entry tree from the remote change feed
//! - [`ChangeProcessor`]: applies one batch of feed entries in parent-first
//!   order
//! - [`SyncScheduler`]: periodic update checks with a push-aware interval

pub mod change_processor;
pub mod scheduler;
pub mod synchronizer;

pub use change_processor::{ChangeProcessor, ChangeSummary};
pub use scheduler::SyncScheduler;
pub use synchronizer::{ChangeSynchronizer, SyncPhase, UpdateCheck};
