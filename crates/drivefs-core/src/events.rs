//! File system events and the broadcast bus that delivers them
//!
//! Observers call [`EventBus::subscribe`] and receive every event published
//! afterwards. Dropping the returned [`EventSubscription`] unsubscribes.

use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::domain::DrivePath;

/// Notifications delivered to file system observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSystemEvent {
    /// The children (or offline availability) of a directory changed
    DirectoryChanged(DrivePath),
    /// A full or delta feed was applied to the tree
    FeedFromServerLoaded,
    /// The first full load completed
    InitialLoadFinished,
    /// The namespace was mounted by the host
    Mounted,
    /// The namespace is about to be unmounted
    Unmounted,
}

/// Multi-subscriber broadcast of [`FileSystemEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<FileSystemEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per lagging subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to all current subscribers
    ///
    /// Publishing with no subscribers is not an error.
    pub fn publish(&self, event: FileSystemEvent) {
        trace!(?event, "Publishing file system event");
        if self.sender.send(event).is_err() {
            trace!("No subscribers for file system event");
        }
    }

    /// Register a new observer
    pub fn subscribe(&self) -> EventSubscription {
        debug!(
            subscribers = self.sender.receiver_count() + 1,
            "New file system event subscriber"
        );
        EventSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// A live registration on the [`EventBus`]
#[derive(Debug)]
pub struct EventSubscription {
    receiver: broadcast::Receiver<FileSystemEvent>,
}

impl EventSubscription {
    /// Wait for the next event
    ///
    /// Lagged events are skipped with a warning; returns `None` once the
    /// bus is gone.
    pub async fn recv(&mut self) -> Option<FileSystemEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next event if one is already buffered
    pub fn try_recv(&mut self) -> Option<FileSystemEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Drain every buffered event
    pub fn drain(&mut self) -> Vec<FileSystemEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
