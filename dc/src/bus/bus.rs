//! Coordination Bus - best-effort broadcast of discovery announcements
//!
//! Built on a tokio broadcast channel. Every context holds a clone of the bus
//! and subscribes for itself; nothing published before a subscription exists
//! is ever replayed to it.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use super::messages::CoordinationMessage;
use crate::domain::ResourceName;

/// Default channel capacity (messages)
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Which messages a subscription yields
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusFilter {
    /// Every announcement
    All,
    /// Only announcements about one resource
    Name(ResourceName),
}

impl BusFilter {
    fn matches(&self, msg: &CoordinationMessage) -> bool {
        match self {
            BusFilter::All => true,
            BusFilter::Name(name) => msg.name() == name,
        }
    }
}

/// Broadcast channel shared by every context in the same origin
///
/// Cheap to clone; all clones publish into the same channel.
#[derive(Clone)]
pub struct CoordinationBus {
    tx: broadcast::Sender<CoordinationMessage>,
}

impl CoordinationBus {
    /// Create a new bus with the given capacity (at least one)
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "CoordinationBus::new: creating bus");
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a message to all current subscribers
    ///
    /// Fire-and-forget: with no subscribers the message is dropped silently.
    pub fn publish(&self, msg: CoordinationMessage) {
        debug!(tag = msg.tag(), name = %msg.name(), "CoordinationBus::publish");
        // Ignore send errors (no subscribers is OK)
        let _ = self.tx.send(msg);
    }

    /// Subscribe to messages published from now on
    pub fn subscribe(&self, filter: BusFilter) -> BusSubscription {
        debug!(?filter, "CoordinationBus::subscribe: new subscriber");
        BusSubscription {
            rx: self.tx.subscribe(),
            filter,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for CoordinationBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

/// Live, non-restartable stream of announcements
pub struct BusSubscription {
    rx: broadcast::Receiver<CoordinationMessage>,
    filter: BusFilter,
}

impl BusSubscription {
    /// Receive the next matching message
    ///
    /// Returns None once every bus handle is gone. A subscriber that falls
    /// behind skips what it missed; discovery tolerates lost announcements.
    /// Cancel safe.
    pub async fn recv(&mut self) -> Option<CoordinationMessage> {
        loop {
            match self.rx.recv().await {
                Ok(msg) if self.filter.matches(&msg) => return Some(msg),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "BusSubscription::recv: subscriber lagged, announcements lost");
                    continue;
                }
                Err(RecvError::Closed) => {
                    debug!("BusSubscription::recv: bus closed");
                    return None;
                }
            }
        }
    }
}
