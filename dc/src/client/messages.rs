//! Message types for the Client Proxy

use serde::Serialize;
use tokio::sync::oneshot;

use super::connection::Connection;
use crate::channel::Frame;
use crate::domain::{ContextId, ResourceName};
use crate::error::CoordResult;
use crate::relay::HandoffOffer;

/// Whether an operation may be reissued after an ownership change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Delivery {
    /// Idempotent; reissued against the new owner
    #[default]
    Retryable,
    /// Fails with ConnectionSuperseded instead of running twice
    AtMostOnce,
}

/// What a connection reports to its subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Unsolicited payload pushed by the owner
    Message(Vec<u8>),
    /// The channel underneath was replaced; the new owner if already known
    Superseded(Option<ContextId>),
}

/// Internal requests to the Client Proxy task
#[derive(Debug)]
pub enum ClientCommand {
    /// Get a connection to `name`, waiting for an owner if needed
    Request {
        name: ResourceName,
        reply_tx: oneshot::Sender<CoordResult<Connection>>,
    },

    /// Run one operation against the owner of `name`
    Send {
        name: ResourceName,
        payload: Vec<u8>,
        delivery: Delivery,
        reply_tx: oneshot::Sender<CoordResult<Vec<u8>>>,
    },

    /// Drop every pending request and queued operation for `name`
    Abandon { name: ResourceName },

    /// Get current metrics
    GetMetrics { reply_tx: oneshot::Sender<ClientMetrics> },

    /// Result of a handoff attempt (internal)
    HandoffResult {
        name: ResourceName,
        epoch: u64,
        result: CoordResult<HandoffOffer>,
    },

    /// A discovery round got no announcement in time (internal)
    DiscoveryExpired { name: ResourceName, epoch: u64 },

    /// Backoff before the next discovery round is over (internal)
    BackoffElapsed { name: ResourceName, epoch: u64 },

    /// Frame read from a live channel (internal)
    Frame {
        name: ResourceName,
        generation: u64,
        frame: Frame,
    },

    /// A live channel was closed by the owner side (internal)
    ChannelClosed { name: ResourceName, generation: u64 },

    /// Shutdown the proxy
    Shutdown,
}

/// Client proxy metrics for observability
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientMetrics {
    pub handoffs_completed: u64,
    pub attempts_failed: u64,
    pub unavailable_surfaced: u64,
    pub supersessions: u64,
    pub ops_sent: u64,
    pub ops_requeued: u64,
    pub ops_superseded: u64,
    pub messages_received: u64,
}
