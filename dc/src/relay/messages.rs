//! Message types for the Relay

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::channel::Endpoint;
use crate::domain::{ContextId, ResourceName};
use crate::error::CoordResult;

/// Messages sent to a provider (the current owner) by the Relay
#[derive(Debug)]
pub enum ProviderRequest {
    /// A client wants a channel; answer with `RelayHandle::reply_handoff`
    Handoff { request_id: Uuid, name: ResourceName },

    /// Another context registered for `name`; this registration is gone
    Revoked { name: ResourceName },
}

/// Where the Relay forwards handoff requests for a resource
#[derive(Debug, Clone)]
pub struct ProviderEndpoint {
    pub owner: ContextId,
    pub tx: mpsc::Sender<ProviderRequest>,
}

/// A provider's answer to a handoff request: the client's end of a fresh channel
#[derive(Debug)]
pub struct HandoffOffer {
    pub name: ResourceName,
    pub owner: ContextId,
    pub endpoint: Endpoint,
}

/// Internal requests to the Relay task
#[derive(Debug)]
pub enum RelayRequest {
    /// Register (or replace) the provider for a resource
    RegisterProvider {
        name: ResourceName,
        provider: ProviderEndpoint,
    },

    /// Remove the provider for a resource if it still belongs to `owner`
    UnregisterProvider { name: ResourceName, owner: ContextId },

    /// Ask the registered provider for a channel
    RequestHandoff {
        request_id: Uuid,
        name: ResourceName,
        reply_tx: oneshot::Sender<CoordResult<HandoffOffer>>,
        timeout: Duration,
    },

    /// Provider's single reply to a forwarded handoff request
    HandoffReply { request_id: Uuid, offer: HandoffOffer },

    /// Provider cannot serve a forwarded request (it no longer owns the resource)
    HandoffDeclined { request_id: Uuid },

    /// Handoff timeout notification (internal)
    HandoffTimeout { request_id: Uuid },

    /// Get current metrics
    GetMetrics { reply_tx: oneshot::Sender<RelayMetrics> },

    /// List current registrations
    ListProviders {
        reply_tx: oneshot::Sender<Vec<ProviderInfo>>,
    },

    /// Drop all state, as if the relay process had been restarted
    Restart,

    /// Shutdown the relay
    Shutdown,
}

/// Registration as reported by `ListProviders`
#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub name: ResourceName,
    pub owner: ContextId,
    #[serde(rename = "registered-at")]
    pub registered_at: DateTime<Utc>,
}

/// Relay metrics for observability
#[derive(Debug, Clone, Default, Serialize)]
pub struct RelayMetrics {
    pub registered_providers: usize,
    pub pending_handoffs: usize,
    pub handoffs_requested: u64,
    pub handoffs_served: u64,
    pub no_provider_replies: u64,
    pub handoff_timeouts: u64,
    pub providers_replaced: u64,
    pub restarts: u64,
    pub messages_received: u64,
}
