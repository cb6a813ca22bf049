//! RelayHandle - client interface to the Relay task

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use uuid::Uuid;

use super::messages::{HandoffOffer, ProviderEndpoint, ProviderInfo, RelayMetrics, RelayRequest};
use crate::domain::{ContextId, ResourceName};
use crate::error::{CoordError, CoordResult};

/// Handle for contexts to interact with the Relay
///
/// Cloneable; every candidate and client proxy holds one. All operations are
/// async and only suspend the caller.
#[derive(Clone)]
pub struct RelayHandle {
    tx: mpsc::Sender<RelayRequest>,
}

impl RelayHandle {
    pub(crate) fn new(tx: mpsc::Sender<RelayRequest>) -> Self {
        Self { tx }
    }

    async fn send(&self, req: RelayRequest) -> CoordResult<()> {
        self.tx.send(req).await.map_err(|_| CoordError::ChannelClosed("relay"))
    }

    /// Register `provider` as the owner-side endpoint for `name`
    ///
    /// Replaces any previous registration (last writer wins).
    pub async fn register_provider(&self, name: ResourceName, provider: ProviderEndpoint) -> CoordResult<()> {
        debug!(%name, owner = %provider.owner, "RelayHandle::register_provider: called");
        self.send(RelayRequest::RegisterProvider { name, provider }).await
    }

    /// Drop the registration for `name` if `owner` still holds it
    pub async fn unregister_provider(&self, name: ResourceName, owner: ContextId) -> CoordResult<()> {
        debug!(%name, %owner, "RelayHandle::unregister_provider: called");
        self.send(RelayRequest::UnregisterProvider { name, owner }).await
    }

    /// Ask the current provider of `name` for a channel
    ///
    /// Resolves with the client's endpoint, NoProvider when nothing is
    /// registered, or HandoffTimeout when the provider stays silent.
    pub async fn request_handoff(&self, name: ResourceName, timeout: Duration) -> CoordResult<HandoffOffer> {
        let request_id = Uuid::now_v7();
        debug!(%request_id, %name, ?timeout, "RelayHandle::request_handoff: called");
        let (reply_tx, reply_rx) = oneshot::channel();

        self.send(RelayRequest::RequestHandoff {
            request_id,
            name,
            reply_tx,
            timeout,
        })
        .await?;

        debug!(%request_id, "RelayHandle::request_handoff: waiting for reply");
        // The relay enforces the timeout; a dropped reply means it restarted
        reply_rx.await.map_err(|_| CoordError::ChannelClosed("relay"))?
    }

    /// Answer a forwarded handoff request (called by the provider)
    pub async fn reply_handoff(&self, request_id: Uuid, offer: HandoffOffer) -> CoordResult<()> {
        debug!(%request_id, name = %offer.name, "RelayHandle::reply_handoff: called");
        self.send(RelayRequest::HandoffReply { request_id, offer }).await
    }

    /// Refuse a forwarded handoff request (called by a provider that no
    /// longer owns the resource); the requester gets NoProvider at once
    pub async fn decline_handoff(&self, request_id: Uuid) -> CoordResult<()> {
        debug!(%request_id, "RelayHandle::decline_handoff: called");
        self.send(RelayRequest::HandoffDeclined { request_id }).await
    }

    /// Get current relay metrics
    pub async fn metrics(&self) -> CoordResult<RelayMetrics> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(RelayRequest::GetMetrics { reply_tx }).await?;
        reply_rx.await.map_err(|_| CoordError::ChannelClosed("relay"))
    }

    /// List current registrations, sorted by name
    pub async fn providers(&self) -> CoordResult<Vec<ProviderInfo>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(RelayRequest::ListProviders { reply_tx }).await?;
        reply_rx.await.map_err(|_| CoordError::ChannelClosed("relay"))
    }

    /// Drop all relay state, as a process restart would
    pub async fn restart(&self) -> CoordResult<()> {
        debug!("RelayHandle::restart: called");
        self.send(RelayRequest::Restart).await
    }

    /// Stop the relay task
    pub async fn shutdown(&self) -> CoordResult<()> {
        debug!("RelayHandle::shutdown: called");
        self.send(RelayRequest::Shutdown).await
    }
}
