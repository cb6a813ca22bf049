//! ClientHandle - application interface to a Client Proxy task

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::connection::Connection;
use super::messages::{ClientCommand, ClientMetrics};
use crate::domain::{ContextId, ResourceName};
use crate::error::{CoordError, CoordResult};

/// Handle for requesting resources through a Client Proxy
#[derive(Clone)]
pub struct ClientHandle {
    id: ContextId,
    tx: mpsc::Sender<ClientCommand>,
}

impl ClientHandle {
    pub(crate) fn new(id: ContextId, tx: mpsc::Sender<ClientCommand>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> &ContextId {
        &self.id
    }

    async fn send(&self, cmd: ClientCommand) -> CoordResult<()> {
        self.tx.send(cmd).await.map_err(|_| CoordError::ChannelClosed("client proxy"))
    }

    /// Get a connection to `name`
    ///
    /// Resolves as soon as a channel to the current owner exists, waiting for
    /// discovery when there is none. Fails with ResourceUnavailable once the
    /// retry budget is spent. Dropping the future abandons the request.
    pub async fn request_resource(&self, name: impl Into<ResourceName>) -> CoordResult<Connection> {
        let name = name.into();
        debug!(id = %self.id, %name, "ClientHandle::request_resource: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(ClientCommand::Request { name, reply_tx }).await?;
        reply_rx.await.map_err(|_| CoordError::ChannelClosed("client proxy"))?
    }

    /// Drop every pending request and queued operation for `name`
    ///
    /// Their callers see ChannelClosed. Nothing is sent to the relay or owner.
    pub async fn abandon(&self, name: impl Into<ResourceName>) -> CoordResult<()> {
        let name = name.into();
        debug!(id = %self.id, %name, "ClientHandle::abandon: called");
        self.send(ClientCommand::Abandon { name }).await
    }

    /// Get current proxy metrics
    pub async fn metrics(&self) -> CoordResult<ClientMetrics> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(ClientCommand::GetMetrics { reply_tx }).await?;
        reply_rx.await.map_err(|_| CoordError::ChannelClosed("client proxy"))
    }

    /// Stop the proxy task
    pub async fn shutdown(&self) -> CoordResult<()> {
        debug!(id = %self.id, "ClientHandle::shutdown: called");
        self.send(ClientCommand::Shutdown).await
    }

    #[cfg(test)]
    pub(crate) fn sender(&self) -> mpsc::Sender<ClientCommand> {
        self.tx.clone()
    }
}
