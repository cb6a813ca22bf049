//! Connection - application-facing view of one resource

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::messages::{ClientCommand, ConnectionEvent, Delivery};
use crate::domain::{ContextId, ResourceName};
use crate::error::{CoordError, CoordResult};

/// Stable handle to a resource, valid across ownership changes
///
/// Cheap to clone. Operations go through the client proxy, which routes them
/// to whichever owner is current and queues them while there is none.
#[derive(Clone)]
pub struct Connection {
    name: ResourceName,
    tx: mpsc::Sender<ClientCommand>,
    events: broadcast::Sender<ConnectionEvent>,
    owner: watch::Receiver<Option<ContextId>>,
}

impl Connection {
    pub(crate) fn new(
        name: ResourceName,
        tx: mpsc::Sender<ClientCommand>,
        events: broadcast::Sender<ConnectionEvent>,
        owner: watch::Receiver<Option<ContextId>>,
    ) -> Self {
        Self {
            name,
            tx,
            events,
            owner,
        }
    }

    pub fn name(&self) -> &ResourceName {
        &self.name
    }

    /// Owner the channel is currently connected to, if any
    pub fn owner(&self) -> Option<ContextId> {
        self.owner.borrow().clone()
    }

    /// Run an idempotent operation
    ///
    /// Reissued against the new owner if ownership changes before the answer
    /// arrives.
    pub async fn send(&self, payload: impl Into<Vec<u8>>) -> CoordResult<Vec<u8>> {
        self.send_with(payload, Delivery::Retryable).await
    }

    /// Run an operation with explicit delivery semantics
    pub async fn send_with(&self, payload: impl Into<Vec<u8>>, delivery: Delivery) -> CoordResult<Vec<u8>> {
        let payload = payload.into();
        debug!(name = %self.name, len = payload.len(), ?delivery, "Connection::send_with: called");
        let (reply_tx, reply_rx) = oneshot::channel();

        self.tx
            .send(ClientCommand::Send {
                name: self.name.clone(),
                payload,
                delivery,
                reply_tx,
            })
            .await
            .map_err(|_| CoordError::ChannelClosed("client proxy"))?;

        reply_rx.await.map_err(|_| CoordError::ChannelClosed("client proxy"))?
    }

    /// Subscribe to raw connection events
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Call `handler` with every payload the owner pushes
    ///
    /// Runs until the proxy and every clone of this connection are gone;
    /// abort the returned task to stop earlier.
    pub fn on_message<F>(&self, handler: F) -> JoinHandle<()>
    where
        F: Fn(Vec<u8>) + Send + 'static,
    {
        self.on_event(move |event| {
            if let ConnectionEvent::Message(payload) = event {
                handler(payload);
            }
        })
    }

    /// Call `handler` each time the channel underneath is replaced
    ///
    /// The handler receives the new owner, or None when the channel was lost
    /// and no new owner is known yet.
    pub fn on_superseded<F>(&self, handler: F) -> JoinHandle<()>
    where
        F: Fn(Option<ContextId>) + Send + 'static,
    {
        self.on_event(move |event| {
            if let ConnectionEvent::Superseded(owner) = event {
                handler(owner);
            }
        })
    }

    fn on_event<F>(&self, handler: F) -> JoinHandle<()>
    where
        F: Fn(ConnectionEvent) + Send + 'static,
    {
        let mut rx = self.events.subscribe();
        let name = self.name.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => handler(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(%name, skipped, "Connection: handler lagged, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("owner", &*self.owner.borrow())
            .finish()
    }
}
