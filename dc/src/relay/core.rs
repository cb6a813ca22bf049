//! Main Relay task implementation

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::handle::RelayHandle;
use super::messages::{HandoffOffer, ProviderEndpoint, ProviderInfo, ProviderRequest, RelayMetrics, RelayRequest};
use crate::config::RelayConfig;
use crate::domain::ResourceName;
use crate::error::{CoordError, CoordResult};

/// Registered provider for one resource
struct Registration {
    provider: ProviderEndpoint,
    registered_at: DateTime<Utc>,
}

/// Handoff request forwarded to a provider and awaiting its reply
struct PendingHandoff {
    name: ResourceName,
    reply_tx: oneshot::Sender<CoordResult<HandoffOffer>>,
    timeout: std::time::Duration,
}

/// Everything the relay knows; lost on restart
#[derive(Default)]
struct RelayState {
    providers: HashMap<ResourceName, Registration>,
    pending: HashMap<Uuid, PendingHandoff>,
}

/// Broker mapping each resource to its current owner's provider endpoint
///
/// Holds no durable state. After a restart the map is empty until owners
/// re-register, which they do every time they re-announce.
pub struct Relay {
    tx: mpsc::Sender<RelayRequest>,
    rx: mpsc::Receiver<RelayRequest>,
}

impl Relay {
    /// Create a new Relay with the given configuration
    pub fn new(config: &RelayConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_buffer.max(1));
        Self { tx, rx }
    }

    /// Get a handle for talking to this relay
    pub fn handle(&self) -> RelayHandle {
        RelayHandle::new(self.tx.clone())
    }

    /// Create a relay, spawn it, and return its handle
    pub fn spawn(config: &RelayConfig) -> (RelayHandle, tokio::task::JoinHandle<()>) {
        let relay = Self::new(config);
        let handle = relay.handle();
        let task = tokio::spawn(relay.run());
        (handle, task)
    }

    /// Run the Relay task
    ///
    /// This consumes the Relay and runs until shutdown is requested.
    pub async fn run(mut self) {
        let relay_tx = self.tx.clone();
        let mut state = RelayState::default();
        let mut metrics = RelayMetrics::default();

        info!("Relay started");

        while let Some(req) = self.rx.recv().await {
            metrics.messages_received += 1;

            match req {
                RelayRequest::RegisterProvider { name, provider } => {
                    debug!(%name, owner = %provider.owner, "Registering provider");
                    let registration = Registration {
                        provider,
                        registered_at: Utc::now(),
                    };

                    if let Some(previous) = state.providers.insert(name.clone(), registration) {
                        let current_owner = &state.providers[&name].provider.owner;
                        if previous.provider.owner != *current_owner {
                            info!(%name, old = %previous.provider.owner, new = %current_owner, "Provider replaced");
                            metrics.providers_replaced += 1;
                            // Best effort: a dead provider cannot be told anything
                            let _ = previous
                                .provider
                                .tx
                                .try_send(ProviderRequest::Revoked { name: name.clone() });
                        }
                    }
                    metrics.registered_providers = state.providers.len();
                }

                RelayRequest::UnregisterProvider { name, owner } => {
                    let owned = state.providers.get(&name).is_some_and(|r| r.provider.owner == owner);
                    if owned {
                        debug!(%name, %owner, "Unregistering provider");
                        state.providers.remove(&name);
                    } else {
                        debug!(%name, %owner, "Ignoring unregister from non-current provider");
                    }
                    metrics.registered_providers = state.providers.len();
                }

                RelayRequest::RequestHandoff {
                    request_id,
                    name,
                    reply_tx,
                    timeout,
                } => {
                    metrics.handoffs_requested += 1;
                    debug!(%request_id, %name, "Handoff requested");

                    let Some(registration) = state.providers.get(&name) else {
                        debug!(%name, "No provider registered");
                        metrics.no_provider_replies += 1;
                        let _ = reply_tx.send(Err(CoordError::NoProvider(name)));
                        continue;
                    };

                    let forward = ProviderRequest::Handoff {
                        request_id,
                        name: name.clone(),
                    };
                    match registration.provider.tx.try_send(forward) {
                        Ok(()) => {
                            state.pending.insert(
                                request_id,
                                PendingHandoff {
                                    name,
                                    reply_tx,
                                    timeout,
                                },
                            );
                            metrics.pending_handoffs = state.pending.len();

                            // Spawn timeout handler
                            let timeout_tx = relay_tx.clone();
                            tokio::spawn(async move {
                                tokio::time::sleep(timeout).await;
                                let _ = timeout_tx.send(RelayRequest::HandoffTimeout { request_id }).await;
                            });
                        }
                        Err(TrySendError::Closed(_)) => {
                            warn!(%name, owner = %registration.provider.owner, "Provider gone, dropping registration");
                            state.providers.remove(&name);
                            metrics.registered_providers = state.providers.len();
                            metrics.no_provider_replies += 1;
                            let _ = reply_tx.send(Err(CoordError::NoProvider(name)));
                        }
                        Err(TrySendError::Full(_)) => {
                            warn!(%name, owner = %registration.provider.owner, "Provider backlog full");
                            metrics.no_provider_replies += 1;
                            let _ = reply_tx.send(Err(CoordError::NoProvider(name)));
                        }
                    }
                }

                RelayRequest::HandoffReply { request_id, offer } => {
                    // One-shot: the entry is gone after first use, so late or
                    // duplicate replies fall through and their endpoint drops
                    if let Some(pending) = state.pending.remove(&request_id) {
                        debug!(%request_id, name = %pending.name, owner = %offer.owner, "Forwarding handoff");
                        if pending.reply_tx.send(Ok(offer)).is_ok() {
                            metrics.handoffs_served += 1;
                        } else {
                            debug!(%request_id, "Requester abandoned handoff");
                        }
                        metrics.pending_handoffs = state.pending.len();
                    } else {
                        debug!(%request_id, "Ignoring reply for unknown handoff");
                    }
                }

                RelayRequest::HandoffDeclined { request_id } => {
                    if let Some(pending) = state.pending.remove(&request_id) {
                        debug!(%request_id, name = %pending.name, "Provider declined handoff");
                        let _ = pending.reply_tx.send(Err(CoordError::NoProvider(pending.name)));
                        metrics.pending_handoffs = state.pending.len();
                        metrics.no_provider_replies += 1;
                    }
                }

                RelayRequest::HandoffTimeout { request_id } => {
                    if let Some(pending) = state.pending.remove(&request_id) {
                        warn!(%request_id, name = %pending.name, "Handoff timed out");
                        let _ = pending.reply_tx.send(Err(CoordError::HandoffTimeout {
                            name: pending.name,
                            timeout: pending.timeout,
                        }));
                        metrics.pending_handoffs = state.pending.len();
                        metrics.handoff_timeouts += 1;
                    }
                }

                RelayRequest::GetMetrics { reply_tx } => {
                    let _ = reply_tx.send(metrics.clone());
                }

                RelayRequest::ListProviders { reply_tx } => {
                    let mut providers: Vec<ProviderInfo> = state
                        .providers
                        .iter()
                        .map(|(name, r)| ProviderInfo {
                            name: name.clone(),
                            owner: r.provider.owner.clone(),
                            registered_at: r.registered_at,
                        })
                        .collect();
                    providers.sort_by(|a, b| a.name.cmp(&b.name));
                    let _ = reply_tx.send(providers);
                }

                RelayRequest::Restart => {
                    info!(
                        providers = state.providers.len(),
                        pending = state.pending.len(),
                        "Relay restarting, dropping all state"
                    );
                    state = RelayState::default();
                    metrics.restarts += 1;
                    metrics.registered_providers = 0;
                    metrics.pending_handoffs = 0;
                }

                RelayRequest::Shutdown => {
                    info!("Relay shutting down");
                    break;
                }
            }
        }

        info!("Relay stopped");
    }
}
