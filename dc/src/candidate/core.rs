//! Main Owner Candidate task implementation

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::handle::CandidateHandle;
use super::messages::CandidateCommand;
use super::session::serve_session;
use super::state::{CandidateState, ServeSet};
use crate::bus::{BusFilter, BusSubscription, CoordinationBus, CoordinationMessage};
use crate::channel::ChannelHandoff;
use crate::config::CandidateConfig;
use crate::domain::{ContextId, ResourceName};
use crate::engine::{Engine, EngineHandle};
use crate::lock::{Acquire, LockGuard, NamedLock};
use crate::relay::{HandoffOffer, ProviderEndpoint, ProviderRequest, RelayHandle};

/// Everything held while owning one resource
///
/// Dropping it releases the lock and aborts the sessions, which closes every
/// client channel served from here.
struct Owned {
    guard: LockGuard,
    handle: EngineHandle,
    sessions: JoinSet<()>,
    push_tx: broadcast::Sender<Vec<u8>>,
}

/// A context willing to own resources
///
/// Competes for a resource whenever a client asks for it, and serves
/// channel handoffs for every resource it wins.
pub struct OwnerCandidate {
    id: ContextId,
    serves: ServeSet,
    eager: Vec<ResourceName>,
    endpoint_buffer: usize,
    bus: CoordinationBus,
    subscription: BusSubscription,
    relay: RelayHandle,
    lock: Arc<dyn NamedLock>,
    engine: Arc<dyn Engine>,
    tx: mpsc::Sender<CandidateCommand>,
    rx: mpsc::Receiver<CandidateCommand>,
    provider_tx: mpsc::Sender<ProviderRequest>,
    provider_rx: mpsc::Receiver<ProviderRequest>,
    states: HashMap<ResourceName, CandidateState>,
    owned: HashMap<ResourceName, Owned>,
}

impl OwnerCandidate {
    /// Create a candidate
    ///
    /// Subscribes to the bus immediately, so requests published after this
    /// returns are seen even before the task is spawned.
    pub fn new(
        config: &CandidateConfig,
        bus: CoordinationBus,
        relay: RelayHandle,
        lock: Arc<dyn NamedLock>,
        engine: Arc<dyn Engine>,
    ) -> Self {
        let id = ContextId::generate("candidate");
        debug!(%id, lock = lock.backend(), engine = engine.backend(), "OwnerCandidate::new: called");
        let (tx, rx) = mpsc::channel(config.channel_buffer.max(1));
        let (provider_tx, provider_rx) = mpsc::channel(config.provider_buffer.max(1));
        let subscription = bus.subscribe(BusFilter::All);

        Self {
            id,
            serves: ServeSet::from_names(config.serves.iter().cloned()),
            eager: config.eager.iter().cloned().map(ResourceName::from).collect(),
            endpoint_buffer: config.endpoint_buffer,
            bus,
            subscription,
            relay,
            lock,
            engine,
            tx,
            rx,
            provider_tx,
            provider_rx,
            states: HashMap::new(),
            owned: HashMap::new(),
        }
    }

    pub fn id(&self) -> &ContextId {
        &self.id
    }

    /// Spawn the candidate task and return its handle
    pub fn spawn(self) -> CandidateHandle {
        let id = self.id.clone();
        let tx = self.tx.clone();
        let task = tokio::spawn(self.run());
        CandidateHandle::new(id, tx, task)
    }

    /// Run the candidate task until shutdown (or abort)
    pub async fn run(mut self) {
        info!(id = %self.id, "OwnerCandidate started");

        for name in std::mem::take(&mut self.eager) {
            self.try_own(&name).await;
        }

        loop {
            tokio::select! {
                Some(msg) = self.subscription.recv() => self.handle_bus(msg).await,
                Some(req) = self.provider_rx.recv() => self.handle_provider(req).await,
                cmd = self.rx.recv() => match cmd {
                    Some(CandidateCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd).await,
                },
            }
        }

        let names: Vec<ResourceName> = self.owned.keys().cloned().collect();
        for name in names {
            self.release(&name).await;
        }
        info!(id = %self.id, "OwnerCandidate shutting down");
    }

    fn state(&self, name: &ResourceName) -> CandidateState {
        self.states.get(name).copied().unwrap_or_default()
    }

    fn set_state(&mut self, name: &ResourceName, state: CandidateState) {
        debug!(id = %self.id, %name, %state, "OwnerCandidate: state change");
        self.states.insert(name.clone(), state);
    }

    async fn handle_bus(&mut self, msg: CoordinationMessage) {
        match msg {
            CoordinationMessage::Requested { name } => {
                if !self.serves.serves(&name) {
                    return;
                }
                match self.state(&name) {
                    CandidateState::Owner => {
                        // Requests are never replayed and the relay may have
                        // restarted, so every request gets a fresh announcement
                        debug!(id = %self.id, %name, "Re-announcing owned resource");
                        self.announce(&name).await;
                    }
                    state if state.can_compete() => {
                        self.try_own(&name).await;
                    }
                    _ => {}
                }
            }
            CoordinationMessage::Available { name, owner } => {
                if owner != self.id && self.owned.contains_key(&name) {
                    warn!(id = %self.id, %name, other = %owner, "Another context announced a resource we own");
                }
            }
        }
    }

    /// Compete for `name`; on success open it, register, then announce
    async fn try_own(&mut self, name: &ResourceName) -> CandidateState {
        if self.owned.contains_key(name) {
            return CandidateState::Owner;
        }
        self.set_state(name, CandidateState::Acquiring);

        let guard = match self.lock.try_acquire(name, &self.id).await {
            Ok(Acquire::Held(guard)) => guard,
            Ok(Acquire::Busy) => {
                debug!(id = %self.id, %name, "Lock busy, staying idle");
                self.set_state(name, CandidateState::Idle);
                return CandidateState::Idle;
            }
            Err(e) => {
                warn!(id = %self.id, %name, error = %e, "Lock attempt failed");
                self.set_state(name, CandidateState::Idle);
                return CandidateState::Idle;
            }
        };

        let handle = match self.engine.open(name).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(id = %self.id, %name, error = %e, "Engine open failed, releasing lock");
                guard.release();
                self.set_state(name, CandidateState::Idle);
                return CandidateState::Idle;
            }
        };

        let (push_tx, _) = broadcast::channel(self.endpoint_buffer.max(1));
        self.owned.insert(
            name.clone(),
            Owned {
                guard,
                handle,
                sessions: JoinSet::new(),
                push_tx,
            },
        );
        self.set_state(name, CandidateState::Owner);
        info!(id = %self.id, %name, "Became owner");

        self.announce(name).await;
        CandidateState::Owner
    }

    /// Register with the relay, then publish Available
    ///
    /// The registration is queued at the relay before anyone can react to
    /// the announcement.
    async fn announce(&self, name: &ResourceName) {
        let provider = ProviderEndpoint {
            owner: self.id.clone(),
            tx: self.provider_tx.clone(),
        };
        if let Err(e) = self.relay.register_provider(name.clone(), provider).await {
            warn!(id = %self.id, %name, error = %e, "Failed to register with relay");
        }
        self.bus
            .publish(CoordinationMessage::available(name.clone(), self.id.clone()));
    }

    async fn handle_provider(&mut self, req: ProviderRequest) {
        match req {
            ProviderRequest::Handoff { request_id, name } => {
                let Some(owned) = self.owned.get_mut(&name) else {
                    debug!(id = %self.id, %request_id, %name, "Handoff for a resource we do not own");
                    if let Err(e) = self.relay.decline_handoff(request_id).await {
                        warn!(%request_id, error = %e, "Failed to decline handoff");
                    }
                    return;
                };

                while owned.sessions.try_join_next().is_some() {}

                let (client_end, owner_end) = ChannelHandoff::open(self.endpoint_buffer);
                owned.sessions.spawn(serve_session(
                    Arc::clone(&self.engine),
                    owned.handle.clone(),
                    owner_end,
                    owned.push_tx.subscribe(),
                ));
                debug!(id = %self.id, %request_id, %name, sessions = owned.sessions.len(), "Handing off channel");

                let offer = HandoffOffer {
                    name,
                    owner: self.id.clone(),
                    endpoint: client_end,
                };
                if let Err(e) = self.relay.reply_handoff(request_id, offer).await {
                    warn!(%request_id, error = %e, "Failed to reply to handoff");
                }
            }
            ProviderRequest::Revoked { name } => {
                // The lock decides ownership, not the relay
                info!(id = %self.id, %name, "Relay registration replaced by another context");
            }
        }
    }

    async fn handle_command(&mut self, cmd: CandidateCommand) {
        match cmd {
            CandidateCommand::Release { name, reply_tx } => {
                let released = self.release(&name).await;
                let _ = reply_tx.send(released);
            }
            CandidateCommand::Acquire { name, reply_tx } => {
                let state = if self.state(&name) == CandidateState::Owner {
                    CandidateState::Owner
                } else {
                    self.try_own(&name).await
                };
                let _ = reply_tx.send(state);
            }
            CandidateCommand::State { name, reply_tx } => {
                let _ = reply_tx.send(self.state(&name));
            }
            CandidateCommand::Owned { reply_tx } => {
                let mut names: Vec<ResourceName> = self.owned.keys().cloned().collect();
                names.sort();
                let _ = reply_tx.send(names);
            }
            CandidateCommand::Push { name, payload, reply_tx } => {
                let reached = self
                    .owned
                    .get(&name)
                    .map(|owned| owned.push_tx.send(payload).unwrap_or(0))
                    .unwrap_or(0);
                let _ = reply_tx.send(reached);
            }
            CandidateCommand::Shutdown => {}
        }
    }

    /// Give up `name` voluntarily
    async fn release(&mut self, name: &ResourceName) -> bool {
        let Some(owned) = self.owned.remove(name) else {
            debug!(id = %self.id, %name, "Release of a resource we do not own");
            return false;
        };
        let Owned {
            guard,
            handle,
            mut sessions,
            push_tx,
        } = owned;

        if let Err(e) = self.relay.unregister_provider(name.clone(), self.id.clone()).await {
            warn!(id = %self.id, %name, error = %e, "Failed to unregister from relay");
        }
        sessions.abort_all();
        drop(push_tx);
        if let Err(e) = self.engine.close(handle).await {
            warn!(id = %self.id, %name, error = %e, "Engine close failed");
        }
        guard.release();

        self.set_state(name, CandidateState::Released);
        info!(id = %self.id, %name, "Released ownership");
        true
    }
}
