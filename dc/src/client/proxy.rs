//! Main Client Proxy task implementation

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connection::Connection;
use super::handle::ClientHandle;
use super::messages::{ClientCommand, ClientMetrics, ConnectionEvent, Delivery};
use super::retry::RetryPolicy;
use crate::bus::{BusFilter, BusSubscription, CoordinationBus, CoordinationMessage};
use crate::channel::{Frame, FrameSender};
use crate::config::ClientConfig;
use crate::domain::{ContextId, ResourceName};
use crate::error::{CoordError, CoordResult};
use crate::relay::{HandoffOffer, RelayHandle};

/// Operation waiting for a channel or for its answer
struct PendingOp {
    op_id: u64,
    payload: Vec<u8>,
    delivery: Delivery,
    reply_tx: oneshot::Sender<CoordResult<Vec<u8>>>,
}

/// Progress towards a live channel for one resource
enum Link {
    /// Nothing in progress
    Idle,
    /// Requested published, waiting for an announcement
    Discovering,
    /// Waiting out a backoff before the next discovery round
    Backoff,
    /// Handoff requested from the relay for `owner`
    Handoff { owner: ContextId },
    /// Live channel to `owner`
    Connected {
        owner: ContextId,
        generation: u64,
        tx: FrameSender,
        reader: JoinHandle<()>,
    },
}

/// Everything the proxy tracks for one resource
struct Slot {
    link: Link,
    /// Bumped on every new attempt; timers and results from older ones are ignored
    epoch: u64,
    failures: u32,
    waiters: VecDeque<oneshot::Sender<CoordResult<Connection>>>,
    queued: VecDeque<PendingOp>,
    in_flight: BTreeMap<u64, PendingOp>,
    events: broadcast::Sender<ConnectionEvent>,
    owner_tx: watch::Sender<Option<ContextId>>,
}

impl Slot {
    fn new(event_buffer: usize) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        let (owner_tx, _) = watch::channel(None);
        Self {
            link: Link::Idle,
            epoch: 0,
            failures: 0,
            waiters: VecDeque::new(),
            queued: VecDeque::new(),
            in_flight: BTreeMap::new(),
            events,
            owner_tx,
        }
    }

    fn next_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    /// Drop callers that went away
    fn prune(&mut self) {
        self.waiters.retain(|w| !w.is_closed());
        self.queued.retain(|op| !op.reply_tx.is_closed());
    }

    fn has_demand(&self) -> bool {
        !self.waiters.is_empty() || !self.queued.is_empty()
    }

    fn is_connected(&self) -> bool {
        matches!(self.link, Link::Connected { .. })
    }

    fn connection(&self, name: &ResourceName, tx: &mpsc::Sender<ClientCommand>) -> Connection {
        Connection::new(name.clone(), tx.clone(), self.events.clone(), self.owner_tx.subscribe())
    }
}

/// Per-context proxy that finds owners and keeps channels to them
///
/// Callers see stable [`Connection`]s; the proxy re-discovers, re-handshakes
/// and re-routes operations underneath as ownership moves.
pub struct ClientProxy {
    id: ContextId,
    bus: CoordinationBus,
    subscription: BusSubscription,
    relay: RelayHandle,
    policy: RetryPolicy,
    handoff_timeout: Duration,
    event_buffer: usize,
    tx: mpsc::Sender<ClientCommand>,
    rx: mpsc::Receiver<ClientCommand>,
    slots: HashMap<ResourceName, Slot>,
    next_op_id: u64,
    next_generation: u64,
    metrics: ClientMetrics,
}

impl ClientProxy {
    /// Create a proxy; it listens to the bus from this point on
    pub fn new(config: &ClientConfig, bus: CoordinationBus, relay: RelayHandle) -> Self {
        let id = ContextId::generate("client");
        debug!(%id, "ClientProxy::new: called");
        let (tx, rx) = mpsc::channel(config.channel_buffer.max(1));
        let subscription = bus.subscribe(BusFilter::All);

        Self {
            id,
            bus,
            subscription,
            relay,
            policy: config.retry_policy(),
            handoff_timeout: config.handoff_timeout(),
            event_buffer: config.channel_buffer,
            tx,
            rx,
            slots: HashMap::new(),
            next_op_id: 1,
            next_generation: 1,
            metrics: ClientMetrics::default(),
        }
    }

    /// Get a handle for talking to this proxy
    pub fn handle(&self) -> ClientHandle {
        ClientHandle::new(self.id.clone(), self.tx.clone())
    }

    /// Create a proxy, spawn it, and return its handle
    pub fn spawn(
        config: &ClientConfig,
        bus: CoordinationBus,
        relay: RelayHandle,
    ) -> (ClientHandle, tokio::task::JoinHandle<()>) {
        let proxy = Self::new(config, bus, relay);
        let handle = proxy.handle();
        let task = tokio::spawn(proxy.run());
        (handle, task)
    }

    /// Run the proxy task until shutdown
    ///
    /// Handlers never await, so a slow owner or relay cannot stall the proxy.
    pub async fn run(mut self) {
        info!(id = %self.id, "ClientProxy started");

        loop {
            tokio::select! {
                Some(msg) = self.subscription.recv() => self.handle_bus(msg),
                cmd = self.rx.recv() => match cmd {
                    Some(ClientCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd),
                },
            }
        }

        for slot in self.slots.values() {
            if let Link::Connected { reader, .. } = &slot.link {
                reader.abort();
            }
        }
        info!(id = %self.id, "ClientProxy shutting down");
    }

    fn handle_bus(&mut self, msg: CoordinationMessage) {
        if let CoordinationMessage::Available { name, owner } = msg {
            self.on_available(name, owner);
        }
    }

    fn handle_command(&mut self, cmd: ClientCommand) {
        match cmd {
            ClientCommand::Request { name, reply_tx } => self.on_request(name, reply_tx),
            ClientCommand::Send {
                name,
                payload,
                delivery,
                reply_tx,
            } => self.on_send(name, payload, delivery, reply_tx),
            ClientCommand::Abandon { name } => self.on_abandon(&name),
            ClientCommand::GetMetrics { reply_tx } => {
                let _ = reply_tx.send(self.metrics.clone());
            }
            ClientCommand::HandoffResult { name, epoch, result } => self.on_handoff_result(name, epoch, result),
            ClientCommand::DiscoveryExpired { name, epoch } => {
                let expired = self
                    .slots
                    .get(&name)
                    .is_some_and(|s| s.epoch == epoch && matches!(s.link, Link::Discovering));
                if expired {
                    self.attempt_failed(&name, CoordError::NoProvider(name.clone()));
                }
            }
            ClientCommand::BackoffElapsed { name, epoch } => self.on_backoff_elapsed(&name, epoch),
            ClientCommand::Frame {
                name,
                generation,
                frame,
            } => self.on_frame(&name, generation, frame),
            ClientCommand::ChannelClosed { name, generation } => self.on_channel_closed(&name, generation),
            ClientCommand::Shutdown => {}
        }
    }

    fn slot(&mut self, name: &ResourceName) -> &mut Slot {
        let event_buffer = self.event_buffer;
        self.slots
            .entry(name.clone())
            .or_insert_with(|| Slot::new(event_buffer))
    }

    fn on_request(&mut self, name: ResourceName, reply_tx: oneshot::Sender<CoordResult<Connection>>) {
        debug!(id = %self.id, %name, "ClientProxy: resource requested");
        let tx = self.tx.clone();
        let slot = self.slot(&name);
        if slot.is_connected() {
            let _ = reply_tx.send(Ok(slot.connection(&name, &tx)));
            return;
        }
        slot.waiters.push_back(reply_tx);
        self.ensure_progress(&name);
    }

    fn on_send(
        &mut self,
        name: ResourceName,
        payload: Vec<u8>,
        delivery: Delivery,
        reply_tx: oneshot::Sender<CoordResult<Vec<u8>>>,
    ) {
        let op_id = self.next_op_id;
        self.next_op_id += 1;
        debug!(id = %self.id, %name, op_id, ?delivery, "ClientProxy: operation submitted");

        let slot = self.slot(&name);
        slot.queued.push_back(PendingOp {
            op_id,
            payload,
            delivery,
            reply_tx,
        });
        if slot.is_connected() {
            self.flush(&name);
        } else {
            self.ensure_progress(&name);
        }
    }

    fn on_abandon(&mut self, name: &ResourceName) {
        let Some(slot) = self.slots.get_mut(name) else {
            return;
        };
        debug!(id = %self.id, %name, waiters = slot.waiters.len(), queued = slot.queued.len(), "ClientProxy: abandoning");
        slot.waiters.clear();
        slot.queued.clear();
        if matches!(slot.link, Link::Discovering | Link::Backoff) {
            slot.next_epoch();
            slot.link = Link::Idle;
            slot.failures = 0;
        }
    }

    /// Start discovery if someone is waiting and nothing is in progress
    fn ensure_progress(&mut self, name: &ResourceName) {
        let idle_with_demand = self.slots.get_mut(name).is_some_and(|slot| {
            slot.prune();
            matches!(slot.link, Link::Idle) && slot.has_demand()
        });
        if idle_with_demand {
            self.begin_discovery(name);
        }
    }

    fn begin_discovery(&mut self, name: &ResourceName) {
        let Some(slot) = self.slots.get_mut(name) else {
            return;
        };
        let epoch = slot.next_epoch();
        slot.link = Link::Discovering;
        debug!(id = %self.id, %name, epoch, "ClientProxy: publishing request");

        self.bus.publish(CoordinationMessage::requested(name.clone()));
        self.schedule(
            self.handoff_timeout,
            ClientCommand::DiscoveryExpired {
                name: name.clone(),
                epoch,
            },
        );
    }

    fn begin_handoff(&mut self, name: &ResourceName, owner: ContextId) {
        let Some(slot) = self.slots.get_mut(name) else {
            return;
        };
        let epoch = slot.next_epoch();
        debug!(id = %self.id, %name, %owner, epoch, "ClientProxy: requesting handoff");
        slot.link = Link::Handoff { owner };

        let relay = self.relay.clone();
        let tx = self.tx.clone();
        let timeout = self.handoff_timeout;
        let name = name.clone();
        tokio::spawn(async move {
            let result = relay.request_handoff(name.clone(), timeout).await;
            let _ = tx.send(ClientCommand::HandoffResult { name, epoch, result }).await;
        });
    }

    /// Deliver `cmd` back to this proxy after `delay`
    fn schedule(&self, delay: Duration, cmd: ClientCommand) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(cmd).await;
        });
    }

    fn on_available(&mut self, name: ResourceName, owner: ContextId) {
        let Some(slot) = self.slots.get_mut(&name) else {
            return;
        };
        slot.prune();

        if !slot.is_connected() && !slot.has_demand() {
            if !matches!(slot.link, Link::Idle) {
                // Every caller went away; stop without touching the relay
                debug!(id = %self.id, %name, "ClientProxy: no demand left, going idle");
                slot.next_epoch();
                slot.link = Link::Idle;
                slot.failures = 0;
            }
            return;
        }

        let supersede = match &slot.link {
            Link::Connected { owner: current, .. } if *current == owner => return,
            Link::Connected { .. } => true,
            Link::Handoff { owner: pending } if *pending == owner => return,
            _ => false,
        };

        debug!(id = %self.id, %name, %owner, "ClientProxy: owner announced");
        if supersede {
            self.supersede(&name, Some(owner.clone()));
        }
        self.begin_handoff(&name, owner);
    }

    fn on_handoff_result(&mut self, name: ResourceName, epoch: u64, result: CoordResult<HandoffOffer>) {
        let current = self
            .slots
            .get(&name)
            .is_some_and(|s| s.epoch == epoch && matches!(s.link, Link::Handoff { .. }));
        if !current {
            // A late offer is dropped here, which closes it for the owner too
            debug!(id = %self.id, %name, epoch, "ClientProxy: ignoring stale handoff result");
            return;
        }

        match result {
            Ok(offer) => self.install(&name, offer),
            Err(e) => self.attempt_failed(&name, e),
        }
    }

    /// Adopt a handed-off channel, flush queued operations, then resolve waiters
    fn install(&mut self, name: &ResourceName, offer: HandoffOffer) {
        let generation = self.next_generation;
        self.next_generation += 1;

        let HandoffOffer { owner, endpoint, .. } = offer;
        let (frame_tx, mut frame_rx) = endpoint.split();

        let cmd_tx = self.tx.clone();
        let reader_name = name.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                let cmd = ClientCommand::Frame {
                    name: reader_name.clone(),
                    generation,
                    frame,
                };
                if cmd_tx.send(cmd).await.is_err() {
                    return;
                }
            }
            let _ = cmd_tx
                .send(ClientCommand::ChannelClosed {
                    name: reader_name,
                    generation,
                })
                .await;
        });

        let Some(slot) = self.slots.get_mut(name) else {
            reader.abort();
            return;
        };
        info!(id = %self.id, %name, %owner, generation, "ClientProxy: connected");
        slot.owner_tx.send_replace(Some(owner.clone()));
        slot.link = Link::Connected {
            owner,
            generation,
            tx: frame_tx,
            reader,
        };
        slot.failures = 0;
        self.metrics.handoffs_completed += 1;

        self.flush(name);

        let tx = self.tx.clone();
        let Some(slot) = self.slots.get_mut(name) else {
            return;
        };
        if !slot.is_connected() {
            // Lost again while flushing; waiters stay queued for the next round
            return;
        }
        let connection = slot.connection(name, &tx);
        for waiter in slot.waiters.drain(..) {
            let _ = waiter.send(Ok(connection.clone()));
        }
    }

    /// Send queued operations, oldest first, until the channel is full
    fn flush(&mut self, name: &ResourceName) {
        let Some(slot) = self.slots.get_mut(name) else {
            return;
        };
        let Link::Connected { tx, .. } = &slot.link else {
            return;
        };
        let tx = tx.clone();

        let mut lost = false;
        while let Some(op) = slot.queued.pop_front() {
            if op.reply_tx.is_closed() {
                continue;
            }
            let frame = Frame::Request {
                op_id: op.op_id,
                payload: op.payload.clone(),
            };
            match tx.try_send(frame) {
                Ok(()) => {
                    self.metrics.ops_sent += 1;
                    slot.in_flight.insert(op.op_id, op);
                }
                Err(TrySendError::Full(_)) => {
                    // Retried when the next frame arrives
                    slot.queued.push_front(op);
                    break;
                }
                Err(TrySendError::Closed(_)) => {
                    // Never reached an owner, so always safe to resend
                    slot.queued.push_front(op);
                    lost = true;
                    break;
                }
            }
        }

        if lost {
            self.supersede(name, None);
            self.ensure_progress(name);
        }
    }

    /// Drop the live channel and sort out the operations still in flight
    ///
    /// Retryable operations go back to the head of the queue in their
    /// original order; at-most-once operations fail.
    fn supersede(&mut self, name: &ResourceName, next: Option<ContextId>) {
        let Some(slot) = self.slots.get_mut(name) else {
            return;
        };
        let Link::Connected { owner, reader, .. } = std::mem::replace(&mut slot.link, Link::Idle) else {
            return;
        };
        reader.abort();
        info!(id = %self.id, %name, old = %owner, new = ?next, in_flight = slot.in_flight.len(), "ClientProxy: channel superseded");

        let mut requeue = Vec::new();
        for (_, op) in std::mem::take(&mut slot.in_flight) {
            if op.reply_tx.is_closed() {
                continue;
            }
            match op.delivery {
                Delivery::Retryable => requeue.push(op),
                Delivery::AtMostOnce => {
                    self.metrics.ops_superseded += 1;
                    let _ = op.reply_tx.send(Err(CoordError::ConnectionSuperseded(name.clone())));
                }
            }
        }
        self.metrics.ops_requeued += requeue.len() as u64;
        for op in requeue.into_iter().rev() {
            slot.queued.push_front(op);
        }

        slot.owner_tx.send_replace(None);
        let _ = slot.events.send(ConnectionEvent::Superseded(next));
        self.metrics.supersessions += 1;
    }

    fn on_frame(&mut self, name: &ResourceName, generation: u64, frame: Frame) {
        let Some(slot) = self.slots.get_mut(name) else {
            return;
        };
        if !matches!(&slot.link, Link::Connected { generation: g, .. } if *g == generation) {
            return;
        }

        match frame {
            Frame::Response { op_id, payload } => {
                if let Some(op) = slot.in_flight.remove(&op_id) {
                    let _ = op.reply_tx.send(Ok(payload));
                }
            }
            Frame::Failed { op_id, message } => {
                if let Some(op) = slot.in_flight.remove(&op_id) {
                    let _ = op.reply_tx.send(Err(CoordError::Engine(message)));
                }
            }
            Frame::Push { payload } => {
                self.metrics.messages_received += 1;
                let _ = slot.events.send(ConnectionEvent::Message(payload));
            }
            Frame::Request { op_id, .. } => {
                warn!(id = %self.id, %name, op_id, "ClientProxy: owner sent a request frame");
            }
        }

        if !slot.queued.is_empty() {
            self.flush(name);
        }
    }

    fn on_channel_closed(&mut self, name: &ResourceName, generation: u64) {
        let current = self
            .slots
            .get(name)
            .is_some_and(|s| matches!(&s.link, Link::Connected { generation: g, .. } if *g == generation));
        if !current {
            return;
        }
        warn!(id = %self.id, %name, "ClientProxy: owner closed the channel");
        self.supersede(name, None);
        self.ensure_progress(name);
    }

    fn on_backoff_elapsed(&mut self, name: &ResourceName, epoch: u64) {
        let Some(slot) = self.slots.get_mut(name) else {
            return;
        };
        if slot.epoch != epoch || !matches!(slot.link, Link::Backoff) {
            return;
        }
        slot.link = Link::Idle;
        self.ensure_progress(name);
    }

    /// Count a failed discovery or handoff and decide what comes next
    fn attempt_failed(&mut self, name: &ResourceName, error: CoordError) {
        let Some(slot) = self.slots.get_mut(name) else {
            return;
        };
        slot.prune();
        slot.failures += 1;
        self.metrics.attempts_failed += 1;
        let failures = slot.failures;
        warn!(id = %self.id, %name, failures, error = %error, "ClientProxy: connection attempt failed");

        if self.policy.exhausted(failures) {
            let err = CoordError::ResourceUnavailable {
                name: name.clone(),
                attempts: failures,
            };
            for waiter in slot.waiters.drain(..) {
                let _ = waiter.send(Err(err.clone()));
            }
            for op in slot.queued.drain(..) {
                let _ = op.reply_tx.send(Err(err.clone()));
            }
            slot.next_epoch();
            slot.link = Link::Idle;
            slot.failures = 0;
            self.metrics.unavailable_surfaced += 1;
            return;
        }

        if !slot.has_demand() {
            slot.link = Link::Idle;
            slot.failures = 0;
            return;
        }

        let epoch = slot.next_epoch();
        slot.link = Link::Backoff;
        let delay = self.policy.delay_for(failures);
        debug!(id = %self.id, %name, ?delay, "ClientProxy: backing off");
        self.schedule(
            delay,
            ClientCommand::BackoffElapsed {
                name: name.clone(),
                epoch,
            },
        );
    }
}
