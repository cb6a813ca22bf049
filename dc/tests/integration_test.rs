//! Integration tests for dbcoord
//!
//! These tests wire real buses, relays, candidates and client proxies
//! together and check the end-to-end election and failover behavior.

use std::sync::Arc;
use std::time::Duration;

use dbcoord::bus::{BusFilter, BusSubscription, CoordinationBus, CoordinationMessage};
use dbcoord::candidate::{CandidateHandle, CandidateState, OwnerCandidate};
use dbcoord::client::{ClientHandle, ClientProxy, Delivery};
use dbcoord::config::{CandidateConfig, ClientConfig, Config, RelayConfig};
use dbcoord::domain::{ContextId, ResourceName};
use dbcoord::engine::{EchoEngine, Engine, SqliteEngine};
use dbcoord::error::CoordError;
use dbcoord::lock::{FileLocks, LocalLocks, NamedLock};
use dbcoord::relay::{Relay, RelayHandle};
use tempfile::TempDir;

struct Cluster {
    bus: CoordinationBus,
    relay: RelayHandle,
    locks: Arc<dyn NamedLock>,
    engine: Arc<dyn Engine>,
}

impl Cluster {
    fn new() -> Self {
        Self::with(Arc::new(LocalLocks::new()), Arc::new(EchoEngine::new()))
    }

    fn with(locks: Arc<dyn NamedLock>, engine: Arc<dyn Engine>) -> Self {
        let (relay, _task) = Relay::spawn(&RelayConfig::default());
        Self {
            bus: CoordinationBus::new(256),
            relay,
            locks,
            engine,
        }
    }

    fn candidate(&self) -> CandidateHandle {
        OwnerCandidate::new(
            &CandidateConfig::default(),
            self.bus.clone(),
            self.relay.clone(),
            Arc::clone(&self.locks),
            Arc::clone(&self.engine),
        )
        .spawn()
    }

    fn client(&self) -> ClientHandle {
        let config = ClientConfig {
            max_attempts: 10,
            initial_backoff_ms: 10,
            max_backoff_ms: 50,
            handoff_timeout_ms: 200,
            ..Default::default()
        };
        ClientProxy::spawn(&config, self.bus.clone(), self.relay.clone()).0
    }
}

async fn owners(candidates: &[&CandidateHandle], name: &str) -> Vec<ContextId> {
    let mut owners = Vec::new();
    for candidate in candidates {
        if let Ok(CandidateState::Owner) = candidate.state(name).await {
            owners.push(candidate.id().clone());
        }
    }
    owners
}

async fn next_request(sub: &mut BusSubscription) {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("timed out waiting for request")
            .expect("bus closed");
        if let CoordinationMessage::Requested { .. } = msg {
            return;
        }
    }
}

// =============================================================================
// Election Tests
// =============================================================================

#[tokio::test]
async fn test_two_candidates_single_owner_via_client() {
    let cluster = Cluster::new();
    let a = cluster.candidate();
    let b = cluster.candidate();
    let client = cluster.client();

    let connection = client.request_resource("db1").await.expect("Failed to connect");
    let owner = connection.owner().expect("Connected without an owner");

    let owners = owners(&[&a, &b], "db1").await;
    assert_eq!(owners, vec![owner.clone()]);

    let providers = cluster.relay.providers().await.unwrap();
    assert_eq!(providers.len(), 1);
    assert_eq!(providers[0].owner, owner);
}

#[tokio::test]
async fn test_file_locks_elect_single_owner_across_lock_instances() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let cluster = Cluster::new();

    // Separate lock instances stand in for separate processes
    let spawn = |dir: &std::path::Path| {
        OwnerCandidate::new(
            &CandidateConfig::default(),
            cluster.bus.clone(),
            cluster.relay.clone(),
            Arc::new(FileLocks::new(dir)),
            Arc::clone(&cluster.engine),
        )
        .spawn()
    };
    let a = spawn(temp_dir.path());
    let b = spawn(temp_dir.path());

    let client = cluster.client();
    let connection = client.request_resource("shared.db").await.unwrap();
    assert_eq!(connection.send(b"ping".to_vec()).await.unwrap(), b"ping");

    let owners = owners(&[&a, &b], "shared.db").await;
    assert_eq!(owners.len(), 1);
    assert!(temp_dir.path().join("shared.db.lock").exists());
}

// =============================================================================
// Discovery Tests
// =============================================================================

#[tokio::test]
async fn test_pending_request_resolves_once_candidate_owns() {
    let cluster = Cluster::new();
    let mut sub = cluster.bus.subscribe(BusFilter::All);

    let client = cluster.client();
    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.request_resource("db1").await })
    };
    next_request(&mut sub).await;

    // The request was published before `a` existed, so nothing is replayed
    // to it; it owns only because it is told to
    let a = cluster.candidate();
    assert_eq!(a.acquire("db1").await.unwrap(), CandidateState::Owner);

    let connection = pending.await.unwrap().expect("Pending request failed");
    assert_eq!(connection.owner().as_ref(), Some(a.id()));
    assert_eq!(connection.send(b"hello".to_vec()).await.unwrap(), b"hello");
}

#[tokio::test]
async fn test_pending_callers_and_ops_resolve_in_order() {
    let engine = EchoEngine::new();
    let cluster = Cluster::with(Arc::new(LocalLocks::new()), Arc::new(engine.clone()));
    let client = cluster.client();
    let mut sub = cluster.bus.subscribe(BusFilter::All);

    let first = {
        let client = client.clone();
        tokio::spawn(async move { client.request_resource("db1").await })
    };
    next_request(&mut sub).await;
    let second = {
        let client = client.clone();
        tokio::spawn(async move { client.request_resource("db1").await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let candidate = cluster.candidate();
    candidate.acquire("db1").await.unwrap();

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert_eq!(first.owner(), second.owner());

    for i in 0..5u8 {
        first.send(vec![i]).await.unwrap();
    }
    let expected: Vec<Vec<u8>> = (0..5u8).map(|i| vec![i]).collect();
    assert_eq!(engine.executed(&ResourceName::from("db1")), expected);
}

// =============================================================================
// Failover Tests
// =============================================================================

#[tokio::test]
async fn test_owner_terminates_and_resend_reaches_new_owner() {
    let engine = EchoEngine::new();
    let cluster = Cluster::with(Arc::new(LocalLocks::new()), Arc::new(engine.clone()));
    let a = cluster.candidate();
    assert_eq!(a.acquire("db1").await.unwrap(), CandidateState::Owner);

    let client = cluster.client();
    let connection = client.request_resource("db1").await.unwrap();
    assert_eq!(connection.owner().as_ref(), Some(a.id()));

    let b = cluster.candidate();
    a.terminate().await;

    let reply = connection.send(b"after failover".to_vec()).await.unwrap();
    assert_eq!(reply, b"after failover");
    assert_eq!(connection.owner().as_ref(), Some(b.id()));
    assert_eq!(b.state("db1").await.unwrap(), CandidateState::Owner);
}

#[tokio::test]
async fn test_owner_release_lets_next_request_elect_again() {
    let cluster = Cluster::new();
    let a = cluster.candidate();
    let b = cluster.candidate();
    a.acquire("db1").await.unwrap();

    let client = cluster.client();
    let connection = client.request_resource("db1").await.unwrap();

    let (superseded_tx, mut superseded_rx) = tokio::sync::mpsc::unbounded_channel();
    connection.on_superseded(move |owner| {
        let _ = superseded_tx.send(owner);
    });

    assert!(a.release("db1").await.unwrap());
    assert_eq!(
        tokio::time::timeout(Duration::from_secs(5), superseded_rx.recv())
            .await
            .unwrap(),
        Some(None)
    );

    assert_eq!(connection.send(b"x".to_vec()).await.unwrap(), b"x");
    let owners = owners(&[&a, &b], "db1").await;
    assert_eq!(owners.len(), 1);
    assert_eq!(connection.owner(), Some(owners[0].clone()));
}

#[tokio::test]
async fn test_at_most_once_op_is_not_replayed_on_new_owner() {
    let engine = EchoEngine::new();
    let cluster = Cluster::with(Arc::new(LocalLocks::new()), Arc::new(engine.clone()));
    let a = cluster.candidate();
    a.acquire("db1").await.unwrap();

    let client = cluster.client();
    let connection = client.request_resource("db1").await.unwrap();
    connection
        .send_with(b"insert".to_vec(), Delivery::AtMostOnce)
        .await
        .unwrap();

    let _b = cluster.candidate();
    a.terminate().await;
    connection.send(b"select".to_vec()).await.unwrap();

    // The completed insert ran exactly once across both owners
    let executed = engine.executed(&ResourceName::from("db1"));
    assert_eq!(executed.iter().filter(|p| p.as_slice() == b"insert").count(), 1);
}

#[tokio::test]
async fn test_no_candidate_surfaces_resource_unavailable() {
    let cluster = Cluster::new();
    let config = ClientConfig {
        max_attempts: 3,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        handoff_timeout_ms: 30,
        ..Default::default()
    };
    let (client, _task) = ClientProxy::spawn(&config, cluster.bus.clone(), cluster.relay.clone());

    let err = client.request_resource("db1").await.unwrap_err();
    assert!(matches!(err, CoordError::ResourceUnavailable { attempts: 3, .. }));
    assert!(!err.is_transient());
}

// =============================================================================
// Relay Restart Tests
// =============================================================================

#[tokio::test]
async fn test_relay_restart_recovers_through_reannouncement() {
    let cluster = Cluster::new();
    let a = cluster.candidate();
    a.acquire("db1").await.unwrap();

    let first = cluster.client();
    let connection = first.request_resource("db1").await.unwrap();

    cluster.relay.restart().await.unwrap();
    let err = cluster
        .relay
        .request_handoff(ResourceName::from("db1"), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert_eq!(err, CoordError::NoProvider(ResourceName::from("db1")));

    // Established channels do not go through the relay
    assert_eq!(connection.send(b"still here".to_vec()).await.unwrap(), b"still here");

    // A newcomer's request makes the owner register again
    let second = cluster.client();
    let late = second.request_resource("db1").await.unwrap();
    assert_eq!(late.owner().as_ref(), Some(a.id()));

    let metrics = cluster.relay.metrics().await.unwrap();
    assert_eq!(metrics.restarts, 1);
    assert_eq!(metrics.registered_providers, 1);
}

// =============================================================================
// Engine Tests
// =============================================================================

#[tokio::test]
async fn test_sqlite_owner_serves_sql() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let cluster = Cluster::with(
        Arc::new(LocalLocks::new()),
        Arc::new(SqliteEngine::on_disk(temp_dir.path())),
    );
    let _a = cluster.candidate();
    let client = cluster.client();
    let connection = client.request_resource("notes.db").await.unwrap();

    connection
        .send("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)")
        .await
        .unwrap();
    let inserted = connection
        .send_with("INSERT INTO notes (body) VALUES ('hi')", Delivery::AtMostOnce)
        .await
        .unwrap();
    let inserted: serde_json::Value = serde_json::from_slice(&inserted).unwrap();
    assert_eq!(inserted["changes"], 1);

    let rows = connection.send("SELECT body FROM notes").await.unwrap();
    let rows: serde_json::Value = serde_json::from_slice(&rows).unwrap();
    assert_eq!(rows[0]["body"], "hi");

    let err = connection.send("SELEKT nothing").await.unwrap_err();
    assert!(matches!(err, CoordError::Engine(_)));

// =============================================================================
// Config Edge Tests
// =============================================================================

#[tokio::test]
async fn test_zero_buffers_in_config_still_connect() {
    let yaml = r#"
bus:
  capacity: 0
relay:
  channel-buffer: 0
client:
  channel-buffer: 0
  initial-backoff-ms: 10
  handoff-timeout-ms: 200
candidate:
  endpoint-buffer: 0
  provider-buffer: 0
  channel-buffer: 0
"#;
    let config: Config = serde_yaml::from_str(yaml).expect("Failed to parse config");

    let bus = CoordinationBus::new(config.bus.capacity);
    let (relay, _task) = Relay::spawn(&config.relay);
    let candidate = OwnerCandidate::new(
        &config.candidate,
        bus.clone(),
        relay.clone(),
        Arc::new(LocalLocks::new()),
        Arc::new(EchoEngine::new()),
    )
    .spawn();
    let (client, _task) = ClientProxy::spawn(&config.client, bus, relay);

    let connection = client.request_resource("db1").await.unwrap();
    assert_eq!(connection.owner().as_ref(), Some(candidate.id()));
    assert_eq!(connection.send(b"tiny".to_vec()).await.unwrap(), b"tiny");
}
}
