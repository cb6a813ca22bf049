//! Property tests for single ownership
//!
//! Candidates arrive, leave, release and get requested in arbitrary order.
//! At every step at most one of them may consider itself the owner, and that
//! one must be the lock holder.

use std::sync::Arc;
use std::time::Duration;

use dbcoord::bus::{CoordinationBus, CoordinationMessage};
use dbcoord::candidate::{CandidateHandle, CandidateState, OwnerCandidate};
use dbcoord::config::{CandidateConfig, RelayConfig};
use dbcoord::domain::ResourceName;
use dbcoord::engine::EchoEngine;
use dbcoord::lock::LocalLocks;
use dbcoord::relay::Relay;
use proptest::prelude::*;

const NAME: &str = "db1";

#[derive(Debug, Clone)]
enum Action {
    Join,
    Terminate(usize),
    Release(usize),
    Acquire(usize),
    Request,
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        2 => Just(Action::Join),
        1 => (0usize..8).prop_map(Action::Terminate),
        1 => (0usize..8).prop_map(Action::Release),
        1 => (0usize..8).prop_map(Action::Acquire),
        2 => Just(Action::Request),
    ]
}

async fn run_actions(actions: Vec<Action>) -> Result<(), TestCaseError> {
    let bus = CoordinationBus::new(256);
    let (relay, _task) = Relay::spawn(&RelayConfig::default());
    let locks = LocalLocks::new();
    let engine = EchoEngine::new();
    let mut candidates: Vec<CandidateHandle> = Vec::new();

    for action in actions {
        match action {
            Action::Join => {
                let candidate = OwnerCandidate::new(
                    &CandidateConfig::default(),
                    bus.clone(),
                    relay.clone(),
                    Arc::new(locks.clone()),
                    Arc::new(engine.clone()),
                )
                .spawn();
                candidates.push(candidate);
            }
            Action::Terminate(i) => {
                if !candidates.is_empty() {
                    let candidate = candidates.remove(i % candidates.len());
                    candidate.terminate().await;
                }
            }
            Action::Release(i) => {
                if !candidates.is_empty() {
                    let _ = candidates[i % candidates.len()].release(NAME).await;
                }
            }
            Action::Acquire(i) => {
                if !candidates.is_empty() {
                    let _ = candidates[i % candidates.len()].acquire(NAME).await;
                }
            }
            Action::Request => {
                bus.publish(CoordinationMessage::requested(NAME));
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }

        let mut owners = Vec::new();
        for candidate in &candidates {
            if let Ok(CandidateState::Owner) = candidate.state(NAME).await {
                owners.push(candidate.id().clone());
            }
        }
        prop_assert!(owners.len() <= 1, "multiple owners: {:?}", owners);
        if let Some(owner) = owners.first() {
            let holder = locks.holder(&ResourceName::from(NAME));
            prop_assert_eq!(holder.as_ref(), Some(owner));
        }
    }

    for candidate in &candidates {
        candidate.terminate().await;
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_at_most_one_owner(actions in proptest::collection::vec(action(), 1..24)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(run_actions(actions))?;
    }
}
