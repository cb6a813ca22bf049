//! Commands accepted by an Owner Candidate task

use tokio::sync::oneshot;

use super::state::CandidateState;
use crate::domain::ResourceName;

/// Requests sent to the candidate by its handle
#[derive(Debug)]
pub enum CandidateCommand {
    /// Give up ownership of `name`; replies whether it was owned
    Release {
        name: ResourceName,
        reply_tx: oneshot::Sender<bool>,
    },

    /// Try to own `name` now, as if it had been requested
    Acquire {
        name: ResourceName,
        reply_tx: oneshot::Sender<CandidateState>,
    },

    /// Query the state for one resource
    State {
        name: ResourceName,
        reply_tx: oneshot::Sender<CandidateState>,
    },

    /// List owned resources, sorted
    Owned {
        reply_tx: oneshot::Sender<Vec<ResourceName>>,
    },

    /// Push a payload to every client connected to `name`; replies with the
    /// number of live sessions reached
    Push {
        name: ResourceName,
        payload: Vec<u8>,
        reply_tx: oneshot::Sender<usize>,
    },

    /// Release everything and stop
    Shutdown,
}
