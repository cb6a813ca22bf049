//! CandidateHandle - control interface to an Owner Candidate task

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use super::messages::CandidateCommand;
use super::state::CandidateState;
use crate::domain::{ContextId, ResourceName};
use crate::error::{CoordError, CoordResult};

/// Handle for controlling an Owner Candidate
///
/// Cloneable. Every clone can stop the candidate, gracefully with
/// [`CandidateHandle::shutdown`] or abruptly with [`CandidateHandle::terminate`].
#[derive(Clone)]
pub struct CandidateHandle {
    id: ContextId,
    tx: mpsc::Sender<CandidateCommand>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl CandidateHandle {
    pub(crate) fn new(id: ContextId, tx: mpsc::Sender<CandidateCommand>, task: JoinHandle<()>) -> Self {
        Self {
            id,
            tx,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Context id the candidate announces itself with
    pub fn id(&self) -> &ContextId {
        &self.id
    }

    async fn send(&self, cmd: CandidateCommand) -> CoordResult<()> {
        self.tx.send(cmd).await.map_err(|_| CoordError::ChannelClosed("candidate"))
    }

    async fn ask<T>(&self, cmd: CandidateCommand, reply_rx: oneshot::Receiver<T>) -> CoordResult<T> {
        self.send(cmd).await?;
        reply_rx.await.map_err(|_| CoordError::ChannelClosed("candidate"))
    }

    /// Give up ownership of `name`
    ///
    /// Returns false when the candidate did not own it.
    pub async fn release(&self, name: impl Into<ResourceName>) -> CoordResult<bool> {
        let name = name.into();
        debug!(id = %self.id, %name, "CandidateHandle::release: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.ask(CandidateCommand::Release { name, reply_tx }, reply_rx).await
    }

    /// Compete for `name` right away instead of waiting for a request
    pub async fn acquire(&self, name: impl Into<ResourceName>) -> CoordResult<CandidateState> {
        let name = name.into();
        debug!(id = %self.id, %name, "CandidateHandle::acquire: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.ask(CandidateCommand::Acquire { name, reply_tx }, reply_rx).await
    }

    pub async fn state(&self, name: impl Into<ResourceName>) -> CoordResult<CandidateState> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.ask(
            CandidateCommand::State {
                name: name.into(),
                reply_tx,
            },
            reply_rx,
        )
        .await
    }

    /// Resources currently owned, sorted
    pub async fn owned(&self) -> CoordResult<Vec<ResourceName>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.ask(CandidateCommand::Owned { reply_tx }, reply_rx).await
    }

    /// Push `payload` to every client connected to `name`
    pub async fn push(&self, name: impl Into<ResourceName>, payload: Vec<u8>) -> CoordResult<usize> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.ask(
            CandidateCommand::Push {
                name: name.into(),
                payload,
                reply_tx,
            },
            reply_rx,
        )
        .await
    }

    /// Release everything, deregister, and stop
    pub async fn shutdown(&self) -> CoordResult<()> {
        debug!(id = %self.id, "CandidateHandle::shutdown: called");
        self.send(CandidateCommand::Shutdown).await?;
        if let Some(task) = self.take_task() {
            let _ = task.await;
        }
        Ok(())
    }

    /// Kill the candidate without any cleanup protocol
    ///
    /// Its lock guards, engine sessions and provider channel are dropped with
    /// the task. The relay entry stays behind until a forward to it fails.
    pub async fn terminate(&self) {
        debug!(id = %self.id, "CandidateHandle::terminate: called");
        if let Some(task) = self.take_task() {
            task.abort();
            let _ = task.await;
        }
    }

    fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task.lock().ok().and_then(|mut task| task.take())
    }
}
