//! Error types for the coordination protocol

use std::time::Duration;
use thiserror::Error;

use crate::domain::ResourceName;

/// Errors that can occur while electing an owner or reaching it
///
/// Lock contention is not here: a busy lock is an expected outcome and is
/// reported as [`crate::lock::Acquire::Busy`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordError {
    #[error("No provider registered for {0}")]
    NoProvider(ResourceName),

    #[error("Handoff for {name} not answered within {timeout:?}")]
    HandoffTimeout { name: ResourceName, timeout: Duration },

    #[error("Connection to {0} was superseded by an ownership change")]
    ConnectionSuperseded(ResourceName),

    #[error("Resource {name} unavailable after {attempts} attempts")]
    ResourceUnavailable { name: ResourceName, attempts: u32 },

    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl CoordError {
    /// Check if the client should retry after this error
    ///
    /// Owner absence and broker hiccups are transient; supersession and an
    /// exhausted budget are final for the caller.
    pub fn is_transient(&self) -> bool {
        match self {
            CoordError::NoProvider(_) => true,
            CoordError::HandoffTimeout { .. } => true,
            CoordError::ChannelClosed(_) => true,
            CoordError::ConnectionSuperseded(_) => false,
            CoordError::ResourceUnavailable { .. } => false,
            CoordError::Lock(_) => false,
            CoordError::Engine(_) => false,
            CoordError::Io(_) => false,
        }
    }
}

impl From<std::io::Error> for CoordError {
    fn from(e: std::io::Error) -> Self {
        CoordError::Io(e.to_string())
    }
}

/// Result alias used across the crate
pub type CoordResult<T> = Result<T, CoordError>;
