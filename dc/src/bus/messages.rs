//! Coordination message schema
//!
//! Small discovery announcements only; data never travels on the bus.
//! Wire form: `{"tag": "requested"|"available", "name": ..., "owner"?: ...}`

use serde::{Deserialize, Serialize};

use crate::domain::{ContextId, ResourceName};

/// Announcement broadcast on the coordination bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tag")]
pub enum CoordinationMessage {
    /// A client needs an owner for `name`
    #[serde(rename = "requested")]
    Requested { name: ResourceName },

    /// `owner` now owns `name`
    #[serde(rename = "available")]
    Available { name: ResourceName, owner: ContextId },
}

impl CoordinationMessage {
    pub fn requested(name: impl Into<ResourceName>) -> Self {
        CoordinationMessage::Requested { name: name.into() }
    }

    pub fn available(name: impl Into<ResourceName>, owner: ContextId) -> Self {
        CoordinationMessage::Available {
            name: name.into(),
            owner,
        }
    }

    /// Resource this message is about
    pub fn name(&self) -> &ResourceName {
        match self {
            CoordinationMessage::Requested { name } => name,
            CoordinationMessage::Available { name, .. } => name,
        }
    }

    /// Short tag for logging
    pub fn tag(&self) -> &'static str {
        match self {
            CoordinationMessage::Requested { .. } => "requested",
            CoordinationMessage::Available { .. } => "available",
        }
    }
}
