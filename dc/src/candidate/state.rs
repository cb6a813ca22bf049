//! Per-resource election state

use std::collections::HashSet;

use serde::Serialize;

use crate::domain::ResourceName;

/// Where a candidate stands for one resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateState {
    /// Not holding the lock; will compete on the next request
    #[default]
    Idle,
    /// Lock attempt in progress
    Acquiring,
    /// Holds the lock, the engine handle and the relay registration
    Owner,
    /// Gave ownership up; behaves like Idle on the next request
    Released,
}

impl std::fmt::Display for CandidateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CandidateState::Idle => "idle",
            CandidateState::Acquiring => "acquiring",
            CandidateState::Owner => "owner",
            CandidateState::Released => "released",
        };
        write!(f, "{}", s)
    }
}

impl CandidateState {
    /// Whether a request for the resource should start a lock attempt
    pub fn can_compete(&self) -> bool {
        matches!(self, CandidateState::Idle | CandidateState::Released)
    }
}

/// Resources a candidate is willing to own
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServeSet {
    /// Any requested resource
    Any,
    /// Only the listed resources
    Only(HashSet<ResourceName>),
}

impl ServeSet {
    /// Build from configured names; an empty list means any resource
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ResourceName>,
    {
        let names: HashSet<ResourceName> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            ServeSet::Any
        } else {
            ServeSet::Only(names)
        }
    }

    pub fn serves(&self, name: &ResourceName) -> bool {
        match self {
            ServeSet::Any => true,
            ServeSet::Only(names) => names.contains(name),
        }
    }
}
