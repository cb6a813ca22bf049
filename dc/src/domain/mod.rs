//! Domain types shared by every context
//!
//! Identifiers for resources and contexts. Both are opaque strings on the
//! wire; the newtypes only exist so the two cannot be mixed up.

mod id;

pub use id::{ContextId, ResourceName};
