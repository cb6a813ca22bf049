//! Coordination Bus for resource discovery
//!
//! Carries two announcements between contexts:
//! - **Requested:** a client needs an owner for a resource
//! - **Available:** a candidate now owns a resource
//!
//! Delivery is best-effort and never replayed. Owners compensate by
//! re-announcing whenever they see a new request for their resource.

#[allow(clippy::module_inception)]
mod bus;
mod messages;

pub use bus::{BusFilter, BusSubscription, CoordinationBus, DEFAULT_BUS_CAPACITY};
pub use messages::CoordinationMessage;
