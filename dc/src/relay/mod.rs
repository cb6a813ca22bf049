//! Relay broker between clients and owners
//!
//! The Relay keeps one registration per resource and brokers channel
//! handoffs with two primitives:
//! - **Register:** an owner publishes where handoff requests should go
//! - **Handoff:** a client asks for a channel; the request is forwarded to
//!   the registered provider and its single reply is routed back
//!
//! State lives in memory only. A restarted relay starts empty and is
//! repopulated by owners re-registering.

mod core;
mod handle;
mod messages;

pub use core::Relay;
pub use handle::RelayHandle;
pub use messages::{HandoffOffer, ProviderEndpoint, ProviderInfo, ProviderRequest, RelayMetrics, RelayRequest};
