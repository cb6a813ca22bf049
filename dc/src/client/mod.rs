//! Client Proxy - finds the owner of a resource and keeps a channel to it
//!
//! Applications ask for a resource by name and get a [`Connection`]. The
//! proxy publishes a request on the bus, waits for an owner to announce
//! itself, obtains a channel through the relay and routes operations over
//! it. When ownership moves it re-discovers and reconnects, reissuing
//! retryable operations and failing at-most-once ones.

mod connection;
mod handle;
mod messages;
mod proxy;
mod retry;

pub use connection::Connection;
pub use handle::ClientHandle;
pub use messages::{ClientCommand, ClientMetrics, ConnectionEvent, Delivery};
pub use proxy::ClientProxy;
pub use retry::RetryPolicy;
