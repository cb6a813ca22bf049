//! dbcoord - ownership election and port relay for a shared embedded database
//!
//! Several isolated contexts want to use the same named database, but only
//! one of them may open it. dbcoord elects that owner and connects everyone
//! else to it through handed-off message channels, recovering when the owner
//! goes away.
//!
//! # Core Concepts
//!
//! - **Contexts share nothing**: every component is a tokio task reached
//!   through channels
//! - **The lock decides**: a named lock is the only mutual exclusion, and it
//!   is released when its holder goes away
//! - **Nothing is durable**: the bus never replays and the relay forgets on
//!   restart; owners re-announce and re-register on every request instead
//!
//! # Modules
//!
//! - [`bus`] - Coordination Bus for discovery announcements
//! - [`relay`] - Relay broker that forwards channel handoffs to owners
//! - [`candidate`] - Owner Candidate election state machine
//! - [`client`] - Client Proxy and application-facing connections
//! - [`channel`] - Channel Handoff endpoints and data-plane frames
//! - [`lock`] - Named lock trait and backends
//! - [`engine`] - Database engine trait and backends
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod bus;
pub mod candidate;
pub mod channel;
pub mod cli;
pub mod client;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod lock;
pub mod relay;

pub use bus::{BusFilter, CoordinationBus, CoordinationMessage};
pub use candidate::{CandidateHandle, CandidateState, OwnerCandidate, ServeSet};
pub use channel::{ChannelHandoff, Endpoint, Frame};
pub use client::{ClientHandle, ClientProxy, Connection, Delivery, RetryPolicy};
pub use config::Config;
pub use domain::{ContextId, ResourceName};
pub use error::{CoordError, CoordResult};
pub use lock::{Acquire, LockGuard, NamedLock};
pub use relay::{Relay, RelayHandle};
