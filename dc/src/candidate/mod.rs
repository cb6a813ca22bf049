//! Owner Candidate - election state machine for resource ownership
//!
//! A candidate competes for a resource when a client requests it. The named
//! lock decides the winner; the winner opens the engine, registers with the
//! relay and announces itself on the bus. Losers stay idle until the next
//! request.

mod core;
mod handle;
mod messages;
mod session;
mod state;

pub use core::OwnerCandidate;
pub use handle::CandidateHandle;
pub use messages::CandidateCommand;
pub use state::{CandidateState, ServeSet};
