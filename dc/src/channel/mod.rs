//! Channel Handoff - the data plane between a client and an owner
//!
//! A handoff is a linked pair of endpoints created together. One end moves to
//! the requesting client through the relay, the other stays with the owner.
//! When either side's context goes away its endpoint is dropped and the peer
//! observes the channel closing.

mod frame;
mod handoff;

pub use frame::Frame;
pub use handoff::{ChannelHandoff, Endpoint, FrameSender};
