//! Linked endpoint pairs

use tokio::sync::mpsc;
use tracing::debug;

use super::frame::Frame;
use crate::error::{CoordError, CoordResult};

/// Sending half of an endpoint, cloneable
pub type FrameSender = mpsc::Sender<Frame>;

/// One end of a bidirectional channel
///
/// Not Clone: an endpoint is moved to its new holder, never copied.
#[derive(Debug)]
pub struct Endpoint {
    tx: mpsc::Sender<Frame>,
    rx: mpsc::Receiver<Frame>,
}

impl Endpoint {
    /// Send a frame to the peer
    ///
    /// Fails with ChannelClosed once the peer endpoint has been dropped.
    pub async fn send(&self, frame: Frame) -> CoordResult<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| CoordError::ChannelClosed("handoff peer"))
    }

    /// Receive the next frame from the peer
    ///
    /// Returns None when the peer is gone and everything it sent was read.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Whether the peer has dropped its receiving half
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Split into independent sending and receiving halves
    pub fn split(self) -> (FrameSender, mpsc::Receiver<Frame>) {
        (self.tx, self.rx)
    }
}

/// Factory for linked endpoint pairs
pub struct ChannelHandoff;

impl ChannelHandoff {
    /// Create a linked pair: `(client_end, owner_end)`
    ///
    /// Frames sent on one end arrive at the other, in order. A zero buffer
    /// is treated as one.
    pub fn open(buffer: usize) -> (Endpoint, Endpoint) {
        debug!(buffer, "ChannelHandoff::open: called");
        let buffer = buffer.max(1);
        let (to_owner_tx, to_owner_rx) = mpsc::channel(buffer);
        let (to_client_tx, to_client_rx) = mpsc::channel(buffer);

        let client_end = Endpoint {
            tx: to_owner_tx,
            rx: to_client_rx,
        };
        let owner_end = Endpoint {
            tx: to_client_tx,
            rx: to_owner_rx,
        };
        (client_end, owner_end)
    }
}
