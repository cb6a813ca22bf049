//! Owner side of a handed-off channel

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::channel::{Endpoint, Frame};
use crate::engine::{Engine, EngineHandle};

/// Serve one client until either side goes away
///
/// Requests run one at a time in arrival order, so responses leave in the
/// order their requests came in. Owner pushes are interleaved between them.
pub(crate) async fn serve_session(
    engine: Arc<dyn Engine>,
    handle: EngineHandle,
    endpoint: Endpoint,
    mut pushes: broadcast::Receiver<Vec<u8>>,
) {
    let name = handle.name().clone();
    debug!(%name, "serve_session: started");
    let (tx, mut rx) = endpoint.split();

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else {
                    debug!(%name, "serve_session: client gone");
                    break;
                };
                let reply = match frame {
                    Frame::Request { op_id, payload } => match engine.execute(&handle, payload).await {
                        Ok(payload) => Frame::Response { op_id, payload },
                        Err(e) => Frame::Failed {
                            op_id,
                            message: e.to_string(),
                        },
                    },
                    other => {
                        warn!(%name, ?other, "serve_session: unexpected frame from client");
                        continue;
                    }
                };
                if tx.send(reply).await.is_err() {
                    break;
                }
            }
            push = pushes.recv() => match push {
                Ok(payload) => {
                    if tx.send(Frame::Push { payload }).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(%name, skipped, "serve_session: pushes dropped for slow client");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    debug!(%name, "serve_session: ended");
}
