//! Frames carried on a handed-off channel
//!
//! Payloads are opaque to the coordinator; only the engine interprets them.

use serde::{Deserialize, Serialize};

/// One message on the data plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Client asks the owner to run an operation
    Request {
        #[serde(rename = "op-id")]
        op_id: u64,
        payload: Vec<u8>,
    },

    /// Owner's result for a request
    Response {
        #[serde(rename = "op-id")]
        op_id: u64,
        payload: Vec<u8>,
    },

    /// Owner could not run a request
    Failed {
        #[serde(rename = "op-id")]
        op_id: u64,
        message: String,
    },

    /// Unsolicited message from the owner
    Push { payload: Vec<u8> },
}

impl Frame {
    /// Operation this frame belongs to, if any
    pub fn op_id(&self) -> Option<u64> {
        match self {
            Frame::Request { op_id, .. } | Frame::Response { op_id, .. } | Frame::Failed { op_id, .. } => Some(*op_id),
            Frame::Push { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_id() {
        assert_eq!(
            Frame::Request {
                op_id: 7,
                payload: vec![]
            }
            .op_id(),
            Some(7)
        );
        assert_eq!(
            Frame::Failed {
                op_id: 3,
                message: "no".to_string()
            }
            .op_id(),
            Some(3)
        );
        assert_eq!(Frame::Push { payload: vec![1] }.op_id(), None);
    }

    #[test]
    fn test_frame_serialization() {
        let frame = Frame::Response {
            op_id: 42,
            payload: b"ok".to_vec(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""type":"Response""#));
        assert!(json.contains(r#""op-id":42"#));
    }
}
