//! Errors from the wire protocol layer.

use crate::registry::PeerId;
use std::time::Duration;
use thiserror::Error;

/// Errors from the wire protocol layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Header decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Invalid peer address '{address}': {reason}")]
    AddressParse { address: String, reason: String },
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Header too large: {size} bytes (max {max})")]
    HeaderTooLarge { size: usize, max: usize },
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: u64, max: u64 },
    #[error("Header declares {declared} body bytes but {actual} were supplied")]
    SizeMismatch { declared: u64, actual: usize },
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Peer not found: {0}")]
    PeerNotFound(PeerId),
    #[error("Remote error {status}: {message}")]
    Remote { status: i32, message: String },
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Gave up connecting to {peer} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        peer: PeerId,
        attempts: u32,
        last_error: String,
    },
    #[error("Cancelled: node is shutting down")]
    Cancelled,
    #[error(
        "Failed to broadcast message to {} peers: [{}]",
        .failures.len(),
        describe_failures(.failures)
    )]
    Broadcast { failures: Vec<(PeerId, WireError)> },
}

fn describe_failures(failures: &[(PeerId, WireError)]) -> String {
    failures
        .iter()
        .map(|(peer, err)| format!("{peer}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Alias for Result with WireError.
pub type WireResult<T> = Result<T, WireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_error_names_every_cause() {
        let err = WireError::Broadcast {
            failures: vec![
                (PeerId::new("peer-a"), WireError::Timeout(Duration::from_secs(1))),
                (
                    PeerId::new("peer-b"),
                    WireError::Remote {
                        status: 500,
                        message: "boom".to_string(),
                    },
                ),
            ],
        };
        let text = err.to_string();
        assert!(text.starts_with("Failed to broadcast message to 2 peers"));
        assert!(text.contains("peer-a: Timed out"));
        assert!(text.contains("peer-b: Remote error 500: boom"));
    }
}
