//! Message header and its codec.
//!
//! Headers are encoded as JSON so a decoder can check the shape of what it
//! received. On the wire every header is preceded by a 4-byte big-endian
//! length (see [`crate::frame`]); the encoded header itself must not exceed
//! [`MAX_HEADER_SIZE`].

use crate::error::{WireError, WireResult};
use serde::{Deserialize, Serialize};

/// Status of a successful exchange.
pub const SUCCESS_CODE: i32 = 0;

/// Status sent back when an inbound frame could not be read or decoded.
pub const INTERNAL_ERROR_CODE: i32 = 500;

/// Maximum encoded header size (64 KB).
pub const MAX_HEADER_SIZE: usize = 64 * 1024;

/// Direction of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Request,
    Response,
}

/// Fixed-shape header sent in front of every body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Exact byte length of the body that follows.
    pub size: u64,
    /// Correlation token chosen by the sender.
    pub session: String,
    /// `SUCCESS_CODE` or an error code.
    pub status: i32,
    /// Populated only when `status != SUCCESS_CODE`.
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub is_broadcast: bool,
}

impl MessageHeader {
    /// A request header with every other field zeroed.
    pub fn request() -> Self {
        Self {
            message_type: MessageType::Request,
            size: 0,
            session: String::new(),
            status: SUCCESS_CODE,
            error_message: String::new(),
            is_broadcast: false,
        }
    }

    /// A body-less response header.
    pub fn response(session: &str, status: i32, error_message: &str) -> Self {
        Self {
            message_type: MessageType::Response,
            size: 0,
            session: session.to_string(),
            status,
            error_message: error_message.to_string(),
            is_broadcast: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SUCCESS_CODE
    }
}

/// A header plus the body it describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub body: Vec<u8>,
}

impl Message {
    /// Build a request carrying `body`. Session, size and status are filled
    /// in when the message is sent.
    pub fn request(body: impl Into<Vec<u8>>) -> Self {
        Self {
            header: MessageHeader::request(),
            body: body.into(),
        }
    }

    /// Body as text, replacing invalid UTF-8.
    pub fn body_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Encode a header to JSON bytes.
///
/// Fails with [`WireError::HeaderTooLarge`] rather than producing a header
/// the receiving side would refuse.
pub fn encode_header(header: &MessageHeader) -> WireResult<Vec<u8>> {
    let bytes = serde_json::to_vec(header)?;
    if bytes.len() > MAX_HEADER_SIZE {
        return Err(WireError::HeaderTooLarge {
            size: bytes.len(),
            max: MAX_HEADER_SIZE,
        });
    }
    Ok(bytes)
}

/// Decode a header from JSON bytes.
pub fn decode_header(bytes: &[u8]) -> WireResult<MessageHeader> {
    if bytes.len() > MAX_HEADER_SIZE {
        return Err(WireError::HeaderTooLarge {
            size: bytes.len(),
            max: MAX_HEADER_SIZE,
        });
    }
    Ok(serde_json::from_slice(bytes)?)
}
