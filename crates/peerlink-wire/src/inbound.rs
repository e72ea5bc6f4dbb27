//! Inbound stream handling: the server side of one exchange.
//!
//! Each accepted stream carries exactly one request frame. [`receive`] reads
//! it; if that fails, a best-effort error response is written back before the
//! stream is closed and the error is returned. On success the message is
//! handed to the application's [`MessageHandler`] together with a
//! [`Responder`], which owns the stream and is the only way to answer.

use crate::error::{WireError, WireResult};
use crate::frame::{read_body, read_header, write_frame};
use crate::header::{Message, MessageHeader, MessageType, INTERNAL_ERROR_CODE, SUCCESS_CODE};
use crate::transport::PeerStream;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Trait for the application to handle incoming requests.
///
/// The handler decides how (and whether) to answer through the responder.
/// Dropping the responder without answering closes the stream, which the
/// requester sees as an I/O error.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle_message(&self, message: Message, responder: Responder);
}

/// A decoded inbound request and the means to answer it.
pub struct InboundRequest {
    pub message: Message,
    pub responder: Responder,
}

/// Answers one inbound request on the stream it arrived on.
pub struct Responder {
    stream: PeerStream,
    session: String,
}

impl Responder {
    /// Session token of the request being answered.
    pub fn session(&self) -> &str {
        &self.session
    }

    /// Acknowledge the request with an empty success response.
    pub async fn success(self) -> WireResult<()> {
        self.reply(Vec::new()).await
    }

    /// Answer with a success response carrying `body`.
    pub async fn reply(mut self, body: Vec<u8>) -> WireResult<()> {
        let mut header = MessageHeader::response(&self.session, SUCCESS_CODE, "");
        header.size = body.len() as u64;
        let result = write_frame(&mut self.stream, &header, &body).await;
        let _ = self.stream.shutdown().await;
        result
    }

    /// Answer with an error status and message.
    pub async fn error(mut self, status: i32, message: &str) -> WireResult<()> {
        let header = MessageHeader::response(&self.session, status, message);
        let result = write_frame(&mut self.stream, &header, &[]).await;
        let _ = self.stream.shutdown().await;
        result
    }
}

/// Read the request frame from a freshly accepted stream.
///
/// On failure the peer is sent an `INTERNAL_ERROR_CODE` response describing
/// the problem (carrying its session if the header was already decoded), the
/// stream is closed and the original error is returned. A stream that ends
/// before its first byte gets no response.
pub async fn receive(mut stream: PeerStream) -> WireResult<InboundRequest> {
    let header = match read_header(&mut stream).await {
        Ok(header) => header,
        // Nothing was requested, so there is nobody to answer.
        Err(WireError::ConnectionClosed) => {
            let _ = stream.shutdown().await;
            return Err(WireError::ConnectionClosed);
        }
        Err(e) => {
            send_error_response(&mut stream, INTERNAL_ERROR_CODE, &e.to_string(), "").await;
            return Err(e);
        }
    };

    if header.message_type != MessageType::Request {
        let e = WireError::Protocol(format!(
            "expected a request frame, got {:?}",
            header.message_type
        ));
        send_error_response(&mut stream, INTERNAL_ERROR_CODE, &e.to_string(), &header.session)
            .await;
        return Err(e);
    }

    let body = match read_body(&mut stream, &header).await {
        Ok(body) => body,
        Err(e) => {
            send_error_response(&mut stream, INTERNAL_ERROR_CODE, &e.to_string(), &header.session)
                .await;
            return Err(e);
        }
    };

    let session = header.session.clone();
    Ok(InboundRequest {
        message: Message { header, body },
        responder: Responder { stream, session },
    })
}

/// Serve one accepted stream: read the request and hand it to `handler`.
pub async fn handle_stream(stream: PeerStream, handler: &dyn MessageHandler) -> WireResult<()> {
    let InboundRequest { message, responder } = receive(stream).await?;
    debug!(
        session = %message.header.session,
        size = message.header.size,
        broadcast = message.header.is_broadcast,
        "Delivering inbound message"
    );
    handler.handle_message(message, responder).await;
    Ok(())
}

/// Write an error response and close the stream. Failures are swallowed:
/// the stream is already known to be in trouble.
async fn send_error_response(stream: &mut PeerStream, status: i32, message: &str, session: &str) {
    let header = MessageHeader::response(session, status, message);
    if let Err(e) = write_frame(stream, &header, &[]).await {
        debug!(error = %e, "Could not send error response");
    }
    let _ = stream.shutdown().await;
}
