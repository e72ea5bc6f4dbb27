//! Frame I/O over a byte stream.
//!
//! A frame is `[u32 BE header length][header JSON][body]`, where the body is
//! exactly `header.size` bytes. The transport is a raw byte stream, so reads
//! may return arbitrarily small chunks; every read here accumulates until the
//! expected length is reached.

use crate::error::{WireError, WireResult};
use crate::header::{decode_header, encode_header, Message, MessageHeader, MAX_HEADER_SIZE};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum body size (16 MB).
pub const MAX_BODY_SIZE: u64 = 16 * 1024 * 1024;

/// Write one frame. `header.size` must match `body.len()`, and the body must
/// fit within [`MAX_BODY_SIZE`]; nothing is written otherwise.
pub async fn write_frame<W>(writer: &mut W, header: &MessageHeader, body: &[u8]) -> WireResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if body.len() as u64 > MAX_BODY_SIZE {
        return Err(WireError::MessageTooLarge {
            size: body.len() as u64,
            max: MAX_BODY_SIZE,
        });
    }
    if header.size != body.len() as u64 {
        return Err(WireError::SizeMismatch {
            declared: header.size,
            actual: body.len(),
        });
    }

    let header_bytes = encode_header(header)?;
    let len = header_bytes.len() as u32;
    let mut buf = Vec::with_capacity(4 + header_bytes.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&header_bytes);

    writer.write_all(&buf).await?;
    if !body.is_empty() {
        writer.write_all(body).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Read and decode the header of the next frame.
///
/// Returns [`WireError::ConnectionClosed`] if the stream ends before the
/// first byte of the length prefix.
pub async fn read_header<R>(reader: &mut R) -> WireResult<MessageHeader>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut prefix = [0u8; 4];
    let first = reader.read(&mut prefix).await?;
    if first == 0 {
        return Err(WireError::ConnectionClosed);
    }
    // A stream that ends inside the prefix is a truncated frame, not a close.
    reader.read_exact(&mut prefix[first..]).await?;

    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_HEADER_SIZE {
        return Err(WireError::HeaderTooLarge {
            size: len,
            max: MAX_HEADER_SIZE,
        });
    }

    let mut header_bytes = vec![0u8; len];
    reader.read_exact(&mut header_bytes).await?;
    decode_header(&header_bytes)
}

/// Read exactly `header.size` body bytes.
///
/// A zero-size header returns immediately without touching the stream.
pub async fn read_body<R>(reader: &mut R, header: &MessageHeader) -> WireResult<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    if header.size == 0 {
        return Ok(Vec::new());
    }
    if header.size > MAX_BODY_SIZE {
        return Err(WireError::MessageTooLarge {
            size: header.size,
            max: MAX_BODY_SIZE,
        });
    }

    let mut body = vec![0u8; header.size as usize];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

/// Read one complete frame.
pub async fn read_frame<R>(reader: &mut R) -> WireResult<Message>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let header = read_header(reader).await?;
    let body = read_body(reader, &header).await?;
    Ok(Message { header, body })
}
