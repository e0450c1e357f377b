//! ACN framed I/O
//!
//! Length-prefixed read/write of byte strings and envelopes over any
//! bidirectional byte stream (overlay substreams and delegate TCP sockets
//! share this wire format).
//!
//! Wire format: `[length: u32 BE] [payload: length bytes]`.
//!
//! A peer closing the stream cleanly between frames surfaces as
//! [`CodecError::Eof`]; every other I/O failure is passed through verbatim.

use std::io;

use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use thiserror::Error;

use acn_core::Envelope;

/// Maximum frame payload size (1 MiB, generous for envelopes)
pub const MAX_FRAME_PAYLOAD: usize = 1024 * 1024;

#[derive(Error, Debug)]
pub enum CodecError {
    /// The peer closed the stream cleanly at a frame boundary.
    #[error("stream closed by peer")]
    Eof,

    #[error("frame payload too large: {0} > {1}")]
    TooLarge(usize, usize),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed envelope: {0}")]
    Envelope(#[from] bincode::Error),

    #[error("invalid utf-8 in string frame: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl CodecError {
    /// True when the read failed because the peer closed cleanly.
    pub fn is_eof(&self) -> bool {
        matches!(self, CodecError::Eof)
    }
}

/// Read one length-prefixed frame.
///
/// A clean close before the first header byte is [`CodecError::Eof`];
/// a close mid-frame is an I/O error (the stream desynced).
pub async fn read_bytes<R: AsyncRead + Unpin>(io: &mut R) -> Result<Vec<u8>, CodecError> {
    let mut len_bytes = [0u8; 4];

    // First header byte read by hand so a clean EOF is distinguishable
    // from a truncated frame.
    let n = io.read(&mut len_bytes[..1]).await?;
    if n == 0 {
        return Err(CodecError::Eof);
    }
    io.read_exact(&mut len_bytes[1..]).await?;

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_PAYLOAD {
        return Err(CodecError::TooLarge(len, MAX_FRAME_PAYLOAD));
    }

    let mut payload = vec![0u8; len];
    io.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Write one length-prefixed frame.
///
/// The whole frame is built in memory and written with a single
/// `write_all` so a connection dying mid-write never leaves the reader
/// misaligned on a partial header.
pub async fn write_bytes<W: AsyncWrite + Unpin>(io: &mut W, data: &[u8]) -> Result<(), CodecError> {
    if data.len() > MAX_FRAME_PAYLOAD {
        return Err(CodecError::TooLarge(data.len(), MAX_FRAME_PAYLOAD));
    }

    let mut buf = Vec::with_capacity(4 + data.len());
    buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
    buf.extend_from_slice(data);

    io.write_all(&buf).await?;
    io.flush().await?;
    Ok(())
}

/// Read one frame and decode it as UTF-8.
pub async fn read_string<R: AsyncRead + Unpin>(io: &mut R) -> Result<String, CodecError> {
    let payload = read_bytes(io).await?;
    Ok(String::from_utf8(payload)?)
}

/// Read one framed envelope.
pub async fn read_envelope<R: AsyncRead + Unpin>(io: &mut R) -> Result<Envelope, CodecError> {
    let payload = read_bytes(io).await?;
    Ok(Envelope::from_bytes(&payload)?)
}

/// Write one framed envelope.
pub async fn write_envelope<W: AsyncWrite + Unpin>(
    io: &mut W,
    envelope: &Envelope,
) -> Result<(), CodecError> {
    let payload = envelope.to_bytes()?;
    write_bytes(io, &payload).await
}
