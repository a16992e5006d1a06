//! Length-prefixed MessagePack framing.
//!
//! A frame on the wire is a big-endian `u32` body length followed by the
//! MessagePack body. Frames with named fields are used so that peers can add
//! fields in minor versions.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frames::Frame;
use crate::version::Version;

/// Largest accepted frame body (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Bytes taken by the body length.
pub const LENGTH_PREFIX_SIZE: usize = 4;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// A one-shot decode was handed a truncated frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Incompatible protocol version {0}")]
    IncompatibleVersion(Version),

    /// Well-formed frame that is not valid in the current exchange.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

/// Body length announced by the prefix at the start of `data`, if present.
fn announced_len(data: &[u8]) -> Result<Option<usize>, ProtocolError> {
    let Some(prefix) = data.get(..LENGTH_PREFIX_SIZE) else {
        return Ok(None);
    };
    let mut prefix = prefix;
    let len = prefix.get_u32() as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    Ok(Some(len))
}

/// Encode `frame` into a fresh buffer.
///
/// # Errors
///
/// Fails when the body is larger than [`MAX_FRAME_SIZE`] or cannot be
/// serialized.
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Append the encoded `frame` to `buf`. Several frames can be batched into
/// one buffer this way before a single write.
///
/// # Errors
///
/// Same as [`encode`]. `buf` is left untouched on error.
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let body = rmp_serde::to_vec_named(frame)?;
    let len = u32::try_from(body.len())
        .ok()
        .filter(|len| *len as usize <= MAX_FRAME_SIZE)
        .ok_or(ProtocolError::FrameTooLarge(body.len()))?;

    buf.reserve(LENGTH_PREFIX_SIZE + body.len());
    buf.put_u32(len);
    buf.put_slice(&body);
    Ok(())
}

/// Decode exactly one frame from the start of `data`. Trailing bytes are
/// ignored.
///
/// # Errors
///
/// [`ProtocolError::Incomplete`] when `data` stops short of a whole frame,
/// otherwise the length or body errors.
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    let Some(len) = announced_len(data)? else {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    };
    let end = LENGTH_PREFIX_SIZE + len;
    let body = data
        .get(LENGTH_PREFIX_SIZE..end)
        .ok_or(ProtocolError::Incomplete(end.saturating_sub(data.len())))?;
    Ok(rmp_serde::from_slice(body)?)
}

/// Pull the next complete frame off a read buffer.
///
/// `Ok(None)` means more bytes are needed; the buffer then has room
/// reserved for the rest of the pending frame.
///
/// # Errors
///
/// An oversized length prefix or an undecodable body. The stream cannot be
/// resynchronised after either, so callers drop the connection.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
    let Some(len) = announced_len(buf)? else {
        return Ok(None);
    };
    let missing = (LENGTH_PREFIX_SIZE + len).saturating_sub(buf.len());
    if missing > 0 {
        buf.reserve(missing);
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let body = buf.split_to(len);
    Ok(Some(rmp_serde::from_slice(&body)?))
}
