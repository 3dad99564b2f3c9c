//! Length-prefixed framing of the skyq wire protocol.
//!
//! A frame is a 32-bit big-endian payload length, one flags byte (bit 0 is
//! the is-last marker), then the payload bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use skyq_common::{Result, SkyqError};

const FLAG_IS_LAST: u8 = 0x01;

/// Upper bound on a single frame payload; larger lengths indicate stream
/// corruption rather than data.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Payload bytes.
    pub payload: Bytes,
    /// Whether this is the final frame of the stream.
    pub is_last: bool,
}

/// Append one frame to `buf`.
pub fn write_frame(buf: &mut BytesMut, payload: &[u8], is_last: bool) {
    buf.put_u32(payload.len() as u32);
    buf.put_u8(if is_last { FLAG_IS_LAST } else { 0 });
    buf.put_slice(payload);
}

/// Decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` when the buffer does not yet hold a complete frame;
/// the buffer is left untouched in that case.
pub fn read_frame(buf: &mut BytesMut) -> Result<Option<Frame>> {
    const HEADER: usize = 5;
    if buf.len() < HEADER {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(SkyqError::Transport(format!(
            "frame length {len} exceeds limit {MAX_FRAME_BYTES}"
        )));
    }
    if buf.len() < HEADER + len {
        return Ok(None);
    }
    buf.advance(4);
    let flags = buf.get_u8();
    let payload = buf.split_to(len).freeze();
    Ok(Some(Frame {
        payload,
        is_last: flags & FLAG_IS_LAST != 0,
    }))
}
