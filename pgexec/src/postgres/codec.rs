use bytes::{Buf, Bytes, BytesMut};

use super::ProtocolError;

/// Largest backend message accepted, anything bigger is treated as a corrupted length.
pub const MAX_MESSAGE_LEN: usize = 1 << 30;

// msgtype + length
const HEADER: usize = 1 + 4;

/// Split one complete backend frame off the front of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet hold the whole frame, in which case `buf` is
/// left untouched and more bytes should be read. Some capacity is reserved for the missing
/// part so the following read can fill it.
///
/// Returns the message type and its body, without the length prefix.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<(u8, Bytes)>, ProtocolError> {
    let Some(mut header) = buf.get(..HEADER) else {
        buf.reserve(HEADER);
        return Ok(None);
    };

    let msgtype = header.get_u8();
    let len = header.get_i32();

    // length includes itself
    if len < 4 || len as usize > MAX_MESSAGE_LEN {
        return Err(ProtocolError::FrameLength { msgtype, len });
    }

    let len = len as usize;

    if buf.len() - 1/*msgtype*/ < len {
        buf.reserve(1 + len - buf.len());
        return Ok(None);
    }

    buf.advance(HEADER);
    let body = buf.split_to(len - 4).freeze();

    Ok(Some((msgtype, body)))
}
