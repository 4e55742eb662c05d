//! Minimal length-prefixed framing for the control socket.
//!
//! A 4-byte big-endian length prefix followed by a compact JSON body: the
//! smallest thing that lets the event loop's accumulator know when a full
//! message has arrived.

use crate::error::{BuildjailError, Result};
use crate::node::Node;

const HEADER_LEN: usize = 4;

/// Serializes `value` as a length-prefixed frame ready to write to the
/// socket.
pub fn encode(value: &Node) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(value)?;
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Returns the total byte length of the frame starting at `buf`, if the
/// header has arrived yet. `None` means "keep reading".
pub fn frame_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    let len = u32::from_be_bytes(buf[..HEADER_LEN].try_into().unwrap()) as usize;
    Some(HEADER_LEN + len)
}

/// Parses one complete frame (header + body) into a `Node`. Callers must
/// only invoke this once `frame_len` confirms the whole frame is present.
pub fn decode(buf: &[u8]) -> Result<Node> {
    if buf.len() < HEADER_LEN {
        return Err(BuildjailError::FrameTruncated {
            needed: HEADER_LEN,
            have: buf.len(),
        });
    }
    let body_len = u32::from_be_bytes(buf[..HEADER_LEN].try_into().unwrap()) as usize;
    let total = HEADER_LEN + body_len;
    if buf.len() < total {
        return Err(BuildjailError::FrameTruncated {
            needed: total,
            have: buf.len(),
        });
    }
    Ok(serde_json::from_slice(&buf[HEADER_LEN..total])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_through_encode_decode() {
        let value = json!({"data": {"operation": "status"}});
        let bytes = encode(&value).unwrap();
        assert_eq!(frame_len(&bytes), Some(bytes.len()));
        assert_eq!(decode(&bytes).unwrap(), value);
    }

    #[test]
    fn frame_len_is_none_until_header_complete() {
        assert_eq!(frame_len(&[0u8; 2]), None);
    }

    #[test]
    fn decode_rejects_truncated_body() {
        let bytes = encode(&json!({"a": 1})).unwrap();
        let err = decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, BuildjailError::FrameTruncated { .. }));
    }
}
