//! Radio Frame — channel and sequence framing for advertisement payloads
//!
//! Format (total overhead: 2 bytes):
//! [1 byte]  channel
//! [1 byte]  sequence (per-sender rolling counter)
//! [N bytes] payload, 0..=MAX_PAYLOAD
//!
//! Both header fields are single bytes, so there is no byte order to agree on.

use thiserror::Error;

/// Maximum payload carried by one frame.
///
/// A frame travels inside a single manufacturer-data field of a legacy
/// advertisement, which leaves 23 bytes for the frame itself.
pub const MAX_PAYLOAD: usize = 21;

/// Channel byte + sequence byte
pub const FRAME_HEADER_LEN: usize = 2;

/// Largest frame `encode` can produce
pub const MAX_FRAME_LEN: usize = FRAME_HEADER_LEN + MAX_PAYLOAD;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("Frame too short: {len} bytes (need at least 2)")]
    FrameTooShort { len: usize },
}

/// A decoded radio frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Logical channel the sender was tuned to
    pub channel: u8,
    /// Sender's sequence byte at the time of sending
    pub sequence: u8,
    /// Message bytes, verbatim
    pub payload: Vec<u8>,
}

impl Frame {
    /// Serialize this frame (same rules as [`encode`])
    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        encode(self.channel, self.sequence, &self.payload)
    }
}

/// Build the wire frame for a payload
pub fn encode(channel: u8, sequence: u8, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD,
        });
    }

    let mut bytes = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    bytes.push(channel);
    bytes.push(sequence);
    bytes.extend_from_slice(payload);
    Ok(bytes)
}

/// Split a received frame into header fields and payload
pub fn decode(frame: &[u8]) -> Result<Frame, FrameError> {
    match frame {
        [channel, sequence, payload @ ..] => Ok(Frame {
            channel: *channel,
            sequence: *sequence,
            payload: payload.to_vec(),
        }),
        _ => Err(FrameError::FrameTooShort { len: frame.len() }),
    }
}
