//! # Handoff Wire Frame
//!
//! One frame per channel, little-endian, every field written as a whole unit:
//!
//! ```text
//! offset  size  field
//! 0       8     raw handle value (u64)
//! 8       4     target pid (u32)
//! 12      1     strategy tag
//! 13      3     reserved, zero
//! 16      16    token id
//! 32      N     strategy payload (N fixed per strategy)
//! ```

use thiserror::Error;

use super::connection::RawHandleValue;
use super::token::{DuplicationStrategy, DuplicationToken, TokenId};
use crate::error::HandoffError;

/// Width of the raw handle value field.
pub const RAW_HANDLE_LEN: usize = 8;

/// Width of the token header (pid, tag, reserved, id).
pub const TOKEN_HEADER_LEN: usize = 24;

/// Bytes preceding the strategy payload.
pub const FRAME_PREFIX_LEN: usize = RAW_HANDLE_LEN + TOKEN_HEADER_LEN;

/// Malformed frame contents.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("unknown strategy tag {0}")]
    UnknownStrategy(u8),

    #[error("reserved header bytes are not zero")]
    ReservedNotZero,

    #[error("payload is {actual} bytes, strategy requires {expected}")]
    PayloadLength { expected: usize, actual: usize },
}

impl From<WireError> for HandoffError {
    fn from(err: WireError) -> Self {
        HandoffError::Transfer(format!("malformed frame: {err}"))
    }
}

/// Encode the full frame for `raw` and `token`.
pub fn encode_frame(raw: RawHandleValue, token: &DuplicationToken) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FRAME_PREFIX_LEN + token.payload().len());
    buf.extend_from_slice(&raw.to_le_bytes());
    buf.extend_from_slice(&token.target_pid().to_le_bytes());
    buf.push(token.strategy().tag());
    buf.extend_from_slice(&[0u8; 3]);
    buf.extend_from_slice(token.id().as_bytes());
    buf.extend_from_slice(token.payload());
    buf
}

/// Decoded fixed-size frame prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePrefix {
    pub raw: RawHandleValue,
    pub target_pid: u32,
    pub strategy: DuplicationStrategy,
    pub token_id: TokenId,
}

impl FramePrefix {
    pub fn decode(bytes: &[u8; FRAME_PREFIX_LEN]) -> Result<Self, WireError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[0..8]);
        let mut pid = [0u8; 4];
        pid.copy_from_slice(&bytes[8..12]);

        let tag = bytes[12];
        let strategy = DuplicationStrategy::from_tag(tag).ok_or(WireError::UnknownStrategy(tag))?;
        if bytes[13..16] != [0u8; 3] {
            return Err(WireError::ReservedNotZero);
        }

        let mut id = [0u8; 16];
        id.copy_from_slice(&bytes[16..32]);

        Ok(Self {
            raw: u64::from_le_bytes(raw),
            target_pid: u32::from_le_bytes(pid),
            strategy,
            token_id: TokenId::from_bytes(id),
        })
    }

    /// Payload bytes that follow this prefix.
    pub fn payload_len(&self) -> usize {
        self.strategy.payload_len()
    }

    /// Complete the frame with its payload.
    pub fn into_parts(
        self,
        payload: Vec<u8>,
    ) -> Result<(RawHandleValue, DuplicationToken), WireError> {
        if payload.len() != self.payload_len() {
            return Err(WireError::PayloadLength {
                expected: self.payload_len(),
                actual: payload.len(),
            });
        }
        let token = DuplicationToken::from_parts(
            self.token_id,
            self.strategy,
            self.target_pid,
            payload,
        );
        Ok((self.raw, token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix_of(frame: &[u8]) -> [u8; FRAME_PREFIX_LEN] {
        let mut prefix = [0u8; FRAME_PREFIX_LEN];
        prefix.copy_from_slice(&frame[..FRAME_PREFIX_LEN]);
        prefix
    }

    #[test]
    fn test_frame_layout() {
        let token = DuplicationToken::issue(DuplicationStrategy::Inherited, 0x0102_0304, Vec::new());
        let frame = encode_frame(42, &token);

        assert_eq!(frame.len(), FRAME_PREFIX_LEN);
        assert_eq!(&frame[0..8], &42u64.to_le_bytes());
        assert_eq!(&frame[8..12], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(frame[12], DuplicationStrategy::Inherited.tag());
        assert_eq!(&frame[13..16], &[0, 0, 0]);
        assert_eq!(&frame[16..32], token.id().as_bytes());
    }

    #[test]
    fn test_decode_preserves_identity() {
        let token = DuplicationToken::issue(DuplicationStrategy::Inherited, 777, Vec::new());
        let frame = encode_frame(42, &token);

        let prefix = FramePrefix::decode(&prefix_of(&frame)).unwrap();
        let (raw, decoded) = prefix.into_parts(Vec::new()).unwrap();
        assert_eq!(raw, 42);
        assert_eq!(decoded.id(), token.id());
        assert_eq!(decoded.target_pid(), 777);
    }

    #[test]
    fn test_decode_rejects_unknown_tag_and_reserved() {
        let token = DuplicationToken::issue(DuplicationStrategy::Inherited, 1, Vec::new());
        let mut frame = encode_frame(3, &token);

        frame[12] = 0xEE;
        assert_eq!(
            FramePrefix::decode(&prefix_of(&frame)),
            Err(WireError::UnknownStrategy(0xEE))
        );

        frame[12] = DuplicationStrategy::Inherited.tag();
        frame[14] = 1;
        assert_eq!(
            FramePrefix::decode(&prefix_of(&frame)),
            Err(WireError::ReservedNotZero)
        );
    }

    #[test]
    fn test_payload_length_is_enforced() {
        let token = DuplicationToken::issue(DuplicationStrategy::Inherited, 1, Vec::new());
        let frame = encode_frame(3, &token);
        let prefix = FramePrefix::decode(&prefix_of(&frame)).unwrap();

        let err = prefix.into_parts(vec![0u8; 5]).unwrap_err();
        assert_eq!(err, WireError::PayloadLength { expected: 0, actual: 5 });
    }
}
