//! Framing for the reliable TCP transport
//!
//! Every frame on the stream is a little-endian `u32` body length followed by
//! the bincode encoding of a [`Frame`].

use crate::{MAX_FILE_SIZE, MAX_TRANS};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size of the length prefix.
pub const FRAME_HEADER_LEN: usize = 4;
/// Largest body accepted; room for a maximal file payload plus its header.
pub const MAX_FRAME_LEN: usize = MAX_FILE_SIZE + MAX_TRANS + 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// Game payload on one channel.
    Data {
        channel: u8,
        reliable: bool,
        payload: Vec<u8>,
    },
    /// Close handshake carrying a disconnect reason code.
    Disconnect { reason: u32 },
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame body of {0} bytes exceeds the limit")]
    TooLarge(usize),
    #[error("malformed frame: {0}")]
    Codec(#[from] bincode::Error),
}

impl Frame {
    /// Encodes the frame with its length prefix.
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        let body = bincode::serialize(self)?;
        if body.len() > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge(body.len()));
        }
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + body.len());
        buf.put_u32_le(body.len() as u32);
        buf.put_slice(&body);
        Ok(buf.freeze())
    }

    /// Decodes a frame body (without its length prefix).
    pub fn decode(body: &[u8]) -> Result<Self, FrameError> {
        Ok(bincode::deserialize(body)?)
    }

    /// Validates a length prefix read off the wire.
    pub fn body_len(header: [u8; FRAME_HEADER_LEN]) -> Result<usize, FrameError> {
        let len = u32::from_le_bytes(header) as usize;
        if len > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge(len));
        }
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_prefix_matches_body() {
        let frame = Frame::Data {
            channel: 1,
            reliable: true,
            payload: vec![1, 2, 3],
        };
        let encoded = frame.encode().unwrap();

        let mut header = [0u8; FRAME_HEADER_LEN];
        header.copy_from_slice(&encoded[..FRAME_HEADER_LEN]);
        let len = Frame::body_len(header).unwrap();

        assert_eq!(len, encoded.len() - FRAME_HEADER_LEN);
        assert_eq!(Frame::decode(&encoded[FRAME_HEADER_LEN..]).unwrap(), frame);
    }

    #[test]
    fn test_oversized_header_rejected() {
        let header = ((MAX_FRAME_LEN + 1) as u32).to_le_bytes();
        assert!(matches!(Frame::body_len(header), Err(FrameError::TooLarge(_))));
    }

    #[test]
    fn test_garbage_body_rejected() {
        assert!(matches!(Frame::decode(&[0xff, 0xff, 0xff, 0xff, 0xff]), Err(FrameError::Codec(_))));
    }
}
