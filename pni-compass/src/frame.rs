//! Frame layout for PNI compass messages
//!
//! ```text
//! [byte_count: u16 BE][frame_id: u8][payload ...][crc: u16 BE]
//! ```
//!
//! `byte_count` covers the entire frame, including itself and the CRC.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::checksum::{compute_crc, verify_crc};

/// Smallest legal frame: count, id and CRC with an empty payload.
pub const MIN_FRAME_LEN: usize = 5;

/// Largest frame the host accepts.
pub const MAX_FRAME_LEN: usize = 4096;

/// Errors produced while decoding frames or payloads.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("frame too short: {0} bytes")]
    TooShort(usize),

    #[error("byte count {declared} does not match frame length {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("byte count {0} outside [5, 4096]")]
    LengthOutOfRange(usize),

    #[error("CRC mismatch: computed 0x{computed:04X}, stored 0x{stored:04X}")]
    CrcMismatch { computed: u16, stored: u16 },

    #[error("unknown frame id {0}")]
    UnknownFrameId(u8),

    #[error("frame {frame_id}: payload length {got}, expected {expected}")]
    WrongPayloadLength {
        frame_id: u8,
        expected: usize,
        got: usize,
    },

    #[error("unknown config id {0}")]
    UnknownConfigId(u8),

    #[error("unknown data component id {0}")]
    UnknownComponentId(u8),

    #[error("invalid value in frame {frame_id}: {reason}")]
    InvalidValue { frame_id: u8, reason: String },
}

/// A validated frame borrowed from a byte buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub id: u8,
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Parse exactly one frame.
    ///
    /// The slice must contain the whole frame and nothing else.
    pub fn parse(data: &'a [u8]) -> Result<Self, DecodeError> {
        if data.len() < MIN_FRAME_LEN {
            return Err(DecodeError::TooShort(data.len()));
        }

        let declared = declared_len(data).ok_or(DecodeError::TooShort(data.len()))?;
        if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&declared) {
            return Err(DecodeError::LengthOutOfRange(declared));
        }
        if declared != data.len() {
            return Err(DecodeError::LengthMismatch {
                declared,
                actual: data.len(),
            });
        }

        if !verify_crc(data) {
            let crc_at = data.len() - 2;
            return Err(DecodeError::CrcMismatch {
                computed: compute_crc(&data[..crc_at]),
                stored: u16::from_be_bytes([data[crc_at], data[crc_at + 1]]),
            });
        }

        Ok(Self {
            id: data[2],
            payload: &data[3..data.len() - 2],
        })
    }
}

/// Read the byte count from the first two bytes of a buffer.
pub(crate) fn declared_len(data: &[u8]) -> Option<usize> {
    match data {
        [hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo]) as usize),
        _ => None,
    }
}

/// Build a complete frame around a payload.
pub fn encode_frame(frame_id: u8, payload: &[u8]) -> Bytes {
    let total = payload.len() + MIN_FRAME_LEN;
    debug_assert!(total <= MAX_FRAME_LEN, "payload too large for one frame");

    let mut buf = BytesMut::with_capacity(total);
    buf.put_u16(total as u16);
    buf.put_u8(frame_id);
    buf.put_slice(payload);
    let crc = compute_crc(&buf);
    buf.put_u16(crc);
    buf.freeze()
}
