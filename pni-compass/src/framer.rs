//! Streaming frame extraction
//!
//! Serial reads deliver arbitrary chunks, so frames may be split across
//! reads or preceded by line noise from the ADCP console. The decoder keeps
//! a rolling buffer and resynchronises one byte at a time when the head of
//! the buffer cannot be a valid frame.

use tracing::{debug, warn};

use crate::event::CompassEvent;
use crate::frame::{declared_len, DecodeError, Frame, MIN_FRAME_LEN};

/// Largest frame the module sends: a ParamResp carrying 32 f64 FIR taps.
const MAX_RESPONSE_LEN: usize = MIN_FRAME_LEN + 3 + 32 * 8;

/// Incremental decoder for the inbound byte stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    skipped: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(256),
            skipped: 0,
        }
    }

    /// Total bytes discarded while hunting for frame boundaries.
    pub fn skipped_bytes(&self) -> usize {
        self.skipped
    }

    /// Bytes held waiting for the rest of a frame.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Add incoming bytes and return every frame completed by them.
    ///
    /// A buffer head is only treated as a frame start when its byte count is
    /// plausible and its id is one the module sends. Frames with a valid CRC
    /// but an undecodable payload are consumed and reported as errors; CRC
    /// failures are reported, then one byte is dropped and the scan resumes.
    /// Whatever is left buffered is shorter than the largest response.
    pub fn push(&mut self, data: &[u8]) -> Vec<Result<CompassEvent, DecodeError>> {
        self.buffer.extend_from_slice(data);
        let mut out = Vec::new();

        while let Some(declared) = declared_len(&self.buffer) {
            if !(MIN_FRAME_LEN..=MAX_RESPONSE_LEN).contains(&declared) {
                self.discard(1);
                continue;
            }
            match self.buffer.get(2) {
                None => break,
                Some(&id) if !is_response_id(id) => {
                    self.discard(1);
                    continue;
                }
                Some(_) => {}
            }
            if self.buffer.len() < declared {
                break;
            }

            match Frame::parse(&self.buffer[..declared]) {
                Ok(frame) => {
                    out.push(CompassEvent::from_frame(&frame));
                    self.buffer.drain(..declared);
                }
                Err(e) => {
                    out.push(Err(e));
                    self.discard(1);
                }
            }
        }

        out
    }

    /// Decode bytes into events, logging and dropping anything malformed.
    pub fn decode(&mut self, data: &[u8]) -> Vec<CompassEvent> {
        self.push(data)
            .into_iter()
            .filter_map(|result| match result {
                Ok(event) => {
                    debug!("compass event: {event:?}");
                    Some(event)
                }
                Err(e) => {
                    warn!("Dropping malformed compass frame: {e}");
                    None
                }
            })
            .collect()
    }

    fn discard(&mut self, n: usize) {
        self.buffer.drain(..n);
        self.skipped += n;
    }
}

fn is_response_id(id: u8) -> bool {
    use crate::ids::frame_id::*;
    matches!(
        id,
        MOD_INFO_RESP
            | DATA_RESP
            | CONFIG_RESP
            | PARAM_RESP
            | SAVE_DONE
            | USER_CAL_SAMP_COUNT
            | USER_CAL_SCORE
            | SET_CONFIG_DONE
            | SET_PARAM_DONE
            | FACTORY_MAG_CAL_DONE
            | FACTORY_ACCEL_CAL_DONE
    )
}
