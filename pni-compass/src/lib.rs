//! PNI compass module binary protocol
//!
//! This crate provides framing, command encoding and event decoding for the
//! magnetometer/accelerometer module embedded in the ADCP. The host talks to
//! the module through the ADCP's compass pass-through mode using the PNI
//! binary frame format.

mod checksum;
mod command;
mod event;
mod frame;
mod framer;
pub mod ids;

pub use checksum::{compute_crc, verify_crc};
pub use command::{Command, ConfigId, ConfigValue, FirTaps, ValueError};
pub use command::{DECLINATION_RANGE, NUM_POINTS_RANGE};
pub use event::{CalibrationScore, CompassEvent, ModuleInfo, OrientationSample};
pub use frame::{encode_frame, DecodeError, Frame, MAX_FRAME_LEN, MIN_FRAME_LEN};
pub use framer::FrameDecoder;
