//! Host-to-compass commands

use std::ops::RangeInclusive;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frame::{encode_frame, DecodeError, Frame};
use crate::ids::{cal_mode, component_id, config_id, frame_id, param_id};

/// Accepted range for the user-calibration point count.
pub const NUM_POINTS_RANGE: RangeInclusive<u32> = 12..=32;

/// Accepted range for magnetic declination in degrees.
pub const DECLINATION_RANGE: RangeInclusive<f32> = -180.0..=180.0;

/// Rejected command argument.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValueError {
    #[error("{name} = {value} outside [{min}, {max}]")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("FIR tap count {0} not one of 0, 4, 8, 16, 32")]
    InvalidTaps(u8),
}

/// Configuration items the calibration engine reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigId {
    Declination,
    StableCheck,
    NumPoints,
    AutoSampling,
}

impl ConfigId {
    pub fn id(self) -> u8 {
        match self {
            ConfigId::Declination => config_id::DECLINATION,
            ConfigId::StableCheck => config_id::USER_CAL_STABLE_CHECK,
            ConfigId::NumPoints => config_id::USER_CAL_NUM_POINTS,
            ConfigId::AutoSampling => config_id::USER_CAL_AUTO_SAMPLING,
        }
    }

    pub fn from_id(id: u8) -> Result<Self, DecodeError> {
        match id {
            config_id::DECLINATION => Ok(ConfigId::Declination),
            config_id::USER_CAL_STABLE_CHECK => Ok(ConfigId::StableCheck),
            config_id::USER_CAL_NUM_POINTS => Ok(ConfigId::NumPoints),
            config_id::USER_CAL_AUTO_SAMPLING => Ok(ConfigId::AutoSampling),
            other => Err(DecodeError::UnknownConfigId(other)),
        }
    }
}

/// A typed configuration value.
///
/// Range-limited values can only be built through the checked constructors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigValue {
    Declination(f32),
    StableCheck(bool),
    NumPoints(u32),
    AutoSampling(bool),
}

impl ConfigValue {
    /// Number of user calibration points, limited to [12, 32].
    pub fn num_points(points: u32) -> Result<Self, ValueError> {
        if !NUM_POINTS_RANGE.contains(&points) {
            return Err(ValueError::OutOfRange {
                name: "num_points",
                value: points as f64,
                min: *NUM_POINTS_RANGE.start() as f64,
                max: *NUM_POINTS_RANGE.end() as f64,
            });
        }
        Ok(ConfigValue::NumPoints(points))
    }

    /// Magnetic declination in degrees, limited to [-180, 180].
    pub fn declination(degrees: f32) -> Result<Self, ValueError> {
        if !DECLINATION_RANGE.contains(&degrees) {
            return Err(ValueError::OutOfRange {
                name: "declination",
                value: degrees as f64,
                min: *DECLINATION_RANGE.start() as f64,
                max: *DECLINATION_RANGE.end() as f64,
            });
        }
        Ok(ConfigValue::Declination(degrees))
    }

    pub fn config_id(&self) -> ConfigId {
        match self {
            ConfigValue::Declination(_) => ConfigId::Declination,
            ConfigValue::StableCheck(_) => ConfigId::StableCheck,
            ConfigValue::NumPoints(_) => ConfigId::NumPoints,
            ConfigValue::AutoSampling(_) => ConfigId::AutoSampling,
        }
    }

    pub(crate) fn put(&self, buf: &mut BytesMut) {
        buf.put_u8(self.config_id().id());
        match *self {
            ConfigValue::Declination(v) => buf.put_f32(v),
            ConfigValue::NumPoints(v) => buf.put_u32(v),
            ConfigValue::StableCheck(v) | ConfigValue::AutoSampling(v) => buf.put_u8(v as u8),
        }
    }

    /// Decode `[config_id][value]` as found in SetConfig and ConfigResp payloads.
    ///
    /// Values are taken as sent; range checks are the host's job before encoding.
    pub(crate) fn parse(frame_id: u8, payload: &[u8]) -> Result<Self, DecodeError> {
        let Some((&id, mut value)) = payload.split_first() else {
            return Err(DecodeError::WrongPayloadLength {
                frame_id,
                expected: 2,
                got: 0,
            });
        };
        let id = ConfigId::from_id(id)?;
        let expected = match id {
            ConfigId::Declination | ConfigId::NumPoints => 4,
            ConfigId::StableCheck | ConfigId::AutoSampling => 1,
        };
        if value.len() != expected {
            return Err(DecodeError::WrongPayloadLength {
                frame_id,
                expected: expected + 1,
                got: payload.len(),
            });
        }

        Ok(match id {
            ConfigId::Declination => ConfigValue::Declination(value.get_f32()),
            ConfigId::NumPoints => ConfigValue::NumPoints(value.get_u32()),
            ConfigId::StableCheck => ConfigValue::StableCheck(value.get_u8() != 0),
            ConfigId::AutoSampling => ConfigValue::AutoSampling(value.get_u8() != 0),
        })
    }
}

/// FIR filter tap count for the heading filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirTaps(u8);

impl FirTaps {
    pub const ALLOWED: [u8; 5] = [0, 4, 8, 16, 32];

    pub fn new(taps: u8) -> Result<Self, ValueError> {
        if Self::ALLOWED.contains(&taps) {
            Ok(Self(taps))
        } else {
            Err(ValueError::InvalidTaps(taps))
        }
    }

    pub fn count(self) -> u8 {
        self.0
    }

    /// Equal-weight coefficients, one per tap.
    pub fn coefficients(self) -> Vec<f64> {
        if self.0 == 0 {
            return Vec::new();
        }
        vec![1.0 / self.0 as f64; self.0 as usize]
    }
}

/// Commands the host sends to the compass module.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    GetModInfo,
    /// Select heading, pitch, roll, distortion and calibration status for GetData.
    SetDataComponents,
    GetData,
    /// Query the FIR filter tap count.
    GetParam,
    GetConfig(ConfigId),
    SetConfig(ConfigValue),
    /// Take one user-calibration sample (auto-sampling disabled).
    TakeSample,
    StartCal { mag_and_accel: bool },
    StopCal,
    SaveCal,
    SetTaps(FirTaps),
    FactoryMagCal,
    FactoryAccelCal,
}

impl Command {
    pub fn frame_id(&self) -> u8 {
        match self {
            Command::GetModInfo => frame_id::GET_MOD_INFO,
            Command::SetDataComponents => frame_id::SET_DATA_COMPONENTS,
            Command::GetData => frame_id::GET_DATA,
            Command::GetParam => frame_id::GET_PARAM,
            Command::GetConfig(_) => frame_id::GET_CONFIG,
            Command::SetConfig(_) => frame_id::SET_CONFIG,
            Command::TakeSample => frame_id::TAKE_USER_CAL_SAMPLE,
            Command::StartCal { .. } => frame_id::START_CAL,
            Command::StopCal => frame_id::STOP_CAL,
            Command::SaveCal => frame_id::SAVE,
            Command::SetTaps(_) => frame_id::SET_PARAM,
            Command::FactoryMagCal => frame_id::FACTORY_MAG_CAL,
            Command::FactoryAccelCal => frame_id::FACTORY_ACCEL_CAL,
        }
    }

    /// Encode the command as a complete frame.
    pub fn encode(&self) -> Bytes {
        let mut payload = BytesMut::new();
        match self {
            Command::SetDataComponents => {
                payload.put_u8(component_id::ORIENTATION.len() as u8);
                payload.put_slice(&component_id::ORIENTATION);
            }
            Command::GetParam => payload.put_u8(param_id::FIR_FILTER),
            Command::GetConfig(id) => payload.put_u8(id.id()),
            Command::SetConfig(value) => value.put(&mut payload),
            Command::StartCal { mag_and_accel } => payload.put_u32(if *mag_and_accel {
                cal_mode::MAG_AND_ACCEL
            } else {
                cal_mode::FULL_RANGE
            }),
            Command::SetTaps(taps) => {
                payload.put_u8(param_id::FIR_FILTER);
                payload.put_u8(param_id::FIR_AXIS);
                payload.put_u8(taps.count());
                for c in taps.coefficients() {
                    payload.put_f64(c);
                }
            }
            Command::GetModInfo
            | Command::GetData
            | Command::TakeSample
            | Command::StopCal
            | Command::SaveCal
            | Command::FactoryMagCal
            | Command::FactoryAccelCal => {}
        }
        encode_frame(self.frame_id(), &payload)
    }

    /// Decode a host-to-compass frame back into a command.
    pub fn from_frame(data: &[u8]) -> Result<Self, DecodeError> {
        let frame = Frame::parse(data)?;
        let payload = frame.payload;
        let expect_len = |expected: usize| {
            if payload.len() == expected {
                Ok(())
            } else {
                Err(DecodeError::WrongPayloadLength {
                    frame_id: frame.id,
                    expected,
                    got: payload.len(),
                })
            }
        };

        match frame.id {
            frame_id::GET_MOD_INFO => expect_len(0).map(|_| Command::GetModInfo),
            frame_id::SET_DATA_COMPONENTS => {
                let n = payload.first().copied().unwrap_or(0) as usize;
                expect_len(n + 1)?;
                Ok(Command::SetDataComponents)
            }
            frame_id::GET_DATA => expect_len(0).map(|_| Command::GetData),
            frame_id::GET_PARAM => {
                expect_len(1)?;
                Ok(Command::GetParam)
            }
            frame_id::GET_CONFIG => {
                expect_len(1)?;
                Ok(Command::GetConfig(ConfigId::from_id(payload[0])?))
            }
            frame_id::SET_CONFIG => Ok(Command::SetConfig(ConfigValue::parse(frame.id, payload)?)),
            frame_id::TAKE_USER_CAL_SAMPLE => expect_len(0).map(|_| Command::TakeSample),
            frame_id::START_CAL => {
                expect_len(4)?;
                let mut p = payload;
                match p.get_u32() {
                    cal_mode::FULL_RANGE => Ok(Command::StartCal {
                        mag_and_accel: false,
                    }),
                    cal_mode::MAG_AND_ACCEL => Ok(Command::StartCal {
                        mag_and_accel: true,
                    }),
                    mode => Err(DecodeError::InvalidValue {
                        frame_id: frame.id,
                        reason: format!("unsupported calibration mode {mode}"),
                    }),
                }
            }
            frame_id::STOP_CAL => expect_len(0).map(|_| Command::StopCal),
            frame_id::SAVE => expect_len(0).map(|_| Command::SaveCal),
            frame_id::SET_PARAM => {
                let count = payload.get(2).copied().unwrap_or(0);
                expect_len(3 + count as usize * 8)?;
                let taps = FirTaps::new(count).map_err(|e| DecodeError::InvalidValue {
                    frame_id: frame.id,
                    reason: e.to_string(),
                })?;
                Ok(Command::SetTaps(taps))
            }
            frame_id::FACTORY_MAG_CAL => expect_len(0).map(|_| Command::FactoryMagCal),
            frame_id::FACTORY_ACCEL_CAL => expect_len(0).map(|_| Command::FactoryAccelCal),
            id => Err(DecodeError::UnknownFrameId(id)),
        }
    }
}
