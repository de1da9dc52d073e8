//! Compass-to-host events

use bytes::Buf;

use crate::command::ConfigValue;
use crate::frame::{DecodeError, Frame};
use crate::ids::{component_id, frame_id, param_id};

/// Orientation reported by a DataResp frame.
///
/// Components missing from the response stay at zero, which the calibration
/// engine treats as a missing-sample sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OrientationSample {
    /// Heading in degrees
    pub heading: f32,
    /// Pitch in degrees
    pub pitch: f32,
    /// Roll in degrees
    pub roll: f32,
    /// Magnetic distortion detected
    pub distortion: bool,
    /// Module reports a valid user calibration
    pub calibrated: bool,
}

/// User-calibration quality metrics reported by the module.
///
/// All fields negative is the module's way of saying it could not compute a
/// calibration.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CalibrationScore {
    pub std_dev_err: f32,
    pub x_coverage: f32,
    pub y_coverage: f32,
    pub z_coverage: f32,
    pub x_accel_coverage: f32,
    pub y_accel_coverage: f32,
    pub z_accel_coverage: f32,
    pub accel_std_dev_err: f32,
}

impl CalibrationScore {
    const WIRE_LEN: usize = 32;

    fn parse(mut p: &[u8]) -> Self {
        Self {
            std_dev_err: p.get_f32(),
            x_coverage: p.get_f32(),
            y_coverage: p.get_f32(),
            z_coverage: p.get_f32(),
            x_accel_coverage: p.get_f32(),
            y_accel_coverage: p.get_f32(),
            z_accel_coverage: p.get_f32(),
            accel_std_dev_err: p.get_f32(),
        }
    }
}

/// Module identification from ModInfoResp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub kind: String,
    pub revision: String,
}

/// Decoded message from the compass module.
#[derive(Debug, Clone, PartialEq)]
pub enum CompassEvent {
    /// Number of user-calibration samples taken so far
    SampleCount(u32),
    Score(CalibrationScore),
    DataResponse(OrientationSample),
    FactoryMagCalDone,
    FactoryAccelCalDone,
    SaveDone,
    /// Save rejected with a non-zero module error code
    SaveFailed(u16),
    NumPoints(u32),
    Declination(f32),
    StableCheck(bool),
    AutoSampling(bool),
    FirTaps(u8),
    ModuleInfo(ModuleInfo),
    SetConfigDone,
    SetParamDone,
}

impl CompassEvent {
    /// Decode one complete frame.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        Self::from_frame(&Frame::parse(data)?)
    }

    /// Decode the payload of an already validated frame.
    pub fn from_frame(frame: &Frame<'_>) -> Result<Self, DecodeError> {
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
            frame_id::MOD_INFO_RESP => {
                expect_len(8)?;
                Ok(CompassEvent::ModuleInfo(ModuleInfo {
                    kind: ascii_field(&payload[..4]),
                    revision: ascii_field(&payload[4..]),
                }))
            }
            frame_id::DATA_RESP => Ok(CompassEvent::DataResponse(parse_orientation(payload)?)),
            frame_id::CONFIG_RESP => Ok(match ConfigValue::parse(frame.id, payload)? {
                ConfigValue::Declination(v) => CompassEvent::Declination(v),
                ConfigValue::StableCheck(v) => CompassEvent::StableCheck(v),
                ConfigValue::NumPoints(v) => CompassEvent::NumPoints(v),
                ConfigValue::AutoSampling(v) => CompassEvent::AutoSampling(v),
            }),
            frame_id::PARAM_RESP => {
                if payload.len() < 3 || payload[0] != param_id::FIR_FILTER {
                    return Err(DecodeError::InvalidValue {
                        frame_id: frame.id,
                        reason: "expected FIR filter parameter".to_string(),
                    });
                }
                let count = payload[2];
                expect_len(3 + count as usize * 8)?;
                Ok(CompassEvent::FirTaps(count))
            }
            frame_id::SAVE_DONE => {
                expect_len(2)?;
                match u16::from_be_bytes([payload[0], payload[1]]) {
                    0 => Ok(CompassEvent::SaveDone),
                    code => Ok(CompassEvent::SaveFailed(code)),
                }
            }
            frame_id::USER_CAL_SAMP_COUNT => {
                expect_len(4)?;
                let mut p = payload;
                Ok(CompassEvent::SampleCount(p.get_u32()))
            }
            frame_id::USER_CAL_SCORE => {
                expect_len(CalibrationScore::WIRE_LEN)?;
                Ok(CompassEvent::Score(CalibrationScore::parse(payload)))
            }
            frame_id::SET_CONFIG_DONE => expect_len(0).map(|_| CompassEvent::SetConfigDone),
            frame_id::SET_PARAM_DONE => expect_len(0).map(|_| CompassEvent::SetParamDone),
            frame_id::FACTORY_MAG_CAL_DONE => {
                expect_len(0).map(|_| CompassEvent::FactoryMagCalDone)
            }
            frame_id::FACTORY_ACCEL_CAL_DONE => {
                expect_len(0).map(|_| CompassEvent::FactoryAccelCalDone)
            }
            id => Err(DecodeError::UnknownFrameId(id)),
        }
    }
}

fn ascii_field(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(['\0', ' '])
        .to_string()
}

/// Parse `[count][id value]...` into an orientation sample.
fn parse_orientation(payload: &[u8]) -> Result<OrientationSample, DecodeError> {
    let short = |got: usize| DecodeError::WrongPayloadLength {
        frame_id: frame_id::DATA_RESP,
        expected: got + 1,
        got,
    };

    let mut p = payload;
    if !p.has_remaining() {
        return Err(short(0));
    }
    let count = p.get_u8();
    let mut sample = OrientationSample::default();

    for _ in 0..count {
        if !p.has_remaining() {
            return Err(short(payload.len()));
        }
        let id = p.get_u8();
        let width = match id {
            component_id::HEADING | component_id::PITCH | component_id::ROLL => 4,
            component_id::DISTORTION | component_id::CAL_STATUS => 1,
            other => return Err(DecodeError::UnknownComponentId(other)),
        };
        if p.remaining() < width {
            return Err(short(payload.len()));
        }
        match id {
            component_id::HEADING => sample.heading = p.get_f32(),
            component_id::PITCH => sample.pitch = p.get_f32(),
            component_id::ROLL => sample.roll = p.get_f32(),
            component_id::DISTORTION => sample.distortion = p.get_u8() != 0,
            _ => sample.calibrated = p.get_u8() != 0,
        }
    }

    if p.has_remaining() {
        return Err(DecodeError::WrongPayloadLength {
            frame_id: frame_id::DATA_RESP,
            expected: payload.len() - p.remaining(),
            got: payload.len(),
        });
    }

    Ok(sample)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_frame;
    use crate::ids::config_id;
    use approx::assert_relative_eq;

    fn data_resp(heading: f32, pitch: f32, roll: f32) -> Vec<u8> {
        let mut payload = vec![5];
        payload.push(component_id::HEADING);
        payload.extend_from_slice(&heading.to_be_bytes());
        payload.push(component_id::PITCH);
        payload.extend_from_slice(&pitch.to_be_bytes());
        payload.push(component_id::ROLL);
        payload.extend_from_slice(&roll.to_be_bytes());
        payload.extend_from_slice(&[component_id::DISTORTION, 0, component_id::CAL_STATUS, 1]);
        encode_frame(frame_id::DATA_RESP, &payload).to_vec()
    }

    #[test]
    fn test_decode_data_response() {
        let event = CompassEvent::decode(&data_resp(91.5, -2.25, 178.0)).unwrap();
        let CompassEvent::DataResponse(sample) = event else {
            panic!("expected data response");
        };
        assert_relative_eq!(sample.heading, 91.5);
        assert_relative_eq!(sample.pitch, -2.25);
        assert_relative_eq!(sample.roll, 178.0);
        assert!(!sample.distortion);
        assert!(sample.calibrated);
    }

    #[test]
    fn test_partial_data_response_leaves_zero() {
        let mut payload = vec![1, component_id::HEADING];
        payload.extend_from_slice(&45.0f32.to_be_bytes());
        let frame = encode_frame(frame_id::DATA_RESP, &payload);

        let event = CompassEvent::decode(&frame).unwrap();
        assert_eq!(
            event,
            CompassEvent::DataResponse(OrientationSample {
                heading: 45.0,
                ..Default::default()
            })
        );
    }

    #[test]
    fn test_data_response_unknown_component() {
        let frame = encode_frame(frame_id::DATA_RESP, &[1, 99, 0, 0, 0, 0]);
        assert_eq!(
            CompassEvent::decode(&frame),
            Err(DecodeError::UnknownComponentId(99))
        );
    }

    #[test]
    fn test_decode_score_field_order() {
        let values: [f32; 8] = [0.05, 90.0, 88.0, 60.0, 70.0, 71.0, 72.0, 0.2];
        let payload: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        let frame = encode_frame(frame_id::USER_CAL_SCORE, &payload);

        let CompassEvent::Score(score) = CompassEvent::decode(&frame).unwrap() else {
            panic!("expected score");
        };
        assert_relative_eq!(score.std_dev_err, 0.05);
        assert_relative_eq!(score.x_coverage, 90.0);
        assert_relative_eq!(score.y_coverage, 88.0);
        assert_relative_eq!(score.z_coverage, 60.0);
        assert_relative_eq!(score.x_accel_coverage, 70.0);
        assert_relative_eq!(score.y_accel_coverage, 71.0);
        assert_relative_eq!(score.z_accel_coverage, 72.0);
        assert_relative_eq!(score.accel_std_dev_err, 0.2);
    }

    #[test]
    fn test_decode_config_responses() {
        let frame = encode_frame(
            frame_id::CONFIG_RESP,
            &[config_id::USER_CAL_AUTO_SAMPLING, 0],
        );
        assert_eq!(
            CompassEvent::decode(&frame),
            Ok(CompassEvent::AutoSampling(false))
        );

        let frame = encode_frame(
            frame_id::CONFIG_RESP,
            &[config_id::USER_CAL_NUM_POINTS, 0, 0, 0, 18],
        );
        assert_eq!(CompassEvent::decode(&frame), Ok(CompassEvent::NumPoints(18)));

        let frame = encode_frame(frame_id::CONFIG_RESP, &[2, 0]);
        assert_eq!(
            CompassEvent::decode(&frame),
            Err(DecodeError::UnknownConfigId(2))
        );
    }

    #[test]
    fn test_decode_save_done() {
        let ok = encode_frame(frame_id::SAVE_DONE, &[0, 0]);
        assert_eq!(CompassEvent::decode(&ok), Ok(CompassEvent::SaveDone));

        let failed = encode_frame(frame_id::SAVE_DONE, &[0, 3]);
        assert_eq!(CompassEvent::decode(&failed), Ok(CompassEvent::SaveFailed(3)));
    }

    #[test]
    fn test_decode_module_info() {
        let frame = encode_frame(frame_id::MOD_INFO_RESP, b"PRIM1.05");
        assert_eq!(
            CompassEvent::decode(&frame),
            Ok(CompassEvent::ModuleInfo(ModuleInfo {
                kind: "PRIM".to_string(),
                revision: "1.05".to_string(),
            }))
        );
    }

    #[test]
    fn test_host_frame_is_not_an_event() {
        let frame = encode_frame(frame_id::GET_DATA, &[]);
        assert_eq!(
            CompassEvent::decode(&frame),
            Err(DecodeError::UnknownFrameId(frame_id::GET_DATA))
        );
    }
}
