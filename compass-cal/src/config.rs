//! Calibration configuration
//!
//! Usable as flattened CLI arguments or loaded from JSON. Range-limited values
//! go through the same checked constructors the command encoder uses, so a
//! value that passes here can always be sent to the module.

use std::path::Path;
use std::time::Duration;

use clap::{ArgAction, Args};
use pni_compass::{ConfigValue, ValueError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::points::{DEFAULT_AZIMUTHS, POINT_COUNT};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error(transparent)]
    Value(#[from] ValueError),

    #[error("expected 4 target azimuths, got {0}")]
    AzimuthCount(usize),

    #[error("target azimuth {index} = {value} outside [0, 360)")]
    Azimuth { index: usize, value: f32 },

    #[error("{name} must be a positive number of seconds, got {value}")]
    Timeout { name: &'static str, value: f64 },

    #[error("config file {path}: {reason}")]
    File { path: String, reason: String },
}

/// Parameters for one calibration session.
#[derive(Args, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    #[arg(
        long,
        value_delimiter = ',',
        default_values_t = DEFAULT_AZIMUTHS,
        allow_negative_numbers = true,
        help = "Target azimuths of the four reference points (degrees)",
        long_help = "Comma-separated headings at which the four pre and post reference \
            samples are taken. Post-calibration heading error is reported against these. \
            Exactly four values in [0, 360)."
    )]
    pub target_azimuths: Vec<f32>,

    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        help = "Reject the device's 'could not calibrate' score",
        long_help = "When true (default), a score with all coverage and error terms negative \
            is treated as a failed calibration and is not saved. When false, any score is saved."
    )]
    pub validate_score: bool,

    #[arg(
        long,
        default_value_t = 12,
        help = "Number of user calibration samples [12, 32]"
    )]
    pub num_points: u32,

    #[arg(
        long,
        default_value_t = 0.0,
        allow_negative_numbers = true,
        help = "Magnetic declination in degrees [-180, 180]"
    )]
    pub declination: f32,

    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        help = "Require the module to be still before taking a calibration sample"
    )]
    pub stable_check: bool,

    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        help = "Auto-sampling setting restored when calibration ends"
    )]
    pub auto_sampling: bool,

    #[arg(
        long,
        default_value_t = 2.0,
        help = "Timeout for a single command response (seconds)"
    )]
    pub response_timeout_secs: f64,

    #[arg(
        long,
        default_value_t = 1.0,
        help = "Window for a configuration change to be echoed back (seconds)"
    )]
    pub settle_secs: f64,

    #[arg(
        long,
        default_value_t = 30.0,
        help = "Time allowed for the score after the last calibration sample (seconds)"
    )]
    pub score_timeout_secs: f64,

    #[arg(
        long,
        default_value_t = 5.0,
        help = "Time allowed for the save acknowledgement (seconds)"
    )]
    pub save_timeout_secs: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            target_azimuths: DEFAULT_AZIMUTHS.to_vec(),
            validate_score: true,
            num_points: 12,
            declination: 0.0,
            stable_check: true,
            auto_sampling: true,
            response_timeout_secs: 2.0,
            settle_secs: 1.0,
            score_timeout_secs: 30.0,
            save_timeout_secs: 5.0,
        }
    }
}

impl CalibrationConfig {
    /// Set the calibration point count. Out-of-range values leave the
    /// current value in place.
    pub fn set_num_points(&mut self, points: u32) -> Result<(), ConfigError> {
        ConfigValue::num_points(points)?;
        self.num_points = points;
        Ok(())
    }

    /// Set the magnetic declination. Out-of-range values leave the current
    /// value in place.
    pub fn set_declination(&mut self, degrees: f32) -> Result<(), ConfigError> {
        ConfigValue::declination(degrees)?;
        self.declination = degrees;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.azimuths()?;
        ConfigValue::num_points(self.num_points)?;
        ConfigValue::declination(self.declination)?;

        for (name, value) in [
            ("response_timeout_secs", self.response_timeout_secs),
            ("settle_secs", self.settle_secs),
            ("score_timeout_secs", self.score_timeout_secs),
            ("save_timeout_secs", self.save_timeout_secs),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Timeout { name, value });
            }
        }
        Ok(())
    }

    /// The four target azimuths, checked.
    pub fn azimuths(&self) -> Result<[f32; POINT_COUNT], ConfigError> {
        let azimuths: [f32; POINT_COUNT] = self
            .target_azimuths
            .as_slice()
            .try_into()
            .map_err(|_| ConfigError::AzimuthCount(self.target_azimuths.len()))?;

        for (index, &value) in azimuths.iter().enumerate() {
            if !(0.0..360.0).contains(&value) {
                return Err(ConfigError::Azimuth { index, value });
            }
        }
        Ok(azimuths)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.response_timeout_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs_f64(self.settle_secs)
    }

    pub fn score_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.score_timeout_secs)
    }

    pub fn save_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.save_timeout_secs)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self).map_err(|e| file_error(path, e))?;
        std::fs::write(path, json).map_err(|e| file_error(path, e))
    }

    /// Load and validate a JSON config. Missing fields take their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|e| file_error(path, e))?;
        let config: Self = serde_json::from_str(&json).map_err(|e| file_error(path, e))?;
        config.validate()?;
        Ok(config)
    }
}

fn file_error(path: &Path, e: impl std::fmt::Display) -> ConfigError {
    ConfigError::File {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}
