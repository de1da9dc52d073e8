//! Calibration score acceptance
//!
//! The module reports every coverage and error term as negative when it could
//! not compute a calibration at all. That sentinel is the only thing rejected
//! here; partially negative or low-coverage scores are accepted.

use pni_compass::CalibrationScore;

/// True when the module reported the "could not compute" sentinel.
pub fn is_sentinel(score: &CalibrationScore) -> bool {
    score.x_coverage < 0.0
        && score.y_coverage < 0.0
        && score.z_coverage < 0.0
        && score.std_dev_err < 0.0
}

/// Judge whether a score is usable.
pub fn validate(score: &CalibrationScore) -> bool {
    !is_sentinel(score)
}
