use std::time::Duration;

use adcp_link::CommFailure;
use thiserror::Error;

use crate::config::ConfigError;
use crate::session::CalStep;
use crate::sink::SinkError;

/// Why a calibration operation did not succeed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalError {
    #[error("communication failure: {0}")]
    Comm(#[from] CommFailure),

    /// A configuration change was not reflected by the module
    #[error("{setting} not applied: expected {expected}, observed {observed}")]
    Verification {
        setting: &'static str,
        expected: String,
        observed: String,
    },

    #[error("timed out after {after:?} waiting for {waiting_for}")]
    TimedOut {
        waiting_for: &'static str,
        after: Duration,
    },

    /// No orientation sample arrived for a reference point; the operator may retry
    #[error("no orientation sample for point {point} within {after:?}")]
    SampleMissed { point: u8, after: Duration },

    /// The operator cancelled while a hardware exchange was outstanding
    #[error("cancelled by operator")]
    Cancelled,

    #[error("{op} not valid in step {step}")]
    InvalidStep { op: &'static str, step: CalStep },

    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("result sink: {0}")]
    Sink(#[from] SinkError),
}

impl CalError {
    /// Fatal errors abort the session through the restore path.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CalError::Comm(_) | CalError::Verification { .. } | CalError::TimedOut { .. }
        )
    }
}
