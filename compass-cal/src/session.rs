//! Calibration steps, session state and what callers get to see of it

use std::fmt;

use adcp_link::SystemInfo;
use pni_compass::{CalibrationScore, OrientationSample};
use tracing::info;

use crate::points::PointSet;
use crate::results::TestResults;

/// Steps of the calibration procedure, in order.
///
/// `PrePoint(n)` and `PostPoint(n)` wait for reference point `n` (1..=4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CalStep {
    #[default]
    Idle,
    StartPrePoint,
    PrePoint(u8),
    StopPrePoint,
    RunningDeviceCal,
    StartPostPoint,
    PostPoint(u8),
    StopPostPoint,
    Complete,
    Aborting,
}

impl CalStep {
    /// Steps in which `take_sample` does something.
    pub fn accepts_sample(self) -> bool {
        matches!(
            self,
            CalStep::PrePoint(_) | CalStep::PostPoint(_) | CalStep::RunningDeviceCal
        )
    }
}

impl fmt::Display for CalStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalStep::PrePoint(n) => write!(f, "PrePoint({n})"),
            CalStep::PostPoint(n) => write!(f, "PostPoint({n})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Authoritative state of one calibration run. Owned by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalibrationSession {
    pub step: CalStep,
    /// Reference points stored so far in the current phase
    pub point_index: u8,
    pub running: bool,
    pub mag_and_accel: bool,
    pub cancel_requested: bool,
}

impl CalibrationSession {
    pub(crate) fn begin(mag_and_accel: bool) -> Self {
        Self {
            step: CalStep::Idle,
            point_index: 0,
            running: true,
            mag_and_accel,
            cancel_requested: false,
        }
    }

    pub(crate) fn advance(&mut self, to: CalStep) {
        info!("Calibration step {} -> {}", self.step, to);
        self.step = to;
    }
}

/// Read-only projection of the orchestrator state, published on every change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub step: CalStep,
    pub point_index: u8,
    pub running: bool,
    pub mag_and_accel: bool,
    /// Calibration samples the module has accepted
    pub sample_count: u32,
    pub num_points: u32,
    pub results: TestResults,
    pub last_sample: Option<OrientationSample>,
    pub score: Option<CalibrationScore>,
    pub status: Option<String>,
}

/// Final record of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub system_info: SystemInfo,
    pub points: PointSet,
    /// All zero if the module never reported a score
    pub score: CalibrationScore,
    pub results: TestResults,
    pub cancelled: bool,
    /// Why the session ended early, if it did
    pub status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_display() {
        assert_eq!(CalStep::PrePoint(3).to_string(), "PrePoint(3)");
        assert_eq!(CalStep::RunningDeviceCal.to_string(), "RunningDeviceCal");
    }

    #[test]
    fn test_sample_steps() {
        assert!(CalStep::PrePoint(1).accepts_sample());
        assert!(CalStep::RunningDeviceCal.accepts_sample());
        assert!(!CalStep::StopPrePoint.accepts_sample());
        assert!(!CalStep::Idle.accepts_sample());
        assert!(!CalStep::Complete.accepts_sample());
        assert!(!CalStep::Aborting.accepts_sample());
    }
}
