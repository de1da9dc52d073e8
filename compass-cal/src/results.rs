//! Pass/fail indicators for the calibration steps

use std::fmt;

/// State of one indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestResult {
    #[default]
    NotStarted,
    InProgress,
    Pass,
    Fail,
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TestResult::NotStarted => "not started",
            TestResult::InProgress => "in progress",
            TestResult::Pass => "PASS",
            TestResult::Fail => "FAIL",
        };
        f.write_str(text)
    }
}

/// The five step-health indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    /// ADCP answered the break and reported its system info
    DeviceComm,
    /// Compass answered in pass-through mode
    CompassComm,
    CalibrationComplete,
    CalibrationSaved,
    /// Device-reported score was usable
    CalibrationGood,
}

impl Indicator {
    pub const ALL: [Indicator; 5] = [
        Indicator::DeviceComm,
        Indicator::CompassComm,
        Indicator::CalibrationComplete,
        Indicator::CalibrationSaved,
        Indicator::CalibrationGood,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Indicator::DeviceComm => "device comm",
            Indicator::CompassComm => "compass comm",
            Indicator::CalibrationComplete => "calibration complete",
            Indicator::CalibrationSaved => "calibration saved",
            Indicator::CalibrationGood => "calibration good",
        }
    }
}

/// Snapshot of all five indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TestResults {
    pub device_comm: TestResult,
    pub compass_comm: TestResult,
    pub calibration_complete: TestResult,
    pub calibration_saved: TestResult,
    pub calibration_good: TestResult,
}

impl TestResults {
    pub fn get(&self, indicator: Indicator) -> TestResult {
        match indicator {
            Indicator::DeviceComm => self.device_comm,
            Indicator::CompassComm => self.compass_comm,
            Indicator::CalibrationComplete => self.calibration_complete,
            Indicator::CalibrationSaved => self.calibration_saved,
            Indicator::CalibrationGood => self.calibration_good,
        }
    }

    fn slot(&mut self, indicator: Indicator) -> &mut TestResult {
        match indicator {
            Indicator::DeviceComm => &mut self.device_comm,
            Indicator::CompassComm => &mut self.compass_comm,
            Indicator::CalibrationComplete => &mut self.calibration_complete,
            Indicator::CalibrationSaved => &mut self.calibration_saved,
            Indicator::CalibrationGood => &mut self.calibration_good,
        }
    }
}

/// Holds the indicators for the current session.
///
/// Only the orchestrator writes to it; everyone else sees copies.
#[derive(Debug, Default)]
pub struct TestResultTracker {
    results: TestResults,
}

impl TestResultTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, indicator: Indicator) -> TestResult {
        self.results.get(indicator)
    }

    pub fn results(&self) -> TestResults {
        self.results
    }

    pub(crate) fn set(&mut self, indicator: Indicator, result: TestResult) {
        *self.results.slot(indicator) = result;
    }

    /// Mark as failed unless the indicator already passed.
    pub(crate) fn fail_unless_passed(&mut self, indicator: Indicator) {
        let slot = self.results.slot(indicator);
        if *slot != TestResult::Pass {
            *slot = TestResult::Fail;
        }
    }

    pub(crate) fn reset(&mut self) {
        self.results = TestResults::default();
    }
}
