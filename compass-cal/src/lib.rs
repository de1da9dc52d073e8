//! Compass User Calibration
//!
//! Drives the user calibration of the PNI compass module inside an ADCP and
//! checks the result against reference headings.
//!
//! # Overview
//!
//! The calibration process:
//! 1. Identify the ADCP and switch it into compass pass-through mode
//! 2. Disable compass auto-sampling and confirm the module applied it
//! 3. Take four reference samples at the target azimuths
//! 4. Configure and run the module's own calibration, one operator sample at a time
//! 5. Save the calibration if the module's score is usable
//! 6. Take the four reference samples again and compute heading, pitch and roll deltas
//! 7. Restore auto-sampling, return the ADCP to its console and persist the result
//!
//! # Modules
//!
//! - [`orchestrator`] - The calibration state machine
//! - [`points`] - Reference point collection and deltas
//! - [`score`] - Score acceptance
//! - [`results`] - Pass/fail indicators
//! - [`sink`] - Result persistence
//! - [`driver`] - Task wrapper multiplexing operator commands and device events

pub mod config;
pub mod driver;
pub mod error;
pub mod orchestrator;
pub mod points;
pub mod pump;
pub mod results;
pub mod score;
pub mod session;
pub mod sink;

pub use config::{CalibrationConfig, ConfigError};
pub use driver::{spawn_calibration, CalibrationHandle, UserCommand};
pub use error::CalError;
pub use orchestrator::{CalibrationOrchestrator, CancelSignal, DeviceEcho, FactoryReset};
pub use points::{Phase, PointCollector, PointDelta, PointSet, DEFAULT_AZIMUTHS, POINT_COUNT};
pub use pump::spawn_event_pump;
pub use results::{Indicator, TestResult, TestResultTracker, TestResults};
pub use session::{CalStep, CalibrationSession, SessionOutcome, SessionSnapshot};
pub use sink::{CsvResultSink, MemorySink, ResultSink, SinkError};
