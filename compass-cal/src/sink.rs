//! Persistence of completed sessions

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::points::POINT_COUNT;
use crate::session::SessionOutcome;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("{path}: {reason}")]
    Io { path: String, reason: String },

    #[error("csv: {0}")]
    Csv(String),
}

/// Destination for completed session records.
pub trait ResultSink: Send {
    fn write_record(&mut self, outcome: &SessionOutcome) -> Result<(), SinkError>;
}

/// Column names, in output order.
pub fn header() -> Vec<String> {
    let mut columns: Vec<String> = [
        "serial_number",
        "firmware",
        "std_dev_err",
        "x_coverage",
        "y_coverage",
        "z_coverage",
        "accel_std_dev_err",
        "x_accel_coverage",
        "y_accel_coverage",
        "z_accel_coverage",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    for phase in ["pre", "post"] {
        for point in 1..=POINT_COUNT {
            for angle in ["heading", "pitch", "roll"] {
                columns.push(format!("{phase}{point}_{angle}"));
            }
        }
    }
    columns
}

/// One row, matching [`header`].
pub fn row(outcome: &SessionOutcome) -> Vec<String> {
    let s = &outcome.score;
    let mut fields = vec![
        outcome.system_info.serial_number.clone(),
        outcome.system_info.firmware.clone(),
    ];
    fields.extend(
        [
            s.std_dev_err,
            s.x_coverage,
            s.y_coverage,
            s.z_coverage,
            s.accel_std_dev_err,
            s.x_accel_coverage,
            s.y_accel_coverage,
            s.z_accel_coverage,
        ]
        .iter()
        .map(|v| v.to_string()),
    );

    for samples in [&outcome.points.pre, &outcome.points.post] {
        for sample in samples.iter() {
            fields.push(sample.heading.to_string());
            fields.push(sample.pitch.to_string());
            fields.push(sample.roll.to_string());
        }
    }
    fields
}

/// Appends one CSV row per session, writing the header into an empty file.
pub struct CsvResultSink {
    path: PathBuf,
}

impl CsvResultSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_error(&self, e: impl std::fmt::Display) -> SinkError {
        SinkError::Io {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        }
    }
}

impl ResultSink for CsvResultSink {
    fn write_record(&mut self, outcome: &SessionOutcome) -> Result<(), SinkError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        let empty = file.metadata().map_err(|e| self.io_error(e))?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if empty {
            writer
                .write_record(header())
                .map_err(|e| SinkError::Csv(e.to_string()))?;
        }
        writer
            .write_record(row(outcome))
            .map_err(|e| SinkError::Csv(e.to_string()))?;
        writer.flush().map_err(|e| self.io_error(e))
    }
}

/// Keeps records in memory. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<SessionOutcome>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<SessionOutcome> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ResultSink for MemorySink {
    fn write_record(&mut self, outcome: &SessionOutcome) -> Result<(), SinkError> {
        let mut records = match self.records.lock() {
            Ok(records) => records,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.push(outcome.clone());
        Ok(())
    }
}
