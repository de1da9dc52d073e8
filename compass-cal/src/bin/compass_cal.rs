//! Compass Calibration Controller
//!
//! Runs the user calibration of the PNI compass inside an ADCP over a serial
//! port. The operator rotates the instrument to each reference heading and
//! presses Enter to take a sample; `q` or Ctrl-C cancels and restores the
//! device.

use std::io::BufRead;
use std::path::PathBuf;
use std::thread;

use adcp_link::SerialLink;
use anyhow::{Context, Result};
use clap::Parser;
use compass_cal::{
    spawn_calibration, spawn_event_pump, CalStep, CalibrationConfig, CalibrationHandle,
    CalibrationOrchestrator, CsvResultSink, FactoryReset, Indicator, SessionOutcome,
    SessionSnapshot, POINT_COUNT,
};
use pni_compass::FirTaps;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Compass Calibration Controller
#[derive(Parser, Debug)]
#[command(name = "compass_cal")]
#[command(
    about = "User calibration of the PNI compass inside an ADCP",
    long_about = "Compass Calibration Controller for the PNI compass module inside an ADCP.\n\n\
        The calibration process:\n  \
        1. Wakes the ADCP, reads its serial number and enters compass pass-through mode\n  \
        2. Disables compass auto-sampling and confirms it\n  \
        3. Takes four reference samples at the target azimuths\n  \
        4. Runs the module's user calibration, one sample per Enter press\n  \
        5. Saves the calibration if the module's score is usable\n  \
        6. Takes the four reference samples again and reports the deltas\n  \
        7. Appends the result to the output CSV\n\n\
        Press Enter to take a sample, q then Enter (or Ctrl-C) to cancel."
)]
struct Args {
    #[arg(
        long,
        help = "Serial port the ADCP is connected to",
        long_help = "Serial port of the ADCP console, e.g. /dev/ttyUSB0 or COM3."
    )]
    port: String,

    #[arg(long, default_value_t = 115200, help = "Serial baud rate")]
    baud: u32,

    #[arg(
        long,
        help = "Calibrate the accelerometer as well as the magnetometer",
        long_help = "Run the combined magnetometer and accelerometer calibration mode. \
            Without this flag only the magnetometer is calibrated."
    )]
    mag_and_accel: bool,

    #[arg(
        long,
        help = "Load calibration parameters from a JSON file",
        long_help = "Load calibration parameters from a JSON file. Values in the file replace \
            the command-line calibration parameters; missing fields take their defaults."
    )]
    config: Option<PathBuf>,

    #[arg(long, help = "Write the effective calibration parameters to a JSON file")]
    save_config: Option<PathBuf>,

    #[arg(
        long,
        default_value = "compass_cal.csv",
        help = "CSV file completed sessions are appended to"
    )]
    output_csv: PathBuf,

    #[arg(
        long,
        value_enum,
        help = "Restore the factory calibration instead of calibrating",
        long_help = "Restore and save the factory magnetometer, accelerometer or both \
            calibrations, then exit without running a user calibration."
    )]
    factory_reset: Option<FactoryReset>,

    #[arg(
        long,
        help = "Set the heading FIR filter length (0, 4, 8, 16 or 32) before calibrating"
    )]
    fir_taps: Option<u8>,

    #[command(flatten)]
    calibration: CalibrationConfig,
}

/// Forward operator keystrokes to the session.
///
/// Runs on a plain thread so a blocked stdin read never holds up shutdown.
fn spawn_operator_input(handle: CalibrationHandle) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let sent = if line.trim().eq_ignore_ascii_case("q") {
                handle.cancel()
            } else {
                handle.take_sample()
            };
            if !sent {
                break;
            }
        }
    });
}

fn prompt(snapshot: &SessionSnapshot) -> Option<String> {
    match snapshot.step {
        CalStep::PrePoint(n) | CalStep::PostPoint(n) => {
            let phase = if matches!(snapshot.step, CalStep::PrePoint(_)) {
                "pre"
            } else {
                "post"
            };
            Some(format!(
                "Point heading to reference {} ({phase}) and press Enter",
                n
            ))
        }
        CalStep::RunningDeviceCal if snapshot.sample_count < snapshot.num_points => Some(format!(
            "Calibration sample {}/{}: reorient and press Enter",
            snapshot.sample_count + 1,
            snapshot.num_points
        )),
        CalStep::RunningDeviceCal => Some("Waiting for the module's score...".to_string()),
        _ => None,
    }
}

/// Remembers what the console last showed so repeated snapshots stay quiet.
#[derive(Debug, Default)]
struct Console {
    prompt: Option<String>,
    status: Option<String>,
}

impl Console {
    /// Prompt and status lines that changed since the previous snapshot.
    fn update(&mut self, snapshot: &SessionSnapshot) -> (Option<String>, Option<String>) {
        let prompt = changed(&mut self.prompt, prompt(snapshot));
        let status = changed(&mut self.status, snapshot.status.clone());
        (prompt, status)
    }
}

fn changed(last: &mut Option<String>, next: Option<String>) -> Option<String> {
    let fresh = next.as_ref().filter(|_| next != *last).cloned();
    *last = next;
    fresh
}

fn print_summary(outcome: &SessionOutcome) {
    println!();
    println!("Compass Calibration Summary");
    println!("===========================");
    println!(
        "ADCP:      SN {} FW {}",
        outcome.system_info.serial_number, outcome.system_info.firmware
    );
    if outcome.cancelled {
        println!("Session cancelled");
    }
    if let Some(status) = &outcome.status {
        println!("Status:    {status}");
    }

    let s = &outcome.score;
    println!(
        "Score:     std dev err {:.3}, coverage x {:.1} y {:.1} z {:.1}",
        s.std_dev_err, s.x_coverage, s.y_coverage, s.z_coverage
    );
    println!(
        "           accel std dev err {:.3}, accel coverage x {:.1} y {:.1} z {:.1}",
        s.accel_std_dev_err, s.x_accel_coverage, s.y_accel_coverage, s.z_accel_coverage
    );

    println!();
    println!("Point  Azimuth  dHeading  dPitch  dRoll");
    for point in 1..=POINT_COUNT as u8 {
        let i = point as usize - 1;
        let d = &outcome.points.deltas[i];
        let flag = if outcome.points.is_bad(point) {
            "  (missing sample)"
        } else {
            ""
        };
        println!(
            "{:>5}  {:>7.1}  {:>8.2}  {:>6.2}  {:>5.2}{}",
            point, outcome.points.target_azimuths[i], d.heading, d.pitch, d.roll, flag
        );
    }

    println!();
    for indicator in Indicator::ALL {
        println!(
            "{:<22} {}",
            indicator.label(),
            outcome.results.get(indicator)
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => CalibrationConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => args.calibration.clone(),
    };
    config.validate().context("Invalid calibration parameters")?;
    if let Some(path) = &args.save_config {
        config
            .save_to_file(path)
            .with_context(|| format!("Failed to save config to {}", path.display()))?;
        info!("Saved calibration parameters to {}", path.display());
    }

    info!("Compass Calibration Controller");
    info!("==============================");
    info!("Port:              {} @ {} baud", args.port, args.baud);
    info!("Mode:              {}", if args.mag_and_accel { "mag + accel" } else { "mag" });
    info!("Target azimuths:   {:?}", config.target_azimuths);
    info!("Num points:        {}", config.num_points);
    info!("Declination:       {:.2}", config.declination);
    info!("Validate score:    {}", config.validate_score);
    info!("Output CSV:        {}", args.output_csv.display());
    info!("");

    let (bytes_tx, bytes_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let link = SerialLink::open(&args.port, args.baud, bytes_tx)
        .with_context(|| format!("Failed to open {}", args.port))?;
    let _pump = spawn_event_pump(bytes_rx, events_tx);

    let sink = CsvResultSink::new(&args.output_csv);
    let mut orchestrator = CalibrationOrchestrator::new(link, sink, config, events_rx)?;

    if let Some(which) = args.factory_reset {
        orchestrator
            .restore_factory_calibration(which)
            .await
            .context("Factory calibration restore failed")?;
        info!("Factory calibration restored");
        return Ok(());
    }

    if let Some(taps) = args.fir_taps {
        let taps = FirTaps::new(taps)?;
        orchestrator
            .set_filter_taps(taps)
            .await
            .context("Failed to set the heading filter")?;
    }

    let (handle, task) = spawn_calibration(orchestrator, args.mag_and_accel);
    spawn_operator_input(handle.clone());

    let ctrl_c_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, cancelling calibration...");
            ctrl_c_handle.cancel();
        }
    });

    let mut snapshots = handle.snapshots();
    let printer = tokio::spawn(async move {
        let mut console = Console::default();
        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow_and_update().clone();
            let (prompt, status) = console.update(&snapshot);
            if let Some(status) = status {
                info!("Status: {}", status);
            }
            if let Some(text) = prompt {
                println!("{text}");
            }
        }
    });

    let outcome = task.await.context("Calibration task failed")?;
    drop(handle);
    printer.abort();

    print_summary(&outcome);
    if !outcome.cancelled && outcome.status.is_none() {
        info!("Result appended to {}", args.output_csv.display());
    }
    Ok(())
}
