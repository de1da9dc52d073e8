//! Calibration state machine
//!
//! The orchestrator is the single owner of the session state. Device events
//! reach it through one channel, fed by the event pump, and are applied in
//! arrival order on the orchestrator's own task. Steps that need a hardware
//! round trip wait on that channel for the echoing event with a deadline
//! instead of sleeping.
//!
//! Compass pass-through mode is held by a [`CompassMode`] guard from the
//! start of a session until it completes or aborts; every exit path goes
//! through [`CompassMode::release`], and the guard releases on drop.
//! Dropping the orchestrator mid-session cancels it first, so the module
//! also gets its calibration stopped and auto-sampling restored.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use adcp_link::{CommFailure, CompassMode, DeviceLink, SystemInfo};
use clap::ValueEnum;
use pni_compass::{
    CalibrationScore, Command, CompassEvent, ConfigId, ConfigValue, FirTaps, ModuleInfo,
    OrientationSample,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::select;
use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{CalibrationConfig, ConfigError};
use crate::error::CalError;
use crate::points::{Phase, PointCollector, PointSet, POINT_COUNT};
use crate::results::{Indicator, TestResult, TestResultTracker, TestResults};
use crate::score;
use crate::session::{CalStep, CalibrationSession, SessionOutcome, SessionSnapshot};
use crate::sink::ResultSink;

/// Factory calibration to restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FactoryReset {
    Mag,
    Accel,
    Both,
}

/// Configuration values as last reported by the module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceEcho {
    pub auto_sampling: Option<bool>,
    pub num_points: Option<u32>,
    pub declination: Option<f32>,
    pub stable_check: Option<bool>,
    pub fir_taps: Option<u8>,
    pub module: Option<ModuleInfo>,
}

/// Cancels a session from another task, including while the orchestrator
/// is waiting on the module.
#[derive(Debug, Clone)]
pub struct CancelSignal(Arc<watch::Sender<bool>>);

impl CancelSignal {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    waiting_for: &'static str,
    after: Duration,
}

/// Drives one calibration session at a time over a [`DeviceLink`].
pub struct CalibrationOrchestrator<L: DeviceLink, S: ResultSink> {
    link: CompassMode<L>,
    sink: S,
    config: CalibrationConfig,
    events: UnboundedReceiver<CompassEvent>,
    session: CalibrationSession,
    collector: PointCollector,
    tracker: TestResultTracker,
    echo: DeviceEcho,
    system_info: SystemInfo,
    score: Option<CalibrationScore>,
    last_sample: Option<OrientationSample>,
    /// Calibration samples accepted by the module in the current run
    sample_count: u32,
    save_pending: bool,
    /// Sentinel score or rejected save; the next sample restarts the run
    restart_pending: bool,
    deadline: Option<Deadline>,
    status: Option<String>,
    outcome: Option<SessionOutcome>,
    snapshot: watch::Sender<SessionSnapshot>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl<L: DeviceLink, S: ResultSink> CalibrationOrchestrator<L, S> {
    /// Build an orchestrator. `events` must carry everything the link receives,
    /// decoded, typically from [`spawn_event_pump`](crate::spawn_event_pump).
    pub fn new(
        link: L,
        sink: S,
        config: CalibrationConfig,
        events: UnboundedReceiver<CompassEvent>,
    ) -> Result<Self, CalError> {
        config.validate()?;
        let azimuths = config.azimuths()?;
        let (snapshot, _) = watch::channel(SessionSnapshot {
            num_points: config.num_points,
            ..Default::default()
        });
        let (cancel_tx, cancel_rx) = watch::channel(false);

        Ok(Self {
            link: CompassMode::new(link),
            sink,
            config,
            events,
            session: CalibrationSession::default(),
            collector: PointCollector::new(azimuths),
            tracker: TestResultTracker::new(),
            echo: DeviceEcho::default(),
            system_info: SystemInfo::default(),
            score: None,
            last_sample: None,
            sample_count: 0,
            save_pending: false,
            restart_pending: false,
            deadline: None,
            status: None,
            outcome: None,
            snapshot,
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
        })
    }

    pub fn session(&self) -> &CalibrationSession {
        &self.session
    }

    pub fn step(&self) -> CalStep {
        self.session.step
    }

    pub fn results(&self) -> TestResults {
        self.tracker.results()
    }

    pub fn points(&self) -> &PointSet {
        self.collector.points()
    }

    pub fn score(&self) -> Option<&CalibrationScore> {
        self.score.as_ref()
    }

    pub fn device_echo(&self) -> &DeviceEcho {
        &self.echo
    }

    pub fn system_info(&self) -> &SystemInfo {
        &self.system_info
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn link(&self) -> &L {
        self.link.link()
    }

    pub fn in_compass_mode(&self) -> bool {
        self.link.is_active()
    }

    /// Receiver for state snapshots, updated after every operation and event.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn cancel_signal(&self) -> CancelSignal {
        CancelSignal(self.cancel_tx.clone())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            step: self.session.step,
            point_index: self.session.point_index,
            running: self.session.running,
            mag_and_accel: self.session.mag_and_accel,
            sample_count: self.sample_count,
            num_points: self.config.num_points,
            results: self.tracker.results(),
            last_sample: self.last_sample,
            score: self.score,
            status: self.status.clone(),
        }
    }

    /// Outcome of the last finished session, if any.
    pub fn outcome(&self) -> Option<&SessionOutcome> {
        self.outcome.as_ref()
    }

    pub fn take_outcome(&mut self) -> Option<SessionOutcome> {
        self.outcome.take()
    }

    /// Begin a session: identify the ADCP, enter compass mode, disable
    /// auto-sampling and confirm it, then wait for the first pre point.
    ///
    /// A fatal failure restores the device and ends the session before this
    /// returns; the outcome is then available from [`outcome`](Self::outcome).
    pub async fn start(&mut self, mag_and_accel: bool) -> Result<(), CalError> {
        if self.session.running {
            return Err(CalError::InvalidStep {
                op: "start",
                step: self.session.step,
            });
        }
        self.reset(mag_and_accel);
        info!(
            "Starting {} calibration",
            if mag_and_accel {
                "magnetometer and accelerometer"
            } else {
                "magnetometer"
            }
        );
        let result = self.start_session().await;
        self.finish_op(result)
    }

    /// Operator action: capture the current reference point, or take one
    /// calibration sample while the device calibration runs.
    pub async fn take_sample(&mut self) -> Result<(), CalError> {
        let step = self.session.step;
        if !self.session.running || !step.accepts_sample() {
            return Err(CalError::InvalidStep {
                op: "take_sample",
                step,
            });
        }
        let result = match step {
            CalStep::PrePoint(point) => self.capture_point(Phase::Pre, point).await,
            CalStep::PostPoint(point) => self.capture_point(Phase::Post, point).await,
            _ => self.take_calibration_sample(),
        };
        self.finish_op(result)
    }

    /// Stop the session, returning the device to normal operation.
    ///
    /// Does nothing when no session is running or an abort is already under way.
    pub fn cancel(&mut self) {
        if !self.session.running || self.session.step == CalStep::Aborting {
            debug!("Cancel ignored in step {}", self.session.step);
            return;
        }
        info!("Cancelling calibration in step {}", self.session.step);
        self.session.cancel_requested = true;
        self.abort(true, None);
        self.publish();
    }

    /// Apply one device event. Events arriving outside a running session
    /// are discarded.
    pub fn on_event(&mut self, event: CompassEvent) -> Result<(), CalError> {
        let result = self.apply_event(event);
        self.finish_op(result)
    }

    /// Wait for the next device event and apply it, or for the pending
    /// hardware deadline to pass. Returns false once the event stream closed.
    pub async fn poll_device(&mut self) -> bool {
        let at = self.deadline.map(|d| d.at);
        let received = select! {
            biased;
            Ok(()) = self.cancel_rx.changed() => {
                if *self.cancel_rx.borrow_and_update() {
                    self.cancel();
                }
                return true;
            }
            received = next_event(&mut self.events, at) => received,
        };

        let Some(next) = received else {
            if let Some(deadline) = self.deadline.take() {
                let _ = self.finish_op(Err(CalError::TimedOut {
                    waiting_for: deadline.waiting_for,
                    after: deadline.after,
                }));
            }
            return true;
        };

        match next {
            Some(event) => {
                let _ = self.on_event(event);
                true
            }
            None => {
                if self.session.running {
                    let _ = self.finish_op(Err(CommFailure::Disconnected.into()));
                }
                false
            }
        }
    }

    /// Restore the factory magnetometer and/or accelerometer calibration
    /// and save it. Only allowed between sessions.
    pub async fn restore_factory_calibration(&mut self, which: FactoryReset) -> Result<(), CalError> {
        if self.session.running {
            return Err(CalError::InvalidStep {
                op: "restore_factory_calibration",
                step: self.session.step,
            });
        }
        self.clear_cancel();
        self.link.acquire()?;
        let result = self.run_factory_restore(which).await;
        self.release_after(result)
    }

    /// Set the heading FIR filter length and read it back. Only allowed
    /// between sessions.
    pub async fn set_filter_taps(&mut self, taps: FirTaps) -> Result<(), CalError> {
        if self.session.running {
            return Err(CalError::InvalidStep {
                op: "set_filter_taps",
                step: self.session.step,
            });
        }
        self.clear_cancel();
        self.link.acquire()?;
        let result = self.apply_filter_taps(taps).await;
        self.release_after(result)
    }

    fn reset(&mut self, mag_and_accel: bool) {
        self.session = CalibrationSession::begin(mag_and_accel);
        self.collector.reset();
        self.tracker.reset();
        self.echo = DeviceEcho::default();
        self.score = None;
        self.last_sample = None;
        self.sample_count = 0;
        self.save_pending = false;
        self.restart_pending = false;
        self.deadline = None;
        self.status = None;
        self.outcome = None;
        self.clear_cancel();

        while let Ok(event) = self.events.try_recv() {
            debug!("Discarding event from before session start: {:?}", event);
        }
    }

    async fn start_session(&mut self) -> Result<(), CalError> {
        self.tracker.set(Indicator::DeviceComm, TestResult::InProgress);
        self.publish();
        self.system_info = self.link.link_mut().system_info()?;
        self.tracker.set(Indicator::DeviceComm, TestResult::Pass);

        self.tracker.set(Indicator::CompassComm, TestResult::InProgress);
        self.link.acquire()?;
        self.send(Command::GetModInfo)?;
        self.send(Command::SetDataComponents)?;
        self.send(Command::SetConfig(ConfigValue::AutoSampling(false)))?;
        self.send(Command::GetConfig(ConfigId::AutoSampling))?;
        self.verify_echo("auto_sampling", false, |event| match event {
            CompassEvent::AutoSampling(value) => Some(*value),
            _ => None,
        })
        .await?;
        self.tracker.set(Indicator::CompassComm, TestResult::Pass);
        self.tracker
            .set(Indicator::CalibrationComplete, TestResult::InProgress);

        self.session.advance(CalStep::StartPrePoint);
        self.collector.reset();
        self.session.point_index = 0;
        self.session.advance(CalStep::PrePoint(1));
        Ok(())
    }

    async fn capture_point(&mut self, phase: Phase, point: u8) -> Result<(), CalError> {
        let step = self.session.step;
        self.collector
            .request(phase, point)
            .map_err(|_| CalError::InvalidStep {
                op: "take_sample",
                step,
            })?;
        self.send(Command::GetData)?;

        let after = self.config.response_timeout();
        let waited = self
            .wait_for("orientation sample", after, |this, event| {
                this.apply_event(event)?;
                Ok(this.collector.pending().is_none().then_some(()))
            })
            .await;
        if let Err(e) = waited {
            self.collector.cancel_request();
            return Err(match e {
                CalError::TimedOut { .. } => CalError::SampleMissed { point, after },
                other => other,
            });
        }

        let points = self.collector.points();
        let sample = match phase {
            Phase::Pre => points.pre(point),
            Phase::Post => points.post(point),
        }
        .copied()
        .unwrap_or_default();
        self.last_sample = Some(sample);
        self.session.point_index = point;
        info!(
            "{:?} point {}: heading {:.2} pitch {:.2} roll {:.2}",
            phase, point, sample.heading, sample.pitch, sample.roll
        );
        if sample.heading == 0.0 || sample.pitch == 0.0 || sample.roll == 0.0 {
            warn!("{:?} point {} has a zero angle and will be flagged bad", phase, point);
        }

        if (point as usize) < POINT_COUNT {
            self.session.advance(match phase {
                Phase::Pre => CalStep::PrePoint(point + 1),
                Phase::Post => CalStep::PostPoint(point + 1),
            });
            return Ok(());
        }
        match phase {
            Phase::Pre => self.stop_pre_point().await,
            Phase::Post => self.stop_post_point(),
        }
    }

    async fn stop_pre_point(&mut self) -> Result<(), CalError> {
        self.session.advance(CalStep::StopPrePoint);

        let num_points =
            ConfigValue::num_points(self.config.num_points).map_err(ConfigError::from)?;
        let declination =
            ConfigValue::declination(self.config.declination).map_err(ConfigError::from)?;
        self.send(Command::SetConfig(num_points))?;
        self.send(Command::SetConfig(ConfigValue::StableCheck(
            self.config.stable_check,
        )))?;
        self.send(Command::SetConfig(declination))?;
        self.send(Command::GetConfig(ConfigId::NumPoints))?;
        self.verify_echo("num_points", self.config.num_points, |event| match event {
            CompassEvent::NumPoints(value) => Some(*value),
            _ => None,
        })
        .await?;

        self.send(Command::StartCal {
            mag_and_accel: self.session.mag_and_accel,
        })?;
        self.sample_count = 0;
        self.tracker
            .set(Indicator::CalibrationGood, TestResult::InProgress);
        self.session.advance(CalStep::RunningDeviceCal);
        info!(
            "Device calibration running, take {} samples",
            self.config.num_points
        );
        Ok(())
    }

    fn take_calibration_sample(&mut self) -> Result<(), CalError> {
        if self.save_pending {
            info!("Save in progress, sample ignored");
            return Ok(());
        }
        if self.restart_pending {
            info!("Restarting device calibration");
            self.send(Command::StartCal {
                mag_and_accel: self.session.mag_and_accel,
            })?;
            self.restart_pending = false;
            self.sample_count = 0;
            self.score = None;
            self.status = None;
            self.tracker
                .set(Indicator::CalibrationGood, TestResult::InProgress);
            self.tracker
                .set(Indicator::CalibrationSaved, TestResult::NotStarted);
        } else if self.sample_count >= self.config.num_points {
            info!(
                "All {} samples taken, waiting for the score",
                self.config.num_points
            );
            return Ok(());
        }
        self.send(Command::TakeSample)
    }

    fn stop_post_point(&mut self) -> Result<(), CalError> {
        self.session.advance(CalStep::StopPostPoint);
        self.collector.compute_deltas();

        let points = self.collector.points();
        for point in 1..=POINT_COUNT as u8 {
            if let Some(d) = points.delta(point) {
                info!(
                    "Point {}: dHeading {:.2} dPitch {:.2} dRoll {:.2}",
                    point, d.heading, d.pitch, d.roll
                );
            }
        }
        let bad = points.bad_points();
        if !bad.is_empty() {
            warn!("Points with missing samples: {:?}", bad);
        }

        if let Err(e) = self.link.release() {
            warn!("Failed to leave compass mode: {}", e);
        }

        let mut outcome = self.build_outcome(false);
        let written = self.sink.write_record(&outcome);
        if let Err(e) = &written {
            error!("Failed to write result record: {}", e);
            outcome.status = Some(format!("result not saved: {e}"));
        }

        self.session.running = false;
        self.session.advance(CalStep::Complete);
        self.outcome = Some(outcome);
        info!("Calibration complete");
        written.map_err(CalError::from)
    }

    fn apply_event(&mut self, event: CompassEvent) -> Result<(), CalError> {
        if !self.session.running {
            debug!("Discarding stale event {:?}", event);
            return Ok(());
        }

        match event {
            CompassEvent::DataResponse(sample) => match self.collector.on_sample(sample) {
                Ok((phase, point)) => debug!("Stored {:?} point {}", phase, point),
                Err(_) => warn!("Unsolicited orientation sample dropped: {:?}", sample),
            },
            CompassEvent::SampleCount(count) => self.on_sample_count(count),
            CompassEvent::Score(score) => self.on_score(score)?,
            CompassEvent::SaveDone => self.on_save_done()?,
            CompassEvent::SaveFailed(code) => self.on_save_failed(code),
            CompassEvent::AutoSampling(value) => {
                debug!("auto_sampling = {}", value);
                self.echo.auto_sampling = Some(value);
            }
            CompassEvent::NumPoints(value) => {
                debug!("num_points = {}", value);
                self.echo.num_points = Some(value);
            }
            CompassEvent::Declination(value) => {
                debug!("declination = {}", value);
                self.echo.declination = Some(value);
            }
            CompassEvent::StableCheck(value) => {
                debug!("stable_check = {}", value);
                self.echo.stable_check = Some(value);
            }
            CompassEvent::FirTaps(value) => {
                debug!("fir_taps = {}", value);
                self.echo.fir_taps = Some(value);
            }
            CompassEvent::ModuleInfo(info) => {
                info!("Compass module {} rev {}", info.kind, info.revision);
                self.echo.module = Some(info);
            }
            CompassEvent::SetConfigDone | CompassEvent::SetParamDone => {
                debug!("Module acknowledged configuration change");
            }
            other @ (CompassEvent::FactoryMagCalDone | CompassEvent::FactoryAccelCalDone) => {
                warn!("Unexpected {:?} during user calibration, dropped", other);
            }
        }
        Ok(())
    }

    fn on_sample_count(&mut self, count: u32) {
        if self.session.step != CalStep::RunningDeviceCal {
            warn!("Sample count {} outside device calibration, dropped", count);
            return;
        }
        self.sample_count = count;
        info!("Calibration sample {}/{}", count, self.config.num_points);
        if count >= self.config.num_points && self.score.is_none() {
            self.arm_deadline("calibration score", self.config.score_timeout());
        }
    }

    fn on_score(&mut self, score: CalibrationScore) -> Result<(), CalError> {
        if self.session.step != CalStep::RunningDeviceCal || self.save_pending {
            warn!("Unexpected score in step {}, dropped", self.session.step);
            return Ok(());
        }
        self.deadline = None;
        self.score = Some(score);
        info!(
            "Score: std dev err {:.3}, coverage x {:.1} y {:.1} z {:.1}, accel std dev err {:.3}",
            score.std_dev_err,
            score.x_coverage,
            score.y_coverage,
            score.z_coverage,
            score.accel_std_dev_err
        );

        let usable = score::validate(&score);
        self.tracker.set(
            Indicator::CalibrationGood,
            if usable {
                TestResult::Pass
            } else {
                TestResult::Fail
            },
        );

        if usable || !self.config.validate_score {
            if !usable {
                warn!("Score validation disabled, saving a calibration the module could not compute");
            }
            self.send(Command::SaveCal)?;
            self.save_pending = true;
            self.tracker
                .set(Indicator::CalibrationSaved, TestResult::InProgress);
            self.arm_deadline("SaveDone", self.config.save_timeout());
        } else {
            warn!("Module could not compute a calibration; not saving. Take another sample to restart.");
            self.tracker
                .set(Indicator::CalibrationSaved, TestResult::Fail);
            self.restart_pending = true;
            self.status = Some("calibration incomplete: module could not compute a calibration".to_string());
        }
        Ok(())
    }

    fn on_save_done(&mut self) -> Result<(), CalError> {
        if !self.save_pending {
            warn!("SaveDone without a pending save, dropped");
            return Ok(());
        }
        self.save_pending = false;
        self.deadline = None;
        self.tracker.set(Indicator::CalibrationSaved, TestResult::Pass);
        self.tracker
            .set(Indicator::CalibrationComplete, TestResult::Pass);
        info!("Calibration saved");

        self.send(Command::SetConfig(ConfigValue::AutoSampling(
            self.config.auto_sampling,
        )))?;
        self.send(Command::StopCal)?;

        self.session.advance(CalStep::StartPostPoint);
        self.collector.reset_post();
        self.session.point_index = 0;
        self.session.advance(CalStep::PostPoint(1));
        Ok(())
    }

    fn on_save_failed(&mut self, code: u16) {
        if !self.save_pending {
            warn!("Save failure {} without a pending save, dropped", code);
            return;
        }
        self.save_pending = false;
        self.deadline = None;
        self.tracker.set(Indicator::CalibrationSaved, TestResult::Fail);
        self.restart_pending = true;
        warn!("Module rejected save with error {}", code);
        self.status = Some(format!("module rejected save (error {code})"));
    }

    /// Route a failed operation: fatal errors abort, the rest are reported.
    fn finish_op(&mut self, result: Result<(), CalError>) -> Result<(), CalError> {
        if let Err(e) = &result {
            if *e == CalError::Cancelled {
                self.cancel();
            } else if e.is_fatal() {
                self.fail(e);
            } else {
                warn!("{}", e);
                self.status = Some(e.to_string());
            }
        }
        self.publish();
        result
    }

    fn fail(&mut self, e: &CalError) {
        error!("Calibration aborted: {}", e);
        match e {
            CalError::Comm(_) => self.tracker.set(Indicator::DeviceComm, TestResult::Fail),
            CalError::Verification { .. } | CalError::TimedOut { .. } => {
                self.tracker.set(Indicator::CompassComm, TestResult::Fail)
            }
            _ => {}
        }
        if self.session.running && self.session.step != CalStep::Aborting {
            self.abort(false, Some(e.to_string()));
        }
    }

    /// Common exit for cancellation and fatal errors.
    fn abort(&mut self, cancelled: bool, status: Option<String>) {
        self.session.advance(CalStep::Aborting);
        self.tracker.fail_unless_passed(Indicator::CalibrationComplete);
        for indicator in Indicator::ALL {
            if self.tracker.get(indicator) == TestResult::InProgress {
                self.tracker.set(indicator, TestResult::Fail);
            }
        }
        self.collector.cancel_request();
        self.deadline = None;
        self.save_pending = false;
        self.restart_pending = false;

        self.restore_device();

        self.status = status.or_else(|| cancelled.then(|| "cancelled by operator".to_string()));
        let outcome = self.build_outcome(cancelled);
        self.session.running = false;
        self.session.advance(CalStep::Idle);
        self.outcome = Some(outcome);
    }

    /// Best effort: leave calibration mode, restore auto-sampling and
    /// return the ADCP to its console.
    fn restore_device(&mut self) {
        if !self.link.is_active() {
            return;
        }
        for command in [
            Command::StopCal,
            Command::SetConfig(ConfigValue::AutoSampling(self.config.auto_sampling)),
        ] {
            if let Err(e) = self.link.send(&command.encode()) {
                warn!("Restore command {:?} failed: {}", command, e);
            }
        }
        if let Err(e) = self.link.release() {
            warn!("Failed to leave compass mode: {}", e);
        }
    }

    async fn run_factory_restore(&mut self, which: FactoryReset) -> Result<(), CalError> {
        let commands: &[Command] = match which {
            FactoryReset::Mag => &[Command::FactoryMagCal],
            FactoryReset::Accel => &[Command::FactoryAccelCal],
            FactoryReset::Both => &[Command::FactoryMagCal, Command::FactoryAccelCal],
        };
        let after = self.config.response_timeout();

        for &command in commands {
            info!("Restoring factory calibration: {:?}", command);
            self.send(command)?;
            self.wait_for("factory calibration restore", after, move |_, event| {
                let done = matches!(
                    (command, &event),
                    (Command::FactoryMagCal, CompassEvent::FactoryMagCalDone)
                        | (Command::FactoryAccelCal, CompassEvent::FactoryAccelCalDone)
                );
                if !done {
                    debug!("Ignoring {:?} during factory restore", event);
                }
                Ok(done.then_some(()))
            })
            .await?;
        }

        self.send(Command::SaveCal)?;
        self.wait_for("SaveDone", self.config.save_timeout(), |_, event| match event {
            CompassEvent::SaveDone => Ok(Some(())),
            CompassEvent::SaveFailed(code) => Err(CalError::Verification {
                setting: "factory calibration save",
                expected: "saved".to_string(),
                observed: format!("error {code}"),
            }),
            _ => Ok(None),
        })
        .await?;
        info!("Factory calibration restored and saved");
        Ok(())
    }

    async fn apply_filter_taps(&mut self, taps: FirTaps) -> Result<(), CalError> {
        let after = self.config.response_timeout();
        self.send(Command::SetTaps(taps))?;
        self.wait_for("SetParamDone", after, |_, event| {
            Ok(matches!(event, CompassEvent::SetParamDone).then_some(()))
        })
        .await?;

        self.send(Command::GetParam)?;
        let observed = self
            .wait_for("FIR filter taps", after, |_, event| match event {
                CompassEvent::FirTaps(count) => Ok(Some(count)),
                _ => Ok(None),
            })
            .await?;
        self.echo.fir_taps = Some(observed);
        if observed != taps.count() {
            return Err(CalError::Verification {
                setting: "fir_taps",
                expected: taps.count().to_string(),
                observed: observed.to_string(),
            });
        }
        info!("Heading filter set to {} taps", observed);
        Ok(())
    }

    fn release_after(&mut self, result: Result<(), CalError>) -> Result<(), CalError> {
        match self.link.release() {
            Ok(()) => result,
            Err(e) => {
                warn!("Failed to leave compass mode: {}", e);
                result.and(Err(e.into()))
            }
        }
    }

    /// Wait for the module to echo `expected` for `setting`.
    async fn verify_echo<T>(
        &mut self,
        setting: &'static str,
        expected: T,
        extract: fn(&CompassEvent) -> Option<T>,
    ) -> Result<(), CalError>
    where
        T: PartialEq + Display + Send,
    {
        let observed = self
            .wait_for(setting, self.config.settle(), move |this, event| {
                let echo = extract(&event);
                this.apply_event(event)?;
                Ok(echo)
            })
            .await;

        let observed = match observed {
            Ok(value) if value == expected => return Ok(()),
            Ok(value) => value.to_string(),
            Err(CalError::TimedOut { .. }) => "no response".to_string(),
            Err(e) => return Err(e),
        };
        Err(CalError::Verification {
            setting,
            expected: expected.to_string(),
            observed,
        })
    }

    /// Feed events to `handle` until it yields a value or `after` elapses.
    async fn wait_for<T, F>(
        &mut self,
        waiting_for: &'static str,
        after: Duration,
        mut handle: F,
    ) -> Result<T, CalError>
    where
        F: FnMut(&mut Self, CompassEvent) -> Result<Option<T>, CalError>,
    {
        let deadline = Instant::now() + after;
        loop {
            if *self.cancel_rx.borrow_and_update() {
                return Err(CalError::Cancelled);
            }
            let received = select! {
                biased;
                Ok(()) = self.cancel_rx.changed() => continue,
                received = timeout_at(deadline, self.events.recv()) => received,
            };
            match received {
                Err(_) => return Err(CalError::TimedOut { waiting_for, after }),
                Ok(None) => return Err(CommFailure::Disconnected.into()),
                Ok(Some(event)) => {
                    if let Some(value) = handle(self, event)? {
                        return Ok(value);
                    }
                }
            }
        }
    }

    fn clear_cancel(&mut self) {
        self.cancel_tx.send_replace(false);
        self.cancel_rx.borrow_and_update();
    }

    fn send(&mut self, command: Command) -> Result<(), CalError> {
        debug!("-> {:?}", command);
        self.link.send(&command.encode())?;
        Ok(())
    }

    fn arm_deadline(&mut self, waiting_for: &'static str, after: Duration) {
        debug!("Waiting up to {:?} for {}", after, waiting_for);
        self.deadline = Some(Deadline {
            at: Instant::now() + after,
            waiting_for,
            after,
        });
    }

    fn build_outcome(&self, cancelled: bool) -> SessionOutcome {
        SessionOutcome {
            system_info: self.system_info.clone(),
            points: self.collector.points().clone(),
            score: self.score.unwrap_or_default(),
            results: self.tracker.results(),
            cancelled,
            status: self.status.clone(),
        }
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.snapshot());
    }
}

impl<L: DeviceLink, S: ResultSink> Drop for CalibrationOrchestrator<L, S> {
    fn drop(&mut self) {
        if self.session.running {
            warn!(
                "Orchestrator dropped in step {}, restoring the device",
                self.session.step
            );
            self.cancel();
        }
    }
}

/// Next event, or `None` once `at` passes.
async fn next_event(
    events: &mut UnboundedReceiver<CompassEvent>,
    at: Option<Instant>,
) -> Option<Option<CompassEvent>> {
    match at {
        Some(at) => timeout_at(at, events.recv()).await.ok(),
        None => Some(events.recv().await),
    }
}
