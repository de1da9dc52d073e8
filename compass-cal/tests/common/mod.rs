//! Scripted stand-in for the ADCP and its compass module
//!
//! `FakeCompass` decodes every frame it is sent and answers the way the
//! module would, by pushing encoded response frames onto the inbound byte
//! channel. Tests steer it through the shared [`FakeState`].

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use adcp_link::{CommFailure, DeviceLink, InboundBytes, SystemInfo};
use compass_cal::{
    spawn_event_pump, CalStep, CalibrationConfig, CalibrationOrchestrator, MemorySink,
};
use pni_compass::ids::{component_id, config_id, frame_id, param_id};
use pni_compass::{encode_frame, CalibrationScore, Command, ConfigId, ConfigValue, OrientationSample};
use tokio::sync::mpsc;

pub const SERIAL_NUMBER: &str = "24061";
pub const FIRMWARE: &str = "3.14";

pub type Orchestrator = CalibrationOrchestrator<FakeCompass, MemorySink>;

/// What the fake module knows and how it misbehaves.
#[derive(Debug)]
pub struct FakeState {
    /// Every command received, in order
    pub commands: Vec<Command>,
    pub connects: u32,
    pub disconnects: u32,
    pub connected: bool,

    pub fail_system_info: bool,
    pub fail_connect: bool,
    /// Fail every write from now on
    pub fail_sends: bool,
    /// Keep reporting auto-sampling on after being told to turn it off
    pub ignore_auto_sampling_disable: bool,
    /// Answer GetData
    pub respond_to_data: bool,
    /// Answer SaveCal with this code; `None` stays silent
    pub save_code: Option<u16>,
    /// Score sent once the configured number of samples has been taken
    pub auto_score: Option<CalibrationScore>,

    /// Samples returned by GetData, front first
    pub samples: VecDeque<OrientationSample>,

    pub auto_sampling: bool,
    pub num_points: u32,
    pub declination: f32,
    pub stable_check: bool,
    pub fir_taps: u8,
    pub cal_samples: u32,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            commands: Vec::new(),
            connects: 0,
            disconnects: 0,
            connected: false,
            fail_system_info: false,
            fail_connect: false,
            fail_sends: false,
            ignore_auto_sampling_disable: false,
            respond_to_data: true,
            save_code: Some(0),
            auto_score: None,
            samples: VecDeque::new(),
            auto_sampling: true,
            num_points: 12,
            declination: 0.0,
            stable_check: true,
            fir_taps: 0,
            cal_samples: 0,
        }
    }
}

impl FakeState {
    pub fn count(&self, matches: impl Fn(&Command) -> bool) -> usize {
        self.commands.iter().filter(|c| matches(c)).count()
    }

    pub fn sent(&self, command: &Command) -> bool {
        self.commands.contains(command)
    }

    /// Commands received after the first occurrence of `marker`.
    pub fn commands_after(&self, marker: &Command) -> Vec<Command> {
        match self.commands.iter().position(|c| c == marker) {
            Some(i) => self.commands[i + 1..].to_vec(),
            None => Vec::new(),
        }
    }
}

pub struct FakeCompass {
    state: Arc<Mutex<FakeState>>,
    inbound: InboundBytes,
}

impl FakeCompass {
    pub fn new(state: Arc<Mutex<FakeState>>, inbound: InboundBytes) -> Self {
        Self { state, inbound }
    }

    fn reply(&self, id: u8, payload: &[u8]) {
        let _ = self.inbound.send(encode_frame(id, payload).to_vec());
    }

    fn respond(&self, state: &mut FakeState, command: Command) {
        match command {
            Command::GetModInfo => self.reply(frame_id::MOD_INFO_RESP, b"TCM6R140"),
            Command::SetDataComponents | Command::StopCal => {}
            Command::GetData => {
                if !state.respond_to_data {
                    return;
                }
                let sample = state.samples.pop_front().unwrap_or(OrientationSample {
                    heading: 45.0,
                    pitch: 1.0,
                    roll: 2.0,
                    ..Default::default()
                });
                self.reply(frame_id::DATA_RESP, &data_payload(&sample));
            }
            Command::SetConfig(value) => {
                match value {
                    ConfigValue::AutoSampling(on) => {
                        if on || !state.ignore_auto_sampling_disable {
                            state.auto_sampling = on;
                        }
                    }
                    ConfigValue::NumPoints(n) => state.num_points = n,
                    ConfigValue::Declination(d) => state.declination = d,
                    ConfigValue::StableCheck(on) => state.stable_check = on,
                }
                self.reply(frame_id::SET_CONFIG_DONE, &[]);
            }
            Command::GetConfig(id) => {
                let mut payload = Vec::new();
                match id {
                    ConfigId::AutoSampling => {
                        payload.push(config_id::USER_CAL_AUTO_SAMPLING);
                        payload.push(state.auto_sampling as u8);
                    }
                    ConfigId::NumPoints => {
                        payload.push(config_id::USER_CAL_NUM_POINTS);
                        payload.extend_from_slice(&state.num_points.to_be_bytes());
                    }
                    ConfigId::Declination => {
                        payload.push(config_id::DECLINATION);
                        payload.extend_from_slice(&state.declination.to_be_bytes());
                    }
                    ConfigId::StableCheck => {
                        payload.push(config_id::USER_CAL_STABLE_CHECK);
                        payload.push(state.stable_check as u8);
                    }
                }
                self.reply(frame_id::CONFIG_RESP, &payload);
            }
            Command::StartCal { .. } => state.cal_samples = 0,
            Command::TakeSample => {
                state.cal_samples += 1;
                self.reply(
                    frame_id::USER_CAL_SAMP_COUNT,
                    &state.cal_samples.to_be_bytes(),
                );
                if state.cal_samples == state.num_points {
                    if let Some(score) = state.auto_score {
                        self.reply(frame_id::USER_CAL_SCORE, &score_payload(&score));
                    }
                }
            }
            Command::SaveCal => {
                if let Some(code) = state.save_code {
                    self.reply(frame_id::SAVE_DONE, &code.to_be_bytes());
                }
            }
            Command::SetTaps(taps) => {
                state.fir_taps = taps.count();
                self.reply(frame_id::SET_PARAM_DONE, &[]);
            }
            Command::GetParam => {
                let n = state.fir_taps;
                let mut payload = vec![param_id::FIR_FILTER, param_id::FIR_AXIS, n];
                for _ in 0..n {
                    payload.extend_from_slice(&(1.0 / n as f64).to_be_bytes());
                }
                self.reply(frame_id::PARAM_RESP, &payload);
            }
            Command::FactoryMagCal => self.reply(frame_id::FACTORY_MAG_CAL_DONE, &[]),
            Command::FactoryAccelCal => self.reply(frame_id::FACTORY_ACCEL_CAL_DONE, &[]),
        }
    }
}

impl DeviceLink for FakeCompass {
    fn system_info(&mut self) -> Result<SystemInfo, CommFailure> {
        if self.state.lock().unwrap().fail_system_info {
            return Err(CommFailure::Handshake("no banner".to_string()));
        }
        Ok(SystemInfo {
            serial_number: SERIAL_NUMBER.to_string(),
            firmware: FIRMWARE.to_string(),
        })
    }

    fn connect(&mut self) -> Result<(), CommFailure> {
        let mut state = self.state.lock().unwrap();
        state.connects += 1;
        if state.fail_connect {
            return Err(CommFailure::Handshake("no pass-through prompt".to_string()));
        }
        state.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), CommFailure> {
        let mut state = self.state.lock().unwrap();
        state.disconnects += 1;
        state.connected = false;
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), CommFailure> {
        let command = Command::from_frame(bytes)
            .map_err(|e| CommFailure::Write(format!("undecodable frame: {e}")))?;
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(CommFailure::Disconnected);
        }
        if state.fail_sends {
            return Err(CommFailure::Write("port gone".to_string()));
        }
        state.commands.push(command);
        self.respond(&mut state, command);
        Ok(())
    }

    fn send_break(&mut self) -> Result<(), CommFailure> {
        Ok(())
    }
}

pub fn sample(heading: f32, pitch: f32, roll: f32) -> OrientationSample {
    OrientationSample {
        heading,
        pitch,
        roll,
        ..Default::default()
    }
}

pub fn good_score() -> CalibrationScore {
    CalibrationScore {
        std_dev_err: 0.05,
        x_coverage: 90.0,
        y_coverage: 88.0,
        z_coverage: 60.0,
        ..Default::default()
    }
}

pub fn sentinel_score() -> CalibrationScore {
    CalibrationScore {
        std_dev_err: -1.0,
        x_coverage: -1.0,
        y_coverage: -1.0,
        z_coverage: -1.0,
        ..Default::default()
    }
}

/// A complete DataResp frame carrying `sample`.
pub fn data_response(sample: &OrientationSample) -> Vec<u8> {
    encode_frame(frame_id::DATA_RESP, &data_payload(sample)).to_vec()
}

fn data_payload(sample: &OrientationSample) -> Vec<u8> {
    let mut payload = vec![5];
    for (id, value) in [
        (component_id::HEADING, sample.heading),
        (component_id::PITCH, sample.pitch),
        (component_id::ROLL, sample.roll),
    ] {
        payload.push(id);
        payload.extend_from_slice(&value.to_be_bytes());
    }
    payload.extend_from_slice(&[component_id::DISTORTION, sample.distortion as u8]);
    payload.extend_from_slice(&[component_id::CAL_STATUS, sample.calibrated as u8]);
    payload
}

fn score_payload(score: &CalibrationScore) -> Vec<u8> {
    [
        score.std_dev_err,
        score.x_coverage,
        score.y_coverage,
        score.z_coverage,
        score.x_accel_coverage,
        score.y_accel_coverage,
        score.z_accel_coverage,
        score.accel_std_dev_err,
    ]
    .iter()
    .flat_map(|v| v.to_be_bytes())
    .collect()
}

/// Orchestrator wired to a fake compass through a real event pump.
pub struct Harness {
    pub orch: Orchestrator,
    pub state: Arc<Mutex<FakeState>>,
    pub sink: MemorySink,
    /// Bytes pushed here reach the orchestrator as if the module sent them
    pub inbound: InboundBytes,
}

impl Harness {
    pub fn new(state: FakeState) -> Self {
        Self::with_config(state, CalibrationConfig::default())
    }

    pub fn with_config(state: FakeState, config: CalibrationConfig) -> Self {
        let state = Arc::new(Mutex::new(state));
        let (bytes_tx, bytes_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        spawn_event_pump(bytes_rx, events_tx);

        let sink = MemorySink::new();
        let link = FakeCompass::new(state.clone(), bytes_tx.clone());
        let orch = CalibrationOrchestrator::new(link, sink.clone(), config, events_rx)
            .expect("valid config");
        Self {
            orch,
            state,
            sink,
            inbound: bytes_tx,
        }
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Apply device events until none arrive for a short while.
    pub async fn settle(&mut self) {
        while let Ok(true) =
            tokio::time::timeout(Duration::from_millis(20), self.orch.poll_device()).await
        {}
    }

    /// Start a session and take the four pre points.
    pub async fn run_to_device_cal(&mut self) {
        self.orch.start(false).await.expect("start");
        for _ in 0..4 {
            self.orch.take_sample().await.expect("pre point");
        }
        assert_eq!(self.orch.step(), CalStep::RunningDeviceCal);
    }

    /// Take calibration samples, applying the module's answers after each.
    pub async fn take_cal_samples(&mut self, n: u32) {
        for _ in 0..n {
            self.orch.take_sample().await.expect("calibration sample");
            self.settle().await;
        }
    }
}
