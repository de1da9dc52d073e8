//! Runs an orchestrator on its own task
//!
//! Operator commands and device events are multiplexed with `select!`, so the
//! orchestrator stays the only thing that ever touches session state. Callers
//! get a [`CalibrationHandle`] for commands and snapshots, and a join handle
//! that resolves to the final [`SessionOutcome`].

use adcp_link::DeviceLink;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::orchestrator::{CalibrationOrchestrator, CancelSignal};
use crate::session::{SessionOutcome, SessionSnapshot};
use crate::sink::ResultSink;

/// Operator input for a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCommand {
    TakeSample,
    Cancel,
}

/// Cloneable control handle for a spawned session.
#[derive(Debug, Clone)]
pub struct CalibrationHandle {
    commands: mpsc::UnboundedSender<UserCommand>,
    snapshot: watch::Receiver<SessionSnapshot>,
    cancel: CancelSignal,
}

impl CalibrationHandle {
    /// Returns false if the session has already ended.
    pub fn take_sample(&self) -> bool {
        self.commands.send(UserCommand::TakeSample).is_ok()
    }

    /// Also interrupts a hardware exchange the session is waiting on.
    /// Returns false if the session has already ended.
    pub fn cancel(&self) -> bool {
        self.cancel.cancel();
        self.commands.send(UserCommand::Cancel).is_ok()
    }

    /// Latest published state.
    pub fn current(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }
}

/// Start a session on a new task.
///
/// The task ends when the session completes, aborts, or is cancelled.
/// Dropping every handle cancels the session.
pub fn spawn_calibration<L, S>(
    mut orchestrator: CalibrationOrchestrator<L, S>,
    mag_and_accel: bool,
) -> (CalibrationHandle, JoinHandle<SessionOutcome>)
where
    L: DeviceLink + 'static,
    S: ResultSink + 'static,
{
    let (commands_tx, mut commands_rx) = mpsc::unbounded_channel();
    let handle = CalibrationHandle {
        commands: commands_tx,
        snapshot: orchestrator.subscribe(),
        cancel: orchestrator.cancel_signal(),
    };

    let task = tokio::spawn(async move {
        if let Err(e) = orchestrator.start(mag_and_accel).await {
            debug!("Session start failed: {}", e);
        }

        let mut events_open = true;
        loop {
            if !orchestrator.session().running {
                return orchestrator.take_outcome().unwrap_or_else(|| {
                    warn!("Session ended without an outcome");
                    SessionOutcome {
                        system_info: orchestrator.system_info().clone(),
                        points: orchestrator.points().clone(),
                        score: orchestrator.score().copied().unwrap_or_default(),
                        results: orchestrator.results(),
                        cancelled: false,
                        status: None,
                    }
                });
            }

            tokio::select! {
                command = commands_rx.recv() => match command {
                    Some(UserCommand::TakeSample) => {
                        // Errors are reported through the snapshot status.
                        let _ = orchestrator.take_sample().await;
                    }
                    Some(UserCommand::Cancel) | None => orchestrator.cancel(),
                },
                open = orchestrator.poll_device(), if events_open => {
                    events_open = open;
                }
            }
        }
    });

    (handle, task)
}
