use crate::controller::Controller;
use crate::error::ControlResult;
use crate::state::{LoopOutcome, SpinOutcome};
use blade_protocol::{Command, Direction, LoopParams, Mode, StatusReport};
use log::{error, info, warn};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

/// Status reported when a command could not be carried out.
pub const IDLE_STATUS: &str = "Idle";

/// Maps control commands onto controller transitions and reports the
/// resulting status as display text.
#[derive(Clone)]
pub struct Dispatcher {
    controller: Controller,
}

impl Dispatcher {
    pub fn new(controller: Controller) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Handle one command. Never fails: faults are logged, motion is
    /// stopped and the idle status returned.
    pub fn handle(&self, command: &str, params: &HashMap<String, String>) -> String {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.try_handle(command, params)));
        match outcome {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                error!("Command '{}' failed: {}", command, e);
                self.recover()
            }
            Err(_) => {
                error!("Command '{}' panicked", command);
                self.recover()
            }
        }
    }

    /// Status text for the current mode, without changing anything.
    pub fn status(&self) -> String {
        status_text(&self.controller.snapshot())
    }

    fn try_handle(&self, command: &str, params: &HashMap<String, String>) -> ControlResult<String> {
        let Some(cmd) = Command::from_name(command) else {
            warn!("Unknown command '{}'", command);
            return Ok(self.status());
        };
        info!("Command: {}", cmd.as_str());

        match cmd {
            Command::SpinForward => self.spin(Direction::Forward),
            Command::SpinReverse => self.spin(Direction::Reverse),
            Command::StopSpin => {
                let report = self.controller.stop_spin();
                Ok(stopped_text(&report, "Manual Spin Stopped"))
            }
            Command::Calibrate => Ok(format!("Calibrated at {}°", self.controller.calibrate())),
            Command::StartLoop => {
                let params = LoopParams::from_lookup(|key| params.get(key).map(String::as_str));
                let verb = match self.controller.start_loop(params)? {
                    LoopOutcome::Start { .. } => "Started",
                    LoopOutcome::Retuned => "Updated",
                };
                Ok(format!(
                    "Loop Mode {} (retract {}°, speed {}ms/step, delay {}-{}ms)",
                    verb, params.retract, params.speed_ms, params.min_delay_ms, params.max_delay_ms
                ))
            }
            Command::StopLoop => {
                let report = self.controller.stop_loop();
                Ok(stopped_text(&report, "Loop Mode Stopped"))
            }
        }
    }

    fn spin(&self, direction: Direction) -> ControlResult<String> {
        match self.controller.spin(direction)? {
            SpinOutcome::Start { .. } | SpinOutcome::Redirected => {
                Ok(format!("Spinning {}", direction.as_str()))
            }
            SpinOutcome::LoopActive => Ok("Loop Mode Active".to_string()),
        }
    }

    fn recover(&self) -> String {
        self.controller.stop_all();
        IDLE_STATUS.to_string()
    }
}

fn status_text(report: &StatusReport) -> String {
    match report.mode {
        Mode::Idle => IDLE_STATUS.to_string(),
        Mode::Spinning => format!("Spinning {}", report.direction.as_str()),
        Mode::Looping => "Loop Mode Active".to_string(),
    }
}

/// A stop that leaves the controller idle reports `stopped`; one that did
/// not apply reports the mode still running.
fn stopped_text(report: &StatusReport, stopped: &str) -> String {
    match report.mode {
        Mode::Idle => stopped.to_string(),
        _ => status_text(report),
    }
}
