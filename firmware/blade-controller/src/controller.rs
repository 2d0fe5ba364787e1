use crate::config::ControllerConfig;
use crate::error::{ControlError, ControlResult};
use crate::motion::{DwellSampler, LoopCycle, MotionContext, MotionPlan, MotionTask};
use crate::servo::ServoDriver;
use crate::state::{ControlState, LoopOutcome, SpinOutcome};
use blade_protocol::{Direction, LoopParams, Mode, StatusReport};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex, MutexGuard};

/// Everything a motion task and the dispatcher share. Guarded by one lock.
struct Shared {
    state: ControlState,
    servo: ServoDriver,
    dwell: Box<dyn DwellSampler>,
}

impl Shared {
    fn report(&self) -> StatusReport {
        StatusReport {
            mode: self.state.mode(),
            direction: self.state.direction(),
            current_angle: self.servo.current_angle(),
            calibrated_angle: self.state.calibrated_angle(),
            loop_params: self.state.loop_params(),
            generation: self.state.generation(),
        }
    }
}

struct Core {
    shared: Mutex<Shared>,
    config: ControllerConfig,
}

impl Core {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|poisoned| {
            warn!("Control lock poisoned; recovering");
            poisoned.into_inner()
        })
    }
}

impl MotionContext for Core {
    fn spin_step(&self, generation: u64) -> Option<u8> {
        let mut shared = self.lock();
        if !shared.state.is_current(generation) {
            return None;
        }
        let next = shared.servo.current_angle() as i32 + shared.state.direction().step();
        Some(shared.servo.set_angle(next))
    }

    fn loop_cycle(&self, generation: u64) -> Option<LoopCycle> {
        let shared = self.lock();
        if !shared.state.is_current(generation) {
            return None;
        }
        Some(LoopCycle {
            center: shared.state.calibrated_angle(),
            params: shared.state.loop_params(),
        })
    }

    fn move_to(&self, generation: u64, angle: i32) -> Option<u8> {
        let mut shared = self.lock();
        if !shared.state.is_current(generation) {
            return None;
        }
        Some(shared.servo.set_angle(angle))
    }

    fn sample_dwell(&self, generation: u64, min_ms: u32, max_ms: u32) -> Option<u32> {
        let mut shared = self.lock();
        if !shared.state.is_current(generation) {
            return None;
        }
        Some(shared.dwell.sample_ms(min_ms, max_ms))
    }
}

/// Cloneable handle to the blade controller.
///
/// Every transition runs to completion under the control lock, including
/// spawning the replacement task, so concurrent commands are serialized and
/// at most one task is ever current. Cancellation is fire-and-forget: a
/// superseded task may still be sleeping, but it can no longer write.
#[derive(Clone)]
pub struct Controller {
    core: Arc<Core>,
}

impl Controller {
    pub fn new(servo: ServoDriver, config: ControllerConfig) -> Self {
        Self::with_sampler(servo, config, Box::new(StdRng::from_entropy()))
    }

    pub fn with_sampler(
        servo: ServoDriver,
        config: ControllerConfig,
        dwell: Box<dyn DwellSampler>,
    ) -> Self {
        let state = ControlState::new(servo.current_angle() as i32);
        Self {
            core: Arc::new(Core {
                shared: Mutex::new(Shared { state, servo, dwell }),
                config,
            }),
        }
    }

    pub fn spin(&self, direction: Direction) -> ControlResult<SpinOutcome> {
        let mut shared = self.core.lock();
        shared.state.reap();
        let outcome = shared.state.spin(direction);
        if let SpinOutcome::Start { generation } = outcome {
            let plan = MotionPlan::Spin {
                step: self.core.config.spin_step,
            };
            self.launch(&mut shared, plan, generation)?;
        }
        Ok(outcome)
    }

    /// Stop a manual spin. Returns the state right after the transition,
    /// taken under the same lock.
    pub fn stop_spin(&self) -> StatusReport {
        let mut shared = self.core.lock();
        shared.state.stop_spin();
        shared.state.reap();
        shared.report()
    }

    pub fn start_loop(&self, params: LoopParams) -> ControlResult<LoopOutcome> {
        let mut shared = self.core.lock();
        shared.state.reap();
        let outcome = shared.state.start_loop(params);
        if let LoopOutcome::Start { generation } = outcome {
            self.launch(&mut shared, MotionPlan::Loop, generation)?;
        }
        Ok(outcome)
    }

    /// Stop the loop. Same contract as [`Controller::stop_spin`].
    pub fn stop_loop(&self) -> StatusReport {
        let mut shared = self.core.lock();
        shared.state.stop_loop();
        shared.state.reap();
        shared.report()
    }

    /// Capture the most recently committed servo angle as the loop center.
    pub fn calibrate(&self) -> u8 {
        let mut shared = self.core.lock();
        let angle = shared.servo.current_angle();
        shared.state.calibrate(angle)
    }

    /// Cancel any motion and go idle.
    pub fn stop_all(&self) {
        self.core.lock().state.stop_all();
    }

    pub fn mode(&self) -> Mode {
        self.core.lock().state.mode()
    }

    pub fn current_angle(&self) -> u8 {
        self.core.lock().servo.current_angle()
    }

    pub fn live_tasks(&self) -> usize {
        self.core.lock().state.live_tasks()
    }

    pub fn snapshot(&self) -> StatusReport {
        self.core.lock().report()
    }

    /// Join every superseded task thread. Blocks until they exit, which is
    /// prompt since their waits wake on cancellation.
    pub fn join_retired(&self) {
        let retired = self.core.lock().state.take_retired();
        for handle in retired {
            handle.join();
        }
    }

    /// Stop motion, wait for the task threads and release the servo.
    pub fn shutdown(&self) -> ControlResult<()> {
        self.stop_all();
        self.join_retired();
        info!("Controller shut down");
        self.core.lock().servo.disable()
    }

    fn launch(&self, shared: &mut Shared, plan: MotionPlan, generation: u64) -> ControlResult<()> {
        let task = MotionTask::new(plan, generation);
        match task.spawn(Arc::clone(&self.core), self.core.config.task_stack_size) {
            Ok(handle) => {
                shared.state.attach(handle);
                Ok(())
            }
            Err(e) => {
                shared.state.abandon(generation);
                Err(ControlError::Spawn(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::servo::{PwmLog, SimulatedPwm};
    use std::thread;
    use std::time::Duration;

    fn controller(initial: i32) -> (Controller, PwmLog) {
        let pwm = SimulatedPwm::new();
        let log = pwm.log();
        let config = ControllerConfig {
            initial_angle: initial,
            spin_step: Duration::from_millis(1),
            ..ControllerConfig::default()
        };
        let servo = ServoDriver::new(Box::new(pwm), config.initial_angle);
        let ctrl = Controller::with_sampler(servo, config, Box::new(StdRng::seed_from_u64(1)));
        (ctrl, log)
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_double_spin_single_task() {
        let (ctrl, log) = controller(90);
        assert!(matches!(ctrl.spin(Direction::Forward).unwrap(), SpinOutcome::Start { .. }));
        assert_eq!(ctrl.spin(Direction::Forward).unwrap(), SpinOutcome::Redirected);
        assert_eq!(ctrl.live_tasks(), 1);
        assert_eq!(ctrl.snapshot().generation, 1);

        wait_for(|| ctrl.current_angle() > 92);
        assert!(log.len() > 3);
        ctrl.shutdown().unwrap();
    }

    #[test]
    fn test_stop_spin_halts_writes() {
        let (ctrl, log) = controller(20);
        ctrl.spin(Direction::Forward).unwrap();
        wait_for(|| ctrl.current_angle() >= 25);

        assert_eq!(ctrl.stop_spin().mode, Mode::Idle);
        assert_eq!(ctrl.mode(), Mode::Idle);
        let writes = log.len();
        let angle = ctrl.current_angle();

        thread::sleep(Duration::from_millis(30));
        assert_eq!(log.len(), writes);
        assert_eq!(ctrl.current_angle(), angle);

        ctrl.join_retired();
        assert_eq!(ctrl.live_tasks(), 0);
    }

    #[test]
    fn test_reverse_spin_stops_at_zero() {
        let (ctrl, _log) = controller(3);
        ctrl.spin(Direction::Reverse).unwrap();
        wait_for(|| ctrl.current_angle() == 0);
        thread::sleep(Duration::from_millis(10));
        assert_eq!(ctrl.current_angle(), 0);
        ctrl.shutdown().unwrap();
    }

    #[test]
    fn test_direction_change_reuses_task() {
        let (ctrl, _log) = controller(90);
        ctrl.spin(Direction::Forward).unwrap();
        wait_for(|| ctrl.current_angle() >= 95);
        ctrl.spin(Direction::Reverse).unwrap();
        let turned_at = ctrl.current_angle();
        wait_for(|| ctrl.current_angle() < turned_at);
        assert_eq!(ctrl.snapshot().generation, 1);
        assert_eq!(ctrl.live_tasks(), 1);
        ctrl.shutdown().unwrap();
    }

    #[test]
    fn test_loop_replaces_spin() {
        let (ctrl, log) = controller(90);
        ctrl.spin(Direction::Forward).unwrap();
        wait_for(|| ctrl.current_angle() >= 93);

        let params = LoopParams {
            retract: 4,
            speed_ms: 1,
            min_delay_ms: 1,
            max_delay_ms: 2,
        };
        assert!(matches!(ctrl.start_loop(params).unwrap(), LoopOutcome::Start { generation: 2 }));
        assert_eq!(ctrl.mode(), Mode::Looping);

        // Loop centered on the untouched calibration (90): 86..=94.
        let start = log.len();
        wait_for(|| log.len() > start + 30);
        assert_eq!(ctrl.stop_loop().mode, Mode::Idle);
        ctrl.join_retired();

        let lo = crate::servo::angle_to_duty(86, SimulatedPwm::MAX_DUTY);
        let hi = crate::servo::angle_to_duty(94, SimulatedPwm::MAX_DUTY);
        let tail = &log.writes()[start..];
        assert!(tail.iter().all(|d| (lo..=hi).contains(d)));
        assert_eq!(ctrl.live_tasks(), 0);
    }

    #[test]
    fn test_calibrate_captures_current_angle() {
        let (ctrl, _log) = controller(42);
        assert_eq!(ctrl.calibrate(), 42);
        assert_eq!(ctrl.snapshot().calibrated_angle, 42);
    }

    #[test]
    fn test_concurrent_commands_keep_one_current_task() {
        let (ctrl, _log) = controller(90);
        let workers: Vec<_> = (0..4)
            .map(|i| {
                let ctrl = ctrl.clone();
                thread::spawn(move || {
                    for _ in 0..20 {
                        if i % 2 == 0 {
                            let _ = ctrl.spin(Direction::Forward);
                            let _ = ctrl.stop_spin();
                        } else {
                            let _ = ctrl.start_loop(LoopParams {
                                retract: 2,
                                speed_ms: 0,
                                min_delay_ms: 0,
                                max_delay_ms: 1,
                            });
                            let _ = ctrl.stop_loop();
                        }
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        ctrl.stop_all();
        ctrl.join_retired();
        assert_eq!(ctrl.mode(), Mode::Idle);
        assert_eq!(ctrl.live_tasks(), 0);
    }

    #[test]
    fn test_stop_reports_mode_it_left_behind() {
        let (ctrl, _log) = controller(90);
        let params = LoopParams {
            retract: 2,
            speed_ms: 1,
            min_delay_ms: 1,
            max_delay_ms: 2,
        };
        ctrl.start_loop(params).unwrap();
        let report = ctrl.stop_spin();
        assert_eq!(report.mode, Mode::Looping);
        assert_eq!(report.generation, 1);
        assert_eq!(ctrl.stop_loop().mode, Mode::Idle);

        ctrl.spin(Direction::Reverse).unwrap();
        let report = ctrl.stop_loop();
        assert_eq!(report.mode, Mode::Spinning);
        assert_eq!(report.direction, Direction::Reverse);
        assert_eq!(ctrl.stop_spin().mode, Mode::Idle);
        ctrl.shutdown().unwrap();
    }
}
