use crate::motion::MotionHandle;
use blade_protocol::{clamp_angle, Direction, LoopParams, Mode, ANGLE_HOME};
use log::{debug, info};

/// Result of a spin request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinOutcome {
    /// A new spin task must be spawned under this generation.
    Start { generation: u64 },
    /// Already spinning; the live task picks up the direction.
    Redirected,
    /// A loop owns the servo.
    LoopActive,
}

/// Result of a loop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    Start { generation: u64 },
    /// Already looping; new parameters apply from the next cycle.
    Retuned,
}

/// Blade control state machine.
///
/// Owns the mode, calibration, spin direction, loop parameters and the
/// single active task slot. Superseded tasks are cancelled immediately and
/// parked in `retired` until their threads are joined.
#[derive(Debug)]
pub struct ControlState {
    mode: Mode,
    calibrated_angle: u8,
    direction: Direction,
    loop_params: LoopParams,
    generation: u64,
    active: Option<MotionHandle>,
    retired: Vec<MotionHandle>,
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new(ANGLE_HOME as i32)
    }
}

impl ControlState {
    pub fn new(calibrated_angle: i32) -> Self {
        Self {
            mode: Mode::Idle,
            calibrated_angle: clamp_angle(calibrated_angle),
            direction: Direction::Forward,
            loop_params: LoopParams::default(),
            generation: 0,
            active: None,
            retired: Vec::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn calibrated_angle(&self) -> u8 {
        self.calibrated_angle
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn loop_params(&self) -> LoopParams {
        self.loop_params
    }

    /// Generation of the most recently started task.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True while `generation` owns the servo.
    pub fn is_current(&self, generation: u64) -> bool {
        self.mode != Mode::Idle
            && self
                .active
                .as_ref()
                .is_some_and(|h| h.generation() == generation && !h.is_cancelled())
    }

    pub fn spin(&mut self, direction: Direction) -> SpinOutcome {
        match self.mode {
            Mode::Idle => {
                self.direction = direction;
                self.mode = Mode::Spinning;
                info!("Idle -> Spinning {}", direction.as_str());
                SpinOutcome::Start {
                    generation: self.next_generation(),
                }
            }
            Mode::Spinning => {
                if self.direction != direction {
                    info!("Spin direction -> {}", direction.as_str());
                }
                self.direction = direction;
                SpinOutcome::Redirected
            }
            Mode::Looping => {
                debug!("Spin refused: loop active");
                SpinOutcome::LoopActive
            }
        }
    }

    /// Returns true if a spin was stopped.
    pub fn stop_spin(&mut self) -> bool {
        if self.mode != Mode::Spinning {
            debug!("stop_spin ignored in {}", self.mode.as_str());
            return false;
        }
        self.retire();
        self.mode = Mode::Idle;
        info!("Spinning -> Idle");
        true
    }

    pub fn start_loop(&mut self, params: LoopParams) -> LoopOutcome {
        let params = params.normalized();
        self.loop_params = params;
        if self.mode == Mode::Looping {
            info!("Loop retuned: {:?}", params);
            return LoopOutcome::Retuned;
        }
        self.retire();
        info!("{} -> Looping around {}°", self.mode.as_str(), self.calibrated_angle);
        self.mode = Mode::Looping;
        LoopOutcome::Start {
            generation: self.next_generation(),
        }
    }

    /// Returns true if a loop was stopped.
    pub fn stop_loop(&mut self) -> bool {
        if self.mode != Mode::Looping {
            debug!("stop_loop ignored in {}", self.mode.as_str());
            return false;
        }
        self.retire();
        self.mode = Mode::Idle;
        info!("Looping -> Idle");
        true
    }

    /// Cancel whatever is running and go idle.
    pub fn stop_all(&mut self) {
        self.retire();
        self.mode = Mode::Idle;
    }

    /// Store the servo's current angle as the loop center. Returns it.
    pub fn calibrate(&mut self, current_angle: u8) -> u8 {
        self.calibrated_angle = current_angle;
        info!("Calibrated at {}°", current_angle);
        current_angle
    }

    /// Install the handle of the task started for `generation`.
    pub fn attach(&mut self, handle: MotionHandle) {
        debug_assert_eq!(handle.generation(), self.generation);
        self.retire();
        self.active = Some(handle);
    }

    /// Undo a start whose task could not be spawned.
    pub fn abandon(&mut self, generation: u64) {
        if self.generation == generation && self.active.is_none() {
            self.mode = Mode::Idle;
        }
    }

    /// Tasks that may still write or run: the active one plus retired
    /// threads that have not exited yet.
    pub fn live_tasks(&self) -> usize {
        let active = usize::from(self.active.is_some());
        active + self.retired.iter().filter(|h| !h.is_finished()).count()
    }

    /// Hand over retired handles so they can be joined outside the lock.
    pub fn take_retired(&mut self) -> Vec<MotionHandle> {
        std::mem::take(&mut self.retired)
    }

    /// Drop handles of retired threads that already exited.
    pub fn reap(&mut self) {
        let (done, pending): (Vec<_>, Vec<_>) =
            self.retired.drain(..).partition(|h| h.is_finished());
        self.retired = pending;
        for handle in done {
            handle.join();
        }
    }

    fn retire(&mut self) {
        if let Some(handle) = self.active.take() {
            debug!("Cancelling motion task {}", handle.generation());
            handle.cancel();
            self.retired.push(handle);
        }
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(outcome: SpinOutcome) -> u64 {
        match outcome {
            SpinOutcome::Start { generation } => generation,
            other => panic!("expected start, got {:?}", other),
        }
    }

    #[test]
    fn test_initial_state_idle() {
        let sm = ControlState::default();
        assert_eq!(sm.mode(), Mode::Idle);
        assert_eq!(sm.calibrated_angle(), ANGLE_HOME);
        assert_eq!(sm.loop_params(), LoopParams::default());
        assert_eq!(sm.live_tasks(), 0);
    }

    #[test]
    fn test_initial_calibration_clamped() {
        assert_eq!(ControlState::new(-20).calibrated_angle(), 0);
        assert_eq!(ControlState::new(999).calibrated_angle(), 180);
    }

    #[test]
    fn test_spin_from_idle_starts_task() {
        let mut sm = ControlState::default();
        let gen = started(sm.spin(Direction::Reverse));
        assert_eq!(gen, 1);
        assert_eq!(sm.mode(), Mode::Spinning);
        assert_eq!(sm.direction(), Direction::Reverse);
    }

    #[test]
    fn test_repeated_spin_does_not_start_second_task() {
        let mut sm = ControlState::default();
        let gen = started(sm.spin(Direction::Forward));
        sm.attach(MotionHandle::detached(gen));

        assert_eq!(sm.spin(Direction::Forward), SpinOutcome::Redirected);
        assert_eq!(sm.generation(), gen);
        assert_eq!(sm.live_tasks(), 1);
        assert!(sm.is_current(gen));
    }

    #[test]
    fn test_spin_redirects_live_task() {
        let mut sm = ControlState::default();
        let gen = started(sm.spin(Direction::Forward));
        sm.attach(MotionHandle::detached(gen));

        assert_eq!(sm.spin(Direction::Reverse), SpinOutcome::Redirected);
        assert_eq!(sm.direction(), Direction::Reverse);
        assert!(sm.is_current(gen));
    }

    #[test]
    fn test_stop_spin_retires_task() {
        let mut sm = ControlState::default();
        let gen = started(sm.spin(Direction::Forward));
        sm.attach(MotionHandle::detached(gen));

        assert!(sm.stop_spin());
        assert_eq!(sm.mode(), Mode::Idle);
        assert!(!sm.is_current(gen));
        let retired = sm.take_retired();
        assert_eq!(retired.len(), 1);
        assert!(retired[0].is_cancelled());
    }

    #[test]
    fn test_stop_spin_when_idle_is_noop() {
        let mut sm = ControlState::default();
        assert!(!sm.stop_spin());
        assert_eq!(sm.mode(), Mode::Idle);
    }

    #[test]
    fn test_start_loop_supersedes_spin() {
        let mut sm = ControlState::default();
        let spin_gen = started(sm.spin(Direction::Forward));
        sm.attach(MotionHandle::detached(spin_gen));

        let outcome = sm.start_loop(LoopParams::default());
        let loop_gen = match outcome {
            LoopOutcome::Start { generation } => generation,
            other => panic!("expected start, got {:?}", other),
        };
        assert!(loop_gen > spin_gen);
        assert_eq!(sm.mode(), Mode::Looping);
        assert!(!sm.is_current(spin_gen));

        sm.attach(MotionHandle::detached(loop_gen));
        assert!(sm.is_current(loop_gen));
    }

    #[test]
    fn test_start_loop_while_looping_retunes() {
        let mut sm = ControlState::default();
        let LoopOutcome::Start { generation } = sm.start_loop(LoopParams::default()) else {
            panic!("loop did not start");
        };
        sm.attach(MotionHandle::detached(generation));

        let params = LoopParams {
            retract: 5,
            speed_ms: 10,
            min_delay_ms: 900,
            max_delay_ms: 100,
        };
        assert_eq!(sm.start_loop(params), LoopOutcome::Retuned);
        assert_eq!(sm.generation(), generation);
        assert_eq!(sm.loop_params().min_delay_ms, 100);
        assert_eq!(sm.loop_params().max_delay_ms, 900);
        assert!(sm.is_current(generation));
    }

    #[test]
    fn test_spin_refused_while_looping() {
        let mut sm = ControlState::default();
        sm.start_loop(LoopParams::default());
        assert_eq!(sm.spin(Direction::Forward), SpinOutcome::LoopActive);
        assert_eq!(sm.mode(), Mode::Looping);
        assert!(!sm.stop_spin());
        assert_eq!(sm.mode(), Mode::Looping);
    }

    #[test]
    fn test_stop_loop() {
        let mut sm = ControlState::default();
        assert!(!sm.stop_loop());
        sm.start_loop(LoopParams::default());
        assert!(sm.stop_loop());
        assert_eq!(sm.mode(), Mode::Idle);
    }

    #[test]
    fn test_calibrate_keeps_mode() {
        let mut sm = ControlState::default();
        sm.spin(Direction::Forward);
        assert_eq!(sm.calibrate(123), 123);
        assert_eq!(sm.calibrated_angle(), 123);
        assert_eq!(sm.mode(), Mode::Spinning);
        sm.stop_spin();
        assert_eq!(sm.calibrated_angle(), 123);
    }

    #[test]
    fn test_abandon_failed_start() {
        let mut sm = ControlState::default();
        let gen = started(sm.spin(Direction::Forward));
        sm.abandon(gen);
        assert_eq!(sm.mode(), Mode::Idle);
        // A later start still works.
        assert!(matches!(sm.spin(Direction::Forward), SpinOutcome::Start { .. }));
    }

    #[test]
    fn test_reap_drops_finished_handles() {
        let mut sm = ControlState::default();
        let gen = started(sm.spin(Direction::Forward));
        sm.attach(MotionHandle::detached(gen));
        sm.stop_spin();
        sm.reap();
        assert!(sm.take_retired().is_empty());
        assert_eq!(sm.live_tasks(), 0);
    }
}
