//! Background motion tasks.
//!
//! A [`MotionTask`] is one cancellable, repeating unit of work: either a
//! manual spin or the retract/return loop. It never touches the servo
//! itself; every write goes through a [`MotionContext`], which refuses the
//! write once the task's generation is no longer the active one.

use blade_protocol::LoopParams;
use log::{debug, info, warn};
use rand::Rng;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Cooperative cancellation flag whose waits wake up on cancel.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait up to `duration`. Returns true if cancelled before or during the wait.
    pub fn sleep(&self, duration: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, duration, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Source of loop dwell durations.
pub trait DwellSampler: Send {
    /// Uniform sample in `[min_ms, max_ms]`, inclusive.
    fn sample_ms(&mut self, min_ms: u32, max_ms: u32) -> u32;
}

impl<R: Rng + Send> DwellSampler for R {
    fn sample_ms(&mut self, min_ms: u32, max_ms: u32) -> u32 {
        if min_ms >= max_ms {
            return min_ms;
        }
        self.gen_range(min_ms..=max_ms)
    }
}

/// What a loop cycle is centered on and how it moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopCycle {
    pub center: u8,
    pub params: LoopParams,
}

/// Access to the shared servo for a running task. Every method returns
/// `None` once `generation` has been superseded or stopped; the task then
/// exits without writing.
pub trait MotionContext: Send + Sync + 'static {
    /// Advance one degree in the live spin direction.
    fn spin_step(&self, generation: u64) -> Option<u8>;

    /// Center and parameters for the next loop cycle.
    fn loop_cycle(&self, generation: u64) -> Option<LoopCycle>;

    fn move_to(&self, generation: u64, angle: i32) -> Option<u8>;

    fn sample_dwell(&self, generation: u64, min_ms: u32, max_ms: u32) -> Option<u32>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionPlan {
    Spin { step: Duration },
    Loop,
}

impl MotionPlan {
    fn thread_name(&self) -> &'static str {
        match self {
            MotionPlan::Spin { .. } => "blade-spin",
            MotionPlan::Loop => "blade-loop",
        }
    }
}

/// Outcome of one unit of work.
enum Flow {
    Continue,
    Stop,
}

pub struct MotionTask {
    plan: MotionPlan,
    generation: u64,
    cancel: CancelToken,
}

impl MotionTask {
    pub fn new(plan: MotionPlan, generation: u64) -> Self {
        Self {
            plan,
            generation,
            cancel: CancelToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Start the task on its own thread.
    pub fn spawn<C: MotionContext>(
        self,
        ctx: Arc<C>,
        stack_size: usize,
    ) -> std::io::Result<MotionHandle> {
        let generation = self.generation;
        let cancel = self.cancel.clone();
        let thread = thread::Builder::new()
            .name(self.plan.thread_name().to_string())
            .stack_size(stack_size)
            .spawn(move || self.run(ctx.as_ref()))?;
        Ok(MotionHandle {
            generation,
            cancel,
            thread: Some(thread),
        })
    }

    /// Repeat the plan's unit of work until cancelled or superseded.
    pub fn run<C: MotionContext + ?Sized>(self, ctx: &C) {
        info!("Motion task {} started: {:?}", self.generation, self.plan);
        loop {
            let flow = match self.plan {
                MotionPlan::Spin { step } => self.spin_once(ctx, step),
                MotionPlan::Loop => self.loop_once(ctx),
            };
            if let Flow::Stop = flow {
                break;
            }
        }
        info!("Motion task {} finished", self.generation);
    }

    fn spin_once<C: MotionContext + ?Sized>(&self, ctx: &C, step: Duration) -> Flow {
        if self.cancel.is_cancelled() || ctx.spin_step(self.generation).is_none() {
            return Flow::Stop;
        }
        self.pause(step)
    }

    fn loop_once<C: MotionContext + ?Sized>(&self, ctx: &C) -> Flow {
        let Some(cycle) = ctx.loop_cycle(self.generation) else {
            return Flow::Stop;
        };
        let center = cycle.center as i32;
        let retract = cycle.params.retract as i32;
        let step = Duration::from_millis(cycle.params.speed_ms as u64);

        // Retract, then sweep through to the far side.
        let retract_sweep = (center - retract..=center).rev();
        let return_sweep = center - retract..=center + retract;
        for angle in retract_sweep.chain(return_sweep) {
            if self.cancel.is_cancelled() || ctx.move_to(self.generation, angle).is_none() {
                return Flow::Stop;
            }
            if let Flow::Stop = self.pause(step) {
                return Flow::Stop;
            }
        }

        let Some(dwell) = ctx.sample_dwell(
            self.generation,
            cycle.params.min_delay_ms,
            cycle.params.max_delay_ms,
        ) else {
            return Flow::Stop;
        };
        debug!("Loop dwell {}ms", dwell);
        self.pause(Duration::from_millis(dwell as u64))
    }

    fn pause(&self, duration: Duration) -> Flow {
        if self.cancel.sleep(duration) {
            Flow::Stop
        } else {
            Flow::Continue
        }
    }
}

/// Handle to a spawned task, owned by the control state.
#[derive(Debug)]
pub struct MotionHandle {
    generation: u64,
    cancel: CancelToken,
    thread: Option<JoinHandle<()>>,
}

impl MotionHandle {
    /// Handle with no thread behind it, for driving the state machine alone.
    #[cfg(test)]
    pub(crate) fn detached(generation: u64) -> Self {
        Self {
            generation,
            cancel: CancelToken::new(),
            thread: None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Wait for the thread to exit. Must not be called with the control lock held.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Motion task {} panicked", self.generation);
            }
        }
    }
}
