use crate::error::ControlResult;
use blade_protocol::{clamp_angle, ANGLE_MAX};
use log::{debug, error};
use std::sync::{Arc, Mutex, PoisonError};

/// SG90 servo PWM parameters.
pub const PWM_FREQ_HZ: u32 = 50;
const MIN_PULSE_US: u32 = 500; // 0° position
const MAX_PULSE_US: u32 = 2500; // 180° position
const PERIOD_US: u32 = 20_000; // 50 Hz = 20ms

/// A PWM output able to hold a servo pulse.
pub trait PwmChannel: Send {
    /// Duty value corresponding to a 100% cycle.
    fn max_duty(&self) -> u32;

    fn set_duty(&mut self, duty: u32) -> ControlResult<()>;
}

#[cfg(target_os = "espidf")]
impl PwmChannel for esp_idf_hal::ledc::LedcDriver<'static> {
    fn max_duty(&self) -> u32 {
        self.get_max_duty()
    }

    fn set_duty(&mut self, duty: u32) -> ControlResult<()> {
        esp_idf_hal::ledc::LedcDriver::set_duty(self, duty)?;
        Ok(())
    }
}

/// Servo driver. The only component that touches the PWM output.
pub struct ServoDriver {
    pwm: Box<dyn PwmChannel>,
    max_duty: u32,
    current_angle: u8,
}

impl ServoDriver {
    /// Create a driver and move the servo to `initial_angle`.
    pub fn new(pwm: Box<dyn PwmChannel>, initial_angle: i32) -> Self {
        let max_duty = pwm.max_duty();
        let mut driver = Self {
            pwm,
            max_duty,
            current_angle: clamp_angle(initial_angle),
        };
        driver.set_angle(initial_angle);
        driver
    }

    /// Last commanded angle.
    pub fn current_angle(&self) -> u8 {
        self.current_angle
    }

    /// Command any angle; out-of-range input is clamped to 0–180.
    /// Returns the angle actually commanded.
    pub fn set_angle(&mut self, angle: i32) -> u8 {
        let angle = clamp_angle(angle);
        let duty = angle_to_duty(angle, self.max_duty);
        if let Err(e) = self.pwm.set_duty(duty) {
            error!("Servo write of {}° failed: {}", angle, e);
        }
        self.current_angle = angle;
        angle
    }

    /// Disable PWM output (stop holding servo position).
    pub fn disable(&mut self) -> ControlResult<()> {
        debug!("Releasing servo output");
        self.pwm.set_duty(0)
    }
}

/// Convert angle (0–180) to a duty value for a channel with `max_duty`.
pub fn angle_to_duty(angle: u8, max_duty: u32) -> u32 {
    let angle = angle.min(ANGLE_MAX) as u64;
    let pulse_us = MIN_PULSE_US as u64
        + (angle * (MAX_PULSE_US - MIN_PULSE_US) as u64) / ANGLE_MAX as u64;
    ((pulse_us * max_duty as u64) / PERIOD_US as u64) as u32
}

/// Duties written to a [`SimulatedPwm`], shared with whoever inspects them.
#[derive(Debug, Clone, Default)]
pub struct PwmLog(Arc<Mutex<Vec<u32>>>);

impl PwmLog {
    pub fn writes(&self) -> Vec<u32> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last(&self) -> Option<u32> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).last().copied()
    }
}

/// 16-bit PWM stand-in for host builds. Records every duty it receives.
#[derive(Debug, Default)]
pub struct SimulatedPwm {
    log: PwmLog,
}

impl SimulatedPwm {
    pub const MAX_DUTY: u32 = u16::MAX as u32;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> PwmLog {
        self.log.clone()
    }
}

impl PwmChannel for SimulatedPwm {
    fn max_duty(&self) -> u32 {
        Self::MAX_DUTY
    }

    fn set_duty(&mut self, duty: u32) -> ControlResult<()> {
        self.log
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(duty);
        Ok(())
    }
}
