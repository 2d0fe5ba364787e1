#![cfg_attr(not(feature = "std"), no_std)]

use minicbor::{Decode, Encode};

/// Servo angle limits.
pub const ANGLE_MIN: u8 = 0;
pub const ANGLE_MAX: u8 = 180;
/// Position commanded at power-on and used as the first loop center.
pub const ANGLE_HOME: u8 = 90;

/// Loop parameter defaults applied when a field is missing or malformed.
pub const DEFAULT_RETRACT: u8 = 15;
pub const DEFAULT_SPEED_MS: u32 = 50;
pub const DEFAULT_MIN_DELAY_MS: u32 = 1000;
pub const DEFAULT_MAX_DELAY_MS: u32 = 5000;

/// Controller operating modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
#[cbor(index_only)]
pub enum Mode {
    #[n(0)]
    Idle,
    #[n(1)]
    Spinning,
    #[n(2)]
    Looping,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Idle => "idle",
            Mode::Spinning => "spinning",
            Mode::Looping => "looping",
        }
    }
}

/// Manual spin direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
#[cbor(index_only)]
pub enum Direction {
    #[n(0)]
    Forward,
    #[n(1)]
    Reverse,
}

impl Direction {
    /// Signed one-degree step.
    pub fn step(&self) -> i32 {
        match self {
            Direction::Forward => 1,
            Direction::Reverse => -1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "Forward",
            Direction::Reverse => "Reverse",
        }
    }
}

/// Commands accepted from the control page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SpinForward,
    SpinReverse,
    StopSpin,
    Calibrate,
    StartLoop,
    StopLoop,
}

impl Command {
    /// All commands, in the order a request naming several is resolved.
    pub const ALL: [Command; 6] = [
        Command::SpinForward,
        Command::SpinReverse,
        Command::StopSpin,
        Command::Calibrate,
        Command::StartLoop,
        Command::StopLoop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::SpinForward => "spin_forward",
            Command::SpinReverse => "spin_reverse",
            Command::StopSpin => "stop_spin",
            Command::Calibrate => "calibrate",
            Command::StartLoop => "start_loop",
            Command::StopLoop => "stop_loop",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

/// Parameters of one loop session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct LoopParams {
    /// Sweep half-width around the calibrated angle, degrees.
    #[n(0)]
    pub retract: u8,
    /// Delay after each one-degree step, ms.
    #[n(1)]
    pub speed_ms: u32,
    #[n(2)]
    pub min_delay_ms: u32,
    #[n(3)]
    pub max_delay_ms: u32,
}

impl Default for LoopParams {
    fn default() -> Self {
        Self {
            retract: DEFAULT_RETRACT,
            speed_ms: DEFAULT_SPEED_MS,
            min_delay_ms: DEFAULT_MIN_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl LoopParams {
    /// Build parameters from a key lookup (`retract`, `speed`, `min_delay`,
    /// `max_delay`). Each field falls back to its default on its own when
    /// missing or not a non-negative integer.
    pub fn from_lookup<'a, F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        let retract = parse_field(lookup("retract"), DEFAULT_RETRACT as u32);
        let params = Self {
            retract: retract.min(ANGLE_MAX as u32) as u8,
            speed_ms: parse_field(lookup("speed"), DEFAULT_SPEED_MS),
            min_delay_ms: parse_field(lookup("min_delay"), DEFAULT_MIN_DELAY_MS),
            max_delay_ms: parse_field(lookup("max_delay"), DEFAULT_MAX_DELAY_MS),
        };
        params.normalized()
    }

    /// Swap inverted delay bounds so `min_delay_ms <= max_delay_ms`.
    pub fn normalized(self) -> Self {
        if self.min_delay_ms > self.max_delay_ms {
            Self {
                min_delay_ms: self.max_delay_ms,
                max_delay_ms: self.min_delay_ms,
                ..self
            }
        } else {
            self
        }
    }
}

fn parse_field(raw: Option<&str>, default: u32) -> u32 {
    raw.and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

/// Snapshot served on GET /status.
#[derive(Debug, Clone, Encode, Decode)]
pub struct StatusReport {
    #[n(0)]
    pub mode: Mode,
    #[n(1)]
    pub direction: Direction,
    #[n(2)]
    pub current_angle: u8,
    #[n(3)]
    pub calibrated_angle: u8,
    #[n(4)]
    pub loop_params: LoopParams,
    #[n(5)]
    pub generation: u64,
}

/// Clamp any requested angle to [ANGLE_MIN, ANGLE_MAX].
pub fn clamp_angle(angle: i32) -> u8 {
    angle.clamp(ANGLE_MIN as i32, ANGLE_MAX as i32) as u8
}
