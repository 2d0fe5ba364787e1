//! Servo blade controller.
//!
//! Drives one servo through three exclusive behaviors (idle, manual spin,
//! retract/return loop) behind a command surface served over HTTP on the
//! ESP32. Everything except the transport builds and tests on the host.

pub mod channel;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod motion;
pub mod servo;
pub mod state;

#[cfg(target_os = "espidf")]
pub mod http;
#[cfg(target_os = "espidf")]
pub mod wifi;

pub use channel::ControlChannel;
pub use config::{ControllerConfig, WifiConfig};
pub use controller::Controller;
pub use dispatch::Dispatcher;
pub use error::{ControlError, ControlResult};
pub use servo::{PwmChannel, ServoDriver, SimulatedPwm};
