use blade_protocol::ANGLE_HOME;
use std::time::Duration;

/// Servo signal pin on the ESP32 board.
pub const SERVO_GPIO: u8 = 2;

/// Controller tuning. Defaults match the blade rig.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Angle commanded at boot; also the first loop center.
    pub initial_angle: i32,
    /// Delay between one-degree steps of a manual spin.
    pub spin_step: Duration,
    /// Stack size for motion task threads.
    pub task_stack_size: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            initial_angle: ANGLE_HOME as i32,
            spin_step: Duration::from_millis(100),
            task_stack_size: 8 * 1024,
        }
    }
}

/// WiFi station credentials.
///
/// Taken from `BLADE_WIFI_SSID` / `BLADE_WIFI_PASS` at build time. The
/// fallbacks are for bench development only.
#[derive(Debug, Clone)]
pub struct WifiConfig {
    pub ssid: String,
    pub password: String,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            ssid: option_env!("BLADE_WIFI_SSID").unwrap_or("blade-dev").into(),
            password: option_env!("BLADE_WIFI_PASS").unwrap_or("blade-dev-pass").into(),
        }
    }
}

impl WifiConfig {
    /// Open network when no password is set.
    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }
}
