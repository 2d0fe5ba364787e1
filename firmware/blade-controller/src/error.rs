use thiserror::Error;

pub type ControlResult<T> = Result<T, ControlError>;

/// Faults raised inside the controller. None of them reach the control
/// page; the dispatcher turns them into an idle status.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The motion task thread could not be started.
    #[error("Failed to spawn motion task: {0}")]
    Spawn(#[from] std::io::Error),

    /// The PWM peripheral rejected a duty update.
    #[error("PWM write failed: {0}")]
    Drive(String),

    /// Invalid build-time or boot configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[cfg(target_os = "espidf")]
    #[error("ESP-IDF error: {0}")]
    Esp(#[from] esp_idf_sys::EspError),
}
