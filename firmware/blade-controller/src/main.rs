use blade_controller::{
    ControlChannel, Controller, ControllerConfig, Dispatcher, ServoDriver,
};
use log::info;

#[cfg(target_os = "espidf")]
fn main() {
    use blade_controller::config::SERVO_GPIO;
    use blade_controller::servo::PWM_FREQ_HZ;
    use blade_controller::wifi::WifiManager;
    use blade_controller::{http, WifiConfig};
    use esp_idf_hal::ledc::{config::TimerConfig, LedcDriver, LedcTimerDriver};
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_hal::prelude::*;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use std::sync::Arc;
    use std::thread::sleep;
    use std::time::Duration;

    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init().expect("Failed to init logger");

    info!("Blade Controller v{}", env!("CARGO_PKG_VERSION"));

    let peripherals = Peripherals::take().expect("Failed to take peripherals");
    let sysloop = EspSystemEventLoop::take().expect("Failed to take event loop");
    let nvs_partition = EspDefaultNvsPartition::take().expect("Failed to init NVS");

    // Servo via LEDC PWM
    let timer_config = TimerConfig::default().frequency(PWM_FREQ_HZ.Hz().into());
    let timer = LedcTimerDriver::new(peripherals.ledc.timer0, &timer_config)
        .expect("Failed to init LEDC timer");
    let ledc_driver = LedcDriver::new(
        peripherals.ledc.channel0,
        timer,
        peripherals.pins.gpio2, // SERVO_GPIO
    )
    .expect("Failed to init LEDC channel");
    info!("Servo on GPIO{} at {}Hz", SERVO_GPIO, PWM_FREQ_HZ);

    let config = ControllerConfig::default();
    let servo = ServoDriver::new(Box::new(ledc_driver), config.initial_angle);
    let controller = Controller::new(servo, config);
    let channel = Arc::new(ControlChannel::new(Dispatcher::new(controller)));

    let _wifi = WifiManager::new(WifiConfig::default())
        .connect(peripherals.modem, sysloop, nvs_partition)
        .expect("Failed to connect WiFi");

    let _server = http::start_server(channel).expect("Failed to start HTTP server");

    info!("Blade controller running. Waiting for commands...");

    // Work happens in the HTTP and motion task threads.
    loop {
        sleep(Duration::from_secs(60));
    }
}

/// Host simulator: one URL query per stdin line, e.g. `start_loop&retract=10`.
#[cfg(not(target_os = "espidf"))]
fn main() {
    use blade_controller::SimulatedPwm;
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "blade_controller=info".into()),
        )
        .init();

    info!("Blade Controller v{} (simulated servo)", env!("CARGO_PKG_VERSION"));

    let config = ControllerConfig::default();
    let servo = ServoDriver::new(Box::new(SimulatedPwm::new()), config.initial_angle);
    let controller = Controller::new(servo, config);
    let channel = ControlChannel::new(Dispatcher::new(controller.clone()));

    if let Err(e) = channel.serve_lines(std::io::stdin().lock(), std::io::stdout()) {
        log::error!("Console closed: {}", e);
    }

    if let Err(e) = controller.shutdown() {
        log::error!("Shutdown failed: {}", e);
    }
}
