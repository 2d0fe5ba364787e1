use crate::config::WifiConfig;
use crate::error::{ControlError, ControlResult};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};
use log::info;

/// WiFi station manager.
///
/// Joins the configured access point and blocks until the network
/// interface has an address. The returned driver must be kept alive for
/// the connection to stay up.
pub struct WifiManager {
    config: WifiConfig,
}

impl WifiManager {
    pub fn new(config: WifiConfig) -> Self {
        Self { config }
    }

    pub fn connect(
        &self,
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
    ) -> ControlResult<BlockingWifi<EspWifi<'static>>> {
        let mut wifi = BlockingWifi::wrap(
            EspWifi::new(modem, sysloop.clone(), Some(nvs))?,
            sysloop,
        )?;

        let ssid = self
            .config
            .ssid
            .as_str()
            .try_into()
            .map_err(|_| ControlError::Config("SSID longer than 32 bytes".into()))?;
        let password = self
            .config
            .password
            .as_str()
            .try_into()
            .map_err(|_| ControlError::Config("WiFi password longer than 64 bytes".into()))?;
        let auth_method = if self.config.is_open() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };

        wifi.set_configuration(&Configuration::Client(ClientConfiguration {
            ssid,
            password,
            auth_method,
            ..Default::default()
        }))?;

        info!("Connecting to WiFi '{}'...", self.config.ssid);
        wifi.start()?;
        wifi.connect()?;
        wifi.wait_netif_up()?;

        let ip_info = wifi.wifi().sta_netif().get_ip_info()?;
        info!("Connected! IP: {}", ip_info.ip);
        Ok(wifi)
    }
}
