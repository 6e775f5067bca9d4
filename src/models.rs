use std::{
    collections::HashSet,
    net::{IpAddr, Ipv4Addr},
    path::Path,
    time::Duration,
};

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("error parsing configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
    #[error("duplicate accessory name: {0}")]
    DuplicateName(String),
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
pub struct Location {
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Timing {
    #[validate(range(min = 1))]
    pub update_interval_ms: u64,
    #[validate(range(min = 1))]
    pub ui_sync_interval_ms: u64,
    #[validate(range(min = 100))]
    pub rescan_interval_ms: u64,
}

impl Timing {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn ui_sync_interval(&self) -> Duration {
        Duration::from_millis(self.ui_sync_interval_ms)
    }

    pub fn rescan_interval(&self) -> Duration {
        Duration::from_millis(self.rescan_interval_ms)
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            update_interval_ms: 50,
            ui_sync_interval_ms: 200,
            rescan_interval_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DummyTransportMode {
    Text,
    Ansi,
}

impl Default for DummyTransportMode {
    fn default() -> Self {
        Self::Text
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DummyTransport {
    #[serde(default)]
    pub mode: DummyTransportMode,
    /// Simulate a peripheral for every scanned service
    #[serde(default = "default_true")]
    pub advertise: bool,
}

impl Default for DummyTransport {
    fn default() -> Self {
        Self {
            mode: Default::default(),
            advertise: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    Dummy(DummyTransport),
    Bluetooth,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Dummy(Default::default())
    }
}

pub trait ServerConfig {
    fn bind(&self) -> IpAddr;
    fn port(&self) -> u16;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct JsonServer {
    pub enable: bool,
    pub bind: IpAddr,
    #[validate(range(min = 1024))]
    pub port: u16,
}

impl Default for JsonServer {
    fn default() -> Self {
        Self {
            enable: true,
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 19555,
        }
    }
}

impl ServerConfig for JsonServer {
    fn bind(&self) -> IpAddr {
        self.bind
    }

    fn port(&self) -> u16 {
        self.port
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ColorCorrection {
    #[validate(range(min = 0.1, max = 5.0))]
    pub gamma_red: f32,
    #[validate(range(min = 0.1, max = 5.0))]
    pub gamma_green: f32,
    #[validate(range(min = 0.1, max = 5.0))]
    pub gamma_blue: f32,
}

impl Default for ColorCorrection {
    fn default() -> Self {
        Self {
            gamma_red: 1.0,
            gamma_green: 0.7,
            gamma_blue: 0.7,
        }
    }
}

fn default_rainbow_cycle() -> f64 {
    15.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct AccessoryConfig {
    #[validate(length(min = 1))]
    pub name: String,
    /// Advertised service of the peripheral, also the service holding the color characteristic
    pub service_id: Uuid,
    /// Only connect to the peripheral with this address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Duration of a full rainbow cycle, in seconds
    #[serde(default = "default_rainbow_cycle")]
    #[validate(range(min = 0.1))]
    pub rainbow_cycle: f64,
    #[serde(default)]
    #[validate(nested)]
    pub correction: ColorCorrection,
}

impl AccessoryConfig {
    pub fn new(name: impl Into<String>, service_id: Uuid) -> Self {
        Self {
            name: name.into(),
            service_id,
            address: None,
            rainbow_cycle: default_rainbow_cycle(),
            correction: Default::default(),
        }
    }

    pub fn rainbow_cycle(&self) -> Duration {
        Duration::from_secs_f64(self.rainbow_cycle)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub location: Location,
    #[serde(default)]
    #[validate(nested)]
    pub timing: Timing,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    #[validate(nested)]
    pub json_server: JsonServer,
    #[serde(default)]
    #[validate(nested)]
    pub accessories: Vec<AccessoryConfig>,
}

impl Config {
    pub async fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let full = tokio::fs::read_to_string(path).await?;
        Self::from_toml(&full)
    }

    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(source)?;
        config.validate()?;

        let mut names = HashSet::new();
        for accessory in &config.accessories {
            if !names.insert(accessory.name.as_str()) {
                return Err(ConfigError::DuplicateName(accessory.name.clone()));
            }
        }

        Ok(config)
    }

    pub fn to_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [location]
        longitude = 4.35
        latitude = 50.85

        [timing]
        rescan_interval_ms = 1000

        [transport]
        kind = "dummy"
        mode = "ansi"

        [[accessories]]
        name = "Desk"
        service_id = "0000ffd5-0000-1000-8000-00805f9b34fb"
        rainbow_cycle = 30

        [[accessories]]
        name = "Shelf"
        service_id = "0000ffd5-0000-1000-8000-00805f9b34fb"
        address = "BE:FF:20:00:0A:1C"

        [accessories.correction]
        gamma_green = 0.8
    "#;

    #[test]
    fn deserialize_sample() {
        let config = Config::from_toml(SAMPLE).expect("failed to parse sample");

        assert_eq!(config.location.latitude, 50.85);
        assert_eq!(config.timing.rescan_interval_ms, 1000);
        assert_eq!(config.timing.update_interval_ms, 50);
        assert_eq!(
            config.transport,
            TransportConfig::Dummy(DummyTransport {
                mode: DummyTransportMode::Ansi,
                advertise: true,
            })
        );
        assert!(config.json_server.enable);
        assert_eq!(config.json_server.port, 19555);

        assert_eq!(config.accessories.len(), 2);
        assert_eq!(config.accessories[0].rainbow_cycle, 30.);
        assert_eq!(config.accessories[0].correction, ColorCorrection::default());
        assert_eq!(config.accessories[1].rainbow_cycle, 15.);
        assert_eq!(
            config.accessories[1].address.as_deref(),
            Some("BE:FF:20:00:0A:1C")
        );
        assert_eq!(config.accessories[1].correction.gamma_green, 0.8);
        assert_eq!(config.accessories[1].correction.gamma_blue, 0.7);
    }

    #[test]
    fn reject_out_of_range() {
        let source = r#"
            [location]
            longitude = 200.0
            latitude = 0.0
        "#;

        assert!(matches!(
            Config::from_toml(source),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn reject_duplicate_names() {
        let source = r#"
            [location]
            longitude = 0.0
            latitude = 0.0

            [[accessories]]
            name = "Desk"
            service_id = "0000ffd5-0000-1000-8000-00805f9b34fb"

            [[accessories]]
            name = "Desk"
            service_id = "0000ffd5-0000-1000-8000-00805f9b34fb"
        "#;

        assert!(matches!(
            Config::from_toml(source),
            Err(ConfigError::DuplicateName(name)) if name == "Desk"
        ));
    }

    #[test]
    fn serialize_round_trips() {
        let config = Config::from_toml(SAMPLE).expect("failed to parse sample");
        let serialized = config.to_string().expect("failed to serialize config");

        assert_eq!(
            Config::from_toml(&serialized).expect("failed to parse serialized config"),
            config
        );
    }
}
