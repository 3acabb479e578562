//! Typed configuration documents
//!
//! One document per subsystem, persisted as JSON through the file store by
//! [`ConfigManager`](crate::config_store::ConfigManager). Every field has a
//! default so partially written or older documents still load; `validate`
//! rejects combinations the runtime cannot work with.

use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;
use core::net::Ipv4Addr;

use envnode_hal::{IpSettings, QoS};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Configuration errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// File store read/write failed
    Storage,
    /// Document is not valid JSON for this type
    Parse,
    /// A partial update was not a JSON object
    NotAnObject,
    /// Field value out of the accepted range
    Invalid(&'static str),
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Storage => write!(f, "Config storage error"),
            Self::Parse => write!(f, "Config parse error"),
            Self::NotAnObject => write!(f, "Config update is not an object"),
            Self::Invalid(field) => write!(f, "Invalid config field: {}", field),
        }
    }
}

impl core::error::Error for ConfigError {}

/// A configuration document stored under a fixed file name
pub trait ConfigDocument: Serialize + DeserializeOwned + Default + Clone {
    /// 8.3 file name on the storage volume
    const FILE_NAME: &'static str;

    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }
}

// ============================================================================
// Ethernet
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EthernetConfig {
    pub ip: String,
    pub subnet: String,
    pub gateway: String,
    pub dns: String,
    /// Link checks per `connect()` before giving up
    pub connect_attempts: u8,
    /// Wait after a failed link check
    pub attempt_delay_ms: u32,
    /// Wait after the reset pulse before activating the interface
    pub settle_delay_ms: u32,
    /// Wait before restarting once the attempt budget is exhausted
    pub cooldown_ms: u32,
    /// Supervisor re-check period
    pub retry_interval_ms: u32,
}

impl Default for EthernetConfig {
    fn default() -> Self {
        Self {
            ip: "192.168.1.191".to_string(),
            subnet: "255.255.255.0".to_string(),
            gateway: "192.168.1.1".to_string(),
            dns: "8.8.8.8".to_string(),
            connect_attempts: 3,
            attempt_delay_ms: 5_000,
            settle_delay_ms: 2_000,
            cooldown_ms: 60_000,
            retry_interval_ms: 10_000,
        }
    }
}

impl EthernetConfig {
    /// Parse the textual addresses into interface settings
    pub fn ip_settings(&self) -> Result<IpSettings, ConfigError> {
        fn parse(text: &str, field: &'static str) -> Result<Ipv4Addr, ConfigError> {
            text.trim().parse().map_err(|_| ConfigError::Invalid(field))
        }

        Ok(IpSettings {
            address: parse(&self.ip, "ip")?,
            netmask: parse(&self.subnet, "subnet")?,
            gateway: parse(&self.gateway, "gateway")?,
            dns: parse(&self.dns, "dns")?,
        })
    }
}

impl ConfigDocument for EthernetConfig {
    const FILE_NAME: &'static str = "ethernet.cfg";

    fn validate(&self) -> Result<(), ConfigError> {
        self.ip_settings()?;
        if self.connect_attempts == 0 {
            return Err(ConfigError::Invalid("connect_attempts"));
        }
        Ok(())
    }
}

// ============================================================================
// MQTT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub keepalive_secs: u16,
    /// First topic level shared by every topic this device uses
    pub topic_root: String,
    /// Topics subscribed on every session start, besides the reboot control
    pub subscribe_topics: Vec<String>,
    /// Last element of `<root>/<mac>/<subtopic>` for telemetry records
    pub telemetry_subtopic: String,
    pub heartbeat_interval_ms: u32,
    pub connect_retry_ms: u32,
    /// Poll period while waiting for link and time before connecting
    pub prerequisite_poll_ms: u32,
    /// Request QoS 1 for telemetry records
    pub telemetry_at_least_once: bool,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "192.168.1.1".to_string(),
            port: 1883,
            user: String::new(),
            password: String::new(),
            keepalive_secs: 120,
            topic_root: "esp32".to_string(),
            subscribe_topics: vec!["esp32/commands".to_string(), "esp32/set_config".to_string()],
            telemetry_subtopic: "dht".to_string(),
            heartbeat_interval_ms: 19_000,
            connect_retry_ms: 10_000,
            prerequisite_poll_ms: 5_000,
            telemetry_at_least_once: true,
        }
    }
}

impl MqttConfig {
    pub fn telemetry_qos(&self) -> QoS {
        if self.telemetry_at_least_once {
            QoS::AtLeastOnce
        } else {
            QoS::AtMostOnce
        }
    }
}

impl ConfigDocument for MqttConfig {
    const FILE_NAME: &'static str = "mqtt.cfg";

    fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.trim().is_empty() {
            return Err(ConfigError::Invalid("broker"));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("port"));
        }
        if self.topic_root.is_empty() || self.topic_root.contains(['+', '#', '/']) {
            return Err(ConfigError::Invalid("topic_root"));
        }
        Ok(())
    }
}

// ============================================================================
// Sensors
// ============================================================================

/// One configured sensor input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Pin, bus address or mux port
    pub id: u8,
    pub location: String,
}

/// Specification range, comfort bounds and calibration for one quantity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantityLimits {
    /// Readings outside `[spec_min, spec_max]` are discarded
    pub spec_min: f32,
    pub spec_max: f32,
    /// Comfort window before calibration narrowing
    pub crit_low: f32,
    pub crit_high: f32,
    #[serde(default)]
    pub warn_low: Option<f32>,
    #[serde(default)]
    pub warn_high: Option<f32>,
    /// Applied inward on both comfort bounds
    pub calibration: f32,
}

impl QuantityLimits {
    pub const fn temperature() -> Self {
        Self {
            spec_min: -40.0,
            spec_max: 100.0,
            crit_low: 18.0,
            crit_high: 27.0,
            warn_low: None,
            warn_high: None,
            calibration: 0.5,
        }
    }

    pub const fn humidity() -> Self {
        Self {
            spec_min: 0.0,
            spec_max: 100.0,
            crit_low: 40.0,
            crit_high: 65.0,
            warn_low: None,
            warn_high: None,
            calibration: 2.0,
        }
    }

    /// Finite and inside the rated sensor range (inclusive)
    pub fn accepts(&self, value: f32) -> bool {
        value.is_finite() && value >= self.spec_min && value <= self.spec_max
    }

    /// Comfort window narrowed by calibration on both sides
    pub fn condition_window(&self) -> (f32, f32) {
        (self.crit_low + self.calibration, self.crit_high - self.calibration)
    }

    fn validate(&self, range: &'static str, condition: &'static str) -> Result<(), ConfigError> {
        if !(self.spec_min < self.spec_max) {
            return Err(ConfigError::Invalid(range));
        }
        let (low, high) = self.condition_window();
        if !(low < high) {
            return Err(ConfigError::Invalid(condition));
        }
        Ok(())
    }
}

/// Minimum gap between sampling rounds the sensors tolerate
pub const MIN_READ_DELAY_MS: u32 = 2_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub channels: Vec<ChannelConfig>,
    /// Rounds per cycle
    pub sample_count: u8,
    /// Delay after each round
    pub read_delay_ms: u32,
    /// Pause between cycles
    pub cycle_interval_ms: u32,
    /// Cycle pause multiplier when no channel initializes
    pub init_backoff_factor: u32,
    pub temperature: QuantityLimits,
    pub humidity: QuantityLimits,
}

impl Default for SensorConfig {
    fn default() -> Self {
        let channels = [25u8, 26, 32, 33]
            .iter()
            .map(|&id| ChannelConfig {
                id,
                location: alloc::format!("Sensor{}", id),
            })
            .collect();

        Self {
            channels,
            sample_count: 7,
            read_delay_ms: MIN_READ_DELAY_MS,
            cycle_interval_ms: 2_000,
            init_backoff_factor: 5,
            temperature: QuantityLimits::temperature(),
            humidity: QuantityLimits::humidity(),
        }
    }
}

impl SensorConfig {
    pub fn location_of(&self, id: u8) -> &str {
        self.channels
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.location.as_str())
            .unwrap_or("Unknown")
    }

    pub fn init_backoff_ms(&self) -> u32 {
        self.cycle_interval_ms
            .saturating_mul(self.init_backoff_factor)
    }
}

impl ConfigDocument for SensorConfig {
    const FILE_NAME: &'static str = "sensors.cfg";

    fn validate(&self) -> Result<(), ConfigError> {
        if self.channels.is_empty() {
            return Err(ConfigError::Invalid("channels"));
        }
        if self.sample_count == 0 {
            return Err(ConfigError::Invalid("sample_count"));
        }
        if self.read_delay_ms < MIN_READ_DELAY_MS {
            return Err(ConfigError::Invalid("read_delay_ms"));
        }
        self.temperature
            .validate("temperature.range", "temperature.condition")?;
        self.humidity.validate("humidity.range", "humidity.condition")?;
        Ok(())
    }
}

// ============================================================================
// Time
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    /// Offset applied when rendering local timestamps
    pub utc_offset_secs: i32,
    pub sync_interval_ms: u32,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            utc_offset_secs: 7 * 3600,
            sync_interval_ms: 10_000,
        }
    }
}

impl ConfigDocument for TimeConfig {
    const FILE_NAME: &'static str = "time.cfg";

    fn validate(&self) -> Result<(), ConfigError> {
        if self.utc_offset_secs.abs() > 14 * 3600 {
            return Err(ConfigError::Invalid("utc_offset_secs"));
        }
        if self.sync_interval_ms == 0 {
            return Err(ConfigError::Invalid("sync_interval_ms"));
        }
        Ok(())
    }
}
