//! Remote commands
//!
//! Inbound payloads are decoded once into a [`Command`] and matched
//! exhaustively. Malformed payloads are logged and dropped without a reply.

use alloc::string::String;

use embassy_sync::blocking_mutex::raw::RawMutex;
use envnode_hal::{DelayNs, FileStore, MessagingTransport, QoS, SystemControl};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::error::DecodeError;
use super::messaging::{InboundMessage, Inbox, MessagingLink};
use super::topics::Topics;
use crate::config::{EthernetConfig, MqttConfig, QuantityLimits, SensorConfig};
use crate::config_store::ConfigManager;
use crate::device::DeviceId;

/// Grace period between applying `set_config` and restarting
pub const SET_CONFIG_RESTART_MS: u32 = 3_000;
/// Grace period between the reboot acknowledgment and restarting
pub const REBOOT_ACK_MS: u32 = 250;

const DEFAULT_BROKER_PORT: u16 = 1883;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EthernetSettings {
    pub ip: Option<String>,
    pub subnet: Option<String>,
    pub gateway: Option<String>,
    pub dns: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MqttSettings {
    pub broker: Option<String>,
    /// Number or numeric string
    pub port: Option<Value>,
    pub user: Option<String>,
    #[serde(rename = "pass")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thresholds {
    pub crit_low: Option<f32>,
    pub warn_low: Option<f32>,
    pub warn_high: Option<f32>,
    pub crit_high: Option<f32>,
}

impl Thresholds {
    fn apply_to(&self, limits: &mut QuantityLimits) {
        if let Some(v) = self.crit_low {
            limits.crit_low = v;
        }
        if let Some(v) = self.crit_high {
            limits.crit_high = v;
        }
        if self.warn_low.is_some() {
            limits.warn_low = self.warn_low;
        }
        if self.warn_high.is_some() {
            limits.warn_high = self.warn_high;
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct AlertSettings {
    pub temp: Option<Thresholds>,
    pub hum: Option<Thresholds>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Settings {
    pub ethernet: Option<EthernetSettings>,
    pub mqtt: Option<MqttSettings>,
    pub alerts: Option<AlertSettings>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RebootRequest {
    /// MAC named in the payload, empty if none
    pub mac: String,
    pub action_id: Value,
    /// Lower-cased; empty if none
    pub room_id: String,
    /// The `+` segment of the topic
    pub path_key: String,
}

impl RebootRequest {
    pub fn targets(&self, device: &DeviceId) -> bool {
        (!self.mac.is_empty() && device.matches(&self.mac))
            || (!self.path_key.is_empty() && device.matches(&self.path_key))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GetConfig { request_id: Option<Value> },
    SetConfig(Settings),
    Reboot(RebootRequest),
    /// Valid JSON that names no known command for its topic
    Unknown,
}

fn str_field(object: &Map<String, Value>, key: &str) -> String {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_default()
}

/// Decode a message received on `topic`. An empty payload counts as an
/// empty object.
pub fn decode(topics: &Topics, topic: &str, payload: &[u8]) -> Result<Command, DecodeError> {
    let value: Value = if payload.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Map::new())
    } else {
        serde_json::from_slice(payload).map_err(|_| DecodeError::MalformedJson)?
    };
    let Value::Object(object) = value else {
        return Err(DecodeError::NotAnObject);
    };

    if let Some(path_key) = topics.reboot_key(topic) {
        return Ok(Command::Reboot(RebootRequest {
            mac: str_field(&object, "mac"),
            action_id: object.get("actionId").cloned().unwrap_or(Value::Null),
            room_id: str_field(&object, "room_id").to_lowercase(),
            path_key: String::from(path_key),
        }));
    }

    let command = object.get("command").and_then(Value::as_str);
    if topic == topics.commands.as_str() && command == Some("get_config") {
        let request_id = object
            .get("requestId")
            .filter(|id| !id.is_null())
            .cloned();
        return Ok(Command::GetConfig { request_id });
    }
    if topic == topics.set_config.as_str() && command == Some("set_config") {
        let settings = match object.get("settings") {
            Some(settings) => {
                Settings::deserialize(settings).map_err(|_| DecodeError::MalformedJson)?
            }
            None => Settings::default(),
        };
        return Ok(Command::SetConfig(settings));
    }

    Ok(Command::Unknown)
}

fn port_of(value: Option<&Value>) -> u16 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|&p| p != 0).unwrap_or(DEFAULT_BROKER_PORT)
}

/// Present fields only, so the merge keeps everything else
fn present(pairs: &[(&str, &Option<String>)]) -> Value {
    let mut object = Map::new();
    for (key, value) in pairs {
        if let Some(v) = value {
            object.insert(String::from(*key), Value::String(v.clone()));
        }
    }
    Value::Object(object)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Replied,
    Restarting,
    Ignored,
}

pub struct CommandHandler<'a, M: RawMutex, T, S, Sys> {
    link: &'a MessagingLink<'a, M, T>,
    configs: &'a ConfigManager<'a, S>,
    topics: &'a Topics,
    device: &'a DeviceId,
    system: &'a Sys,
}

impl<'a, M, T, S, Sys> CommandHandler<'a, M, T, S, Sys>
where
    M: RawMutex,
    T: MessagingTransport,
    S: FileStore,
    Sys: SystemControl,
{
    pub fn new(
        link: &'a MessagingLink<'a, M, T>,
        configs: &'a ConfigManager<'a, S>,
        topics: &'a Topics,
        device: &'a DeviceId,
        system: &'a Sys,
    ) -> Self {
        Self {
            link,
            configs,
            topics,
            device,
            system,
        }
    }

    pub async fn handle<D: DelayNs>(&self, message: &InboundMessage, delay: &mut D) -> Outcome {
        let topic = message.topic.as_str();
        let command = match decode(self.topics, topic, &message.payload) {
            Ok(command) => command,
            Err(e) => {
                error!("Dropping message on {}: {:?}", topic, e);
                return Outcome::Ignored;
            }
        };

        match command {
            Command::GetConfig { request_id } => {
                info!("get_config received");
                self.reply_config(request_id).await;
                Outcome::Replied
            }
            Command::SetConfig(settings) => {
                info!("set_config received, applying");
                self.apply_settings(&settings);
                info!("Restarting in {} ms to apply changes", SET_CONFIG_RESTART_MS);
                delay.delay_ms(SET_CONFIG_RESTART_MS).await;
                self.system.restart();
                Outcome::Restarting
            }
            Command::Reboot(request) => {
                if !request.targets(self.device) {
                    info!("Reboot command ignored, not addressed to this device");
                    return Outcome::Ignored;
                }
                info!("Reboot command accepted");
                self.acknowledge_reboot(&request).await;
                delay.delay_ms(REBOOT_ACK_MS).await;
                self.system.restart();
                Outcome::Restarting
            }
            Command::Unknown => {
                debug!("No command for message on {}", topic);
                Outcome::Ignored
            }
        }
    }

    /// Current configuration with the broker password withheld
    pub fn config_snapshot(&self, request_id: Option<Value>) -> Value {
        let ethernet: EthernetConfig = self.configs.load();
        let mut mqtt: MqttConfig = self.configs.load();
        mqtt.password.clear();
        let sensors: SensorConfig = self.configs.load();
        let (t, h) = (&sensors.temperature, &sensors.humidity);

        let mut response = json!({
            "mac_address": self.device.as_str(),
            "ethernet": ethernet,
            "mqtt": mqtt,
            "alerts": {
                "temp_crit_low": t.crit_low,
                "temp_warn_low": t.warn_low,
                "temp_warn_high": t.warn_high,
                "temp_crit_high": t.crit_high,
                "hum_crit_low": h.crit_low,
                "hum_warn_low": h.warn_low,
                "hum_warn_high": h.warn_high,
                "hum_crit_high": h.crit_high,
            },
        });
        if let (Some(id), Value::Object(object)) = (request_id, &mut response) {
            object.insert(String::from("requestId"), id);
        }
        response
    }

    async fn reply_config(&self, request_id: Option<Value>) {
        let topic = match self.topics.config_response() {
            Ok(topic) => topic,
            Err(e) => {
                error!("No response topic: {:?}", e);
                return;
            }
        };
        let response = self.config_snapshot(request_id);
        if !self
            .link
            .publish_json(&topic, &response, false, QoS::AtMostOnce)
            .await
        {
            warn!("get_config response not delivered");
        }
    }

    /// Persist each settings group; a rejected group leaves its file as is
    pub fn apply_settings(&self, settings: &Settings) {
        if let Some(eth) = &settings.ethernet {
            let update = present(&[
                ("ip", &eth.ip),
                ("subnet", &eth.subnet),
                ("gateway", &eth.gateway),
                ("dns", &eth.dns),
            ]);
            match self.configs.save::<EthernetConfig>(&update) {
                Ok(_) => info!("Ethernet config updated"),
                Err(e) => error!("Ethernet config rejected: {:?}", e),
            }
        }

        if let Some(mqtt) = &settings.mqtt {
            let mut update = present(&[
                ("broker", &mqtt.broker),
                ("user", &mqtt.user),
                ("password", &mqtt.password),
            ]);
            if let Value::Object(object) = &mut update {
                object.insert(
                    String::from("port"),
                    Value::from(port_of(mqtt.port.as_ref())),
                );
            }
            match self.configs.save::<MqttConfig>(&update) {
                Ok(_) => info!("MQTT config updated"),
                Err(e) => error!("MQTT config rejected: {:?}", e),
            }
        }

        if let Some(alerts) = &settings.alerts {
            let mut sensors: SensorConfig = self.configs.load();
            if let Some(temp) = &alerts.temp {
                temp.apply_to(&mut sensors.temperature);
            }
            if let Some(hum) = &alerts.hum {
                hum.apply_to(&mut sensors.humidity);
            }
            let update = json!({
                "temperature": sensors.temperature,
                "humidity": sensors.humidity,
            });
            match self.configs.save::<SensorConfig>(&update) {
                Ok(_) => info!("Alert thresholds updated"),
                Err(e) => error!("Alert thresholds rejected: {:?}", e),
            }
        }
    }

    async fn acknowledge_reboot(&self, request: &RebootRequest) {
        let key = if request.room_id.is_empty() {
            self.device.as_str()
        } else {
            request.room_id.as_str()
        };
        let topic = match self.topics.reboot_ack(key) {
            Ok(topic) => topic,
            Err(e) => {
                error!("No acknowledgment topic: {:?}", e);
                return;
            }
        };
        let ack = json!({
            "ok": true,
            "message": "rebooting",
            "actionId": request.action_id,
            "mac": self.device.as_str(),
        });
        if !self.link.publish_json(&topic, &ack, false, QoS::AtMostOnce).await {
            warn!("Reboot acknowledgment not delivered");
        }
    }

    pub async fn run<IM: RawMutex, D: DelayNs>(&self, inbox: &Inbox<IM>, delay: &mut D) -> ! {
        loop {
            let message = inbox.receive().await;
            let _ = self.handle(&message, delay).await;
        }
    }
}
