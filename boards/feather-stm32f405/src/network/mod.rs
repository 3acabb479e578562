//! Board network adapters: SNTP time source and MQTT session

pub mod config;
pub mod error;
pub mod mqtt;
pub mod socket;
pub mod sntp;

pub use error::NetworkError;
pub use mqtt::{MqttSession, MqttTransport, SessionLink};
pub use sntp::SntpSource;
