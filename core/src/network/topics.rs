//! Topic layout
//!
//! Every topic hangs off the configured root (`esp32` by default):
//!
//! | Topic                          | Direction | Use                          |
//! |--------------------------------|-----------|------------------------------|
//! | `{root}/{mac}/dht`             | out       | telemetry records            |
//! | `{root}/{mac}/status`          | out       | online status and heartbeat  |
//! | `{root}/status`                | out       | last will (offline)          |
//! | `{root}/commands`              | in        | `get_config`                 |
//! | `{root}/set_config`            | in        | `set_config`                 |
//! | `{root}/control/+/reboot`      | in        | `reboot`                     |
//! | `{root}/response/{mac}/config` | out       | `get_config` reply           |
//! | `{root}/ack/{key}/reboot`      | out       | `reboot` acknowledgment      |

use heapless::String;

use super::error::TopicError;
use crate::device::DeviceId;

pub const MAX_TOPIC_LEN: usize = 128;

pub type Topic = String<MAX_TOPIC_LEN>;

/// Join segments with `/`, rejecting wildcard and null characters
pub fn format_topic(segments: &[&str]) -> Result<Topic, TopicError> {
    let mut topic = Topic::new();
    for (i, segment) in segments.iter().enumerate() {
        if segment.contains(['+', '#', '\0']) {
            error!("Topic segment contains invalid characters");
            return Err(TopicError::InvalidCharacter);
        }
        if i > 0 {
            topic.push('/').map_err(|_| TopicError::TooLong)?;
        }
        topic.push_str(segment).map_err(|_| TopicError::TooLong)?;
    }
    Ok(topic)
}

/// Topics derived once from the root and device identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    root: Topic,
    device: DeviceId,
    pub telemetry: Topic,
    pub status: Topic,
    pub last_will: Topic,
    pub commands: Topic,
    pub set_config: Topic,
    pub reboot_filter: Topic,
}

impl Topics {
    pub fn new(root: &str, telemetry_subtopic: &str, device: &DeviceId) -> Result<Self, TopicError> {
        let mac = device.as_str();
        let mut reboot_filter = format_topic(&[root, "control"])?;
        reboot_filter
            .push_str("/+/reboot")
            .map_err(|_| TopicError::TooLong)?;

        Ok(Self {
            root: format_topic(&[root])?,
            device: device.clone(),
            telemetry: format_topic(&[root, mac, telemetry_subtopic])?,
            status: format_topic(&[root, mac, "status"])?,
            last_will: format_topic(&[root, "status"])?,
            commands: format_topic(&[root, "commands"])?,
            set_config: format_topic(&[root, "set_config"])?,
            reboot_filter,
        })
    }

    pub fn config_response(&self) -> Result<Topic, TopicError> {
        let compact = self.device.compact();
        format_topic(&[self.root.as_str(), "response", compact.as_str(), "config"])
    }

    /// `key` is the room id when the request names one, else the MAC
    pub fn reboot_ack(&self, key: &str) -> Result<Topic, TopicError> {
        format_topic(&[self.root.as_str(), "ack", key, "reboot"])
    }

    /// The `+` segment of a topic matching the reboot filter
    pub fn reboot_key<'t>(&self, topic: &'t str) -> Option<&'t str> {
        let rest = topic.strip_prefix(self.root.as_str())?;
        let rest = rest.strip_prefix("/control/")?;
        let key = rest.strip_suffix("/reboot")?;
        (!key.is_empty() && !key.contains('/')).then_some(key)
    }
}
