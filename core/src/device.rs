//! Device identity
//!
//! The node is identified by its Ethernet MAC address, formatted as
//! `AA:BB:CC:DD:EE:FF`. The same string tags every telemetry record and
//! scopes the device's topics.

use core::fmt::Write;

use heapless::String;

/// `AA:BB:CC:DD:EE:FF`
pub const MAC_STR_LEN: usize = 17;

/// Format: "envnode-" (8 chars) + 12 hex chars
pub const CLIENT_ID_MAX_LEN: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceId {
    mac: String<MAC_STR_LEN>,
}

impl DeviceId {
    pub fn from_mac(mac: [u8; 6]) -> Self {
        let mut s = String::new();
        for (i, byte) in mac.iter().enumerate() {
            let sep = if i == 0 { "" } else { ":" };
            // 6 * 2 hex digits + 5 separators == MAC_STR_LEN
            let _ = write!(s, "{}{:02X}", sep, byte);
        }
        Self { mac: s }
    }

    pub fn as_str(&self) -> &str {
        self.mac.as_str()
    }

    /// MAC without separators, used in response topics
    pub fn compact(&self) -> String<12> {
        self.mac.chars().filter(|c| *c != ':').collect()
    }

    /// Messaging client id, stable across reboots
    pub fn client_id(&self) -> String<CLIENT_ID_MAX_LEN> {
        let mut id = String::new();
        let _ = id.push_str("envnode-");
        for c in self.compact().chars() {
            let _ = id.push(c.to_ascii_lowercase());
        }
        id
    }

    /// Case-insensitive match against either MAC spelling
    pub fn matches(&self, candidate: &str) -> bool {
        let candidate = candidate.trim();
        candidate.eq_ignore_ascii_case(self.as_str())
            || candidate.eq_ignore_ascii_case(self.compact().as_str())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for DeviceId {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: [u8; 6] = [0x02, 0x00, 0x1a, 0x2b, 0x3c, 0x4d];

    #[test]
    fn test_mac_format() {
        let id = DeviceId::from_mac(MAC);
        assert_eq!(id.as_str(), "02:00:1A:2B:3C:4D");
        assert_eq!(id.compact().as_str(), "02001A2B3C4D");
    }

    #[test]
    fn test_client_id() {
        let id = DeviceId::from_mac(MAC);
        assert_eq!(id.client_id().as_str(), "envnode-02001a2b3c4d");
    }

    #[test]
    fn test_matches_case_insensitive() {
        let id = DeviceId::from_mac(MAC);
        assert!(id.matches("02:00:1a:2b:3c:4d"));
        assert!(id.matches("02001a2b3c4d"));
        assert!(!id.matches("02:00:1a:2b:3c:4e"));
        assert!(!id.matches(""));
    }
}
