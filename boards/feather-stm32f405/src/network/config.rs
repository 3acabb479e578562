#![deny(unsafe_code)]
//! Board-fixed network constants

/// SNTP client configuration
#[derive(Debug, Clone)]
pub struct SntpConfig {
    /// NTP servers to try (in order)
    pub servers: &'static [&'static str],
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
    /// Number of retry attempts per server
    pub retry_count: usize,
    /// Pause between attempts in milliseconds
    pub retry_delay_ms: u64,
    /// Maximum accepted stratum level (1-15)
    pub max_stratum: u8,
}

impl Default for SntpConfig {
    fn default() -> Self {
        Self {
            servers: &["pool.ntp.org", "time.nist.gov", "time.google.com"],
            timeout_ms: 5000,
            retry_count: 2,
            retry_delay_ms: 2000,
            max_stratum: 3,
        }
    }
}

/// MQTT session tuning that is not part of the stored configuration
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Broker port that is spoken over TLS; any other port is plain TCP
    pub tls_port: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tls_port: 8883,
        }
    }
}
