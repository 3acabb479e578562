#![deny(unsafe_code)]
//! Board network error types

use defmt::Format;

/// Errors from the W5500 link, SNTP and MQTT session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum NetworkError {
    /// DNS resolution failed
    DnsError,
    /// Socket bind/connect error
    SocketError,
    /// Request timeout
    Timeout,
    /// Invalid response from server
    InvalidResponse,
    /// Server error (e.g., invalid stratum for NTP)
    ServerError,
    /// All configured servers failed
    AllServersFailed,
    /// Unusable static address or netmask
    InvalidAddress,
    /// TLS handshake failed
    TlsHandshakeFailed,
    /// MQTT connection failed
    MqttConnectionFailed,
    /// MQTT publish failed
    MqttPublishFailed,
    /// MQTT subscribe failed
    MqttSubscribeFailed,
    /// MQTT protocol error
    MqttProtocolError,
    /// No session is open
    NotConnected,
}

impl core::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::DnsError => write!(f, "DNS resolution failed"),
            Self::SocketError => write!(f, "Socket error"),
            Self::Timeout => write!(f, "Request timeout"),
            Self::InvalidResponse => write!(f, "Invalid response"),
            Self::ServerError => write!(f, "Server error"),
            Self::AllServersFailed => write!(f, "All servers failed"),
            Self::InvalidAddress => write!(f, "Invalid address"),
            Self::TlsHandshakeFailed => write!(f, "TLS handshake failed"),
            Self::MqttConnectionFailed => write!(f, "MQTT connection failed"),
            Self::MqttPublishFailed => write!(f, "MQTT publish failed"),
            Self::MqttSubscribeFailed => write!(f, "MQTT subscribe failed"),
            Self::MqttProtocolError => write!(f, "MQTT protocol error"),
            Self::NotConnected => write!(f, "Not connected"),
        }
    }
}

impl core::error::Error for NetworkError {}

impl embedded_io_async::Error for NetworkError {
    fn kind(&self) -> embedded_io_async::ErrorKind {
        match self {
            Self::SocketError | Self::NotConnected => embedded_io_async::ErrorKind::BrokenPipe,
            Self::Timeout => embedded_io_async::ErrorKind::TimedOut,
            Self::InvalidResponse => embedded_io_async::ErrorKind::InvalidData,
            _ => embedded_io_async::ErrorKind::Other,
        }
    }
}
