#![deny(unsafe_code)]
//! SNTP client backing the wall-clock `TimeSource`

use defmt::{error, info, warn, Debug2Format};
use embassy_futures::select::{select, Either};
use embassy_net::dns::DnsQueryType;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpEndpoint, Stack};
use embassy_time::{Duration, Instant, Timer};
use envnode_hal::TimeSource;

use super::config::SntpConfig;
use super::error::NetworkError;

/// Seconds between 1900-01-01 (NTP era 0) and 1970-01-01
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;
const NTP_PORT: u16 = 123;
const NTP_PACKET_LEN: usize = 48;

pub struct SntpSource {
    stack: Stack<'static>,
    config: SntpConfig,
}

impl SntpSource {
    pub fn new(stack: Stack<'static>) -> Self {
        Self {
            stack,
            config: SntpConfig::default(),
        }
    }

    async fn sync(&self) -> Result<u64, NetworkError> {
        for server in self.config.servers {
            for attempt in 0..self.config.retry_count {
                info!("SNTP request to {} (attempt {})", server, attempt + 1);
                match self.request(server).await {
                    Ok(unix_secs) => {
                        info!("SNTP sync successful: {} UTC", unix_secs);
                        return Ok(unix_secs);
                    }
                    Err(e) => {
                        warn!("SNTP sync failed: {:?}, retrying...", e);
                        Timer::after_millis(self.config.retry_delay_ms).await;
                    }
                }
            }
        }
        error!("All SNTP sync attempts failed");
        Err(NetworkError::AllServersFailed)
    }

    async fn request(&self, server: &str) -> Result<u64, NetworkError> {
        let server_ip = self
            .stack
            .dns_query(server, DnsQueryType::A)
            .await
            .map_err(|_| NetworkError::DnsError)?
            .first()
            .copied()
            .ok_or(NetworkError::DnsError)?;
        let endpoint = IpEndpoint::new(server_ip, NTP_PORT);

        let mut rx_meta = [PacketMetadata::EMPTY; 2];
        let mut rx_buffer = [0u8; 64];
        let mut tx_meta = [PacketMetadata::EMPTY; 2];
        let mut tx_buffer = [0u8; 64];
        let mut socket = UdpSocket::new(
            self.stack,
            &mut rx_meta,
            &mut rx_buffer,
            &mut tx_meta,
            &mut tx_buffer,
        );
        socket.bind(0).map_err(|_| NetworkError::SocketError)?;

        // LI=0, VN=3, Mode=3 (client)
        let mut packet = [0u8; NTP_PACKET_LEN];
        packet[0] = 0x1B;
        let sent_at = Instant::now();
        socket
            .send_to(&packet, endpoint)
            .await
            .map_err(|_| NetworkError::SocketError)?;

        let mut response = [0u8; NTP_PACKET_LEN];
        let timeout = Timer::after(Duration::from_millis(self.config.timeout_ms));
        let (len, from) = match select(timeout, socket.recv_from(&mut response)).await {
            Either::First(_) => return Err(NetworkError::Timeout),
            Either::Second(result) => result.map_err(|_| NetworkError::SocketError)?,
        };
        let rtt = Instant::now().duration_since(sent_at);

        if len < NTP_PACKET_LEN || from.endpoint.addr != server_ip {
            warn!("Unexpected SNTP reply from {}", Debug2Format(&from));
            return Err(NetworkError::InvalidResponse);
        }

        let stratum = response[1];
        if stratum == 0 || stratum > self.config.max_stratum {
            warn!("Invalid stratum {} (max {})", stratum, self.config.max_stratum);
            return Err(NetworkError::ServerError);
        }

        let transmit_secs =
            u32::from_be_bytes([response[40], response[41], response[42], response[43]]) as u64;
        unix_from_ntp(transmit_secs, rtt.as_millis())
    }
}

/// Transmit timestamp to Unix seconds, corrected by half the round trip
fn unix_from_ntp(ntp_secs: u64, rtt_ms: u64) -> Result<u64, NetworkError> {
    let unix = ntp_secs
        .checked_sub(NTP_UNIX_OFFSET)
        .ok_or(NetworkError::InvalidResponse)?;
    Ok(unix + (rtt_ms / 2 + 500) / 1000)
}

impl TimeSource for SntpSource {
    type Error = NetworkError;

    async fn fetch_unix_time(&mut self) -> Result<u64, Self::Error> {
        self.sync().await
    }
}
