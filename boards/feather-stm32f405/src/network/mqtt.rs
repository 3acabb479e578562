//! MQTT v5 session driver and the `MessagingTransport` handle
//!
//! The rust-mqtt client borrows its socket and packet buffers, so it lives
//! inside one long-running driver future. `MqttTransport` is a cheap handle
//! that forwards connect/publish/subscribe requests to that driver over a
//! channel and waits for the reply. Inbound publications are pushed to the
//! command inbox and a lost session is reported through `SessionEvents`.

#![allow(unsafe_code)] // TLS buffers and unchecked topic names

use alloc::vec::Vec;

use defmt::{debug, error, info, warn, Debug2Format};
use embassy_futures::select::{select3, Either3};
use embassy_net::{dns::DnsQueryType, IpEndpoint, Stack};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Instant, Timer};
use embedded_io_async::{Read, Write};
use embedded_tls::{
    Aes128GcmSha256, CryptoProvider, NoVerify, TlsConfig, TlsConnection, TlsContext, TlsVerifier,
};
use envnode_core::config::MqttConfig;
use envnode_core::device::DeviceId;
use envnode_core::network::{
    format_topic, InboundMessage, Inbox, SessionEvents, StatusPayload, Topic, Topics,
};
use envnode_hal::{MessagingTransport, QoS};
use rust_mqtt::{
    buffer::BumpBuffer,
    client::{
        event::Event,
        options::{
            ConnectOptions, PublicationOptions, SubscriptionOptions, TopicReference, WillOptions,
        },
        Client,
    },
    config::{KeepAlive, SessionExpiryInterval},
    types::{MqttBinary, MqttString, QoS as MqttQoS, TopicFilter, TopicName},
    Bytes,
};

use crate::tls_buffers;

use super::config::SessionConfig;
use super::error::NetworkError;
use super::socket::AsyncTcpSocket;

/// MQTT packet buffer size
const MQTT_BUFFER_SIZE: usize = 2048;
const SOCKET_BUFFER_SIZE: usize = 4096;

pub enum Request {
    Connect,
    Publish {
        topic: Topic,
        payload: Vec<u8>,
        retain: bool,
        qos: QoS,
    },
    Subscribe {
        topic: Topic,
        qos: QoS,
    },
}

pub type Requests = Channel<CriticalSectionRawMutex, Request, 1>;
pub type Replies = Channel<CriticalSectionRawMutex, Result<(), NetworkError>, 1>;

/// Request/reply pair shared by the transport handle and the driver
pub struct SessionLink {
    requests: Requests,
    replies: Replies,
}

impl SessionLink {
    pub const fn new() -> Self {
        Self {
            requests: Channel::new(),
            replies: Channel::new(),
        }
    }
}

impl Default for SessionLink {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MqttTransport {
    link: &'static SessionLink,
}

impl MqttTransport {
    pub fn new(link: &'static SessionLink) -> Self {
        Self { link }
    }

    async fn call(&self, request: Request) -> Result<(), NetworkError> {
        self.link.requests.send(request).await;
        self.link.replies.receive().await
    }
}

impl MessagingTransport for MqttTransport {
    type Error = NetworkError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        self.call(Request::Connect).await
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
        qos: QoS,
    ) -> Result<(), Self::Error> {
        let topic = format_topic(&[topic]).map_err(|_| NetworkError::MqttProtocolError)?;
        self.call(Request::Publish {
            topic,
            payload: payload.to_vec(),
            retain,
            qos,
        })
        .await
    }

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), Self::Error> {
        let topic = Topic::try_from(topic).map_err(|_| NetworkError::MqttProtocolError)?;
        self.call(Request::Subscribe { topic, qos }).await
    }
}

/// Simple crypto provider that wraps an RNG for TLS operations
struct SimpleCryptoProvider<'a, RNG> {
    rng: &'a mut RNG,
    verifier: NoVerify,
}

impl<'a, RNG> SimpleCryptoProvider<'a, RNG> {
    fn new(rng: &'a mut RNG) -> Self {
        Self {
            rng,
            verifier: NoVerify,
        }
    }
}

impl<RNG> CryptoProvider for SimpleCryptoProvider<'_, RNG>
where
    RNG: rand_core::CryptoRngCore,
{
    type CipherSuite = Aes128GcmSha256;
    type Signature = &'static [u8];

    fn rng(&mut self) -> impl rand_core::CryptoRngCore {
        &mut *self.rng
    }

    fn verifier(
        &mut self,
    ) -> Result<&mut impl TlsVerifier<Self::CipherSuite>, embedded_tls::TlsError> {
        Ok(&mut self.verifier)
    }
}

fn mqtt_qos(qos: QoS) -> MqttQoS {
    match qos {
        QoS::AtMostOnce => MqttQoS::AtMostOnce,
        QoS::AtLeastOnce => MqttQoS::AtLeastOnce,
    }
}

fn mqtt_string(s: &str) -> Result<MqttString<'_>, NetworkError> {
    MqttString::new(s.into()).map_err(|e| {
        error!("Invalid MQTT string: {:?}", Debug2Format(&e));
        NetworkError::MqttProtocolError
    })
}

/// Owns the broker connection for the lifetime of the firmware
pub struct MqttSession<'a> {
    stack: Stack<'static>,
    link: &'static SessionLink,
    inbox: &'a Inbox<CriticalSectionRawMutex>,
    events: &'a SessionEvents<CriticalSectionRawMutex>,
    topics: &'a Topics,
    device: &'a DeviceId,
    config: &'a MqttConfig,
    tuning: SessionConfig,
}

impl<'a> MqttSession<'a> {
    pub fn new(
        stack: Stack<'static>,
        link: &'static SessionLink,
        inbox: &'a Inbox<CriticalSectionRawMutex>,
        events: &'a SessionEvents<CriticalSectionRawMutex>,
        topics: &'a Topics,
        device: &'a DeviceId,
        config: &'a MqttConfig,
    ) -> Self {
        Self {
            stack,
            link,
            inbox,
            events,
            topics,
            device,
            config,
            tuning: SessionConfig::default(),
        }
    }

    /// Serve transport requests forever, opening a session on each connect
    pub async fn run<RNG>(&self, rng: &mut RNG) -> !
    where
        RNG: rand_core::RngCore + rand_core::CryptoRng,
    {
        loop {
            match self.link.requests.receive().await {
                Request::Connect => {}
                _ => {
                    self.link.replies.send(Err(NetworkError::NotConnected)).await;
                    continue;
                }
            }

            let mut established = false;
            let result = self.session(rng, &mut established).await;
            if established {
                warn!("MQTT session ended: {:?}", result);
                self.events.down.signal(());
            } else {
                let e = result.err().unwrap_or(NetworkError::MqttConnectionFailed);
                error!("MQTT connect failed: {:?}", e);
                self.link.replies.send(Err(e)).await;
            }
        }
    }

    async fn session<RNG>(&self, rng: &mut RNG, established: &mut bool) -> Result<(), NetworkError>
    where
        RNG: rand_core::RngCore + rand_core::CryptoRng,
    {
        let broker = self.config.broker.as_str();
        let server_ip = self
            .stack
            .dns_query(broker, DnsQueryType::A)
            .await
            .map_err(|e| {
                error!("DNS query failed: {:?}", Debug2Format(&e));
                NetworkError::DnsError
            })?
            .first()
            .copied()
            .ok_or(NetworkError::DnsError)?;
        let endpoint = IpEndpoint::new(server_ip, self.config.port);

        let mut rx_buffer = [0u8; SOCKET_BUFFER_SIZE];
        let mut tx_buffer = [0u8; SOCKET_BUFFER_SIZE];
        let mut socket = AsyncTcpSocket::new(self.stack, &mut rx_buffer, &mut tx_buffer);
        socket.connect(endpoint).await?;
        info!("TCP connection established to {}", Debug2Format(&endpoint));

        if self.config.port != self.tuning.tls_port {
            return self.serve(socket, established).await;
        }

        // SAFETY: one session at a time, and the connection is dropped
        // before this function returns.
        let (read_buf, write_buf) = unsafe { tls_buffers::tls_buffers() };
        let tls_config = TlsConfig::new().with_server_name(broker);
        let mut tls =
            TlsConnection::<AsyncTcpSocket, Aes128GcmSha256>::new(socket, read_buf, write_buf);
        tls.open(TlsContext::new(&tls_config, SimpleCryptoProvider::new(rng)))
            .await
            .map_err(|e| {
                error!("TLS handshake failed: {:?}", Debug2Format(&e));
                NetworkError::TlsHandshakeFailed
            })?;
        info!("TLS 1.3 handshake completed");
        self.serve(tls, established).await
    }

    async fn serve<N>(&self, connection: N, established: &mut bool) -> Result<(), NetworkError>
    where
        N: Read + Write,
    {
        let client_id = self.device.client_id();
        let offline = serde_json::to_vec(&StatusPayload::offline(self.device))
            .map_err(|_| NetworkError::MqttProtocolError)?;

        let mut mqtt_buffer = [0u8; MQTT_BUFFER_SIZE];
        let mut buffer = BumpBuffer::new(&mut mqtt_buffer);
        let mut client = Client::<'_, _, _, 1, 1, 1, 0>::new(&mut buffer);

        // SAFETY: topics are validated against wildcards and NUL on creation
        let will_topic = unsafe { TopicName::new_unchecked(mqtt_string(&self.topics.last_will)?) };
        let connect_opts = ConnectOptions {
            session_expiry_interval: SessionExpiryInterval::EndOnDisconnect,
            clean_start: true,
            keep_alive: if self.config.keepalive_secs == 0 {
                KeepAlive::Infinite
            } else {
                KeepAlive::Seconds(self.config.keepalive_secs)
            },
            will: Some(WillOptions {
                topic: will_topic,
                payload: Bytes::from(offline.as_slice()),
                qos: MqttQoS::AtLeastOnce,
                retain: true,
            }),
            user_name: if self.config.user.is_empty() {
                None
            } else {
                Some(mqtt_string(&self.config.user)?)
            },
            password: if self.config.password.is_empty() {
                None
            } else {
                Some(
                    MqttBinary::new(Bytes::from(self.config.password.as_bytes()))
                        .map_err(|_| NetworkError::MqttProtocolError)?,
                )
            },
        };

        client
            .connect(connection, &connect_opts, Some(mqtt_string(&client_id)?))
            .await
            .map_err(|e| {
                error!("MQTT connect failed: {:?}", Debug2Format(&e));
                NetworkError::MqttConnectionFailed
            })?;
        info!("MQTT connected as {}", client_id.as_str());
        *established = true;
        self.link.replies.send(Ok(())).await;

        let ping_every = u64::from(self.config.keepalive_secs.max(2)) * 1000 / 2;
        let mut next_ping = Instant::now() + embassy_time::Duration::from_millis(ping_every);

        loop {
            // A poll cut short by a request or ping may leave a partial
            // packet behind; the broker then drops the session and we
            // reconnect.
            match select3(
                self.link.requests.receive(),
                client.poll(),
                Timer::at(next_ping),
            )
            .await
            {
                Either3::First(request) => {
                    let result = match request {
                        Request::Connect => Ok(()),
                        Request::Publish {
                            topic,
                            payload,
                            retain,
                            qos,
                        } => {
                            // SAFETY: publish topics pass `format_topic` in the transport handle
                            let name = unsafe { TopicName::new_unchecked(mqtt_string(&topic)?) };
                            let options = PublicationOptions {
                                retain,
                                message_expiry_interval: None,
                                topic: TopicReference::Name(name),
                                qos: mqtt_qos(qos),
                            };
                            client
                                .publish(&options, Bytes::from(payload.as_slice()))
                                .await
                                .map(|_| ())
                                .map_err(|e| {
                                    warn!("MQTT publish failed: {:?}", Debug2Format(&e));
                                    NetworkError::MqttPublishFailed
                                })
                        }
                        Request::Subscribe { topic, qos } => {
                            let filter = TopicFilter::new(mqtt_string(&topic)?)
                                .map_err(|_| NetworkError::MqttProtocolError)?;
                            let options = SubscriptionOptions {
                                qos: mqtt_qos(qos),
                                ..Default::default()
                            };
                            client.subscribe(filter, options).await.map(|_| ()).map_err(|e| {
                                warn!("MQTT subscribe failed: {:?}", Debug2Format(&e));
                                NetworkError::MqttSubscribeFailed
                            })
                        }
                    };
                    self.link.replies.send(result).await;
                    result?;
                }
                Either3::Second(event) => match event {
                    Ok(Event::Publish(publication)) => {
                        self.deliver(publication.topic.as_ref(), publication.message.as_ref());
                    }
                    Ok(other) => debug!("MQTT event: {:?}", Debug2Format(&other)),
                    Err(e) => {
                        warn!("MQTT poll failed: {:?}", Debug2Format(&e));
                        return Err(NetworkError::MqttProtocolError);
                    }
                },
                Either3::Third(()) => {
                    client.ping().await.map_err(|e| {
                        warn!("MQTT ping failed: {:?}", Debug2Format(&e));
                        NetworkError::Timeout
                    })?;
                    next_ping = Instant::now() + embassy_time::Duration::from_millis(ping_every);
                }
            }
        }
    }

    fn deliver(&self, topic: &str, payload: &[u8]) {
        let Some(message) = InboundMessage::new(topic, payload) else {
            warn!("Dropping oversized message on {}", topic);
            return;
        };
        if self.inbox.try_send(message).is_err() {
            warn!("Command inbox full, dropping message on {}", topic);
        }
    }
}
