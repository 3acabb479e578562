//! Messaging session: publish gate and connection orchestration
//!
//! [`MessagingLink`] is the only path to the transport. It refuses to
//! publish while the session is not ready and turns transport errors into
//! a `false` result, so callers never see a transport error.
//!
//! [`MessagingOrchestrator`] owns the session-ready flag. It waits for the
//! link and wall-clock prerequisites, connects (retrying indefinitely),
//! announces the device, subscribes and then blocks until the transport
//! reports the session lost.

use alloc::vec::Vec;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use envnode_hal::{DelayNs, MessagingTransport, QoS};
use serde::Serialize;

use super::topics::{Topic, Topics};
use crate::config::MqttConfig;
use crate::device::DeviceId;
use crate::state::ConnectivityState;

pub const MAX_INBOUND_PAYLOAD: usize = 1024;
pub const INBOX_DEPTH: usize = 4;

/// A message received on one of the subscribed topics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: Topic,
    pub payload: heapless::Vec<u8, MAX_INBOUND_PAYLOAD>,
}

impl InboundMessage {
    /// `None` if either part exceeds its buffer
    pub fn new(topic: &str, payload: &[u8]) -> Option<Self> {
        Some(Self {
            topic: Topic::try_from(topic).ok()?,
            payload: heapless::Vec::from_slice(payload).ok()?,
        })
    }
}

pub type Inbox<M> = Channel<M, InboundMessage, INBOX_DEPTH>;

/// Notifications raised by the transport driver
pub struct SessionEvents<M: RawMutex> {
    pub down: Signal<M, ()>,
}

impl<M: RawMutex> SessionEvents<M> {
    pub const fn new() -> Self {
        Self {
            down: Signal::new(),
        }
    }
}

impl<M: RawMutex> Default for SessionEvents<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Device status record: `online` on connect and as heartbeat, `offline`
/// as the last will
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusPayload<'a> {
    pub status: &'a str,
    pub mac: &'a str,
}

impl<'a> StatusPayload<'a> {
    pub fn online(device: &'a DeviceId) -> Self {
        Self {
            status: "online",
            mac: device.as_str(),
        }
    }

    pub fn offline(device: &'a DeviceId) -> Self {
        Self {
            status: "offline",
            mac: device.as_str(),
        }
    }
}

pub struct MessagingLink<'a, M: RawMutex, T> {
    transport: Mutex<M, T>,
    state: &'a ConnectivityState,
}

impl<'a, M: RawMutex, T: MessagingTransport> MessagingLink<'a, M, T> {
    pub fn new(transport: T, state: &'a ConnectivityState) -> Self {
        Self {
            transport: Mutex::new(transport),
            state,
        }
    }

    pub async fn connect(&self) -> Result<(), T::Error> {
        self.transport.lock().await.connect().await
    }

    /// `true` only if the session was ready and the transport accepted the
    /// message
    pub async fn publish(&self, topic: &str, payload: &[u8], retain: bool, qos: QoS) -> bool {
        if !self.state.is_session_ready() {
            debug!("Session not ready, not publishing to {}", topic);
            return false;
        }
        match self
            .transport
            .lock()
            .await
            .publish(topic, payload, retain, qos)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!("Publish to {} failed: {:?}", topic, dbg_fmt!(e));
                false
            }
        }
    }

    pub async fn publish_json<V: Serialize>(
        &self,
        topic: &str,
        value: &V,
        retain: bool,
        qos: QoS,
    ) -> bool {
        let payload: Vec<u8> = match serde_json::to_vec(value) {
            Ok(payload) => payload,
            Err(_) => {
                error!("Failed to encode payload for {}", topic);
                return false;
            }
        };
        self.publish(topic, &payload, retain, qos).await
    }

    pub async fn subscribe(&self, topic: &str, qos: QoS) -> bool {
        match self.transport.lock().await.subscribe(topic, qos).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Subscribe to {} failed: {:?}", topic, dbg_fmt!(e));
                false
            }
        }
    }
}

pub struct MessagingOrchestrator<'a, M: RawMutex, T> {
    link: &'a MessagingLink<'a, M, T>,
    events: &'a SessionEvents<M>,
    state: &'a ConnectivityState,
    topics: &'a Topics,
    device: &'a DeviceId,
    config: &'a MqttConfig,
}

impl<'a, M: RawMutex, T: MessagingTransport> MessagingOrchestrator<'a, M, T> {
    pub fn new(
        link: &'a MessagingLink<'a, M, T>,
        events: &'a SessionEvents<M>,
        state: &'a ConnectivityState,
        topics: &'a Topics,
        device: &'a DeviceId,
        config: &'a MqttConfig,
    ) -> Self {
        Self {
            link,
            events,
            state,
            topics,
            device,
            config,
        }
    }

    /// Block until the link is up and the wall clock is synchronized
    pub async fn wait_for_prerequisites<D: DelayNs>(&self, delay: &mut D) {
        loop {
            let readiness = self.state.snapshot();
            if readiness.link_up && readiness.time_synced {
                return;
            }
            debug!(
                "Messaging waiting: link {}, time {}",
                readiness.link_up, readiness.time_synced
            );
            delay.delay_ms(self.config.prerequisite_poll_ms).await;
        }
    }

    /// Connect, retrying forever. Prerequisites are re-checked before
    /// every attempt. A loss signalled from the moment an attempt starts
    /// belongs to the session it opens.
    pub async fn connect_until_up<D: DelayNs>(&self, delay: &mut D) {
        loop {
            self.wait_for_prerequisites(delay).await;
            info!(
                "Connecting to broker {}:{}",
                self.config.broker.as_str(),
                self.config.port
            );
            self.events.down.reset();
            match self.link.connect().await {
                Ok(()) => return,
                Err(e) => {
                    warn!(
                        "Broker connect failed: {:?}, retrying in {} ms",
                        dbg_fmt!(e),
                        self.config.connect_retry_ms
                    );
                    delay.delay_ms(self.config.connect_retry_ms).await;
                }
            }
        }
    }

    pub async fn on_up(&self) {
        self.state.set_session_ready(true);
        info!("Messaging session up");

        let status = StatusPayload::online(self.device);
        if !self
            .link
            .publish_json(&self.topics.status, &status, true, QoS::AtLeastOnce)
            .await
        {
            warn!("Online status not published");
        }

        let configured = self.config.subscribe_topics.iter().map(|t| t.as_str());
        for topic in configured.chain(core::iter::once(self.topics.reboot_filter.as_str())) {
            if self.link.subscribe(topic, QoS::AtLeastOnce).await {
                debug!("Subscribed to {}", topic);
            }
        }
    }

    pub fn on_down(&self) {
        self.state.set_session_ready(false);
        warn!("Messaging session down");
    }

    /// Session lifecycle, for the process lifetime
    pub async fn run<D: DelayNs>(&self, delay: &mut D) -> ! {
        loop {
            self.connect_until_up(delay).await;
            self.on_up().await;
            self.events.down.wait().await;
            self.on_down();
        }
    }

    /// Publish one heartbeat if the session is ready
    pub async fn heartbeat_once(&self) -> bool {
        if !self.state.is_session_ready() {
            return false;
        }
        let status = StatusPayload::online(self.device);
        self.link
            .publish_json(&self.topics.status, &status, false, QoS::AtMostOnce)
            .await
    }

    pub async fn run_heartbeat<D: DelayNs>(&self, delay: &mut D) -> ! {
        loop {
            delay.delay_ms(self.config.heartbeat_interval_ms).await;
            if self.heartbeat_once().await {
                trace!("Heartbeat sent");
            }
        }
    }
}
