//! Link and messaging transport capabilities

use core::fmt::Debug;
use core::net::Ipv4Addr;

/// Static IPv4 configuration applied when the interface is activated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpSettings {
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub dns: Ipv4Addr,
}

impl IpSettings {
    /// CIDR prefix length derived from the netmask
    pub fn prefix_len(&self) -> u8 {
        u32::from(self.netmask).count_ones() as u8
    }
}

/// Wired network interface (NIC + PHY)
pub trait EthernetInterface {
    type Error: Debug;

    /// Pulse the interface reset line and return once it is released.
    fn reset_pulse(&self) -> impl core::future::Future<Output = ()>;

    /// Bring the interface up with a static configuration.
    fn activate(
        &self,
        settings: &IpSettings,
    ) -> impl core::future::Future<Output = Result<(), Self::Error>>;

    /// Whether the link currently carries an active, configured connection.
    fn is_link_up(&self) -> bool;
}

impl<T: EthernetInterface> EthernetInterface for &T {
    type Error = T::Error;

    async fn reset_pulse(&self) {
        T::reset_pulse(self).await
    }

    async fn activate(&self, settings: &IpSettings) -> Result<(), Self::Error> {
        T::activate(self, settings).await
    }

    fn is_link_up(&self) -> bool {
        T::is_link_up(self)
    }
}

/// Delivery guarantee requested for a publish or subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
}

/// Publish/subscribe session to a remote broker.
///
/// After a successful `connect` the implementation owns keep-alive and
/// re-connection, reporting session transitions out of band.
pub trait MessagingTransport {
    type Error: Debug;

    fn connect(&mut self) -> impl core::future::Future<Output = Result<(), Self::Error>>;

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
        qos: QoS,
    ) -> impl core::future::Future<Output = Result<(), Self::Error>>;

    fn subscribe(
        &mut self,
        topic: &str,
        qos: QoS,
    ) -> impl core::future::Future<Output = Result<(), Self::Error>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_len() {
        let settings = IpSettings {
            address: Ipv4Addr::new(192, 168, 1, 191),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: Ipv4Addr::new(192, 168, 1, 1),
            dns: Ipv4Addr::new(8, 8, 8, 8),
        };
        assert_eq!(settings.prefix_len(), 24);
    }
}
