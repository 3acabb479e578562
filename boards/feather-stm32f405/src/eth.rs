#![deny(unsafe_code)]
//! W5500 Ethernet hardware and the `EthernetInterface` adapter

use defmt::{info, warn};
use embassy_embedded_hal::shared_bus::asynch::spi::SpiDevice as SpiDeviceBus;
use embassy_net::{ConfigV4, Ipv4Cidr, Stack, StaticConfigV4};
use embassy_net_wiznet::chip::W5500;
use embassy_net_wiznet::{Device, Runner};
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::Output;
use embassy_stm32::mode::Async;
use embassy_stm32::spi::Spi;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Timer;
use envnode_hal::{EthernetInterface, IpSettings};
use heapless::Vec;
use static_cell::StaticCell;

use crate::network::NetworkError;

pub type W5500Runner = Runner<
    'static,
    W5500,
    SpiDeviceBus<'static, CriticalSectionRawMutex, Spi<'static, Async>, Output<'static>>,
    ExtiInput<'static>,
    Output<'static>,
>;

/// Ethernet peripherals bundle
pub struct EthPeripherals<'a> {
    pub spi: Spi<'a, Async>,
    pub cs: Output<'a>,
    pub reset: Output<'a>,
    pub int: ExtiInput<'a>,
}

/// Reset the W5500 and create the embassy-net device.
///
/// The runner must be polled continuously for the device to move frames.
pub async fn init_w5500(
    periph: EthPeripherals<'static>,
    mac_addr: [u8; 6],
) -> Result<(Device<'static>, W5500Runner), NetworkError> {
    let EthPeripherals {
        spi,
        cs,
        mut reset,
        int,
    } = periph;

    info!("Performing W5500 hardware reset...");
    reset.set_low();
    Timer::after_millis(1).await;
    reset.set_high();
    Timer::after_millis(2).await;

    type SpiBusType = embassy_sync::mutex::Mutex<CriticalSectionRawMutex, Spi<'static, Async>>;
    static SPI_BUS: StaticCell<SpiBusType> = StaticCell::new();
    let spi_bus = SPI_BUS.init(embassy_sync::mutex::Mutex::new(spi));
    let spi_device = SpiDeviceBus::new(spi_bus, cs);

    static STATE: StaticCell<embassy_net_wiznet::State<8, 8>> = StaticCell::new();
    let state = STATE.init(embassy_net_wiznet::State::<8, 8>::new());

    let (device, runner) = embassy_net_wiznet::new(mac_addr, state, spi_device, int, reset)
        .await
        .map_err(|_| NetworkError::SocketError)?;

    info!("W5500 initialized");
    Ok((device, runner))
}

/// Static-address link over the embassy-net stack
pub struct W5500Link {
    stack: Stack<'static>,
}

impl W5500Link {
    pub fn new(stack: Stack<'static>) -> Self {
        Self { stack }
    }
}

impl EthernetInterface for W5500Link {
    type Error = NetworkError;

    /// The reset line belongs to the wiznet runner, so a runtime reset drops
    /// the address configuration and lets the stack settle.
    async fn reset_pulse(&self) {
        self.stack.set_config_v4(ConfigV4::None);
        Timer::after_millis(1).await;
    }

    async fn activate(&self, settings: &IpSettings) -> Result<(), Self::Error> {
        let mask = u32::from(settings.netmask);
        if settings.address.is_unspecified() || mask.leading_ones() != mask.count_ones() {
            return Err(NetworkError::InvalidAddress);
        }
        let mut dns_servers = Vec::new();
        if dns_servers.push(settings.dns).is_err() {
            warn!("DNS server list full");
        }
        let config = StaticConfigV4 {
            address: Ipv4Cidr::new(settings.address, settings.prefix_len()),
            gateway: Some(settings.gateway),
            dns_servers,
        };
        info!(
            "Applying static address {}/{}",
            defmt::Debug2Format(&settings.address),
            settings.prefix_len()
        );
        self.stack.set_config_v4(ConfigV4::Static(config));
        Ok(())
    }

    fn is_link_up(&self) -> bool {
        self.stack.is_link_up() && self.stack.is_config_up()
    }
}
