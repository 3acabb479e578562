#![deny(unsafe_code)]
//! SHT4x sensors behind a TCA9548A I2C multiplexer
//!
//! Every channel is one SHT4x on its own mux port, all at the default
//! address. The mux port is selected before each transaction, so channels
//! can share the bus as long as they are polled one at a time.

use defmt::{debug, warn, Format};
use embassy_embedded_hal::shared_bus::asynch::i2c::I2cDevice;
use embassy_stm32::i2c::I2c;
use embassy_stm32::mode::Async;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Delay;
use embedded_hal_async::i2c::I2c as _;
use envnode_hal::{Reading, TempHumSensor};
use sht4x::{Precision, Sht4xAsync};

const MUX_ADDRESS: u8 = 0x70;
pub const MUX_PORTS: u8 = 8;

pub type SharedI2c = I2cDevice<'static, CriticalSectionRawMutex, I2c<'static, Async>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum SensorError {
    /// Mux port does not exist
    InvalidPort,
    /// Mux did not acknowledge the port selection
    MuxSelect,
    /// SHT4x did not answer or failed its CRC
    Sensor,
}

impl core::fmt::Display for SensorError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidPort => write!(f, "Invalid mux port"),
            Self::MuxSelect => write!(f, "Mux port selection failed"),
            Self::Sensor => write!(f, "Sensor not responding"),
        }
    }
}

impl core::error::Error for SensorError {}

pub struct MuxedSht4x {
    i2c: SharedI2c,
    port: u8,
}

impl MuxedSht4x {
    pub fn new(i2c: SharedI2c, port: u8) -> Self {
        Self { i2c, port }
    }

    async fn select(&mut self) -> Result<(), SensorError> {
        if self.port >= MUX_PORTS {
            return Err(SensorError::InvalidPort);
        }
        self.i2c
            .write(MUX_ADDRESS, &[1 << self.port])
            .await
            .map_err(|_| SensorError::MuxSelect)
    }
}

impl TempHumSensor for MuxedSht4x {
    type Error = SensorError;

    async fn init(&mut self) -> Result<(), Self::Error> {
        self.select().await?;
        let mut sensor = Sht4xAsync::<_, Delay>::new(&mut self.i2c);
        match sensor.serial_number(&mut Delay).await {
            Ok(serial) => {
                debug!("SHT4x on mux port {}: serial {=u32:x}", self.port, serial);
                Ok(())
            }
            Err(_) => {
                warn!("No SHT4x on mux port {}", self.port);
                Err(SensorError::Sensor)
            }
        }
    }

    async fn measure(&mut self) -> Result<Reading, Self::Error> {
        self.select().await?;
        let mut sensor = Sht4xAsync::<_, Delay>::new(&mut self.i2c);
        let measurement = sensor
            .measure(Precision::High, &mut Delay)
            .await
            .map_err(|_| SensorError::Sensor)?;
        Ok(Reading::new(
            measurement.temperature_celsius().to_num::<f32>(),
            measurement.humidity_percent().to_num::<f32>(),
        ))
    }
}
