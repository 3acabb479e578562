//! Temperature/humidity sensor capability

use core::fmt::Debug;

/// One raw measurement from a combined temperature/humidity sensor.
///
/// Either quantity may be missing when the device delivered a partial
/// frame; range filtering happens in the core, not here.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reading {
    /// Degrees Celsius
    pub temperature: Option<f32>,
    /// Relative humidity, percent
    pub humidity: Option<f32>,
}

impl Reading {
    pub const fn new(temperature: f32, humidity: f32) -> Self {
        Self {
            temperature: Some(temperature),
            humidity: Some(humidity),
        }
    }
}

/// A single sensor channel (pin, bus address or mux port)
pub trait TempHumSensor {
    type Error: Debug;

    /// Prepare the channel for this cycle. Called once per cycle before
    /// the first `measure`.
    fn init(&mut self) -> impl core::future::Future<Output = Result<(), Self::Error>>;

    /// Trigger and read one measurement.
    fn measure(&mut self) -> impl core::future::Future<Output = Result<Reading, Self::Error>>;
}
