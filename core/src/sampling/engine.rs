//! Multi-channel sampling cycle

use alloc::vec::Vec;

use envnode_hal::{DelayNs, TempHumSensor};

use super::window::{ChannelSummary, OverallSummary, SampleWindow};
use crate::config::SensorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SamplingError {
    /// Every configured channel failed to initialize
    NoActiveChannels,
}

impl core::fmt::Display for SamplingError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoActiveChannels => write!(f, "No sensor channel initialized"),
        }
    }
}

impl core::error::Error for SamplingError {}

/// A configured sensor bound to its channel id
pub struct SensorChannel<S> {
    pub id: u8,
    sensor: S,
}

impl<S> SensorChannel<S> {
    pub fn new(id: u8, sensor: S) -> Self {
        Self { id, sensor }
    }
}

/// Result of one sampling cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Active channels in configuration order
    pub channels: Vec<ChannelSummary>,
    pub overall: OverallSummary,
}

pub struct SamplingEngine<'a> {
    config: &'a SensorConfig,
}

impl<'a> SamplingEngine<'a> {
    pub fn new(config: &'a SensorConfig) -> Self {
        Self { config }
    }

    /// Initialize every channel, run `sample_count` rounds over the ones
    /// that came up and summarize them.
    ///
    /// Sensor failures never escape: a channel failing init sits the cycle
    /// out, a failed read leaves that round empty for that channel.
    pub async fn run_cycle<S, D>(
        &self,
        channels: &mut [SensorChannel<S>],
        delay: &mut D,
    ) -> Result<CycleReport, SamplingError>
    where
        S: TempHumSensor,
        D: DelayNs,
    {
        let mut active: Vec<(usize, SampleWindow)> = Vec::with_capacity(channels.len());
        for (index, channel) in channels.iter_mut().enumerate() {
            match channel.sensor.init().await {
                Ok(()) => {
                    debug!("Channel {} ready", channel.id);
                    active.push((index, SampleWindow::default()));
                }
                Err(e) => error!("Channel {} init failed: {:?}", channel.id, dbg_fmt!(e)),
            }
        }

        if active.is_empty() {
            return Err(SamplingError::NoActiveChannels);
        }

        let temp = &self.config.temperature;
        let hum = &self.config.humidity;
        for _ in 0..self.config.sample_count {
            for (index, window) in active.iter_mut() {
                let channel = &mut channels[*index];
                match channel.sensor.measure().await {
                    Ok(reading) => window.record(&reading, temp, hum),
                    Err(e) => trace!("Channel {} read failed: {:?}", channel.id, dbg_fmt!(e)),
                }
            }
            delay.delay_ms(self.config.read_delay_ms).await;
        }

        let summaries: Vec<ChannelSummary> = active
            .iter()
            .map(|(index, window)| window.summarize(channels[*index].id))
            .collect();
        let overall = OverallSummary::from_channels(&summaries);

        Ok(CycleReport {
            channels: summaries,
            overall,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockClock, MockDelay, ScriptedSensor};
    use alloc::vec;
    use approx::assert_relative_eq;
    use embassy_futures::block_on;

    fn config(sample_count: u8) -> SensorConfig {
        SensorConfig {
            sample_count,
            ..Default::default()
        }
    }

    #[test]
    fn test_two_channel_cycle() {
        let config = config(3);
        let engine = SamplingEngine::new(&config);
        let mut channels = vec![
            SensorChannel::new(
                25,
                ScriptedSensor::temperatures(&[Some(20.0), Some(21.0), Some(22.0)]),
            ),
            SensorChannel::new(26, ScriptedSensor::temperatures(&[None, Some(24.0), Some(25.0)])),
        ];
        let clock = MockClock::default();
        let mut delay = MockDelay::new(&clock);

        let report = block_on(engine.run_cycle(&mut channels, &mut delay)).unwrap();

        assert_eq!(report.channels.len(), 2);
        assert_eq!(report.channels[0].channel, 25);
        assert_eq!(report.channels[0].temperature.avg, Some(21.0));
        assert_eq!(report.channels[0].temperature.count, 3);
        assert_eq!(report.channels[1].temperature.avg, Some(24.5));
        assert_eq!(report.channels[1].temperature.count, 2);
        assert_relative_eq!(report.overall.avg_temperature.unwrap(), 22.4);

        // One inter-round delay per round
        assert_eq!(delay.delays, vec![2_000, 2_000, 2_000]);
    }

    #[test]
    fn test_failed_init_excluded() {
        let config = config(2);
        let engine = SamplingEngine::new(&config);
        let mut channels = vec![
            SensorChannel::new(25, ScriptedSensor::broken()),
            SensorChannel::new(26, ScriptedSensor::temperatures(&[Some(23.0), Some(23.0)])),
        ];
        let clock = MockClock::default();
        let mut delay = MockDelay::new(&clock);

        let report = block_on(engine.run_cycle(&mut channels, &mut delay)).unwrap();

        assert_eq!(report.channels.len(), 1);
        assert_eq!(report.channels[0].channel, 26);
        assert_eq!(report.overall.avg_temperature, Some(23.0));
    }

    #[test]
    fn test_no_active_channels() {
        let config = config(2);
        let engine = SamplingEngine::new(&config);
        let mut channels = vec![
            SensorChannel::new(25, ScriptedSensor::broken()),
            SensorChannel::new(26, ScriptedSensor::broken()),
        ];
        let clock = MockClock::default();
        let mut delay = MockDelay::new(&clock);

        let result = block_on(engine.run_cycle(&mut channels, &mut delay));
        assert_eq!(result, Err(SamplingError::NoActiveChannels));
        assert!(delay.delays.is_empty());
    }

    #[test]
    fn test_all_reads_invalid() {
        let config = config(2);
        let engine = SamplingEngine::new(&config);
        let mut channels = vec![SensorChannel::new(
            25,
            ScriptedSensor::temperatures(&[Some(180.0), None]),
        )];
        let clock = MockClock::default();
        let mut delay = MockDelay::new(&clock);

        let report = block_on(engine.run_cycle(&mut channels, &mut delay)).unwrap();
        assert_eq!(report.channels[0].temperature.avg, None);
        assert_eq!(report.overall.avg_temperature, None);
    }
}
