//! Per-channel accumulation and cycle statistics

use envnode_hal::Reading;

use crate::config::QuantityLimits;

/// Round to one decimal place, halves away from zero
pub fn round1(value: f64) -> f32 {
    (libm::round(value * 10.0) / 10.0) as f32
}

#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    sum: f64,
    count: u32,
    max: Option<f32>,
    min: Option<f32>,
}

impl Accumulator {
    fn push(&mut self, value: f32) {
        self.sum += f64::from(value);
        self.count += 1;
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
    }

    fn stats(&self) -> Stats {
        let avg = (self.count > 0).then(|| round1(self.sum / f64::from(self.count)));
        Stats {
            avg,
            max: self.max,
            min: self.min,
            count: self.count,
        }
    }
}

/// Summary of one quantity over one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Stats {
    /// Rounded to one decimal; absent when no reading was valid
    pub avg: Option<f32>,
    pub max: Option<f32>,
    pub min: Option<f32>,
    /// Valid readings behind `avg`
    pub count: u32,
}

/// Running accumulation for one channel during one cycle
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleWindow {
    temperature: Accumulator,
    humidity: Accumulator,
}

impl SampleWindow {
    /// Accumulate one reading, discarding each quantity independently when
    /// it is outside its rated range or not finite.
    pub fn record(&mut self, reading: &Reading, temp: &QuantityLimits, hum: &QuantityLimits) {
        if let Some(t) = reading.temperature.filter(|&t| temp.accepts(t)) {
            self.temperature.push(t);
        }
        if let Some(h) = reading.humidity.filter(|&h| hum.accepts(h)) {
            self.humidity.push(h);
        }
    }

    pub fn summarize(&self, channel: u8) -> ChannelSummary {
        ChannelSummary {
            channel,
            temperature: self.temperature.stats(),
            humidity: self.humidity.stats(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelSummary {
    pub channel: u8,
    pub temperature: Stats,
    pub humidity: Stats,
}

/// Cycle-wide statistics across all active channels
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OverallSummary {
    /// Sample-count weighted mean of channel averages
    pub avg_temperature: Option<f32>,
    pub avg_humidity: Option<f32>,
    /// Extremes across channel averages
    pub max_temperature: Option<f32>,
    pub min_temperature: Option<f32>,
    pub max_humidity: Option<f32>,
    pub min_humidity: Option<f32>,
}

impl OverallSummary {
    pub fn from_channels(channels: &[ChannelSummary]) -> Self {
        let (avg_temperature, max_temperature, min_temperature) =
            combine(channels.iter().map(|c| &c.temperature));
        let (avg_humidity, max_humidity, min_humidity) =
            combine(channels.iter().map(|c| &c.humidity));

        Self {
            avg_temperature,
            avg_humidity,
            max_temperature,
            min_temperature,
            max_humidity,
            min_humidity,
        }
    }
}

/// Weighted average, max and min of the present channel averages
fn combine<'a>(stats: impl Iterator<Item = &'a Stats>) -> (Option<f32>, Option<f32>, Option<f32>) {
    let mut weighted = 0.0f64;
    let mut total = 0u32;
    let mut max: Option<f32> = None;
    let mut min: Option<f32> = None;

    for s in stats {
        let Some(avg) = s.avg else { continue };
        weighted += f64::from(avg) * f64::from(s.count);
        total += s.count;
        max = Some(max.map_or(avg, |m| m.max(avg)));
        min = Some(min.map_or(avg, |m| m.min(avg)));
    }

    let avg = (total > 0).then(|| round1(weighted / f64::from(total)));
    (avg, max, min)
}
