//! Sensor sampling and statistical aggregation

pub mod engine;
pub mod window;

pub use engine::{CycleReport, SamplingEngine, SamplingError, SensorChannel};
pub use window::{round1, ChannelSummary, OverallSummary, SampleWindow, Stats};
