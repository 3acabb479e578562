//! Telemetry records as published and backlogged

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::device::DeviceId;
use crate::sampling::{ChannelSummary, CycleReport, OverallSummary};

const OVERALL_MARKER: &str = "OVERALL";

/// Channel a record describes: a numeric channel id or the cycle-wide row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRef {
    Channel(u8),
    Overall,
}

impl Serialize for ChannelRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Channel(id) => serializer.serialize_u8(*id),
            Self::Overall => serializer.serialize_str(OVERALL_MARKER),
        }
    }
}

struct ChannelRefVisitor;

impl Visitor<'_> for ChannelRefVisitor {
    type Value = ChannelRef;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "a channel id or \"{}\"", OVERALL_MARKER)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<ChannelRef, E> {
        u8::try_from(v)
            .map(ChannelRef::Channel)
            .map_err(|_| E::invalid_value(de::Unexpected::Unsigned(v), &self))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<ChannelRef, E> {
        u8::try_from(v)
            .map(ChannelRef::Channel)
            .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<ChannelRef, E> {
        if v == OVERALL_MARKER {
            Ok(ChannelRef::Overall)
        } else {
            Err(E::invalid_value(de::Unexpected::Str(v), &self))
        }
    }
}

impl<'de> Deserialize<'de> for ChannelRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ChannelRefVisitor)
    }
}

/// One published row; `timestamp` is absent until the record is stamped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub mac: String,
    pub pin: ChannelRef,
    pub avg_temp: Option<f32>,
    pub avg_hum: Option<f32>,
    pub max_temp: Option<f32>,
    pub min_temp: Option<f32>,
    pub max_hum: Option<f32>,
    pub min_hum: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl DeliveryRecord {
    pub fn from_channel(device: &DeviceId, summary: &ChannelSummary) -> Self {
        Self {
            mac: device.as_str().to_string(),
            pin: ChannelRef::Channel(summary.channel),
            avg_temp: summary.temperature.avg,
            avg_hum: summary.humidity.avg,
            max_temp: summary.temperature.max,
            min_temp: summary.temperature.min,
            max_hum: summary.humidity.max,
            min_hum: summary.humidity.min,
            timestamp: None,
        }
    }

    pub fn from_overall(device: &DeviceId, overall: &OverallSummary) -> Self {
        Self {
            mac: device.as_str().to_string(),
            pin: ChannelRef::Overall,
            avg_temp: overall.avg_temperature,
            avg_hum: overall.avg_humidity,
            max_temp: overall.max_temperature,
            min_temp: overall.min_temperature,
            max_hum: overall.max_humidity,
            min_hum: overall.min_humidity,
            timestamp: None,
        }
    }

    pub fn stamped(mut self, timestamp: &str) -> Self {
        self.timestamp = Some(timestamp.to_string());
        self
    }
}

/// Channel rows in configuration order, then the OVERALL row
pub fn build_records(device: &DeviceId, report: &CycleReport) -> Vec<DeliveryRecord> {
    report
        .channels
        .iter()
        .map(|c| DeliveryRecord::from_channel(device, c))
        .chain(core::iter::once(DeliveryRecord::from_overall(
            device,
            &report.overall,
        )))
        .collect()
}
