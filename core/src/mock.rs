//! Test doubles for every hardware capability

use alloc::collections::{BTreeMap, VecDeque};
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use envnode_hal::{
    DelayNs, EthernetInterface, FileStore, Indicator, IpSettings, LedMode, MessagingTransport,
    Monotonic, QoS, Reading, ResetButton, SystemControl, TempHumSensor, TimeSource,
};

// ============================================================================
// Time
// ============================================================================

#[derive(Default)]
pub struct MockClock {
    now: Cell<u64>,
}

impl MockClock {
    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Monotonic for MockClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

/// Records every delay, advances the mock clock and yields once
pub struct MockDelay<'a> {
    clock: &'a MockClock,
    pub delays: Vec<u32>,
}

impl<'a> MockDelay<'a> {
    pub fn new(clock: &'a MockClock) -> Self {
        Self {
            clock,
            delays: Vec::new(),
        }
    }
}

impl DelayNs for MockDelay<'_> {
    async fn delay_ns(&mut self, ns: u32) {
        self.delay_ms(ns / 1_000_000).await
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.delays.push(ms);
        self.clock.advance(u64::from(ms));
        embassy_futures::yield_now().await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockError;

pub struct FakeTimeSource {
    result: Result<u64, MockError>,
    pub calls: u32,
}

impl FakeTimeSource {
    pub fn ok(unix_secs: u64) -> Self {
        Self {
            result: Ok(unix_secs),
            calls: 0,
        }
    }

    pub fn failing() -> Self {
        Self {
            result: Err(MockError),
            calls: 0,
        }
    }
}

impl TimeSource for FakeTimeSource {
    type Error = MockError;

    async fn fetch_unix_time(&mut self) -> Result<u64, MockError> {
        self.calls += 1;
        self.result
    }
}

// ============================================================================
// Sensors
// ============================================================================

/// Sensor replaying a scripted list of measurements
pub struct ScriptedSensor {
    init_ok: bool,
    readings: VecDeque<Option<Reading>>,
}

impl ScriptedSensor {
    /// `None` entries are failed reads
    pub fn new(readings: &[Option<Reading>]) -> Self {
        Self {
            init_ok: true,
            readings: readings.iter().copied().collect(),
        }
    }

    pub fn temperatures(values: &[Option<f32>]) -> Self {
        let readings: Vec<Option<Reading>> = values
            .iter()
            .map(|t| {
                t.map(|t| Reading {
                    temperature: Some(t),
                    humidity: Some(50.0),
                })
            })
            .collect();
        Self::new(&readings)
    }

    pub fn broken() -> Self {
        Self {
            init_ok: false,
            readings: VecDeque::new(),
        }
    }
}

impl TempHumSensor for ScriptedSensor {
    type Error = MockError;

    async fn init(&mut self) -> Result<(), MockError> {
        if self.init_ok {
            Ok(())
        } else {
            Err(MockError)
        }
    }

    async fn measure(&mut self) -> Result<Reading, MockError> {
        self.readings.pop_front().flatten().ok_or(MockError)
    }
}

// ============================================================================
// Storage
// ============================================================================

#[derive(Default)]
pub struct MemStore {
    files: RefCell<BTreeMap<String, Vec<u8>>>,
    fail_writes: Cell<bool>,
}

impl MemStore {
    pub fn put(&self, name: &str, data: &[u8]) {
        self.files
            .borrow_mut()
            .insert(name.to_string(), data.to_vec());
    }

    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.files.borrow().get(name).cloned()
    }

    pub fn text(&self, name: &str) -> Option<String> {
        self.contents(name)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }

    fn check_writable(&self) -> Result<(), MockError> {
        if self.fail_writes.get() {
            Err(MockError)
        } else {
            Ok(())
        }
    }
}

impl FileStore for MemStore {
    type Error = MockError;

    fn exists(&self, name: &str) -> Result<bool, MockError> {
        Ok(self.files.borrow().contains_key(name))
    }

    fn read_at(&self, name: &str, offset: u32, buf: &mut [u8]) -> Result<usize, MockError> {
        let files = self.files.borrow();
        let data = files.get(name).ok_or(MockError)?;
        let start = (offset as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn append(&self, name: &str, data: &[u8]) -> Result<(), MockError> {
        self.check_writable()?;
        self.files
            .borrow_mut()
            .entry(name.to_string())
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }

    fn write(&self, name: &str, data: &[u8]) -> Result<(), MockError> {
        self.check_writable()?;
        self.put(name, data);
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), MockError> {
        self.check_writable()?;
        self.files
            .borrow_mut()
            .remove(name)
            .map(|_| ())
            .ok_or(MockError)
    }
}

// ============================================================================
// Network
// ============================================================================

/// NIC whose link comes up after a configurable number of checks
#[derive(Default)]
pub struct MockNic {
    /// `None` keeps the link down forever
    up_after_checks: Cell<Option<u32>>,
    pub checks: Cell<u32>,
    pub reset_pulses: Cell<u32>,
    pub activations: Cell<u32>,
}

impl MockNic {
    pub fn always_down() -> Self {
        Self::default()
    }

    pub fn up_after(checks: u32) -> Self {
        let nic = Self::default();
        nic.up_after_checks.set(Some(checks));
        nic
    }

    pub fn set_link(&self, up: bool) {
        self.up_after_checks.set(if up { Some(0) } else { None });
        self.checks.set(0);
    }
}

impl EthernetInterface for MockNic {
    type Error = MockError;

    async fn reset_pulse(&self) {
        self.reset_pulses.set(self.reset_pulses.get() + 1);
    }

    async fn activate(&self, _settings: &IpSettings) -> Result<(), MockError> {
        self.activations.set(self.activations.get() + 1);
        Ok(())
    }

    fn is_link_up(&self) -> bool {
        let seen = self.checks.get();
        self.checks.set(seen + 1);
        matches!(self.up_after_checks.get(), Some(n) if seen >= n)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
    pub qos: QoS,
}

/// Shared record of everything a [`MockTransport`] did
#[derive(Default)]
pub struct TransportLog {
    pub published: RefCell<Vec<Published>>,
    pub subscribed: RefCell<Vec<String>>,
    pub connects: Cell<u32>,
    /// Connect attempts that fail before one succeeds
    pub failing_connects: Cell<u32>,
    /// Publishes that fail before they start succeeding again
    pub failing_publishes: Cell<u32>,
}

impl TransportLog {
    pub fn topics(&self) -> Vec<String> {
        self.published
            .borrow()
            .iter()
            .map(|p| p.topic.clone())
            .collect()
    }

    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.published
            .borrow()
            .iter()
            .map(|p| serde_json::from_str(&p.payload).unwrap())
            .collect()
    }
}

pub struct MockTransport<'a> {
    log: &'a TransportLog,
}

impl<'a> MockTransport<'a> {
    pub fn new(log: &'a TransportLog) -> Self {
        Self { log }
    }
}

impl MessagingTransport for MockTransport<'_> {
    type Error = MockError;

    async fn connect(&mut self) -> Result<(), MockError> {
        self.log.connects.set(self.log.connects.get() + 1);
        let failing = self.log.failing_connects.get();
        if failing > 0 {
            self.log.failing_connects.set(failing - 1);
            return Err(MockError);
        }
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
        qos: QoS,
    ) -> Result<(), MockError> {
        let failing = self.log.failing_publishes.get();
        if failing > 0 {
            self.log.failing_publishes.set(failing - 1);
            return Err(MockError);
        }
        self.log.published.borrow_mut().push(Published {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            retain,
            qos,
        });
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str, _qos: QoS) -> Result<(), MockError> {
        self.log.subscribed.borrow_mut().push(topic.to_string());
        Ok(())
    }
}

// ============================================================================
// System
// ============================================================================

#[derive(Default)]
pub struct MockIndicator {
    pub modes: RefCell<Vec<LedMode>>,
}

impl MockIndicator {
    pub fn last(&self) -> Option<LedMode> {
        self.modes.borrow().last().copied()
    }
}

impl Indicator for MockIndicator {
    fn set_mode(&self, mode: LedMode) {
        self.modes.borrow_mut().push(mode);
    }
}

#[derive(Default)]
pub struct MockSystem {
    pub restarts: Cell<u32>,
}

impl SystemControl for MockSystem {
    fn restart(&self) {
        self.restarts.set(self.restarts.get() + 1);
    }
}

/// Button reporting pressed for a fixed number of polls
#[derive(Default)]
pub struct MockButton {
    pressed_polls: Cell<u32>,
}

impl MockButton {
    pub fn held_for_polls(polls: u32) -> Self {
        Self {
            pressed_polls: Cell::new(polls),
        }
    }
}

impl ResetButton for MockButton {
    fn is_pressed(&self) -> bool {
        let left = self.pressed_polls.get();
        if left == 0 {
            return false;
        }
        self.pressed_polls.set(left - 1);
        true
    }
}
