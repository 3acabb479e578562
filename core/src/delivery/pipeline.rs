//! At-least-once telemetry delivery
//!
//! Live when link, wall clock and session are all ready at the moment of
//! delivery; otherwise every record goes to the backlog ledger with the
//! current tick. A live pass replays the backlog first so records leave in
//! the order they were produced.

use alloc::vec::Vec;

use embassy_sync::blocking_mutex::raw::RawMutex;
use envnode_hal::{FileStore, MessagingTransport, Monotonic, QoS};

use super::ledger::Ledger;
use super::record::DeliveryRecord;
use crate::network::messaging::MessagingLink;
use crate::network::topics::Topic;
use crate::state::ConnectivityState;
use crate::time::WallClock;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeliveryOutcome {
    pub published: usize,
    pub backlogged: usize,
    /// Records that could be neither published nor backlogged
    pub lost: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReplayOutcome {
    pub published: usize,
    pub retained: usize,
    /// Unparseable lines discarded
    pub dropped: usize,
}

pub struct DeliveryPipeline<'a, M: RawMutex, S, T, C> {
    ledger: Ledger<'a, S>,
    link: &'a MessagingLink<'a, M, T>,
    clock: &'a WallClock<M>,
    mono: &'a C,
    state: &'a ConnectivityState,
    topic: Topic,
    qos: QoS,
}

impl<'a, M, S, T, C> DeliveryPipeline<'a, M, S, T, C>
where
    M: RawMutex,
    S: FileStore,
    T: MessagingTransport,
    C: Monotonic,
{
    pub fn new(
        store: &'a S,
        link: &'a MessagingLink<'a, M, T>,
        clock: &'a WallClock<M>,
        mono: &'a C,
        state: &'a ConnectivityState,
        topic: Topic,
        qos: QoS,
    ) -> Self {
        Self {
            ledger: Ledger::new(store),
            link,
            clock,
            mono,
            state,
            topic,
            qos,
        }
    }

    /// Deliver one cycle's records
    pub async fn deliver(&self, records: Vec<DeliveryRecord>) -> DeliveryOutcome {
        let mut outcome = DeliveryOutcome::default();
        let eligible = self.state.snapshot().is_live_eligible();

        let now = self.mono.now_ms();
        let timestamp = if eligible {
            self.clock.timestamp_at(now)
        } else {
            None
        };

        let Some(timestamp) = timestamp else {
            debug!("Offline, backlogging {} records", records.len());
            for record in &records {
                self.backlog(now, record, &mut outcome);
            }
            return outcome;
        };

        let replay = self.replay().await;
        if replay.published + replay.retained > 0 {
            info!(
                "Backlog replay: {} published, {} retained",
                replay.published, replay.retained
            );
        }

        let mut failed = Vec::new();
        for record in records {
            let record = record.stamped(&timestamp);
            if self
                .link
                .publish_json(&self.topic, &record, false, self.qos)
                .await
            {
                outcome.published += 1;
            } else {
                failed.push(record);
            }
        }

        let tick = self.mono.now_ms();
        for mut record in failed {
            record.timestamp = None;
            self.backlog(tick, &record, &mut outcome);
        }
        outcome
    }

    fn backlog(&self, tick_ms: u64, record: &DeliveryRecord, outcome: &mut DeliveryOutcome) {
        match self.ledger.append(tick_ms, record) {
            Ok(()) => outcome.backlogged += 1,
            Err(e) => {
                error!("Backlog append failed: {:?}", dbg_fmt!(e));
                outcome.lost += 1;
            }
        }
    }

    /// Publish backlogged entries in write order with reconciled
    /// timestamps, keeping the ones that fail
    pub async fn replay(&self) -> ReplayOutcome {
        let mut outcome = ReplayOutcome::default();

        if !self.state.is_time_synced() || self.clock.anchor().is_none() {
            return outcome;
        }
        if let Err(e) = self.ledger.recover() {
            error!("Backlog recovery failed: {:?}", dbg_fmt!(e));
            return outcome;
        }
        match self.ledger.exists() {
            Ok(true) => {}
            Ok(false) => return outcome,
            Err(e) => {
                error!("Backlog check failed: {:?}", dbg_fmt!(e));
                return outcome;
            }
        }

        let mut reader = self.ledger.reader();
        let mut rewrite = match self.ledger.rewrite() {
            Ok(rewrite) => rewrite,
            Err(e) => {
                error!("Backlog rewrite failed: {:?}", dbg_fmt!(e));
                return outcome;
            }
        };

        loop {
            let raw = match reader.next_entry() {
                Ok(Some(raw)) => raw,
                Ok(None) => break,
                Err(e) => {
                    // Ledger left as is; entries already sent will repeat
                    error!("Backlog read failed: {:?}", dbg_fmt!(e));
                    return outcome;
                }
            };

            let entry = match raw.parsed {
                Ok(entry) => entry,
                Err(e) => {
                    error!("Dropping corrupt backlog line: {:?}", e);
                    outcome.dropped += 1;
                    continue;
                }
            };

            let sent = match self.clock.timestamp_at(entry.tick_ms) {
                Some(ts) => {
                    let record = entry.record.stamped(&ts);
                    self.link
                        .publish_json(&self.topic, &record, false, self.qos)
                        .await
                }
                None => false,
            };

            if sent {
                outcome.published += 1;
            } else if let Err(e) = rewrite.retain(&raw.line) {
                error!("Backlog rewrite failed: {:?}", dbg_fmt!(e));
                return outcome;
            } else {
                outcome.retained += 1;
            }
        }

        if let Err(e) = rewrite.finish() {
            error!("Backlog commit failed: {:?}", dbg_fmt!(e));
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::ledger::{HEADER, LEDGER_FILE, SCRATCH_FILE};
    use crate::delivery::record::ChannelRef;
    use crate::mock::{MemStore, MockClock, MockTransport, TransportLog};
    use alloc::string::ToString;
    use alloc::vec;
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    const TOPIC: &str = "esp32/02:00:00:00:00:01/dht";
    // 2024-01-01T00:00:00Z
    const ANCHOR_UNIX: u64 = 1_704_067_200;
    const ANCHOR_TICK: u64 = 100_000;

    fn record(pin: u8) -> DeliveryRecord {
        DeliveryRecord {
            mac: "02:00:00:00:00:01".to_string(),
            pin: ChannelRef::Channel(pin),
            avg_temp: Some(21.0),
            avg_hum: Some(50.0),
            max_temp: Some(22.0),
            min_temp: Some(20.0),
            max_hum: Some(51.0),
            min_hum: Some(49.0),
            timestamp: None,
        }
    }

    struct Fixture {
        store: MemStore,
        log: TransportLog,
        state: ConnectivityState,
        clock: WallClock<NoopRawMutex>,
        mono: MockClock,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: MemStore::default(),
                log: TransportLog::default(),
                state: ConnectivityState::new(),
                clock: WallClock::new(0),
                mono: MockClock::default(),
            }
        }

        fn online(&self) {
            self.state.set_link_up(true);
            self.state.set_time_synced(true);
            self.state.set_session_ready(true);
            self.clock.calibrate(ANCHOR_UNIX, ANCHOR_TICK);
        }

        fn run<R>(&self, f: impl FnOnce(&DeliveryPipeline<'_, NoopRawMutex, MemStore, MockTransport<'_>, MockClock>) -> R) -> R {
            let link = MessagingLink::new(MockTransport::new(&self.log), &self.state);
            let pipeline = DeliveryPipeline::new(
                &self.store,
                &link,
                &self.clock,
                &self.mono,
                &self.state,
                Topic::try_from(TOPIC).unwrap(),
                QoS::AtLeastOnce,
            );
            f(&pipeline)
        }

        fn ledger_ticks(&self) -> Vec<u64> {
            let ledger = Ledger::new(&self.store);
            let mut reader = ledger.reader();
            let mut ticks = Vec::new();
            while let Some(raw) = reader.next_entry().unwrap() {
                ticks.push(raw.parsed.unwrap().tick_ms);
            }
            ticks
        }
    }

    #[test]
    fn test_offline_backlogs_everything() {
        let fx = Fixture::new();
        fx.mono.advance(5_000);

        let outcome = fx.run(|p| block_on(p.deliver(vec![record(25), record(26)])));

        assert_eq!(outcome.backlogged, 2);
        assert_eq!(outcome.published, 0);
        assert!(fx.log.published.borrow().is_empty());
        assert_eq!(fx.ledger_ticks(), vec![5_000, 5_000]);
    }

    #[test]
    fn test_live_publishes_stamped_records() {
        let fx = Fixture::new();
        fx.online();
        fx.mono.advance(ANCHOR_TICK + 61_500);

        let outcome = fx.run(|p| block_on(p.deliver(vec![record(25)])));

        assert_eq!(outcome.published, 1);
        assert!(!fx.store.exists(LEDGER_FILE).unwrap());
        let published = fx.log.published.borrow();
        assert_eq!(published[0].topic, TOPIC);
        assert_eq!(published[0].qos, QoS::AtLeastOnce);
        assert_eq!(fx.log.payloads()[0]["timestamp"], "2024-01-01T00:01:01");
    }

    #[test]
    fn test_failed_live_publish_backlogged() {
        let fx = Fixture::new();
        fx.online();
        fx.mono.advance(ANCHOR_TICK);
        fx.log.failing_publishes.set(1);

        let outcome = fx.run(|p| block_on(p.deliver(vec![record(25), record(26)])));

        assert_eq!(outcome.published, 1);
        assert_eq!(outcome.backlogged, 1);
        assert_eq!(fx.ledger_ticks(), vec![ANCHOR_TICK]);
        // Backlogged without the live timestamp
        assert!(!fx.store.text(LEDGER_FILE).unwrap().contains("timestamp"));
    }

    #[test]
    fn test_replay_reconciles_timestamps_in_order() {
        let fx = Fixture::new();
        let ledger = Ledger::new(&fx.store);
        // Written 30.4 s before and 2 s after the anchor tick
        ledger.append(ANCHOR_TICK - 30_400, &record(25)).unwrap();
        ledger.append(ANCHOR_TICK + 2_000, &record(26)).unwrap();
        fx.online();

        let outcome = fx.run(|p| block_on(p.replay()));

        assert_eq!(outcome, ReplayOutcome { published: 2, retained: 0, dropped: 0 });
        assert!(!fx.store.exists(LEDGER_FILE).unwrap());
        let payloads = fx.log.payloads();
        assert_eq!(payloads[0]["pin"], 25);
        assert_eq!(payloads[0]["timestamp"], "2023-12-31T23:59:29");
        assert_eq!(payloads[1]["timestamp"], "2024-01-01T00:00:02");
    }

    #[test]
    fn test_partial_replay_keeps_failures_in_order() {
        let fx = Fixture::new();
        let ledger = Ledger::new(&fx.store);
        for tick in [1_000, 2_000, 3_000, 4_000, 5_000] {
            ledger.append(tick, &record(25)).unwrap();
        }
        fx.online();
        // First two fail, rest succeed
        fx.log.failing_publishes.set(2);

        let outcome = fx.run(|p| block_on(p.replay()));

        assert_eq!(outcome.published, 3);
        assert_eq!(outcome.retained, 2);
        assert_eq!(fx.ledger_ticks(), vec![1_000, 2_000]);
        assert!(!fx.store.exists(SCRATCH_FILE).unwrap());
    }

    #[test]
    fn test_replay_noop_without_ledger_or_sync() {
        let fx = Fixture::new();
        fx.online();
        let outcome = fx.run(|p| block_on(p.replay()));
        assert_eq!(outcome, ReplayOutcome::default());
        assert!(!fx.store.exists(LEDGER_FILE).unwrap());

        let fx = Fixture::new();
        Ledger::new(&fx.store).append(1, &record(25)).unwrap();
        fx.state.set_session_ready(true);
        fx.state.set_time_synced(true);
        // Synced flag without an anchor
        let outcome = fx.run(|p| block_on(p.replay()));
        assert_eq!(outcome, ReplayOutcome::default());
        assert_eq!(fx.ledger_ticks(), vec![1]);
    }

    #[test]
    fn test_replay_of_empty_ledger_is_noop() {
        let fx = Fixture::new();
        fx.store.put(LEDGER_FILE, HEADER.as_bytes());
        fx.online();

        let first = fx.run(|p| block_on(p.replay()));
        let second = fx.run(|p| block_on(p.replay()));

        assert_eq!(first, ReplayOutcome::default());
        assert_eq!(second, ReplayOutcome::default());
        assert!(fx.log.published.borrow().is_empty());
        assert!(!fx.store.exists(LEDGER_FILE).unwrap());
        assert!(!fx.store.exists(SCRATCH_FILE).unwrap());
    }

    #[test]
    fn test_replay_drops_corrupt_lines() {
        let fx = Fixture::new();
        let ledger = Ledger::new(&fx.store);
        ledger.append(1_000, &record(25)).unwrap();
        fx.store.append(LEDGER_FILE, b"oops,{\n").unwrap();
        fx.online();

        let outcome = fx.run(|p| block_on(p.replay()));
        assert_eq!(outcome.published, 1);
        assert_eq!(outcome.dropped, 1);
        assert!(!fx.store.exists(LEDGER_FILE).unwrap());
    }

    #[test]
    fn test_live_delivery_replays_backlog_first() {
        let fx = Fixture::new();
        Ledger::new(&fx.store).append(50_000, &record(32)).unwrap();
        fx.online();
        fx.mono.advance(ANCHOR_TICK);

        let outcome = fx.run(|p| block_on(p.deliver(vec![record(25)])));

        assert_eq!(outcome.published, 1);
        let pins: Vec<serde_json::Value> =
            fx.log.payloads().iter().map(|p| p["pin"].clone()).collect();
        assert_eq!(pins, vec![serde_json::json!(32), serde_json::json!(25)]);
        assert!(!fx.store.exists(LEDGER_FILE).unwrap());
    }

    #[test]
    fn test_storage_failure_counts_lost() {
        let fx = Fixture::new();
        fx.store.set_fail_writes(true);
        let outcome = fx.run(|p| block_on(p.deliver(vec![record(25)])));
        assert_eq!(outcome.lost, 1);
        assert_eq!(outcome.backlogged, 0);
    }
}
