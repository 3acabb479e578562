//! Telemetry cycle: sample, evaluate, deliver

use embassy_sync::blocking_mutex::raw::RawMutex;
use envnode_hal::{DelayNs, FileStore, Indicator, MessagingTransport, Monotonic, TempHumSensor};

use crate::alarm::AlarmEvaluator;
use crate::config::SensorConfig;
use crate::delivery::{build_records, DeliveryOutcome, DeliveryPipeline};
use crate::device::DeviceId;
use crate::sampling::{SamplingEngine, SamplingError, SensorChannel};
use crate::state::StatusBoard;

pub struct TelemetryService<'a, M: RawMutex, S, T, C, I> {
    config: &'a SensorConfig,
    alarm: AlarmEvaluator,
    pipeline: &'a DeliveryPipeline<'a, M, S, T, C>,
    device: &'a DeviceId,
    board: &'a StatusBoard<M>,
    alarm_indicator: &'a I,
}

impl<'a, M, S, T, C, I> TelemetryService<'a, M, S, T, C, I>
where
    M: RawMutex,
    S: FileStore,
    T: MessagingTransport,
    C: Monotonic,
    I: Indicator,
{
    pub fn new(
        config: &'a SensorConfig,
        pipeline: &'a DeliveryPipeline<'a, M, S, T, C>,
        device: &'a DeviceId,
        board: &'a StatusBoard<M>,
        alarm_indicator: &'a I,
    ) -> Self {
        Self {
            config,
            alarm: AlarmEvaluator::new(config),
            pipeline,
            device,
            board,
            alarm_indicator,
        }
    }

    /// One full cycle over every channel
    pub async fn run_cycle<X, D>(
        &self,
        channels: &mut [SensorChannel<X>],
        delay: &mut D,
    ) -> Result<DeliveryOutcome, SamplingError>
    where
        X: TempHumSensor,
        D: DelayNs,
    {
        let report = SamplingEngine::new(self.config)
            .run_cycle(channels, delay)
            .await?;

        self.board.publish(report.overall);
        self.alarm.apply(&report.overall, self.alarm_indicator);

        for summary in &report.channels {
            info!(
                "{} (channel {}): temp {:?} hum {:?} from {}/{} samples",
                self.config.location_of(summary.channel),
                summary.channel,
                summary.temperature.avg,
                summary.humidity.avg,
                summary.temperature.count,
                summary.humidity.count
            );
        }
        info!(
            "Overall: temp {:?} hum {:?}",
            report.overall.avg_temperature, report.overall.avg_humidity
        );

        let records = build_records(self.device, &report);
        let outcome = self.pipeline.deliver(records).await;
        debug!(
            "Delivered: {} published, {} backlogged, {} lost",
            outcome.published, outcome.backlogged, outcome.lost
        );
        Ok(outcome)
    }

    pub async fn run<X, D>(&self, channels: &mut [SensorChannel<X>], delay: &mut D) -> !
    where
        X: TempHumSensor,
        D: DelayNs,
    {
        loop {
            let wait_ms = match self.run_cycle(channels, delay).await {
                Ok(_) => self.config.cycle_interval_ms,
                Err(e) => {
                    error!("Cycle aborted: {}", e);
                    self.config.init_backoff_ms()
                }
            };
            delay.delay_ms(wait_ms).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::ledger::LEDGER_FILE;
    use crate::mock::{
        MemStore, MockClock, MockDelay, MockIndicator, MockTransport, ScriptedSensor, TransportLog,
    };
    use crate::network::messaging::MessagingLink;
    use crate::network::topics::Topic;
    use crate::state::ConnectivityState;
    use crate::time::WallClock;
    use alloc::vec;
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use envnode_hal::{LedMode, QoS};

    #[test]
    fn test_offline_cycle_backlogs_and_alarms() {
        let config = SensorConfig {
            sample_count: 3,
            ..Default::default()
        };
        let store = MemStore::default();
        let log = TransportLog::default();
        let state = ConnectivityState::new();
        let clock = WallClock::<NoopRawMutex>::new(0);
        let mono = MockClock::default();
        let link = MessagingLink::new(MockTransport::new(&log), &state);
        let pipeline = DeliveryPipeline::new(
            &store,
            &link,
            &clock,
            &mono,
            &state,
            Topic::try_from("esp32/02:00:00:00:00:01/dht").unwrap(),
            QoS::AtLeastOnce,
        );
        let device = DeviceId::from_mac([0x02, 0, 0, 0, 0, 0x01]);
        let board = StatusBoard::new();
        let led = MockIndicator::default();
        let service = TelemetryService::new(&config, &pipeline, &device, &board, &led);

        let mut channels = vec![
            SensorChannel::new(25, ScriptedSensor::temperatures(&[Some(28.0), Some(29.0), Some(30.0)])),
            SensorChannel::new(26, ScriptedSensor::broken()),
        ];
        let mut delay = MockDelay::new(&mono);

        let outcome = block_on(service.run_cycle(&mut channels, &mut delay)).unwrap();

        // One channel row plus OVERALL
        assert_eq!(outcome.backlogged, 2);
        assert_eq!(led.last(), Some(LedMode::Blinking(crate::alarm::ALARM_BLINK_MS)));
        assert_eq!(board.latest().unwrap().avg_temperature, Some(29.0));
        let ledger = store.text(LEDGER_FILE).unwrap();
        assert!(ledger.contains("\"pin\":\"OVERALL\""));
        assert!(log.published.borrow().is_empty());
    }

    #[test]
    fn test_cycle_aborts_without_channels() {
        let config = SensorConfig::default();
        let store = MemStore::default();
        let log = TransportLog::default();
        let state = ConnectivityState::new();
        let clock = WallClock::<NoopRawMutex>::new(0);
        let mono = MockClock::default();
        let link = MessagingLink::new(MockTransport::new(&log), &state);
        let pipeline = DeliveryPipeline::new(
            &store,
            &link,
            &clock,
            &mono,
            &state,
            Topic::try_from("t").unwrap(),
            QoS::AtMostOnce,
        );
        let device = DeviceId::from_mac([0x02, 0, 0, 0, 0, 0x01]);
        let board = StatusBoard::new();
        let led = MockIndicator::default();
        let service = TelemetryService::new(&config, &pipeline, &device, &board, &led);

        let mut channels = vec![SensorChannel::new(25, ScriptedSensor::broken())];
        let mut delay = MockDelay::new(&mono);

        let result = block_on(service.run_cycle(&mut channels, &mut delay));
        assert_eq!(result, Err(SamplingError::NoActiveChannels));
        assert!(board.latest().is_none());
        assert!(!store.exists(LEDGER_FILE).unwrap());
    }
}
