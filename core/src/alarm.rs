//! Comfort-window alarm evaluation

use envnode_hal::{Indicator, LedMode};

use crate::config::SensorConfig;
use crate::sampling::OverallSummary;

/// Blink half-period while an alarm is raised
pub const ALARM_BLINK_MS: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlarmEvaluator {
    temperature: (f32, f32),
    humidity: (f32, f32),
}

impl AlarmEvaluator {
    pub fn new(config: &SensorConfig) -> Self {
        Self {
            temperature: config.temperature.condition_window(),
            humidity: config.humidity.condition_window(),
        }
    }

    /// True if either overall average is present and outside its window.
    /// Window bounds are inside the comfort zone.
    pub fn evaluate(&self, overall: &OverallSummary) -> bool {
        outside(overall.avg_temperature, self.temperature)
            || outside(overall.avg_humidity, self.humidity)
    }

    /// Evaluate and reflect the result on the indicator
    pub fn apply<I: Indicator>(&self, overall: &OverallSummary, indicator: &I) -> bool {
        let alarm = self.evaluate(overall);
        if alarm {
            warn!(
                "Alarm: temperature {:?}, humidity {:?}",
                overall.avg_temperature, overall.avg_humidity
            );
            indicator.set_mode(LedMode::Blinking(ALARM_BLINK_MS));
        } else {
            indicator.set_mode(LedMode::On);
        }
        alarm
    }
}

fn outside(value: Option<f32>, (low, high): (f32, f32)) -> bool {
    value.is_some_and(|v| v < low || v > high)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockIndicator;

    fn summary(temp: Option<f32>, hum: Option<f32>) -> OverallSummary {
        OverallSummary {
            avg_temperature: temp,
            avg_humidity: hum,
            ..Default::default()
        }
    }

    #[test]
    fn test_temperature_window() {
        let evaluator = AlarmEvaluator::new(&SensorConfig::default());
        assert!(evaluator.evaluate(&summary(Some(27.0), Some(50.0))));
        assert!(!evaluator.evaluate(&summary(Some(22.0), Some(50.0))));
        assert!(evaluator.evaluate(&summary(Some(18.4), Some(50.0))));
    }

    #[test]
    fn test_window_bounds_inclusive() {
        let evaluator = AlarmEvaluator::new(&SensorConfig::default());
        assert!(!evaluator.evaluate(&summary(Some(18.5), Some(42.0))));
        assert!(!evaluator.evaluate(&summary(Some(26.5), Some(63.0))));
    }

    #[test]
    fn test_humidity_window() {
        let evaluator = AlarmEvaluator::new(&SensorConfig::default());
        assert!(evaluator.evaluate(&summary(Some(22.0), Some(41.9))));
        assert!(evaluator.evaluate(&summary(None, Some(70.0))));
    }

    #[test]
    fn test_absent_data_not_alarmed() {
        let evaluator = AlarmEvaluator::new(&SensorConfig::default());
        assert!(!evaluator.evaluate(&OverallSummary::default()));
    }

    #[test]
    fn test_apply_drives_indicator() {
        let evaluator = AlarmEvaluator::new(&SensorConfig::default());
        let led = MockIndicator::default();

        assert!(evaluator.apply(&summary(Some(30.0), None), &led));
        assert_eq!(led.last(), Some(LedMode::Blinking(ALARM_BLINK_MS)));

        assert!(!evaluator.apply(&summary(Some(21.0), None), &led));
        assert_eq!(led.last(), Some(LedMode::On));
    }
}
