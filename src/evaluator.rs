//! Threshold Evaluator — pure rule checks over a weather snapshot
//!
//! Turns one snapshot plus the configured thresholds into the set of
//! triggered rules. No I/O, no clock, no side effects; unit conversion
//! (e.g. m/s → km/h) is the provider adapter's job, never done here.
//!
//! Rules are independent: a single snapshot may trigger several. A
//! missing input field skips the corresponding rule — absence of data is
//! never treated as a breach.

use crate::config::ThresholdConfig;
use crate::types::{AlertType, ThresholdBreached, WeatherSnapshot};

/// One rule breach: the alert type to raise and the evidence for it.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggeredRule {
    pub alert_type: AlertType,
    pub breached: ThresholdBreached,
}

/// Evaluate every rule against the snapshot.
///
/// Comparisons are strict: `temperature == temp_high` does not trigger,
/// `rainfall == rain_low` does not trigger drought.
pub fn evaluate(snapshot: &WeatherSnapshot, config: &ThresholdConfig) -> Vec<TriggeredRule> {
    let mut triggered = Vec::new();

    if let Some(temperature) = snapshot.temperature {
        if temperature > config.temp_high {
            triggered.push(TriggeredRule {
                alert_type: AlertType::HighTemperature,
                breached: ThresholdBreached::numeric("temperature", temperature, config.temp_high),
            });
        }
    }

    if let Some(wind_speed) = snapshot.wind_speed {
        if wind_speed > config.wind_high {
            triggered.push(TriggeredRule {
                alert_type: AlertType::HighWind,
                breached: ThresholdBreached::numeric("windSpeed", wind_speed, config.wind_high),
            });
        }
    }

    if let Some(rainfall) = snapshot.rainfall {
        if rainfall < config.rain_low {
            triggered.push(TriggeredRule {
                alert_type: AlertType::Drought,
                breached: ThresholdBreached::numeric("rainfall", rainfall, config.rain_low),
            });
        }
    }

    if let Some(description) = snapshot.description.as_deref() {
        let lowered = description.to_lowercase();
        let matched: Vec<&str> = config
            .storm_keywords
            .iter()
            .map(String::as_str)
            .filter(|keyword| lowered.contains(&keyword.to_lowercase()))
            .collect();
        if !matched.is_empty() {
            triggered.push(TriggeredRule {
                alert_type: AlertType::Storm,
                breached: ThresholdBreached {
                    field: "description".to_string(),
                    value: serde_json::json!(description),
                    threshold: serde_json::json!(matched),
                },
            });
        }
    }

    triggered
}
