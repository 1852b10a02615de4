//! Weather and calendar trigger context

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A weather observation for a tree's coordinates.
///
/// Fields are optional because providers omit measurements they lack
/// (e.g. no `rain` block when dry). The evaluator skips rules whose
/// input is missing rather than fabricating a breach. Units are already
/// normalised by the provider adapter: °C, km/h, %, mm over the
/// preceding hour.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherSnapshot {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub wind_speed: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub rainfall: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A scheduled care event from the calendar provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: String,
    pub summary: String,
    #[serde(default)]
    pub description: String,
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

impl CalendarEvent {
    /// Combined searchable text, lowercased once.
    pub fn searchable_text(&self) -> String {
        format!("{} {}", self.summary, self.description).to_lowercase()
    }
}
