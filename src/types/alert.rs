//! Alert model and its state machine vocabulary

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;

use super::WeatherSnapshot;

/// What condition raised the alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    HighTemperature,
    HighWind,
    Drought,
    Storm,
    CalendarEvent,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::HighTemperature => "high_temperature",
            AlertType::HighWind => "high_wind",
            AlertType::Drought => "drought",
            AlertType::Storm => "storm",
            AlertType::CalendarEvent => "calendar_event",
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which subsystem created the alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSource {
    Weather,
    Calendar,
}

/// Alert lifecycle status.
///
/// ```text
/// searching --accept--> accepted --start--> in_progress --resolve--> resolved
///     |                     |
///     |                     +--admin_cancel--> cancelled
///     +--admin_cancel-----------------------> cancelled
///     +--retry_exhausted---------------------> cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Searching,
    Accepted,
    InProgress,
    Resolved,
    Cancelled,
}

impl AlertStatus {
    /// Terminal statuses are immutable (append-only history).
    pub fn is_terminal(&self) -> bool {
        matches!(self, AlertStatus::Resolved | AlertStatus::Cancelled)
    }

    /// A status that blocks a second alert for the same (tree, type).
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Statuses that require an assigned volunteer.
    pub fn requires_assignee(&self) -> bool {
        matches!(
            self,
            AlertStatus::Accepted | AlertStatus::InProgress | AlertStatus::Resolved
        )
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertStatus::Searching => "searching",
            AlertStatus::Accepted => "accepted",
            AlertStatus::InProgress => "in_progress",
            AlertStatus::Resolved => "resolved",
            AlertStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// The rule breach that triggered the alert.
///
/// `value` and `threshold` are JSON values because calendar alerts carry
/// text (event summary / matched keywords) where weather alerts carry
/// numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdBreached {
    pub field: String,
    pub value: serde_json::Value,
    pub threshold: serde_json::Value,
}

impl ThresholdBreached {
    pub fn numeric(field: &str, value: f64, threshold: f64) -> Self {
        Self {
            field: field.to_string(),
            value: serde_json::json!(value),
            threshold: serde_json::json!(threshold),
        }
    }
}

/// A unit of work raised by the engine and offered to volunteers.
///
/// References to trees and volunteers are ids only; joins happen at the
/// service layer by explicit lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub tree_id: String,
    pub alert_type: AlertType,
    pub alert_source: AlertSource,
    pub status: AlertStatus,
    #[serde(default)]
    pub assigned_volunteer: Option<String>,
    /// Immutable capture of weather conditions at creation (weather source).
    #[serde(default)]
    pub weather_snapshot: Option<WeatherSnapshot>,
    /// Originating calendar event (calendar source).
    #[serde(default)]
    pub calendar_event_id: Option<String>,
    pub threshold_breached: ThresholdBreached,
    /// Location snapshotted from the tree at creation.
    pub location: GeoPoint,
    /// Volunteer ids that received the `new_alert` broadcast.
    /// A set, append-only over the alert's lifetime.
    #[serde(default)]
    pub notified_volunteers: BTreeSet<String>,
    #[serde(default)]
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Alert {
    /// Key used by the active-alert dedupe index.
    pub fn active_key(tree_id: &str, alert_type: AlertType) -> String {
        format!("{}:{}", tree_id, alert_type.as_str())
    }
}
