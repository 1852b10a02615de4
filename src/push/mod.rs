//! Push Bus — room-addressed real-time event fabric
//!
//! Alerts reach volunteers over a push channel addressed by room:
//! every volunteer has a private room, admins share one, and a global
//! room carries platform-wide notices. Delivery is best-effort and
//! at-most-once per connected subscriber; the store remains the system
//! of record and offline subscribers get no replay.
//!
//! The bus is an injected capability: the dispatch engine, lifecycle
//! manager, and sweeps all receive it as a constructor parameter.

mod hub;

pub use hub::{rooms_for, serve_socket, BroadcastHub, PushFrame};

use std::sync::Mutex;

use serde::Serialize;

use crate::types::TreeProjection;

/// Event names — part of the external contract.
pub mod events {
    pub const NEW_ALERT: &str = "new_alert";
    pub const ALERT_ACCEPTED: &str = "alert_accepted";
    pub const ALERT_PROGRESS: &str = "alert_progress";
    pub const ALERT_RESOLVED: &str = "alert_resolved";
    pub const ALERT_CANCELLED: &str = "alert_cancelled";
    pub const ALERT_NO_VOLUNTEER: &str = "alert_no_volunteer";
}

/// Room names — the addressing scheme subjects join at connect time.
pub mod rooms {
    pub const ADMINS: &str = "admins";
    pub const GLOBAL: &str = "global";

    pub fn volunteer(id: &str) -> String {
        format!("volunteer:{id}")
    }
}

/// Room-addressed event emission. Fire-and-forget: implementations must
/// never block or fail the caller.
pub trait PushBus: Send + Sync {
    fn emit(&self, room: &str, event: &str, payload: serde_json::Value);

    fn to_volunteer(&self, volunteer_id: &str, event: &str, payload: serde_json::Value) {
        self.emit(&rooms::volunteer(volunteer_id), event, payload);
    }

    fn to_volunteers(&self, volunteer_ids: &[String], event: &str, payload: serde_json::Value) {
        for id in volunteer_ids {
            self.to_volunteer(id, event, payload.clone());
        }
    }

    fn to_admins(&self, event: &str, payload: serde_json::Value) {
        self.emit(rooms::ADMINS, event, payload);
    }

    fn to_global(&self, event: &str, payload: serde_json::Value) {
        self.emit(rooms::GLOBAL, event, payload);
    }
}

// ============================================================================
// Payload projections (§ external contract)
// ============================================================================

/// `new_alert` payload sent to each matched volunteer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAlertPayload {
    pub alert_id: String,
    pub alert_type: crate::types::AlertType,
    pub alert_source: crate::types::AlertSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather_snapshot: Option<crate::types::WeatherSnapshot>,
    pub threshold_breached: crate::types::ThresholdBreached,
    pub tree: TreeProjection,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_broadcast: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `alert_accepted` dismissal/audit payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertAcceptedPayload {
    pub alert_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volunteer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volunteer_name: Option<String>,
}

/// `alert_progress` admin notice.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertProgressPayload {
    pub alert_id: String,
    pub volunteer_id: String,
}

/// `alert_resolved` global notice (tree-care listens to mark trees healthy).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertResolvedPayload {
    pub alert_id: String,
    pub tree_id: String,
}

/// `alert_cancelled` admin notice.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertCancelledPayload {
    pub alert_id: String,
}

/// `alert_no_volunteer` escalation notice.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertNoVolunteerPayload {
    pub alert_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tree: Option<TreeProjection>,
    pub message: String,
}

// ============================================================================
// Recording bus for tests
// ============================================================================

/// One recorded emission.
#[derive(Debug, Clone)]
pub struct RecordedEmit {
    pub room: String,
    pub event: String,
    pub payload: serde_json::Value,
}

/// Bus that records every emission instead of delivering it. Used by the
/// dispatch and lifecycle test suites to assert on broadcast behaviour.
#[derive(Default)]
pub struct RecordingPushBus {
    emits: Mutex<Vec<RecordedEmit>>,
}

impl RecordingPushBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<RecordedEmit> {
        self.emits.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Emissions addressed to one room.
    pub fn for_room(&self, room: &str) -> Vec<RecordedEmit> {
        self.all().into_iter().filter(|e| e.room == room).collect()
    }

    /// Emissions of one event name, any room.
    pub fn of_event(&self, event: &str) -> Vec<RecordedEmit> {
        self.all().into_iter().filter(|e| e.event == event).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut emits) = self.emits.lock() {
            emits.clear();
        }
    }
}

impl PushBus for RecordingPushBus {
    fn emit(&self, room: &str, event: &str, payload: serde_json::Value) {
        if let Ok(mut emits) = self.emits.lock() {
            emits.push(RecordedEmit {
                room: room.to_string(),
                event: event.to_string(),
                payload,
            });
        }
    }
}
