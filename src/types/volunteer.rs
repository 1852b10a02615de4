//! Volunteer model
//!
//! Volunteer records are created by the platform's registration surface;
//! the engine only flips `availability` through the lifecycle manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;

/// Availability state. `Busy` entails exactly one in-flight assigned alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    Busy,
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Availability::Available => f.write_str("available"),
            Availability::Busy => f.write_str("busy"),
        }
    }
}

/// A dispatchable responder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volunteer {
    pub id: String,
    pub name: String,
    pub email: String,
    /// Opaque credential hash, managed by the identity surface. Never
    /// exposed over the API — no endpoint serializes volunteer records.
    pub credential_hash: String,
    pub availability: Availability,
    pub active: bool,
    pub location: GeoPoint,
    /// Optional self-selected match radius cap (km).
    #[serde(default)]
    pub preferred_radius_km: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Volunteer {
    /// Eligible for matching: active record, currently available.
    pub fn is_dispatchable(&self) -> bool {
        self.active && self.availability == Availability::Available
    }
}
