//! Closed error taxonomy for the dispatch engine
//!
//! Every error carries a stable code and a caller-facing message; the API
//! layer maps each kind to exactly one HTTP status. Provider failures are
//! swallowed inside sweeps (per-tree isolation) and only surface to
//! callers on admin-triggered synchronous checks.

use crate::types::{AlertStatus, AlertType};

/// Engine-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Missing field, invalid coordinate range, bad request shape.
    #[error("{0}")]
    Validation(String),

    /// Missing or invalid bearer credential.
    #[error("{0}")]
    Unauthenticated(String),

    /// Valid credential, wrong role.
    #[error("{0}")]
    Forbidden(String),

    /// Unknown alert, volunteer, or tree id.
    #[error("{0}")]
    NotFound(String),

    /// A non-terminal alert already exists for this (tree, type).
    #[error("an active '{alert_type}' alert already exists for tree {tree_id}")]
    AlreadyActive {
        tree_id: String,
        alert_type: AlertType,
    },

    /// Lost the accept race.
    #[error("Alert already accepted by another volunteer")]
    AlreadyTaken,

    /// Volunteer email uniqueness violation.
    #[error("a volunteer with email '{0}' is already registered")]
    DuplicateEmail(String),

    /// Caller has an in-flight assigned alert.
    #[error("Volunteer already has an alert in progress")]
    VolunteerBusy,

    /// State machine precondition failed; names the current state.
    #[error("Cannot {action} — alert status is '{status}'")]
    InvalidTransition {
        action: &'static str,
        status: AlertStatus,
    },

    /// Weather or calendar provider failure.
    #[error("provider error: {0}")]
    Provider(String),

    /// Storage or serialization failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    /// Stable machine-readable code for the response envelope.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "VALIDATION",
            EngineError::Unauthenticated(_) => "UNAUTHENTICATED",
            EngineError::Forbidden(_) => "FORBIDDEN",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::AlreadyActive { .. } => "ALREADY_ACTIVE",
            EngineError::AlreadyTaken => "ALREADY_TAKEN",
            EngineError::DuplicateEmail(_) => "DUPLICATE_EMAIL",
            EngineError::VolunteerBusy => "VOLUNTEER_BUSY",
            EngineError::InvalidTransition { .. } => "INVALID_TRANSITION",
            EngineError::Provider(_) => "PROVIDER_ERROR",
            EngineError::Storage(_) => "INTERNAL_ERROR",
        }
    }

    pub fn not_found(kind: &str, id: &str) -> Self {
        EngineError::NotFound(format!("{kind} '{id}' not found"))
    }
}

impl From<sled::Error> for EngineError {
    fn from(err: sled::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::Provider(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_error_names_current_state() {
        let err = EngineError::InvalidTransition {
            action: "start work",
            status: AlertStatus::Resolved,
        };
        assert_eq!(
            err.to_string(),
            "Cannot start work — alert status is 'resolved'"
        );
    }

    #[test]
    fn test_accept_race_message() {
        assert_eq!(
            EngineError::AlreadyTaken.to_string(),
            "Alert already accepted by another volunteer"
        );
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(EngineError::AlreadyTaken.code(), "ALREADY_TAKEN");
        assert_eq!(EngineError::VolunteerBusy.code(), "VOLUNTEER_BUSY");
        assert_eq!(
            EngineError::Storage("x".into()).code(),
            "INTERNAL_ERROR"
        );
    }
}
