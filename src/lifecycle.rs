//! Lifecycle Manager — alert state machine and volunteer availability
//!
//! Owns every transition on `Alert.status` and is the only writer of
//! `Volunteer.availability`. Each transition is a conditional update in
//! the store; for N concurrent accepts exactly one commits the
//! searching → accepted edge and the rest observe `AlreadyTaken`.
//!
//! Availability is bound to alert transitions. If the volunteer flip
//! fails after a successful accept, the alert is compensated back to
//! `searching` so no half-assigned state survives. A failed release on
//! resolve/cancel cannot be compensated (terminal rows are immutable)
//! and is logged as an operational incident instead.

use std::cell::RefCell;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::EngineError;
use crate::push::{
    events, AlertAcceptedPayload, AlertCancelledPayload, AlertProgressPayload,
    AlertResolvedPayload, PushBus,
};
use crate::store::{AlertStore, AvailabilityOutcome, CasOutcome, VolunteerStore};
use crate::types::{Alert, AlertStatus, Availability};

pub struct LifecycleManager {
    alerts: AlertStore,
    volunteers: VolunteerStore,
    push: Arc<dyn PushBus>,
}

impl LifecycleManager {
    pub fn new(
        alerts: AlertStore,
        volunteers: VolunteerStore,
        push: Arc<dyn PushBus>,
    ) -> Self {
        Self {
            alerts,
            volunteers,
            push,
        }
    }

    // ------------------------------------------------------------------
    // accept: searching → accepted
    // ------------------------------------------------------------------

    /// Claim an alert for a volunteer. Race-free: the store's conditional
    /// update is the serialisation point.
    pub async fn accept(
        &self,
        alert_id: &str,
        volunteer_id: &str,
    ) -> Result<Alert, EngineError> {
        let volunteer = self
            .volunteers
            .get(volunteer_id)?
            .ok_or_else(|| EngineError::not_found("volunteer", volunteer_id))?;
        if !volunteer.active {
            return Err(EngineError::Forbidden(
                "This volunteer account is deactivated".into(),
            ));
        }
        if volunteer.availability == Availability::Busy {
            return Err(EngineError::VolunteerBusy);
        }
        // The availability flag and the assignment index must agree;
        // any in-flight assignment blocks a second accept.
        if self.alerts.active_by_assignee(volunteer_id)?.is_some() {
            return Err(EngineError::VolunteerBusy);
        }

        let accepted = match self.alerts.update_if(
            alert_id,
            |a| a.status == AlertStatus::Searching,
            |a| {
                a.status = AlertStatus::Accepted;
                a.assigned_volunteer = Some(volunteer_id.to_string());
            },
        )? {
            CasOutcome::Applied(alert) => alert,
            CasOutcome::Rejected(_) => return Err(EngineError::AlreadyTaken),
            CasOutcome::Missing => {
                return Err(EngineError::not_found("alert", alert_id))
            }
        };

        // Bind the volunteer. The compare-and-set loses against a
        // concurrent accept of a *different* alert by the same volunteer,
        // in which case this accept is rolled back.
        match self.volunteers.set_availability(
            volunteer_id,
            Some(Availability::Available),
            Availability::Busy,
        ) {
            Ok(AvailabilityOutcome::Applied(_)) => {}
            Ok(AvailabilityOutcome::Rejected(_)) => {
                self.revert_accept(alert_id, volunteer_id);
                return Err(EngineError::VolunteerBusy);
            }
            Ok(AvailabilityOutcome::Missing) => {
                self.revert_accept(alert_id, volunteer_id);
                return Err(EngineError::not_found("volunteer", volunteer_id));
            }
            Err(e) => {
                self.revert_accept(alert_id, volunteer_id);
                return Err(e);
            }
        }

        info!(alert_id, volunteer_id, "alert accepted");

        // Dismiss the other notified volunteers.
        let dismissal = AlertAcceptedPayload {
            alert_id: accepted.id.clone(),
            message: Some("Alert already accepted by another volunteer".into()),
            volunteer_id: None,
            volunteer_name: None,
        };
        if let Ok(value) = serde_json::to_value(&dismissal) {
            let others: Vec<String> = accepted
                .notified_volunteers
                .iter()
                .filter(|id| id.as_str() != volunteer_id)
                .cloned()
                .collect();
            self.push
                .to_volunteers(&others, events::ALERT_ACCEPTED, value);
        }

        // Audit trail for admins names the winner.
        let audit = AlertAcceptedPayload {
            alert_id: accepted.id.clone(),
            message: None,
            volunteer_id: Some(volunteer_id.to_string()),
            volunteer_name: Some(volunteer.name.clone()),
        };
        if let Ok(value) = serde_json::to_value(&audit) {
            self.push.to_admins(events::ALERT_ACCEPTED, value);
        }

        Ok(accepted)
    }

    /// Compensation for a failed volunteer flip after accept.
    fn revert_accept(&self, alert_id: &str, volunteer_id: &str) {
        let reverted = self.alerts.update_if(
            alert_id,
            |a| {
                a.status == AlertStatus::Accepted
                    && a.assigned_volunteer.as_deref() == Some(volunteer_id)
            },
            |a| {
                a.status = AlertStatus::Searching;
                a.assigned_volunteer = None;
            },
        );
        match reverted {
            Ok(CasOutcome::Applied(_)) => {
                warn!(alert_id, volunteer_id, "accept compensated back to searching");
            }
            other => {
                error!(
                    alert_id,
                    volunteer_id,
                    ?other,
                    "accept compensation failed — alert may need admin attention"
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // start: accepted → in_progress
    // ------------------------------------------------------------------

    pub async fn start(
        &self,
        alert_id: &str,
        volunteer_id: &str,
    ) -> Result<Alert, EngineError> {
        match self.alerts.update_if(
            alert_id,
            |a| {
                a.status == AlertStatus::Accepted
                    && a.assigned_volunteer.as_deref() == Some(volunteer_id)
            },
            |a| a.status = AlertStatus::InProgress,
        )? {
            CasOutcome::Applied(alert) => {
                info!(alert_id, volunteer_id, "work started");
                let payload = AlertProgressPayload {
                    alert_id: alert.id.clone(),
                    volunteer_id: volunteer_id.to_string(),
                };
                if let Ok(value) = serde_json::to_value(&payload) {
                    self.push.to_admins(events::ALERT_PROGRESS, value);
                }
                Ok(alert)
            }
            CasOutcome::Rejected(current) => {
                Err(Self::precondition_error("start work", &current, volunteer_id))
            }
            CasOutcome::Missing => Err(EngineError::not_found("alert", alert_id)),
        }
    }

    // ------------------------------------------------------------------
    // resolve: in_progress → resolved
    // ------------------------------------------------------------------

    pub async fn resolve(
        &self,
        alert_id: &str,
        volunteer_id: &str,
    ) -> Result<Alert, EngineError> {
        let resolved = match self.alerts.update_if(
            alert_id,
            |a| {
                a.status == AlertStatus::InProgress
                    && a.assigned_volunteer.as_deref() == Some(volunteer_id)
            },
            |a| a.status = AlertStatus::Resolved,
        )? {
            CasOutcome::Applied(alert) => alert,
            CasOutcome::Rejected(current) => {
                return Err(Self::precondition_error("resolve", &current, volunteer_id))
            }
            CasOutcome::Missing => {
                return Err(EngineError::not_found("alert", alert_id))
            }
        };

        self.release_dedupe_slots(&resolved);
        self.release_volunteer(volunteer_id, &resolved.id);

        info!(alert_id, volunteer_id, "alert resolved");

        let payload = AlertResolvedPayload {
            alert_id: resolved.id.clone(),
            tree_id: resolved.tree_id.clone(),
        };
        if let Ok(value) = serde_json::to_value(&payload) {
            // Global: the tree-care module listens to mark the tree healthy.
            self.push.to_global(events::ALERT_RESOLVED, value.clone());
            self.push.to_admins(events::ALERT_RESOLVED, value);
        }

        Ok(resolved)
    }

    // ------------------------------------------------------------------
    // admin_cancel: any non-terminal → cancelled
    // ------------------------------------------------------------------

    pub async fn admin_cancel(&self, alert_id: &str) -> Result<Alert, EngineError> {
        let prior_assignee: RefCell<Option<String>> = RefCell::new(None);
        let cancelled = match self.alerts.update_if(
            alert_id,
            |a| !a.status.is_terminal(),
            |a| {
                *prior_assignee.borrow_mut() = a.assigned_volunteer.take();
                a.status = AlertStatus::Cancelled;
            },
        )? {
            CasOutcome::Applied(alert) => alert,
            CasOutcome::Rejected(current) => {
                return Err(EngineError::InvalidTransition {
                    action: "cancel",
                    status: current.status,
                })
            }
            CasOutcome::Missing => {
                return Err(EngineError::not_found("alert", alert_id))
            }
        };

        self.release_dedupe_slots(&cancelled);
        if let Some(assignee) = prior_assignee.into_inner() {
            self.release_volunteer(&assignee, &cancelled.id);
        }

        info!(alert_id, "alert cancelled by admin");

        let payload = AlertCancelledPayload {
            alert_id: cancelled.id.clone(),
        };
        if let Ok(value) = serde_json::to_value(&payload) {
            self.push.to_admins(events::ALERT_CANCELLED, value);
        }

        Ok(cancelled)
    }

    // ------------------------------------------------------------------
    // retry exhaustion: searching → cancelled
    // ------------------------------------------------------------------

    /// Cancel an alert whose retry budget ran out. Only valid from
    /// `searching`; the caller (retry sweep) emits the escalation notice.
    pub fn exhaust(&self, alert_id: &str) -> Result<Alert, EngineError> {
        let cancelled = match self.alerts.update_if(
            alert_id,
            |a| a.status == AlertStatus::Searching,
            |a| a.status = AlertStatus::Cancelled,
        )? {
            CasOutcome::Applied(alert) => alert,
            CasOutcome::Rejected(current) => {
                return Err(EngineError::InvalidTransition {
                    action: "cancel",
                    status: current.status,
                })
            }
            CasOutcome::Missing => {
                return Err(EngineError::not_found("alert", alert_id))
            }
        };
        self.release_dedupe_slots(&cancelled);
        Ok(cancelled)
    }

    // ------------------------------------------------------------------
    // shared plumbing
    // ------------------------------------------------------------------

    fn release_dedupe_slots(&self, alert: &Alert) {
        if let Err(e) =
            self.alerts
                .release_active_slot(&alert.tree_id, alert.alert_type, &alert.id)
        {
            warn!(alert_id = %alert.id, error = %e, "active dedupe slot release failed");
        }
        if let Some(event_id) = alert.calendar_event_id.as_deref() {
            if let Err(e) = self.alerts.release_calendar_slot(event_id, &alert.id) {
                warn!(alert_id = %alert.id, error = %e, "calendar dedupe slot release failed");
            }
        }
    }

    /// Return a volunteer to the pool after a terminal transition. The
    /// alert row is already immutable, so a failure here is logged as an
    /// operational incident rather than compensated.
    fn release_volunteer(&self, volunteer_id: &str, alert_id: &str) {
        match self
            .volunteers
            .set_availability(volunteer_id, None, Availability::Available)
        {
            Ok(AvailabilityOutcome::Applied(_)) => {}
            Ok(AvailabilityOutcome::Rejected(_)) | Ok(AvailabilityOutcome::Missing) => {
                error!(
                    volunteer_id,
                    alert_id, "volunteer release skipped — record missing or inconsistent"
                );
            }
            Err(e) => {
                error!(
                    volunteer_id,
                    alert_id,
                    error = %e,
                    "volunteer release failed — availability requires admin attention"
                );
            }
        }
    }

    fn precondition_error(
        action: &'static str,
        current: &Alert,
        volunteer_id: &str,
    ) -> EngineError {
        let is_assignee = current.assigned_volunteer.as_deref() == Some(volunteer_id);
        if !is_assignee && current.assigned_volunteer.is_some() {
            EngineError::Forbidden("You are not assigned to this alert".into())
        } else {
            EngineError::InvalidTransition {
                action,
                status: current.status,
            }
        }
    }
}
