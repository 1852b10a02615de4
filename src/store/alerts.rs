//! Alert persistence with conditional-update transitions
//!
//! Alerts are never hard-deleted; terminal rows stay as append-only
//! history. Two index trees keep the dedupe invariants cheap to check:
//! the active index (one non-terminal alert per tree+type) and the
//! calendar index (one non-terminal alert per calendar event).

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::warn;

use crate::error::EngineError;
use crate::types::{Alert, AlertSource, AlertStatus, AlertType};

/// Result of a conditional update.
#[derive(Debug)]
pub enum CasOutcome {
    /// Predicate held; the mutated row was committed.
    Applied(Alert),
    /// Predicate failed; the row is returned unchanged for diagnosis.
    Rejected(Alert),
    /// No row under that id.
    Missing,
}

/// Result of claiming a dedupe slot.
#[derive(Debug, PartialEq, Eq)]
pub enum SlotClaim {
    Claimed,
    /// Another non-terminal alert holds the slot.
    Occupied(String),
}

/// Filters for the admin listing surface.
#[derive(Debug, Default, Clone)]
pub struct AlertFilter {
    pub status: Option<AlertStatus>,
    pub source: Option<AlertSource>,
    pub tree_id: Option<String>,
}

/// Sled-backed alert collection.
#[derive(Clone)]
pub struct AlertStore {
    alerts: sled::Tree,
    active_idx: sled::Tree,
    calendar_idx: sled::Tree,
}

impl AlertStore {
    pub fn open(db: &sled::Db) -> Result<Self, EngineError> {
        Ok(Self {
            alerts: db.open_tree("alerts")?,
            active_idx: db.open_tree("alerts_active_idx")?,
            calendar_idx: db.open_tree("alerts_calendar_idx")?,
        })
    }

    /// Persist a freshly created alert row.
    ///
    /// The caller must have claimed the dedupe slot(s) first; this is a
    /// plain insert.
    pub fn insert(&self, alert: &Alert) -> Result<(), EngineError> {
        let value = serde_json::to_vec(alert)?;
        self.alerts.insert(alert.id.as_bytes(), value)?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<Alert>, EngineError> {
        match self.alerts.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Conditionally update one alert row.
    ///
    /// The closure pair runs inside sled's CAS retry loop, so the final
    /// observation always corresponds to the committed row. `updated_at`
    /// is bumped on every applied mutation.
    pub fn update_if<P, M>(
        &self,
        id: &str,
        pred: P,
        mutate: M,
    ) -> Result<CasOutcome, EngineError>
    where
        P: Fn(&Alert) -> bool,
        M: Fn(&mut Alert),
    {
        let mut outcome = CasOutcome::Missing;
        let mut decode_failure: Option<String> = None;

        self.alerts.update_and_fetch(id.as_bytes(), |old| match old {
            None => {
                outcome = CasOutcome::Missing;
                None
            }
            Some(bytes) => match serde_json::from_slice::<Alert>(bytes) {
                Ok(mut alert) => {
                    if pred(&alert) {
                        mutate(&mut alert);
                        alert.updated_at = Utc::now();
                        match serde_json::to_vec(&alert) {
                            Ok(buf) => {
                                outcome = CasOutcome::Applied(alert);
                                Some(buf)
                            }
                            Err(e) => {
                                decode_failure = Some(e.to_string());
                                Some(bytes.to_vec())
                            }
                        }
                    } else {
                        outcome = CasOutcome::Rejected(alert);
                        Some(bytes.to_vec())
                    }
                }
                Err(e) => {
                    decode_failure = Some(e.to_string());
                    Some(bytes.to_vec())
                }
            },
        })?;

        if let Some(msg) = decode_failure {
            return Err(EngineError::Storage(format!("alert row {id}: {msg}")));
        }
        Ok(outcome)
    }

    /// Union volunteer ids into `notified_volunteers`. Membership only
    /// grows over an alert's lifetime. Returns the updated row.
    pub fn add_notified(
        &self,
        id: &str,
        volunteer_ids: &[String],
    ) -> Result<Option<Alert>, EngineError> {
        let outcome = self.update_if(
            id,
            |_| true,
            |alert| {
                for v in volunteer_ids {
                    alert.notified_volunteers.insert(v.clone());
                }
            },
        )?;
        match outcome {
            CasOutcome::Applied(alert) => Ok(Some(alert)),
            CasOutcome::Rejected(_) | CasOutcome::Missing => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Dedupe index: one non-terminal alert per (tree, type)
    // ------------------------------------------------------------------

    /// Atomically claim the `(tree_id, alert_type)` slot for `alert_id`.
    ///
    /// A slot held by a terminal or missing alert is stale (crash between
    /// transition and release) and is taken over.
    pub fn claim_active_slot(
        &self,
        tree_id: &str,
        alert_type: AlertType,
        alert_id: &str,
    ) -> Result<SlotClaim, EngineError> {
        let key = Alert::active_key(tree_id, alert_type);
        self.claim_slot(&self.active_idx, key.as_bytes(), alert_id)
    }

    /// Release the slot if this alert still holds it.
    pub fn release_active_slot(
        &self,
        tree_id: &str,
        alert_type: AlertType,
        alert_id: &str,
    ) -> Result<(), EngineError> {
        let key = Alert::active_key(tree_id, alert_type);
        self.release_slot(&self.active_idx, key.as_bytes(), alert_id)
    }

    // ------------------------------------------------------------------
    // Calendar index: one non-terminal alert per calendar event
    // ------------------------------------------------------------------

    pub fn claim_calendar_slot(
        &self,
        event_id: &str,
        alert_id: &str,
    ) -> Result<SlotClaim, EngineError> {
        self.claim_slot(&self.calendar_idx, event_id.as_bytes(), alert_id)
    }

    pub fn release_calendar_slot(
        &self,
        event_id: &str,
        alert_id: &str,
    ) -> Result<(), EngineError> {
        self.release_slot(&self.calendar_idx, event_id.as_bytes(), alert_id)
    }

    /// Whether a non-terminal alert already exists for this calendar event.
    pub fn has_active_calendar_alert(&self, event_id: &str) -> Result<bool, EngineError> {
        match self.calendar_idx.get(event_id.as_bytes())? {
            None => Ok(false),
            Some(holder) => {
                let holder_id = String::from_utf8_lossy(&holder).to_string();
                match self.get(&holder_id)? {
                    Some(alert) => Ok(alert.status.is_active()),
                    None => Ok(false),
                }
            }
        }
    }

    fn claim_slot(
        &self,
        idx: &sled::Tree,
        key: &[u8],
        alert_id: &str,
    ) -> Result<SlotClaim, EngineError> {
        loop {
            match idx.get(key)? {
                None => {
                    match idx.compare_and_swap(key, None::<&[u8]>, Some(alert_id.as_bytes()))? {
                        Ok(()) => return Ok(SlotClaim::Claimed),
                        // Someone else slotted in between read and swap.
                        Err(_) => continue,
                    }
                }
                Some(holder) => {
                    let holder_id = String::from_utf8_lossy(&holder).to_string();
                    let stale = match self.get(&holder_id)? {
                        Some(alert) => alert.status.is_terminal(),
                        None => true,
                    };
                    if !stale {
                        return Ok(SlotClaim::Occupied(holder_id));
                    }
                    match idx.compare_and_swap(
                        key,
                        Some(holder.as_ref()),
                        Some(alert_id.as_bytes()),
                    )? {
                        Ok(()) => return Ok(SlotClaim::Claimed),
                        Err(_) => continue,
                    }
                }
            }
        }
    }

    fn release_slot(
        &self,
        idx: &sled::Tree,
        key: &[u8],
        alert_id: &str,
    ) -> Result<(), EngineError> {
        let released = idx.compare_and_swap(
            key,
            Some(alert_id.as_bytes()),
            None::<&[u8]>,
        )?;
        if released.is_err() {
            // Slot was already re-claimed by a newer alert — leave it.
            warn!(alert_id, "dedupe slot already rotated, not released");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Listings
    // ------------------------------------------------------------------

    /// All alerts matching the filter, most recent first.
    pub fn list(&self, filter: &AlertFilter) -> Result<Vec<Alert>, EngineError> {
        let mut rows = Vec::new();
        for item in self.alerts.iter() {
            let (_, value) = item?;
            let alert: Alert = match serde_json::from_slice(&value) {
                Ok(a) => a,
                Err(e) => {
                    warn!(error = %e, "skipping undecodable alert row");
                    continue;
                }
            };
            if let Some(status) = filter.status {
                if alert.status != status {
                    continue;
                }
            }
            if let Some(source) = filter.source {
                if alert.alert_source != source {
                    continue;
                }
            }
            if let Some(ref tree_id) = filter.tree_id {
                if &alert.tree_id != tree_id {
                    continue;
                }
            }
            rows.push(alert);
        }
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    /// All alerts currently in the given status.
    pub fn list_by_status(&self, status: AlertStatus) -> Result<Vec<Alert>, EngineError> {
        self.list(&AlertFilter {
            status: Some(status),
            ..Default::default()
        })
    }

    /// The volunteer's in-flight assignment, if any. A volunteer holds
    /// at most one alert in accepted/in_progress.
    pub fn active_by_assignee(
        &self,
        volunteer_id: &str,
    ) -> Result<Option<Alert>, EngineError> {
        for item in self.alerts.iter() {
            let (_, value) = item?;
            if let Ok(alert) = serde_json::from_slice::<Alert>(&value) {
                if alert.assigned_volunteer.as_deref() == Some(volunteer_id)
                    && matches!(
                        alert.status,
                        AlertStatus::Accepted | AlertStatus::InProgress
                    )
                {
                    return Ok(Some(alert));
                }
            }
        }
        Ok(None)
    }

    /// Alert counts keyed by status string, for the admin aggregate.
    pub fn counts_by_status(&self) -> Result<BTreeMap<String, u64>, EngineError> {
        let mut counts = BTreeMap::new();
        for item in self.alerts.iter() {
            let (_, value) = item?;
            if let Ok(alert) = serde_json::from_slice::<Alert>(&value) {
                *counts.entry(alert.status.to_string()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    /// Alert counts keyed by source.
    pub fn counts_by_source(&self) -> Result<BTreeMap<String, u64>, EngineError> {
        let mut counts = BTreeMap::new();
        for item in self.alerts.iter() {
            let (_, value) = item?;
            if let Ok(alert) = serde_json::from_slice::<Alert>(&value) {
                let key = match alert.alert_source {
                    AlertSource::Weather => "weather",
                    AlertSource::Calendar => "calendar",
                };
                *counts.entry(key.to_string()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}
