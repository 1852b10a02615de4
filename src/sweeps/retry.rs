//! Retry Sweep — escalation for unclaimed alerts
//!
//! Every tick walks the alerts still in `searching`. An alert under the
//! retry budget gets a radius-free rebroadcast to *all* available
//! volunteers (the alert is escalating); one at the budget is cancelled
//! and surfaced to admins as `alert_no_volunteer`. State lives entirely
//! in the persisted `retry_count`, so a missed tick only delays the
//! escalation.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::defaults::MAX_RETRY_COUNT;
use crate::error::EngineError;
use crate::lifecycle::LifecycleManager;
use crate::matcher::Matcher;
use crate::providers::TreeRepository;
use crate::push::{events, AlertNoVolunteerPayload, NewAlertPayload, PushBus};
use crate::store::{AlertStore, CasOutcome};
use crate::types::{Alert, AlertStatus, TreeProjection};

use super::spawn_periodic;

/// Outcome summary of one retry sweep tick.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySweepReport {
    pub alerts_scanned: usize,
    pub rebroadcasts: usize,
    pub cancelled: usize,
}

pub struct RetrySweep {
    alerts: AlertStore,
    matcher: Matcher,
    lifecycle: Arc<LifecycleManager>,
    trees: Arc<dyn TreeRepository>,
    push: Arc<dyn PushBus>,
    interval: Duration,
    max_retries: u32,
}

impl RetrySweep {
    pub fn new(
        alerts: AlertStore,
        matcher: Matcher,
        lifecycle: Arc<LifecycleManager>,
        trees: Arc<dyn TreeRepository>,
        push: Arc<dyn PushBus>,
        interval: Duration,
    ) -> Self {
        Self {
            alerts,
            matcher,
            lifecycle,
            trees,
            push,
            interval,
            max_retries: MAX_RETRY_COUNT,
        }
    }

    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let sweep = self;
        spawn_periodic("retry", sweep.interval, cancel, move || {
            let sweep = Arc::clone(&sweep);
            async move {
                match sweep.tick().await {
                    Ok(report) => {
                        if report.alerts_scanned > 0 {
                            info!(
                                scanned = report.alerts_scanned,
                                rebroadcasts = report.rebroadcasts,
                                cancelled = report.cancelled,
                                "retry sweep complete"
                            );
                        }
                    }
                    Err(e) => warn!(error = %e, "retry sweep aborted"),
                }
            }
        })
    }

    /// One pass over the searching alerts.
    pub async fn tick(&self) -> Result<RetrySweepReport, EngineError> {
        let searching = self.alerts.list_by_status(AlertStatus::Searching)?;
        let mut report = RetrySweepReport::default();

        for alert in searching {
            report.alerts_scanned += 1;
            if alert.retry_count >= self.max_retries {
                if self.escalate(&alert).await {
                    report.cancelled += 1;
                }
            } else if self.rebroadcast(&alert).await {
                report.rebroadcasts += 1;
            }
        }

        Ok(report)
    }

    /// Budget exhausted: cancel and tell the admins.
    async fn escalate(&self, alert: &Alert) -> bool {
        let cancelled = match self.lifecycle.exhaust(&alert.id) {
            Ok(cancelled) => cancelled,
            // Lost a race with accept or admin cancel — nothing to do.
            Err(e) => {
                debug!(alert_id = %alert.id, error = %e, "exhaustion skipped");
                return false;
            }
        };

        info!(
            alert_id = %cancelled.id,
            tree_id = %cancelled.tree_id,
            retries = cancelled.retry_count,
            "alert cancelled after retry budget exhausted"
        );

        let tree = match self.trees.get(&cancelled.tree_id).await {
            Ok(Some(tree)) => Some(TreeProjection::from(&tree)),
            _ => None,
        };
        let payload = AlertNoVolunteerPayload {
            alert_id: cancelled.id.clone(),
            tree,
            message: format!(
                "No volunteer accepted the '{}' alert after {} broadcasts",
                cancelled.alert_type, cancelled.retry_count
            ),
        };
        if let Ok(value) = serde_json::to_value(&payload) {
            self.push.to_admins(events::ALERT_NO_VOLUNTEER, value);
        }
        true
    }

    /// Under budget: union every available volunteer into the notified
    /// set, bump the count, and rebroadcast radius-free.
    async fn rebroadcast(&self, alert: &Alert) -> bool {
        let available = match self.matcher.find_all_available() {
            Ok(available) => available,
            Err(e) => {
                warn!(alert_id = %alert.id, error = %e, "volunteer listing failed, retry deferred");
                return false;
            }
        };

        // The increment is conditional on the alert still searching, so
        // an accept racing this tick wins cleanly.
        let updated = match self.alerts.update_if(
            &alert.id,
            |a| a.status == AlertStatus::Searching,
            |a| {
                for id in &available {
                    a.notified_volunteers.insert(id.clone());
                }
                a.retry_count += 1;
            },
        ) {
            Ok(CasOutcome::Applied(updated)) => updated,
            Ok(_) => return false,
            Err(e) => {
                warn!(alert_id = %alert.id, error = %e, "retry persistence failed");
                return false;
            }
        };

        if available.is_empty() {
            debug!(
                alert_id = %updated.id,
                retry_count = updated.retry_count,
                "no volunteers available, retry counted without broadcast"
            );
            return true;
        }

        let tree = match self.trees.get(&updated.tree_id).await {
            Ok(Some(tree)) => TreeProjection::from(&tree),
            // The tree vanished mid-flight; fall back to the snapshot
            // the alert carries.
            _ => TreeProjection {
                id: updated.tree_id.clone(),
                name: String::new(),
                species: String::new(),
                location: updated.location,
            },
        };

        let payload = NewAlertPayload {
            alert_id: updated.id.clone(),
            alert_type: updated.alert_type,
            alert_source: updated.alert_source,
            weather_snapshot: updated.weather_snapshot.clone(),
            threshold_breached: updated.threshold_breached.clone(),
            tree,
            created_at: updated.created_at,
            retry_broadcast: Some(true),
            message: Some(
                "Still searching for a volunteer — now broadcasting beyond the local area"
                    .to_string(),
            ),
        };
        if let Ok(value) = serde_json::to_value(&payload) {
            self.push.to_volunteers(&available, events::NEW_ALERT, value);
        }

        info!(
            alert_id = %updated.id,
            retry_count = updated.retry_count,
            broadcast_to = available.len(),
            "retry broadcast sent"
        );
        true
    }
}
