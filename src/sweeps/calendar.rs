//! Calendar Sweep — alerts from upcoming care events
//!
//! Lists the next seven days of events once per tick with the engine's
//! system credential, then matches them against the active trees by
//! text: an event is tree-related when its title or description mentions
//! the tree's id, name, or species, and care-relevant when it also
//! contains a configured care keyword. Matching events reuse the exact
//! same dispatch machinery as weather alerts, with per-event idempotency
//! on the calendar event id.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::defaults::CALENDAR_LOOKAHEAD_DAYS;
use crate::dispatch::{CreateAlertRequest, DispatchEngine, DispatchOutcome};
use crate::error::EngineError;
use crate::providers::{CalendarProvider, TreeRepository};
use crate::store::AlertStore;
use crate::types::{AlertSource, AlertType, CalendarEvent, ThresholdBreached, Tree};

use super::spawn_periodic;

/// Outcome summary of one calendar sweep tick.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarSweepReport {
    pub events_scanned: usize,
    pub alerts_created: usize,
    pub duplicates_skipped: usize,
}

pub struct CalendarSweep {
    trees: Arc<dyn TreeRepository>,
    calendar: Arc<dyn CalendarProvider>,
    alerts: AlertStore,
    dispatch: Arc<DispatchEngine>,
    care_keywords: Vec<String>,
    interval: Duration,
}

impl CalendarSweep {
    pub fn new(
        trees: Arc<dyn TreeRepository>,
        calendar: Arc<dyn CalendarProvider>,
        alerts: AlertStore,
        dispatch: Arc<DispatchEngine>,
        care_keywords: Vec<String>,
        interval: Duration,
    ) -> Self {
        Self {
            trees,
            calendar,
            alerts,
            dispatch,
            care_keywords: care_keywords
                .into_iter()
                .map(|k| k.to_lowercase())
                .collect(),
            interval,
        }
    }

    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let sweep = self;
        spawn_periodic("calendar", sweep.interval, cancel, move || {
            let sweep = Arc::clone(&sweep);
            async move {
                match sweep.tick().await {
                    Ok(report) => info!(
                        events = report.events_scanned,
                        created = report.alerts_created,
                        skipped = report.duplicates_skipped,
                        "calendar sweep complete"
                    ),
                    Err(e) => warn!(error = %e, "calendar sweep aborted"),
                }
            }
        })
    }

    /// One pass over the event window. Errors when the calendar listing
    /// or tree listing fails — surfaced as a provider error on the
    /// admin-triggered synchronous path.
    pub async fn tick(&self) -> Result<CalendarSweepReport, EngineError> {
        let now = Utc::now();
        let events = self
            .calendar
            .events_between(now, now + chrono::Duration::days(CALENDAR_LOOKAHEAD_DAYS))
            .await?;
        let trees = self.trees.list_active().await?;

        let mut report = CalendarSweepReport {
            events_scanned: events.len(),
            ..Default::default()
        };

        for tree in &trees {
            for event in &events {
                let Some(matched_keywords) = self.care_relevance(tree, event) else {
                    continue;
                };

                // Per-event idempotency: a non-terminal alert for this
                // event blocks a second one regardless of tree.
                if self.alerts.has_active_calendar_alert(&event.id)? {
                    report.duplicates_skipped += 1;
                    continue;
                }

                let request = CreateAlertRequest {
                    tree_id: tree.id.clone(),
                    alert_type: AlertType::CalendarEvent,
                    alert_source: AlertSource::Calendar,
                    weather_snapshot: None,
                    calendar_event_id: Some(event.id.clone()),
                    threshold_breached: ThresholdBreached {
                        field: "calendar_event".to_string(),
                        value: serde_json::json!(event.summary),
                        threshold: serde_json::json!(matched_keywords),
                    },
                };
                match self.dispatch.create_alert(request).await {
                    Ok(DispatchOutcome::Created { alert, notified }) => {
                        info!(
                            alert_id = %alert.id,
                            tree_id = %tree.id,
                            event_id = %event.id,
                            notified,
                            "calendar alert created"
                        );
                        report.alerts_created += 1;
                    }
                    Ok(DispatchOutcome::Skipped { .. }) => {
                        report.duplicates_skipped += 1;
                    }
                    Err(e) => {
                        warn!(
                            tree_id = %tree.id,
                            event_id = %event.id,
                            error = %e,
                            "calendar alert creation failed"
                        );
                    }
                }
            }
        }

        Ok(report)
    }

    /// Tree-related AND care-relevant: returns the matched care keywords,
    /// or None when the event does not concern this tree.
    fn care_relevance(&self, tree: &Tree, event: &CalendarEvent) -> Option<Vec<String>> {
        let text = event.searchable_text();

        let mentions = |needle: &str| -> bool {
            !needle.is_empty() && text.contains(&needle.to_lowercase())
        };
        let tree_related =
            mentions(&tree.id) || mentions(&tree.name) || mentions(&tree.species);
        if !tree_related {
            return None;
        }

        let matched: Vec<String> = self
            .care_keywords
            .iter()
            .filter(|keyword| text.contains(keyword.as_str()))
            .cloned()
            .collect();
        (!matched.is_empty()).then_some(matched)
    }
}
