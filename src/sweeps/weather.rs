//! Weather Sweep — poll conditions for every active tree
//!
//! Iterates trees sequentially: the weather provider is rate-limited and
//! unbounded parallelism would trip it. A per-tree deadline keeps one
//! slow call from stalling the batch, and a per-tree failure is logged
//! and skipped — the sweep never aborts wholesale. Idempotency across
//! sweeps comes from the dedupe inside the dispatch engine.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::defaults::PROVIDER_CALL_TIMEOUT_SECS;
use crate::config::ThresholdConfig;
use crate::dispatch::{CreateAlertRequest, DispatchEngine, DispatchOutcome};
use crate::error::EngineError;
use crate::evaluator;
use crate::providers::{TreeRepository, WeatherProvider};
use crate::types::AlertSource;

use super::spawn_periodic;

/// Outcome summary of one weather sweep tick.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherSweepReport {
    pub trees_checked: usize,
    pub alerts_created: usize,
    pub duplicates_skipped: usize,
    pub provider_failures: usize,
}

pub struct WeatherSweep {
    trees: Arc<dyn TreeRepository>,
    weather: Arc<dyn WeatherProvider>,
    dispatch: Arc<DispatchEngine>,
    thresholds: ThresholdConfig,
    interval: Duration,
    per_call_timeout: Duration,
}

impl WeatherSweep {
    pub fn new(
        trees: Arc<dyn TreeRepository>,
        weather: Arc<dyn WeatherProvider>,
        dispatch: Arc<DispatchEngine>,
        thresholds: ThresholdConfig,
        interval: Duration,
    ) -> Self {
        Self {
            trees,
            weather,
            dispatch,
            thresholds,
            interval,
            per_call_timeout: Duration::from_secs(PROVIDER_CALL_TIMEOUT_SECS),
        }
    }

    /// Run the sweep on its interval until cancelled.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let sweep = self;
        spawn_periodic("weather", sweep.interval, cancel, move || {
            let sweep = Arc::clone(&sweep);
            async move {
                match sweep.tick().await {
                    Ok(report) => info!(
                        trees = report.trees_checked,
                        created = report.alerts_created,
                        skipped = report.duplicates_skipped,
                        failures = report.provider_failures,
                        "weather sweep complete"
                    ),
                    Err(e) => warn!(error = %e, "weather sweep aborted"),
                }
            }
        })
    }

    /// One full pass over the active trees. Errors only when the tree
    /// listing itself fails; per-tree provider failures are counted and
    /// skipped.
    pub async fn tick(&self) -> Result<WeatherSweepReport, EngineError> {
        let trees = self.trees.list_active().await?;
        let mut report = WeatherSweepReport::default();

        for tree in trees {
            report.trees_checked += 1;

            let snapshot = match tokio::time::timeout(
                self.per_call_timeout,
                self.weather.snapshot(tree.location),
            )
            .await
            {
                Ok(Ok(snapshot)) => snapshot,
                Ok(Err(e)) => {
                    warn!(tree_id = %tree.id, error = %e, "weather fetch failed, skipping tree");
                    report.provider_failures += 1;
                    continue;
                }
                Err(_) => {
                    warn!(tree_id = %tree.id, "weather fetch timed out, skipping tree");
                    report.provider_failures += 1;
                    continue;
                }
            };

            for rule in evaluator::evaluate(&snapshot, &self.thresholds) {
                let request = CreateAlertRequest {
                    tree_id: tree.id.clone(),
                    alert_type: rule.alert_type,
                    alert_source: AlertSource::Weather,
                    weather_snapshot: Some(snapshot.clone()),
                    calendar_event_id: None,
                    threshold_breached: rule.breached,
                };
                match self.dispatch.create_alert(request).await {
                    Ok(DispatchOutcome::Created { .. }) => report.alerts_created += 1,
                    Ok(DispatchOutcome::Skipped { .. }) => {
                        report.duplicates_skipped += 1
                    }
                    Err(e) => {
                        warn!(
                            tree_id = %tree.id,
                            alert_type = %rule.alert_type,
                            error = %e,
                            "alert creation failed during sweep"
                        );
                    }
                }
            }
        }

        Ok(report)
    }
}
