//! Dispatch Engine — create → dedupe → match → broadcast
//!
//! Single entry point for raising alerts, shared by the weather sweep,
//! the calendar sweep, and the admin create surface. Dedupe lives here
//! (not in the sweeps) so every caller gets the same idempotency: at
//! most one non-terminal alert per (tree, type), and at most one per
//! calendar event.
//!
//! Persistence comes first; matching and broadcast are best-effort and
//! never roll the alert back.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::matcher::Matcher;
use crate::providers::TreeRepository;
use crate::push::{events, NewAlertPayload, PushBus};
use crate::store::{AlertStore, SlotClaim};
use crate::types::{
    Alert, AlertSource, AlertStatus, AlertType, ThresholdBreached, Tree, TreeProjection,
    WeatherSnapshot,
};

/// Everything needed to raise one alert.
#[derive(Debug, Clone)]
pub struct CreateAlertRequest {
    pub tree_id: String,
    pub alert_type: AlertType,
    pub alert_source: AlertSource,
    pub weather_snapshot: Option<WeatherSnapshot>,
    pub calendar_event_id: Option<String>,
    pub threshold_breached: ThresholdBreached,
}

/// What the engine did with the request.
#[derive(Debug)]
pub enum DispatchOutcome {
    Created { alert: Alert, notified: usize },
    /// Dedupe refused the request; the holder's id is returned.
    Skipped { existing_alert_id: String },
}

/// Orchestrates alert creation and the initial volunteer broadcast.
pub struct DispatchEngine {
    alerts: AlertStore,
    matcher: Matcher,
    trees: Arc<dyn TreeRepository>,
    push: Arc<dyn PushBus>,
    match_radius_m: f64,
}

impl DispatchEngine {
    pub fn new(
        alerts: AlertStore,
        matcher: Matcher,
        trees: Arc<dyn TreeRepository>,
        push: Arc<dyn PushBus>,
        match_radius_m: f64,
    ) -> Self {
        Self {
            alerts,
            matcher,
            trees,
            push,
            match_radius_m,
        }
    }

    /// Raise an alert for a tree, unless an equivalent one is in flight.
    pub async fn create_alert(
        &self,
        request: CreateAlertRequest,
    ) -> Result<DispatchOutcome, EngineError> {
        if request.alert_source == AlertSource::Calendar
            && request.calendar_event_id.is_none()
        {
            return Err(EngineError::Validation(
                "calendar alerts require a calendarEventId".into(),
            ));
        }

        let tree = self
            .trees
            .get(&request.tree_id)
            .await?
            .filter(|t| t.active)
            .ok_or_else(|| EngineError::not_found("tree", &request.tree_id))?;

        let alert_id = Uuid::new_v4().to_string();

        // Dedupe (one non-terminal alert per tree+type). The slot claim
        // is the atomic gate: losing it means an equivalent alert is
        // already searching or assigned.
        match self
            .alerts
            .claim_active_slot(&request.tree_id, request.alert_type, &alert_id)?
        {
            SlotClaim::Claimed => {}
            SlotClaim::Occupied(existing_alert_id) => {
                return Ok(DispatchOutcome::Skipped { existing_alert_id });
            }
        }

        // Calendar alerts additionally dedupe per event id.
        if let Some(event_id) = request.calendar_event_id.as_deref() {
            match self.alerts.claim_calendar_slot(event_id, &alert_id)? {
                SlotClaim::Claimed => {}
                SlotClaim::Occupied(existing_alert_id) => {
                    self.alerts.release_active_slot(
                        &request.tree_id,
                        request.alert_type,
                        &alert_id,
                    )?;
                    return Ok(DispatchOutcome::Skipped { existing_alert_id });
                }
            }
        }

        let now = Utc::now();
        let alert = Alert {
            id: alert_id,
            tree_id: tree.id.clone(),
            alert_type: request.alert_type,
            alert_source: request.alert_source,
            status: AlertStatus::Searching,
            assigned_volunteer: None,
            weather_snapshot: request.weather_snapshot,
            calendar_event_id: request.calendar_event_id,
            threshold_breached: request.threshold_breached,
            location: tree.location,
            notified_volunteers: Default::default(),
            retry_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.alerts.insert(&alert)?;

        info!(
            alert_id = %alert.id,
            tree_id = %alert.tree_id,
            alert_type = %alert.alert_type,
            "alert created, searching for volunteers"
        );

        let (alert, notified) = self.broadcast_initial(alert, &tree);
        Ok(DispatchOutcome::Created { alert, notified })
    }

    /// Match nearby volunteers, record them, and fan out `new_alert`.
    /// Failures here leave the persisted alert in `searching` for the
    /// retry sweep to pick up.
    fn broadcast_initial(&self, alert: Alert, tree: &Tree) -> (Alert, usize) {
        let nearby = match self
            .matcher
            .find_nearby_available(alert.location, self.match_radius_m)
        {
            Ok(nearby) => nearby,
            Err(e) => {
                warn!(alert_id = %alert.id, error = %e, "volunteer matching failed");
                return (alert, 0);
            }
        };

        if nearby.is_empty() {
            info!(alert_id = %alert.id, "no volunteers within radius, awaiting retry sweep");
            return (alert, 0);
        }

        let ids: Vec<String> = nearby.into_iter().map(|m| m.id).collect();
        let alert = match self.alerts.add_notified(&alert.id, &ids) {
            Ok(Some(updated)) => updated,
            Ok(None) | Err(_) => {
                warn!(alert_id = %alert.id, "failed to record notified volunteers");
                alert
            }
        };

        let payload = NewAlertPayload {
            alert_id: alert.id.clone(),
            alert_type: alert.alert_type,
            alert_source: alert.alert_source,
            weather_snapshot: alert.weather_snapshot.clone(),
            threshold_breached: alert.threshold_breached.clone(),
            tree: TreeProjection::from(tree),
            created_at: alert.created_at,
            retry_broadcast: None,
            message: None,
        };
        let value = match serde_json::to_value(&payload) {
            Ok(v) => v,
            Err(e) => {
                warn!(alert_id = %alert.id, error = %e, "new_alert payload serialization failed");
                return (alert, 0);
            }
        };

        let notified = ids.len();
        self.push.to_volunteers(&ids, events::NEW_ALERT, value);
        info!(alert_id = %alert.id, notified, "new_alert broadcast sent");
        (alert, notified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPoint;
    use crate::providers::InMemoryTreeRepository;
    use crate::push::RecordingPushBus;
    use crate::store::VolunteerStore;
    use crate::types::{Availability, Volunteer};

    struct Fixture {
        engine: DispatchEngine,
        bus: Arc<RecordingPushBus>,
        alerts: AlertStore,
        _dir: tempfile::TempDir,
    }

    fn tree(id: &str, active: bool) -> Tree {
        Tree {
            id: id.to_string(),
            name: "Old Oak".to_string(),
            species: "Quercus robur".to_string(),
            location: GeoPoint::new(79.8615, 6.9275),
            active,
        }
    }

    fn volunteer(id: &str, lon: f64, lat: f64) -> Volunteer {
        Volunteer {
            id: id.to_string(),
            name: id.to_string(),
            email: format!("{id}@example.org"),
            credential_hash: "hash".to_string(),
            availability: Availability::Available,
            active: true,
            location: GeoPoint::new(lon, lat),
            preferred_radius_km: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn fixture(trees: Vec<Tree>, volunteers: Vec<Volunteer>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let alerts = AlertStore::open(&db).unwrap();
        let volunteer_store = VolunteerStore::open(&db).unwrap();
        for v in &volunteers {
            volunteer_store.insert(v).unwrap();
        }
        let bus = Arc::new(RecordingPushBus::new());
        let engine = DispatchEngine::new(
            alerts.clone(),
            Matcher::new(volunteer_store),
            Arc::new(InMemoryTreeRepository::new(trees)),
            bus.clone(),
            5_000.0,
        );
        Fixture {
            engine,
            bus,
            alerts,
            _dir: dir,
        }
    }

    fn weather_request(tree_id: &str, alert_type: AlertType) -> CreateAlertRequest {
        CreateAlertRequest {
            tree_id: tree_id.to_string(),
            alert_type,
            alert_source: AlertSource::Weather,
            weather_snapshot: Some(WeatherSnapshot {
                temperature: Some(40.0),
                ..Default::default()
            }),
            calendar_event_id: None,
            threshold_breached: ThresholdBreached::numeric("temperature", 40.0, 35.0),
        }
    }

    #[tokio::test]
    async fn test_create_notifies_nearby_only() {
        let f = fixture(
            vec![tree("t1", true)],
            vec![
                volunteer("near", 79.8612, 6.9271),
                volunteer("remote", 80.5, 7.5),
            ],
        );

        let outcome = f
            .engine
            .create_alert(weather_request("t1", AlertType::HighTemperature))
            .await
            .unwrap();

        let DispatchOutcome::Created { alert, notified } = outcome else {
            panic!("expected Created");
        };
        assert_eq!(notified, 1);
        assert_eq!(alert.status, AlertStatus::Searching);
        assert!(alert.notified_volunteers.contains("near"));
        assert!(!alert.notified_volunteers.contains("remote"));

        assert_eq!(f.bus.for_room("volunteer:near").len(), 1);
        assert!(f.bus.for_room("volunteer:remote").is_empty());

        let emit = &f.bus.for_room("volunteer:near")[0];
        assert_eq!(emit.event, "new_alert");
        assert_eq!(emit.payload["tree"]["id"], "t1");
        assert_eq!(emit.payload["alertType"], "high_temperature");
    }

    #[tokio::test]
    async fn test_dedupe_skips_second_create() {
        let f = fixture(vec![tree("t1", true)], vec![]);

        let first = f
            .engine
            .create_alert(weather_request("t1", AlertType::Drought))
            .await
            .unwrap();
        let DispatchOutcome::Created { alert, .. } = first else {
            panic!("expected Created");
        };

        let second = f
            .engine
            .create_alert(weather_request("t1", AlertType::Drought))
            .await
            .unwrap();
        match second {
            DispatchOutcome::Skipped { existing_alert_id } => {
                assert_eq!(existing_alert_id, alert.id)
            }
            other => panic!("expected Skipped, got {other:?}"),
        }

        // Different type on the same tree still dispatches.
        let other_type = f
            .engine
            .create_alert(weather_request("t1", AlertType::HighWind))
            .await
            .unwrap();
        assert!(matches!(other_type, DispatchOutcome::Created { .. }));
    }

    #[tokio::test]
    async fn test_unknown_or_inactive_tree_fails() {
        let f = fixture(vec![tree("t1", false)], vec![]);

        let missing = f
            .engine
            .create_alert(weather_request("ghost", AlertType::Drought))
            .await;
        assert!(matches!(missing, Err(EngineError::NotFound(_))));

        let inactive = f
            .engine
            .create_alert(weather_request("t1", AlertType::Drought))
            .await;
        assert!(matches!(inactive, Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_calendar_event_dedupe() {
        let f = fixture(vec![tree("t1", true), tree("t2", true)], vec![]);

        let request = CreateAlertRequest {
            tree_id: "t1".to_string(),
            alert_type: AlertType::CalendarEvent,
            alert_source: AlertSource::Calendar,
            weather_snapshot: None,
            calendar_event_id: Some("e1".to_string()),
            threshold_breached: ThresholdBreached {
                field: "calendar_event".into(),
                value: serde_json::json!("Watering — Oak Tree"),
                threshold: serde_json::json!(["watering"]),
            },
        };

        let first = f.engine.create_alert(request.clone()).await.unwrap();
        assert!(matches!(first, DispatchOutcome::Created { .. }));

        // Same event against a different tree is still refused.
        let mut for_other_tree = request.clone();
        for_other_tree.tree_id = "t2".to_string();
        let second = f.engine.create_alert(for_other_tree).await.unwrap();
        assert!(matches!(second, DispatchOutcome::Skipped { .. }));

        // The released (t2, calendar_event) slot must not block future
        // calendar alerts for t2.
        let mut fresh_event = request;
        fresh_event.tree_id = "t2".to_string();
        fresh_event.calendar_event_id = Some("e2".to_string());
        let third = f.engine.create_alert(fresh_event).await.unwrap();
        assert!(matches!(third, DispatchOutcome::Created { .. }));
    }

    #[tokio::test]
    async fn test_calendar_source_requires_event_id() {
        let f = fixture(vec![tree("t1", true)], vec![]);
        let request = CreateAlertRequest {
            tree_id: "t1".to_string(),
            alert_type: AlertType::CalendarEvent,
            alert_source: AlertSource::Calendar,
            weather_snapshot: None,
            calendar_event_id: None,
            threshold_breached: ThresholdBreached {
                field: "calendar_event".into(),
                value: serde_json::json!(""),
                threshold: serde_json::json!([]),
            },
        };
        assert!(matches!(
            f.engine.create_alert(request).await,
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_no_volunteers_creates_searching_alert() {
        let f = fixture(vec![tree("t1", true)], vec![]);
        let outcome = f
            .engine
            .create_alert(weather_request("t1", AlertType::Storm))
            .await
            .unwrap();
        let DispatchOutcome::Created { alert, notified } = outcome else {
            panic!("expected Created");
        };
        assert_eq!(notified, 0);
        assert!(alert.notified_volunteers.is_empty());
        assert!(f.bus.all().is_empty());
        // Row persisted for the retry sweep.
        assert!(f.alerts.get(&alert.id).unwrap().is_some());
    }
}
