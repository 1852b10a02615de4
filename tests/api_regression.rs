//! API Regression Tests
//!
//! In-process tests that build the Axum app via `create_app()` and
//! exercise the /api/v1/* surface using `tower::ServiceExt::oneshot()`.
//! No binary spawn, no network port. Stores live in a sled temp
//! directory; providers are scripted.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use tower::ServiceExt;

use arborwatch::api::{create_app, AppState};
use arborwatch::auth::{AuthKeys, Role, SubjectKind};
use arborwatch::config::{defaults, ThresholdConfig};
use arborwatch::dispatch::DispatchEngine;
use arborwatch::geo::GeoPoint;
use arborwatch::lifecycle::LifecycleManager;
use arborwatch::matcher::Matcher;
use arborwatch::providers::{
    InMemoryTreeRepository, ScriptedWeatherProvider, StaticCalendarProvider,
    TreeRepository,
};
use arborwatch::push::{BroadcastHub, PushBus};
use arborwatch::store::{AlertStore, VolunteerStore};
use arborwatch::sweeps::{CalendarSweep, WeatherSweep};
use arborwatch::types::{Availability, Tree, Volunteer, WeatherSnapshot};

const JWT_SECRET: &str = "test-signing-secret";

struct TestApp {
    app: Router,
    auth: AuthKeys,
    volunteers: VolunteerStore,
    weather: Arc<ScriptedWeatherProvider>,
    calendar: Arc<StaticCalendarProvider>,
    _dir: tempfile::TempDir,
}

fn test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let db = sled::open(dir.path()).unwrap();
    let alerts = AlertStore::open(&db).unwrap();
    let volunteers = VolunteerStore::open(&db).unwrap();

    let trees: Arc<dyn TreeRepository> = Arc::new(InMemoryTreeRepository::new(vec![Tree {
        id: "t1".to_string(),
        name: "Oak Tree".to_string(),
        species: "Quercus robur".to_string(),
        location: GeoPoint::new(79.8615, 6.9275),
        active: true,
    }]));
    let weather = Arc::new(ScriptedWeatherProvider::new());
    let calendar = Arc::new(StaticCalendarProvider::default());

    let hub = BroadcastHub::new();
    let push: Arc<dyn PushBus> = Arc::new(hub.clone());
    let matcher = Matcher::new(volunteers.clone());
    let dispatch = Arc::new(DispatchEngine::new(
        alerts.clone(),
        matcher.clone(),
        trees.clone(),
        push.clone(),
        5_000.0,
    ));
    let lifecycle = Arc::new(LifecycleManager::new(
        alerts.clone(),
        volunteers.clone(),
        push.clone(),
    ));
    let weather_sweep = Arc::new(WeatherSweep::new(
        trees.clone(),
        weather.clone(),
        dispatch.clone(),
        ThresholdConfig::default(),
        Duration::from_secs(900),
    ));
    let calendar_sweep = Arc::new(CalendarSweep::new(
        trees,
        calendar.clone(),
        alerts.clone(),
        dispatch.clone(),
        defaults::CALENDAR_CARE_KEYWORDS
            .iter()
            .map(|s| s.to_string())
            .collect(),
        Duration::from_secs(1_800),
    ));

    let auth = AuthKeys::new(JWT_SECRET, 24);
    let state = AppState {
        alerts,
        volunteers: volunteers.clone(),
        dispatch,
        lifecycle,
        weather_sweep,
        calendar_sweep,
        hub,
        auth: auth.clone(),
        started_at: Utc::now(),
        allowed_client_origin: None,
    };

    TestApp {
        app: create_app(state),
        auth,
        volunteers,
        weather,
        calendar,
        _dir: dir,
    }
}

fn seed_volunteer(t: &TestApp, id: &str) {
    t.volunteers
        .insert(&Volunteer {
            id: id.to_string(),
            name: format!("Volunteer {id}"),
            email: format!("{id}@example.org"),
            credential_hash: "hash".to_string(),
            availability: Availability::Available,
            active: true,
            location: GeoPoint::new(79.8612, 6.9271),
            preferred_radius_km: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .unwrap();
}

fn admin_token(t: &TestApp) -> String {
    t.auth.issue("admin1", Role::Admin, SubjectKind::User).unwrap()
}

fn volunteer_token(t: &TestApp, id: &str) -> String {
    t.auth.issue(id, Role::Volunteer, SubjectKind::Volunteer).unwrap()
}

fn request(method: &str, uri: &str, token: Option<&str>, body: Option<serde_json::Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn create_alert_body(tree_id: &str, alert_type: &str) -> serde_json::Value {
    serde_json::json!({
        "treeId": tree_id,
        "alertType": alert_type,
        "alertSource": "weather",
        "weatherSnapshot": {"temperature": 40.0, "rainfall": 0.0},
        "thresholdBreached": {"field": "temperature", "value": 40.0, "threshold": 35.0}
    })
}

// ============================================================================
// Health + auth boundaries
// ============================================================================

#[tokio::test]
async fn test_health_is_public() {
    let t = test_app();
    let resp = t
        .app
        .oneshot(request("GET", "/api/v1/health", None, None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test]
async fn test_listing_requires_admin() {
    let t = test_app();

    // No token: 401
    let resp = t
        .app
        .clone()
        .oneshot(request("GET", "/api/v1/alerts", None, None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // Volunteer token: 403
    seed_volunteer(&t, "v1");
    let token = volunteer_token(&t, "v1");
    let resp = t
        .app
        .clone()
        .oneshot(request("GET", "/api/v1/alerts", Some(&token), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // Admin token: 200
    let token = admin_token(&t);
    let resp = t
        .app
        .oneshot(request("GET", "/api/v1/alerts", Some(&token), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_garbage_token_rejected() {
    let t = test_app();
    let resp = t
        .app
        .oneshot(request("GET", "/api/v1/alerts", Some("not-a-jwt"), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(resp).await;
    assert_eq!(body["error"]["code"], "UNAUTHENTICATED");
}

// ============================================================================
// Alert creation
// ============================================================================

#[tokio::test]
async fn test_create_alert_and_dedupe_conflict() {
    let t = test_app();
    let token = admin_token(&t);

    let resp = t
        .app
        .clone()
        .oneshot(request(
            "POST",
            "/api/v1/alerts",
            Some(&token),
            Some(create_alert_body("t1", "high_temperature")),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = json_body(resp).await;
    assert_eq!(body["data"]["alert"]["status"], "searching");
    assert_eq!(body["data"]["alert"]["treeId"], "t1");

    // Same (tree, type) again: 409.
    let resp = t
        .app
        .oneshot(request(
            "POST",
            "/api/v1/alerts",
            Some(&token),
            Some(create_alert_body("t1", "high_temperature")),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body = json_body(resp).await;
    assert_eq!(body["error"]["code"], "ALREADY_ACTIVE");
}

#[tokio::test]
async fn test_create_alert_validation() {
    let t = test_app();
    let token = admin_token(&t);

    // Unknown alert type: 400, not 500.
    let resp = t
        .app
        .clone()
        .oneshot(request(
            "POST",
            "/api/v1/alerts",
            Some(&token),
            Some(serde_json::json!({"treeId": "t1", "alertType": "volcano"})),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // Unknown tree: 404.
    let resp = t
        .app
        .oneshot(request(
            "POST",
            "/api/v1/alerts",
            Some(&token),
            Some(create_alert_body("ghost", "high_temperature")),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_filters_and_invalid_filter() {
    let t = test_app();
    let token = admin_token(&t);

    t.app
        .clone()
        .oneshot(request(
            "POST",
            "/api/v1/alerts",
            Some(&token),
            Some(create_alert_body("t1", "drought")),
        ))
        .await
        .unwrap();

    let resp = t
        .app
        .clone()
        .oneshot(request(
            "GET",
            "/api/v1/alerts?status=searching&treeId=t1",
            Some(&token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let resp = t
        .app
        .clone()
        .oneshot(request(
            "GET",
            "/api/v1/alerts?status=galloping",
            Some(&token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = t
        .app
        .oneshot(request(
            "GET",
            "/api/v1/alerts?status=resolved",
            Some(&token),
            None,
        ))
        .await
        .unwrap();
    let body = json_body(resp).await;
    assert!(body["data"].as_array().unwrap().is_empty());
}

// ============================================================================
// Lifecycle over HTTP
// ============================================================================

#[tokio::test]
async fn test_lifecycle_via_api() {
    let t = test_app();
    seed_volunteer(&t, "v1");
    seed_volunteer(&t, "v2");
    let admin = admin_token(&t);
    let v1 = volunteer_token(&t, "v1");
    let v2 = volunteer_token(&t, "v2");

    let resp = t
        .app
        .clone()
        .oneshot(request(
            "POST",
            "/api/v1/alerts",
            Some(&admin),
            Some(create_alert_body("t1", "high_temperature")),
        ))
        .await
        .unwrap();
    let body = json_body(resp).await;
    let alert_id = body["data"]["alert"]["id"].as_str().unwrap().to_string();

    // Admin may not accept.
    let resp = t
        .app
        .clone()
        .oneshot(request(
            "PUT",
            &format!("/api/v1/alerts/{alert_id}/accept"),
            Some(&admin),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // v1 accepts.
    let resp = t
        .app
        .clone()
        .oneshot(request(
            "PUT",
            &format!("/api/v1/alerts/{alert_id}/accept"),
            Some(&v1),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["data"]["status"], "accepted");
    assert_eq!(body["data"]["assignedVolunteer"], "v1");

    // v2 is late: 409 with the canonical message.
    let resp = t
        .app
        .clone()
        .oneshot(request(
            "PUT",
            &format!("/api/v1/alerts/{alert_id}/accept"),
            Some(&v2),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body = json_body(resp).await;
    assert_eq!(
        body["error"]["message"],
        "Alert already accepted by another volunteer"
    );

    // Wrong caller cannot start.
    let resp = t
        .app
        .clone()
        .oneshot(request(
            "PUT",
            &format!("/api/v1/alerts/{alert_id}/start"),
            Some(&v2),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // Assignee surface shows the in-flight alert.
    let resp = t
        .app
        .clone()
        .oneshot(request(
            "GET",
            "/api/v1/volunteers/me/alerts",
            Some(&v1),
            None,
        ))
        .await
        .unwrap();
    let body = json_body(resp).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    // start → resolve
    let resp = t
        .app
        .clone()
        .oneshot(request(
            "PUT",
            &format!("/api/v1/alerts/{alert_id}/start"),
            Some(&v1),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = t
        .app
        .clone()
        .oneshot(request(
            "PUT",
            &format!("/api/v1/alerts/{alert_id}/resolve"),
            Some(&v1),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["data"]["status"], "resolved");

    // Terminal: admin cancel now names the current state.
    let resp = t
        .app
        .oneshot(request(
            "PUT",
            &format!("/api/v1/admin/alerts/{alert_id}/cancel"),
            Some(&admin),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = json_body(resp).await;
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");
    assert_eq!(
        body["error"]["message"],
        "Cannot cancel — alert status is 'resolved'"
    );
}

#[tokio::test]
async fn test_get_alert_by_id() {
    let t = test_app();
    seed_volunteer(&t, "v1");
    let admin = admin_token(&t);
    let v1 = volunteer_token(&t, "v1");

    let resp = t
        .app
        .clone()
        .oneshot(request(
            "POST",
            "/api/v1/alerts",
            Some(&admin),
            Some(create_alert_body("t1", "storm")),
        ))
        .await
        .unwrap();
    let body = json_body(resp).await;
    let alert_id = body["data"]["alert"]["id"].as_str().unwrap().to_string();

    // Any authenticated subject may read one alert.
    let resp = t
        .app
        .clone()
        .oneshot(request(
            "GET",
            &format!("/api/v1/alerts/{alert_id}"),
            Some(&v1),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = t
        .app
        .oneshot(request("GET", "/api/v1/alerts/ghost", Some(&v1), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// ============================================================================
// Admin facade
// ============================================================================

#[tokio::test]
async fn test_weather_check_trigger() {
    let t = test_app();
    let admin = admin_token(&t);
    t.weather.script(
        GeoPoint::new(79.8615, 6.9275),
        WeatherSnapshot {
            temperature: Some(40.0),
            wind_speed: Some(5.0),
            humidity: Some(70.0),
            rainfall: Some(10.0),
            description: Some("clear sky".into()),
        },
    );

    let resp = t
        .app
        .clone()
        .oneshot(request("POST", "/api/v1/admin/weather-check", Some(&admin), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["data"]["treesChecked"], 1);
    assert_eq!(body["data"]["alertsCreated"], 1);

    // Per-tree provider failures are reported, not surfaced as errors.
    t.weather.set_failing(true);
    let resp = t
        .app
        .oneshot(request("POST", "/api/v1/admin/weather-check", Some(&admin), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["data"]["providerFailures"], 1);
}

#[tokio::test]
async fn test_calendar_check_surfaces_provider_outage() {
    let t = test_app();
    let admin = admin_token(&t);
    t.calendar.set_failing(true);

    let resp = t
        .app
        .oneshot(request(
            "POST",
            "/api/v1/admin/calendar-check",
            Some(&admin),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body = json_body(resp).await;
    assert_eq!(body["error"]["code"], "PROVIDER_ERROR");
}

#[tokio::test]
async fn test_admin_stats() {
    let t = test_app();
    seed_volunteer(&t, "v1");
    let admin = admin_token(&t);

    t.app
        .clone()
        .oneshot(request(
            "POST",
            "/api/v1/alerts",
            Some(&admin),
            Some(create_alert_body("t1", "drought")),
        ))
        .await
        .unwrap();

    let resp = t
        .app
        .oneshot(request("GET", "/api/v1/admin/stats", Some(&admin), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["data"]["alertsByStatus"]["searching"], 1);
    assert_eq!(body["data"]["alertsBySource"]["weather"], 1);
    assert_eq!(body["data"]["volunteersByAvailability"]["available"], 1);
}
