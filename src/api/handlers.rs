//! API route handlers
//!
//! Request handling for the dispatch engine surface. Auth is enforced by
//! extractor type: `AdminAuth` for the privileged facade, `VolunteerAuth`
//! for lifecycle transitions, `Authed` for reads. Every fallible path
//! returns an `EngineError`, which the envelope maps onto the wire.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::{AdminAuth, Authed, VolunteerAuth};
use crate::dispatch::{CreateAlertRequest, DispatchOutcome};
use crate::error::EngineError;
use crate::push::{rooms_for, serve_socket};
use crate::types::{
    Alert, AlertSource, AlertStatus, AlertType, ThresholdBreached, WeatherSnapshot,
};

use super::envelope::ApiResponse;
use super::AppState;

// ============================================================================
// Health
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    uptime_secs: i64,
    alerts_by_status: std::collections::BTreeMap<String, u64>,
    volunteers_by_availability: std::collections::BTreeMap<String, u64>,
}

/// Unauthenticated liveness probe with store aggregates.
pub async fn get_health(State(state): State<AppState>) -> Result<Response, EngineError> {
    let body = HealthResponse {
        status: "ok",
        uptime_secs: (chrono::Utc::now() - state.started_at).num_seconds(),
        alerts_by_status: state.alerts.counts_by_status()?,
        volunteers_by_availability: state.volunteers.counts_by_availability()?,
    };
    Ok(ApiResponse::ok(body))
}

// ============================================================================
// Alerts
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateAlertBody {
    tree_id: String,
    alert_type: AlertType,
    alert_source: AlertSource,
    #[serde(default)]
    weather_snapshot: Option<WeatherSnapshot>,
    #[serde(default)]
    calendar_event_id: Option<String>,
    threshold_breached: ThresholdBreached,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatedAlertResponse {
    alert: Alert,
    notified_count: usize,
}

/// Create an alert (system/admin surface). Dedupe refusals map to 409.
pub async fn create_alert(
    _admin: AdminAuth,
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, EngineError> {
    let body: CreateAlertBody = serde_json::from_value(body)
        .map_err(|e| EngineError::Validation(format!("invalid alert body: {e}")))?;

    let outcome = state
        .dispatch
        .create_alert(CreateAlertRequest {
            tree_id: body.tree_id.clone(),
            alert_type: body.alert_type,
            alert_source: body.alert_source,
            weather_snapshot: body.weather_snapshot,
            calendar_event_id: body.calendar_event_id,
            threshold_breached: body.threshold_breached,
        })
        .await?;

    match outcome {
        DispatchOutcome::Created { alert, notified } => {
            Ok(ApiResponse::created(CreatedAlertResponse {
                alert,
                notified_count: notified,
            }))
        }
        DispatchOutcome::Skipped { .. } => Err(EngineError::AlreadyActive {
            tree_id: body.tree_id,
            alert_type: body.alert_type,
        }),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListAlertsQuery {
    status: Option<String>,
    alert_source: Option<String>,
    tree_id: Option<String>,
}

fn parse_wire_enum<T: serde::de::DeserializeOwned>(
    field: &str,
    raw: &str,
) -> Result<T, EngineError> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| EngineError::Validation(format!("invalid {field}: '{raw}'")))
}

/// Admin listing with status/source/tree filters.
pub async fn list_alerts(
    _admin: AdminAuth,
    State(state): State<AppState>,
    Query(query): Query<ListAlertsQuery>,
) -> Result<Response, EngineError> {
    let filter = crate::store::AlertFilter {
        status: query
            .status
            .as_deref()
            .map(|s| parse_wire_enum::<AlertStatus>("status", s))
            .transpose()?,
        source: query
            .alert_source
            .as_deref()
            .map(|s| parse_wire_enum::<AlertSource>("alertSource", s))
            .transpose()?,
        tree_id: query.tree_id,
    };
    Ok(ApiResponse::ok(state.alerts.list(&filter)?))
}

/// Fetch one alert (any authenticated subject).
pub async fn get_alert(
    _authed: Authed,
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
) -> Result<Response, EngineError> {
    let alert = state
        .alerts
        .get(&alert_id)?
        .ok_or_else(|| EngineError::not_found("alert", &alert_id))?;
    Ok(ApiResponse::ok(alert))
}

// ============================================================================
// Lifecycle transitions
// ============================================================================

pub async fn accept_alert(
    volunteer: VolunteerAuth,
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
) -> Result<Response, EngineError> {
    let alert = state
        .lifecycle
        .accept(&alert_id, &volunteer.volunteer_id)
        .await?;
    Ok(ApiResponse::ok(alert))
}

pub async fn start_alert(
    volunteer: VolunteerAuth,
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
) -> Result<Response, EngineError> {
    let alert = state
        .lifecycle
        .start(&alert_id, &volunteer.volunteer_id)
        .await?;
    Ok(ApiResponse::ok(alert))
}

pub async fn resolve_alert(
    volunteer: VolunteerAuth,
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
) -> Result<Response, EngineError> {
    let alert = state
        .lifecycle
        .resolve(&alert_id, &volunteer.volunteer_id)
        .await?;
    Ok(ApiResponse::ok(alert))
}

/// The caller's in-flight assignment, if any.
pub async fn my_alerts(
    volunteer: VolunteerAuth,
    State(state): State<AppState>,
) -> Result<Response, EngineError> {
    let assigned: Vec<Alert> = state
        .alerts
        .active_by_assignee(&volunteer.volunteer_id)?
        .into_iter()
        .collect();
    Ok(ApiResponse::ok(assigned))
}

// ============================================================================
// Admin facade
// ============================================================================

pub async fn admin_cancel_alert(
    _admin: AdminAuth,
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
) -> Result<Response, EngineError> {
    let alert = state.lifecycle.admin_cancel(&alert_id).await?;
    Ok(ApiResponse::ok(alert))
}

/// Run the weather sweep synchronously; provider failures surface as 502.
pub async fn trigger_weather_check(
    _admin: AdminAuth,
    State(state): State<AppState>,
) -> Result<Response, EngineError> {
    let report = state.weather_sweep.tick().await?;
    Ok(ApiResponse::ok(report))
}

/// Run the calendar sweep synchronously; provider failures surface as 502.
pub async fn trigger_calendar_check(
    _admin: AdminAuth,
    State(state): State<AppState>,
) -> Result<Response, EngineError> {
    let report = state.calendar_sweep.tick().await?;
    Ok(ApiResponse::ok(report))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AdminStats {
    alerts_by_status: std::collections::BTreeMap<String, u64>,
    alerts_by_source: std::collections::BTreeMap<String, u64>,
    volunteers_by_availability: std::collections::BTreeMap<String, u64>,
}

pub async fn admin_stats(
    _admin: AdminAuth,
    State(state): State<AppState>,
) -> Result<Response, EngineError> {
    let stats = AdminStats {
        alerts_by_status: state.alerts.counts_by_status()?,
        alerts_by_source: state.alerts.counts_by_source()?,
        volunteers_by_availability: state.volunteers.counts_by_availability()?,
    };
    Ok(ApiResponse::ok(stats))
}

// ============================================================================
// Push channel
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct PushSocketQuery {
    token: Option<String>,
}

/// WebSocket connect: verify the bearer credential (query parameter, or
/// Authorization header for non-browser clients), join the subject's
/// rooms, and pump frames until either side closes.
pub async fn push_socket(
    ws: WebSocketUpgrade,
    Query(query): Query<PushSocketQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Response, EngineError> {
    let token = query
        .token
        .or_else(|| {
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|s| s.to_string())
        })
        .ok_or_else(|| EngineError::Unauthenticated("Missing push credential".into()))?;

    let claims = state.auth.verify(&token)?;
    let joined_rooms = rooms_for(&claims);
    let rx = state.hub.subscribe();

    Ok(ws.on_upgrade(move |socket| serve_socket(socket, joined_rooms, rx)))
}
