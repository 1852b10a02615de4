//! API route definitions
//!
//! Organizes endpoints for the dispatch engine:
//! - /api/v1/health - liveness and store aggregates
//! - /api/v1/alerts - creation, listing, lifecycle transitions
//! - /api/v1/admin - privileged facade (cancel, sweep triggers, stats)
//! - /api/v1/volunteers/me - caller-scoped volunteer surface

use axum::routing::{get, post, put};
use axum::Router;

use super::{handlers, AppState};

/// Create all API routes.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::get_health))
        // Alerts
        .route("/alerts", post(handlers::create_alert))
        .route("/alerts", get(handlers::list_alerts))
        .route("/alerts/:id", get(handlers::get_alert))
        .route("/alerts/:id/accept", put(handlers::accept_alert))
        .route("/alerts/:id/start", put(handlers::start_alert))
        .route("/alerts/:id/resolve", put(handlers::resolve_alert))
        // Volunteer self-service
        .route("/volunteers/me/alerts", get(handlers::my_alerts))
        // Admin facade
        .route("/admin/alerts/:id/cancel", put(handlers::admin_cancel_alert))
        .route("/admin/weather-check", post(handlers::trigger_weather_check))
        .route("/admin/calendar-check", post(handlers::trigger_calendar_check))
        .route("/admin/stats", get(handlers::admin_stats))
}
