//! REST API module using Axum
//!
//! HTTP surface of the dispatch engine:
//! - Alert CRUD and lifecycle transitions (accept/start/resolve/cancel)
//! - Admin facade: sweep triggers, aggregates, cancellation
//! - WebSocket push endpoint (`/ws`) joining subjects into their rooms

pub mod envelope;
pub mod handlers;
mod routes;

use std::sync::Arc;

use axum::extract::FromRef;
use axum::http::HeaderValue;
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::auth::AuthKeys;
use crate::dispatch::DispatchEngine;
use crate::lifecycle::LifecycleManager;
use crate::push::BroadcastHub;
use crate::store::{AlertStore, VolunteerStore};
use crate::sweeps::{CalendarSweep, WeatherSweep};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct AppState {
    pub alerts: AlertStore,
    pub volunteers: VolunteerStore,
    pub dispatch: Arc<DispatchEngine>,
    pub lifecycle: Arc<LifecycleManager>,
    pub weather_sweep: Arc<WeatherSweep>,
    pub calendar_sweep: Arc<CalendarSweep>,
    pub hub: BroadcastHub,
    pub auth: AuthKeys,
    pub started_at: DateTime<Utc>,
    pub allowed_client_origin: Option<String>,
}

impl FromRef<AppState> for AuthKeys {
    fn from_ref(state: &AppState) -> AuthKeys {
        state.auth.clone()
    }
}

/// Create the complete application router.
pub fn create_app(state: AppState) -> Router {
    let cors = match state.allowed_client_origin.as_deref() {
        Some(origin) => match origin.parse::<HeaderValue>() {
            Ok(value) => CorsLayer::new()
                .allow_origin(AllowOrigin::exact(value))
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
            Err(_) => {
                warn!(origin, "invalid allowed_client_origin, falling back to permissive CORS");
                CorsLayer::permissive()
            }
        },
        None => CorsLayer::permissive(),
    };

    Router::new()
        // API routes
        .nest("/api/v1", routes::api_routes())
        // Push channel
        .route("/ws", get(handlers::push_socket))
        .with_state(state)
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
