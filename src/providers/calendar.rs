//! Calendar provider adapter
//!
//! Lists upcoming care events with a system-level OAuth credential. The
//! access token is cached in-process; the refresh path is tolerant of a
//! concurrent refresher — the last write wins and an occasional duplicate
//! refresh is harmless.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::CalendarConfig;
use crate::error::EngineError;
use crate::types::CalendarEvent;

use super::CalendarProvider;

const HTTP_TIMEOUT_SECS: u64 = 10;

/// Refresh slightly before the provider-reported expiry.
const TOKEN_EXPIRY_SLACK_SECS: i64 = 60;

/// Google OAuth token endpoint.
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Google Calendar primary-calendar events endpoint.
pub const GOOGLE_EVENTS_URL: &str =
    "https://www.googleapis.com/calendar/v3/calendars/primary/events";

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// HTTP calendar client with a refresh-token flow.
pub struct CalendarClient {
    http: reqwest::Client,
    token_url: String,
    events_url: String,
    config: CalendarConfig,
    token_cache: RwLock<Option<CachedToken>>,
}

impl CalendarClient {
    /// Client against the Google Calendar endpoints.
    pub fn google(config: CalendarConfig) -> Result<Self, EngineError> {
        Self::new(config, GOOGLE_TOKEN_URL, GOOGLE_EVENTS_URL)
    }

    pub fn new(
        config: CalendarConfig,
        token_url: &str,
        events_url: &str,
    ) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| EngineError::Provider(e.to_string()))?;
        Ok(Self {
            http,
            token_url: token_url.to_string(),
            events_url: events_url.to_string(),
            config,
            token_cache: RwLock::new(None),
        })
    }

    /// Return a valid access token, refreshing through the system
    /// refresh token when the cache is cold or stale.
    async fn access_token(&self) -> Result<String, EngineError> {
        {
            let cache = self.token_cache.read().await;
            if let Some(token) = cache.as_ref() {
                if token.expires_at > Utc::now() {
                    return Ok(token.access_token.clone());
                }
            }
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: i64,
        }

        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", self.config.system_refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EngineError::Provider(format!(
                "calendar token refresh returned {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Provider(e.to_string()))?;

        let cached = CachedToken {
            access_token: token.access_token.clone(),
            expires_at: Utc::now()
                + chrono::Duration::seconds(
                    (token.expires_in - TOKEN_EXPIRY_SLACK_SECS).max(0),
                ),
        };

        // Last write wins — a racing refresher just stored an equally
        // valid token.
        *self.token_cache.write().await = Some(cached);
        debug!("calendar access token refreshed");
        Ok(token.access_token)
    }
}

/// Wire shape of the events listing — only the fields we read.
#[derive(Debug, Deserialize)]
struct ApiEventList {
    #[serde(default)]
    items: Vec<ApiEvent>,
}

#[derive(Debug, Deserialize)]
struct ApiEvent {
    id: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    start: Option<ApiEventTime>,
    #[serde(default)]
    end: Option<ApiEventTime>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEventTime {
    #[serde(default)]
    date_time: Option<DateTime<Utc>>,
}

#[async_trait]
impl CalendarProvider for CalendarClient {
    async fn events_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, EngineError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(&self.events_url)
            .bearer_auth(token)
            .query(&[
                ("timeMin", from.to_rfc3339()),
                ("timeMax", to.to_rfc3339()),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EngineError::Provider(format!(
                "calendar events listing returned {}",
                response.status()
            )));
        }

        let listing: ApiEventList = response
            .json()
            .await
            .map_err(|e| EngineError::Provider(e.to_string()))?;

        Ok(listing
            .items
            .into_iter()
            .filter_map(|item| {
                let start = item.start.and_then(|s| s.date_time)?;
                Some(CalendarEvent {
                    id: item.id,
                    summary: item.summary.unwrap_or_default(),
                    description: item.description.unwrap_or_default(),
                    start,
                    end: item.end.and_then(|e| e.date_time),
                })
            })
            .collect())
    }
}

/// Fixed-event provider for tests.
#[derive(Default)]
pub struct StaticCalendarProvider {
    events: std::sync::RwLock<Vec<CalendarEvent>>,
    fail: std::sync::atomic::AtomicBool,
}

impl StaticCalendarProvider {
    pub fn new(events: Vec<CalendarEvent>) -> Self {
        Self {
            events: std::sync::RwLock::new(events),
            fail: Default::default(),
        }
    }

    pub fn set_events(&self, events: Vec<CalendarEvent>) {
        if let Ok(mut slot) = self.events.write() {
            *slot = events;
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl CalendarProvider for StaticCalendarProvider {
    async fn events_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, EngineError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(EngineError::Provider("scripted outage".to_string()));
        }
        let events = self
            .events
            .read()
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        Ok(events
            .iter()
            .filter(|e| e.start >= from && e.start <= to)
            .cloned()
            .collect())
    }
}
