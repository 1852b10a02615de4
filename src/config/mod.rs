//! Engine Configuration Module
//!
//! All tunables of the dispatch engine as operator-supplied values.
//!
//! ## Loading Order
//!
//! 1. Built-in defaults (`config::defaults`)
//! 2. TOML file: `$ARBORWATCH_CONFIG` path, else `./arborwatch.toml`
//! 3. `ARBORWATCH_*` environment variables (highest precedence)
//!
//! The configuration is built once at startup and passed explicitly into
//! the components that need it; there is no ambient global.

pub mod defaults;

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ============================================================================
// Threshold config
// ============================================================================

/// Weather threshold bundle consumed by the evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// °C upper bound; strictly above triggers `high_temperature`.
    #[serde(default = "d_temp_high")]
    pub temp_high: f64,
    /// km/h upper bound; strictly above triggers `high_wind`.
    #[serde(default = "d_wind_high")]
    pub wind_high: f64,
    /// mm lower bound; strictly below triggers `drought`.
    #[serde(default = "d_rain_low")]
    pub rain_low: f64,
    /// Case-insensitive substrings that trigger `storm`.
    #[serde(default = "d_storm_keywords")]
    pub storm_keywords: Vec<String>,
}

fn d_temp_high() -> f64 {
    defaults::TEMP_HIGH_C
}
fn d_wind_high() -> f64 {
    defaults::WIND_HIGH_KMH
}
fn d_rain_low() -> f64 {
    defaults::RAIN_LOW_MM
}
fn d_storm_keywords() -> Vec<String> {
    defaults::STORM_KEYWORDS.iter().map(|s| s.to_string()).collect()
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            temp_high: d_temp_high(),
            wind_high: d_wind_high(),
            rain_low: d_rain_low(),
            storm_keywords: d_storm_keywords(),
        }
    }
}

// ============================================================================
// Calendar config
// ============================================================================

/// Calendar provider credentials and scan tuning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalendarConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// System-level refresh token used to list events on behalf of the
    /// engine.
    #[serde(default)]
    pub system_refresh_token: String,
    /// Keywords that make a tree-related event care-relevant.
    #[serde(default = "d_care_keywords")]
    pub care_keywords: Vec<String>,
}

fn d_care_keywords() -> Vec<String> {
    defaults::CALENDAR_CARE_KEYWORDS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

// ============================================================================
// Top-level config
// ============================================================================

/// Root configuration for an engine deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// HTTP bind port.
    #[serde(default = "d_port")]
    pub port: u16,
    /// Sled data directory.
    #[serde(default = "d_db_path")]
    pub db_path: String,
    /// HS256 signing secret shared with the platform's identity surface.
    #[serde(default)]
    pub jwt_secret: String,
    /// Bearer token lifetime (hours).
    #[serde(default = "d_jwt_expiry")]
    pub jwt_expiry_hours: u64,
    /// Weather provider API key.
    #[serde(default)]
    pub weather_api_key: String,
    /// Weather thresholds.
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    /// Radius for the initial volunteer broadcast (km).
    #[serde(default = "d_radius")]
    pub volunteer_match_radius_km: f64,
    /// Weather sweep interval (seconds).
    #[serde(default = "d_weather_poll")]
    pub weather_poll_interval_secs: u64,
    /// Retry sweep interval (seconds).
    #[serde(default = "d_retry_poll")]
    pub retry_poll_interval_secs: u64,
    /// Calendar sweep interval (seconds).
    #[serde(default = "d_calendar_poll")]
    pub calendar_poll_interval_secs: u64,
    /// Calendar provider settings.
    #[serde(default)]
    pub calendar: CalendarConfig,
    /// Accept-timeout knob. Parsed for config-surface completeness;
    /// assigned alerts do not auto-revert (searching-only retry policy).
    #[serde(default = "d_accept_timeout")]
    pub alert_accept_timeout_minutes: u64,
    /// CORS origin allowed to call the API and push channel.
    #[serde(default)]
    pub allowed_client_origin: Option<String>,
}

fn d_port() -> u16 {
    defaults::PORT
}
fn d_db_path() -> String {
    defaults::DB_PATH.to_string()
}
fn d_jwt_expiry() -> u64 {
    defaults::JWT_EXPIRY_HOURS
}
fn d_radius() -> f64 {
    defaults::VOLUNTEER_MATCH_RADIUS_KM
}
fn d_weather_poll() -> u64 {
    defaults::WEATHER_POLL_INTERVAL_SECS
}
fn d_retry_poll() -> u64 {
    defaults::RETRY_POLL_INTERVAL_SECS
}
fn d_calendar_poll() -> u64 {
    defaults::CALENDAR_POLL_INTERVAL_SECS
}
fn d_accept_timeout() -> u64 {
    defaults::ALERT_ACCEPT_TIMEOUT_MINUTES
}

impl Default for EngineConfig {
    fn default() -> Self {
        // Round-trip through serde so the field defaults stay the single
        // source of truth.
        #[allow(clippy::expect_used)]
        toml::from_str("").expect("empty config must deserialize")
    }
}

impl EngineConfig {
    /// Load configuration: defaults, then TOML file, then environment.
    pub fn load() -> Self {
        let mut config = Self::load_file().unwrap_or_default();
        config.apply_env();
        config
    }

    fn load_file() -> Option<Self> {
        let path = std::env::var("ARBORWATCH_CONFIG")
            .map(std::path::PathBuf::from)
            .ok()
            .or_else(|| {
                let cwd = Path::new("arborwatch.toml");
                cwd.exists().then(|| cwd.to_path_buf())
            })?;

        match std::fs::read_to_string(&path) {
            Ok(raw) => match toml::from_str::<Self>(&raw) {
                Ok(config) => {
                    info!(path = %path.display(), "Loaded engine config");
                    Some(config)
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Invalid config file — using defaults");
                    None
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read config file — using defaults");
                None
            }
        }
    }

    /// Overlay `ARBORWATCH_*` environment variables.
    fn apply_env(&mut self) {
        env_parse("ARBORWATCH_PORT", &mut self.port);
        env_string("ARBORWATCH_DB_PATH", &mut self.db_path);
        env_string("ARBORWATCH_JWT_SECRET", &mut self.jwt_secret);
        env_parse("ARBORWATCH_JWT_EXPIRY_HOURS", &mut self.jwt_expiry_hours);
        env_string("ARBORWATCH_WEATHER_API_KEY", &mut self.weather_api_key);
        env_parse("ARBORWATCH_TEMP_HIGH", &mut self.thresholds.temp_high);
        env_parse("ARBORWATCH_WIND_HIGH", &mut self.thresholds.wind_high);
        env_parse("ARBORWATCH_RAIN_LOW", &mut self.thresholds.rain_low);
        env_list("ARBORWATCH_STORM_KEYWORDS", &mut self.thresholds.storm_keywords);
        env_parse(
            "ARBORWATCH_MATCH_RADIUS_KM",
            &mut self.volunteer_match_radius_km,
        );
        env_parse(
            "ARBORWATCH_WEATHER_POLL_SECS",
            &mut self.weather_poll_interval_secs,
        );
        env_parse(
            "ARBORWATCH_RETRY_POLL_SECS",
            &mut self.retry_poll_interval_secs,
        );
        env_parse(
            "ARBORWATCH_CALENDAR_POLL_SECS",
            &mut self.calendar_poll_interval_secs,
        );
        env_string("ARBORWATCH_CALENDAR_CLIENT_ID", &mut self.calendar.client_id);
        env_string(
            "ARBORWATCH_CALENDAR_CLIENT_SECRET",
            &mut self.calendar.client_secret,
        );
        env_string(
            "ARBORWATCH_CALENDAR_REFRESH_TOKEN",
            &mut self.calendar.system_refresh_token,
        );
        env_list("ARBORWATCH_CARE_KEYWORDS", &mut self.calendar.care_keywords);
        env_parse(
            "ARBORWATCH_ACCEPT_TIMEOUT_MINUTES",
            &mut self.alert_accept_timeout_minutes,
        );
        if let Ok(origin) = std::env::var("ARBORWATCH_ALLOWED_ORIGIN") {
            if !origin.is_empty() {
                self.allowed_client_origin = Some(origin);
            }
        }
    }

    /// Bind address derived from the configured port.
    pub fn server_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    /// Match radius in metres, as the matcher consumes it.
    pub fn match_radius_m(&self) -> f64 {
        self.volunteer_match_radius_km * 1_000.0
    }

    /// Log the effective configuration at startup (secrets elided).
    pub fn echo(&self) {
        info!("Engine configuration:");
        info!("   port:                   {}", self.port);
        info!("   db_path:                {}", self.db_path);
        info!("   temp_high:              {}°C", self.thresholds.temp_high);
        info!("   wind_high:              {} km/h", self.thresholds.wind_high);
        info!("   rain_low:               {} mm", self.thresholds.rain_low);
        info!("   storm_keywords:         {:?}", self.thresholds.storm_keywords);
        info!("   match_radius:           {} km", self.volunteer_match_radius_km);
        info!("   weather_poll:           {}s", self.weather_poll_interval_secs);
        info!("   retry_poll:             {}s", self.retry_poll_interval_secs);
        info!("   calendar_poll:          {}s", self.calendar_poll_interval_secs);
        info!("   care_keywords:          {:?}", self.calendar.care_keywords);
        info!(
            "   accept_timeout:         {}min (informational — no auto-revert)",
            self.alert_accept_timeout_minutes
        );
        info!(
            "   allowed_client_origin:  {}",
            self.allowed_client_origin.as_deref().unwrap_or("(any)")
        );
    }
}

fn env_string(key: &str, slot: &mut String) {
    if let Ok(val) = std::env::var(key) {
        if !val.is_empty() {
            *slot = val;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(val) = std::env::var(key) {
        match val.parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => warn!(key, value = %val, "Unparseable env override ignored"),
        }
    }
}

fn env_list(key: &str, slot: &mut Vec<String>) {
    if let Ok(val) = std::env::var(key) {
        let items: Vec<String> = val
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if !items.is_empty() {
            *slot = items;
        }
    }
}
