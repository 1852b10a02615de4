//! System-wide default constants.
//!
//! Centralises the tunables of the dispatch engine. Grouped by subsystem
//! for easy discovery; every value can be overridden via TOML file or
//! environment (see `EngineConfig::load`).

// ============================================================================
// Weather thresholds
// ============================================================================

/// Temperature upper bound (°C). Strictly above triggers `high_temperature`.
pub const TEMP_HIGH_C: f64 = 35.0;

/// Wind speed upper bound (km/h). Strictly above triggers `high_wind`.
pub const WIND_HIGH_KMH: f64 = 60.0;

/// Rainfall lower bound (mm over the preceding hour). Strictly below
/// triggers `drought`.
pub const RAIN_LOW_MM: f64 = 5.0;

/// Case-insensitive substrings of the weather description that trigger
/// a `storm` alert.
pub const STORM_KEYWORDS: &[&str] = &["thunderstorm", "tornado", "hurricane"];

// ============================================================================
// Matching
// ============================================================================

/// Radius around the tree for the initial volunteer broadcast (km).
pub const VOLUNTEER_MATCH_RADIUS_KM: f64 = 5.0;

/// Maximum volunteers returned by a proximity query.
pub const MATCH_RESULT_CAP: usize = 50;

// ============================================================================
// Sweeps
// ============================================================================

/// Weather sweep interval (seconds). 900 = 15 minutes.
pub const WEATHER_POLL_INTERVAL_SECS: u64 = 900;

/// Retry sweep interval (seconds). 120 = 2 minutes.
pub const RETRY_POLL_INTERVAL_SECS: u64 = 120;

/// Calendar sweep interval (seconds). 1 800 = 30 minutes; also
/// admin-triggerable on demand.
pub const CALENDAR_POLL_INTERVAL_SECS: u64 = 1_800;

/// Retry broadcasts before an unclaimed alert is cancelled.
pub const MAX_RETRY_COUNT: u32 = 3;

/// Deadline for a single provider call inside a sweep (seconds).
pub const PROVIDER_CALL_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Calendar
// ============================================================================

/// How far ahead the calendar sweep looks (days).
pub const CALENDAR_LOOKAHEAD_DAYS: i64 = 7;

/// Keywords that make a tree-related event care-relevant.
pub const CALENDAR_CARE_KEYWORDS: &[&str] = &[
    "watering",
    "pruning",
    "inspection",
    "trimming",
    "fertilizing",
    "treatment",
];

// ============================================================================
// Auth / server
// ============================================================================

/// Bearer token lifetime (hours).
pub const JWT_EXPIRY_HOURS: u64 = 24;

/// Accept-timeout knob carried by the configuration surface. Parsed and
/// echoed at startup; assigned alerts do not auto-revert (searching-only
/// retry policy).
pub const ALERT_ACCEPT_TIMEOUT_MINUTES: u64 = 30;

/// HTTP bind port.
pub const PORT: u16 = 8080;

/// Sled data directory.
pub const DB_PATH: &str = "./data/arborwatch";

// ============================================================================
// Push bus
// ============================================================================

/// Broadcast channel capacity. Sized to absorb a full-fleet retry
/// broadcast burst without lagging subscribers.
pub const PUSH_CHANNEL_CAPACITY: usize = 4_096;
