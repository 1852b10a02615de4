//! External collaborator interfaces
//!
//! The engine touches the rest of the platform only through these narrow
//! traits: a read-only tree repository, a weather provider, and a
//! calendar provider. Implementations must be thread-safe (Send + Sync)
//! for shared access across async tasks; each carries its own request
//! deadline so a hung upstream cannot stall a sweep.

mod calendar;
mod trees;
mod weather;

pub use calendar::{CalendarClient, StaticCalendarProvider};
pub use trees::{InMemoryTreeRepository, SledTreeRepository};
pub use weather::{OpenWeatherClient, ScriptedWeatherProvider};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::EngineError;
use crate::geo::GeoPoint;
use crate::types::{CalendarEvent, Tree, WeatherSnapshot};

/// Read-only source of monitored trees.
#[async_trait]
pub trait TreeRepository: Send + Sync {
    /// Every active tree, in implementation-defined order.
    async fn list_active(&self) -> Result<Vec<Tree>, EngineError>;

    /// Fetch one tree by id (active or not).
    async fn get(&self, id: &str) -> Result<Option<Tree>, EngineError>;
}

/// Weather snapshot source.
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    /// Current conditions at a point, unit-normalised (°C, km/h, %, mm).
    async fn snapshot(&self, point: GeoPoint) -> Result<WeatherSnapshot, EngineError>;
}

/// Scheduled care event source, authenticated on behalf of the engine.
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    /// Events starting inside `[from, to]`.
    async fn events_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, EngineError>;
}
