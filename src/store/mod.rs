//! Persistence layer — sled keyspaces for alerts and volunteers
//!
//! One sled `Db` holds every collection as a named tree:
//! - `alerts`: alert id → JSON alert row
//! - `alerts_active_idx`: `"<tree_id>:<type>"` → alert id (dedupe)
//! - `alerts_calendar_idx`: calendar event id → alert id (per-event dedupe)
//! - `volunteers`: volunteer id → JSON volunteer row
//! - `volunteers_email_idx`: email → volunteer id (uniqueness)
//! - `trees`: tree id → JSON tree row (read model, see providers)
//!
//! State transitions go through `update_and_fetch`, which retries its
//! closure under compare-and-swap until the write lands on an unchanged
//! row. That CAS is the engine's serialisation point: no explicit locks,
//! and for N concurrent accepts exactly one closure run commits the
//! searching → accepted edge.

mod alerts;
mod volunteers;

pub use alerts::{AlertFilter, AlertStore, CasOutcome, SlotClaim};
pub use volunteers::{AvailabilityOutcome, VolunteerStore};

use crate::error::EngineError;

/// Open (or create) the engine database at `path`.
pub fn open_db(path: &str) -> Result<sled::Db, EngineError> {
    sled::open(path).map_err(EngineError::from)
}
