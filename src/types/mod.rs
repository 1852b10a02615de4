//! Shared data structures for the alert dispatch engine
//!
//! This module defines the core types flowing through the pipeline:
//! - Tree: read-only view of a monitored tree (external lifecycle)
//! - Volunteer: dispatchable responder with availability state
//! - WeatherSnapshot / CalendarEvent: trigger context from the providers
//! - Alert: the unit of work offered to volunteers

mod alert;
mod tree;
mod volunteer;
mod weather;

pub use alert::*;
pub use tree::*;
pub use volunteer::*;
pub use weather::*;
