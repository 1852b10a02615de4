//! Schedulers — periodic sweeps with deterministic tick functions
//!
//! Each sweep is an explicit component: construct it with its
//! dependencies (the push bus included — no ambient singletons), call
//! `tick()` directly from tests or the admin trigger surface, or let
//! `start()` drive it on an interval until the cancellation token fires.
//! Timers may overlap with request-initiated transitions; every mutation
//! a sweep performs is a conditional update, so a lost race is benign.

mod calendar;
mod retry;
mod weather;

pub use calendar::{CalendarSweep, CalendarSweepReport};
pub use retry::{RetrySweep, RetrySweepReport};
pub use weather::{WeatherSweep, WeatherSweepReport};

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Drive `tick` every `interval` until cancelled. The first tick fires
/// one full interval after start; admin triggers cover the gap.
pub(crate) fn spawn_periodic<F, Fut>(
    name: &'static str,
    interval: Duration,
    cancel: CancellationToken,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        info!(sweep = name, interval_secs = interval.as_secs(), "sweep scheduler started");
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // interval() fires immediately; consume the first tick so the
        // sweep starts after one full period.
        timer.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(sweep = name, "sweep scheduler stopped");
                    break;
                }
                _ = timer.tick() => tick().await,
            }
        }
    })
}
