//! Pure reconciliation of stream events into the bounded run list.
//!
//! Nothing here touches I/O or timers: the supervisor feeds the current list
//! and an event in, and publishes whatever comes out.

use std::collections::HashSet;

use crate::domain::{Run, RunEventKind, RunStreamEvent};

/// Default capacity of the bounded run list.
pub const DEFAULT_MAX_RUNS: usize = 50;

/// Apply one stream event to `runs`, returning the next list.
///
/// - unseen id: prepended, whatever the event kind (an `update` that beats
///   its `start` is treated as an implicit start)
/// - known id: fields merged in place, position unchanged
///
/// The result never holds more than `max_runs` entries; the rearmost are
/// dropped first.
pub fn reconcile(mut runs: Vec<Run>, event: RunStreamEvent, max_runs: usize) -> Vec<Run> {
    let RunStreamEvent { kind, data } = event;

    match runs.iter_mut().find(|run| run.id == data.id) {
        Some(existing) => {
            if kind == RunEventKind::Start {
                tracing::trace!(run_id = %data.id, "duplicate start merged in place");
            }
            existing.merge(data);
        }
        None => {
            if kind != RunEventKind::Start {
                tracing::debug!(run_id = %data.id, kind = ?kind, "orphan event treated as start");
            }
            runs.insert(0, data);
        }
    }

    truncate_runs(runs, max_runs)
}

/// Clamp a list to the first `max_runs` distinct runs.
///
/// A repeated id keeps only its first (most recent) occurrence, in place.
pub fn truncate_runs(mut runs: Vec<Run>, max_runs: usize) -> Vec<Run> {
    let mut seen = HashSet::with_capacity(runs.len().min(max_runs));
    runs.retain(|run| seen.len() < max_runs && seen.insert(run.id.clone()));
    runs
}
