//! Per-entity live progress with settle-delay eviction.
//!
//! [`ProgressTracker`] holds the last seen [`ProgressEvent`] for each
//! screenshot or collection. Once an entry becomes final it is kept for a
//! settle delay (so the progress card does not flicker against the
//! REST-confirmed item) and then evicted by [`ProgressTracker::evict_due`].
//!
//! The tracker never reads a clock; callers pass `now` in.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use super::ProgressEvent;
use crate::capture::CaptureKind;
use crate::types::CaptureId;

/// Grace period between an entry becoming final and its eviction.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(2000);

/// One live progress entry.
#[derive(Debug, Clone)]
pub struct LiveProgress {
    pub event: ProgressEvent,
    /// Set once the entry is final.
    pub evict_at: Option<Instant>,
}

/// Outcome of [`ProgressTracker::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingested {
    /// First notification for this entity.
    Started,
    /// Existing entry updated, still not final.
    Updated,
    /// The entry became final with this event; eviction is scheduled.
    Finalized,
    /// Older than what the tracker already holds; the entry was kept.
    Stale,
}

#[derive(Debug)]
pub struct ProgressTracker {
    live: HashMap<CaptureId, LiveProgress>,
    settle_delay: Duration,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(DEFAULT_SETTLE_DELAY)
    }
}

impl ProgressTracker {
    pub fn new(settle_delay: Duration) -> Self {
        Self {
            live: HashMap::new(),
            settle_delay,
        }
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// Upsert the live entry for `event.entity_id`.
    ///
    /// A final entry is never replaced by a non-final one, and an event
    /// older than the held one is dropped unless it is the first final
    /// event for the entity.
    pub fn record(&mut self, event: ProgressEvent, now: Instant) -> Ingested {
        let settle_delay = self.settle_delay;

        let Some(entry) = self.live.get_mut(&event.entity_id) else {
            let is_final = event.is_final;
            let id = event.entity_id.clone();
            self.live.insert(
                id,
                LiveProgress {
                    event,
                    evict_at: is_final.then(|| now + settle_delay),
                },
            );
            return if is_final {
                Ingested::Finalized
            } else {
                Ingested::Started
            };
        };

        let held = &entry.event;
        let stale = match (held.is_final, event.is_final) {
            (true, false) => true,
            (false, true) => false,
            _ => event.timestamp < held.timestamp,
        };
        if stale {
            tracing::debug!(
                entity_id = %event.entity_id,
                held_status = %held.status,
                incoming_status = %event.status,
                "Ignoring stale progress event",
            );
            return Ingested::Stale;
        }

        let became_final = event.is_final && !held.is_final;
        entry.event = event;
        if became_final {
            entry.evict_at = Some(now + settle_delay);
            Ingested::Finalized
        } else if entry.event.is_final {
            // A newer final event (e.g. completed -> failed) keeps the
            // original deadline.
            Ingested::Updated
        } else {
            entry.evict_at = None;
            Ingested::Updated
        }
    }

    /// Remove and return every entry whose settle delay has elapsed.
    pub fn evict_due(&mut self, now: Instant) -> Vec<CaptureId> {
        let due: Vec<CaptureId> = self
            .live
            .iter()
            .filter(|(_, entry)| entry.evict_at.is_some_and(|at| at <= now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &due {
            self.live.remove(id);
        }
        due
    }

    /// Drop every entry that is not final yet but whose entity `settled`
    /// reports as done elsewhere (a snapshot confirmed its terminal status
    /// while the socket was away). Returns the dropped ids.
    pub fn retire_settled(&mut self, settled: impl Fn(&CaptureId) -> bool) -> Vec<CaptureId> {
        let retired: Vec<CaptureId> = self
            .live
            .iter()
            .filter(|(id, entry)| !entry.event.is_final && settled(*id))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &retired {
            self.live.remove(id);
        }
        retired
    }

    /// Earliest pending eviction, for the caller's timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.live.values().filter_map(|entry| entry.evict_at).min()
    }

    pub fn get(&self, id: &CaptureId) -> Option<&LiveProgress> {
        self.live.get(id)
    }

    pub fn event(&self, id: &CaptureId) -> Option<&ProgressEvent> {
        self.live.get(id).map(|entry| &entry.event)
    }

    pub fn events(&self) -> impl Iterator<Item = &ProgressEvent> {
        self.live.values().map(|entry| &entry.event)
    }

    /// Drop an entry immediately (the entity was deleted).
    pub fn forget(&mut self, id: &CaptureId) -> bool {
        self.live.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Whether the collection `id` is live and still capturing.
    pub fn is_collection_in_flight(&self, id: &CaptureId) -> bool {
        self.event(id)
            .is_some_and(|event| event.is_in_flight_collection())
    }

    /// Whether a screenshot's own indicator is hidden behind its parent
    /// collection's aggregate progress card.
    pub fn is_suppressed(&self, event: &ProgressEvent) -> bool {
        event.entity_kind == CaptureKind::Screenshot
            && event
                .collection_id
                .as_ref()
                .is_some_and(|parent| *parent != event.entity_id && self.is_collection_in_flight(parent))
    }
}
