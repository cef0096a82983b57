//! Capture item store: the reconciliation core.
//!
//! [`CaptureStore`] is the single keyed collection of capture items for one
//! project. Three kinds of writes land here, in any interleaving:
//!
//! - [`load_snapshot`](CaptureStore::load_snapshot): REST baseline,
//! - [`insert_optimistic`](CaptureStore::insert_optimistic): local inserts
//!   made the instant a capture is submitted,
//! - [`apply_progress`](CaptureStore::apply_progress): socket progress.
//!
//! Every write is an upsert by id with a per-field merge, so interleaved
//! writes converge instead of clobbering each other. Terminal statuses are
//! sticky (see [`CaptureStatus::yields_to`]).

use std::collections::HashMap;

use chrono::{Duration, Utc};

use crate::capture::{same_capture_url, CaptureDraft, CaptureItem, CaptureKind, CaptureStatus};
use crate::error::CoreError;
use crate::progress::ProgressEvent;
use crate::types::CaptureId;

/// How much earlier than an optimistic item a snapshot item may have been
/// created and still count as its server counterpart (client/server clock
/// skew).
pub const OPTIMISTIC_MATCH_SKEW_SECS: i64 = 60;

/// Result of [`CaptureStore::apply_progress`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// An existing item was merged with the event.
    Merged { status_changed: bool },
    /// The event lost against the held status and was ignored.
    Stale,
    /// A completion for an unknown id created a new item; the listed
    /// optimistic duplicates were removed.
    Inserted { dropped_optimistic: Vec<CaptureId> },
    /// Non-completion event for an unknown id; only the live progress card
    /// reflects it.
    Untracked,
}

#[derive(Debug)]
pub struct CaptureStore {
    items: HashMap<CaptureId, CaptureItem>,
    next_temp: u64,
    revision: u64,
}

impl Default for CaptureStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureStore {
    pub fn new() -> Self {
        Self {
            items: HashMap::new(),
            next_temp: 1,
            revision: 0,
        }
    }

    // ---- reads ----

    /// Current items, in no particular order. Ordering is a projection
    /// concern.
    pub fn all(&self) -> impl Iterator<Item = &CaptureItem> + '_ {
        self.items.values()
    }

    pub fn get(&self, id: &CaptureId) -> Option<&CaptureItem> {
        self.items.get(id)
    }

    pub fn contains(&self, id: &CaptureId) -> bool {
        self.items.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Bumped on every write that changed the collection; views compare it
    /// to decide whether to re-project.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    // ---- writes ----

    /// Replace the baseline with a REST snapshot.
    ///
    /// Ids present both locally and in the snapshot are merged per field.
    /// Optimistic items are kept unless the snapshot already contains their
    /// server counterpart (see [`CaptureItem::is_counterpart_of`]), in which
    /// case the counterpart adopts the title and metadata it lacks.
    pub fn load_snapshot(&mut self, items: Vec<CaptureItem>) {
        let previous = std::mem::take(&mut self.items);
        let mut next: HashMap<CaptureId, CaptureItem> = HashMap::with_capacity(items.len());

        for mut incoming in items {
            incoming.is_optimistic = false;
            if let Some(existing) = next.get_mut(&incoming.id) {
                existing.merge_from(&incoming);
                continue;
            }
            let merged = match previous.get(&incoming.id) {
                Some(local) => {
                    let mut local = local.clone();
                    local.merge_from(&incoming);
                    local
                }
                None => incoming,
            };
            next.insert(merged.id.clone(), merged);
        }

        let skew = Duration::seconds(OPTIMISTIC_MATCH_SKEW_SECS);
        let mut kept_optimistic = 0usize;
        for (id, pending) in previous {
            if !pending.is_optimistic || next.contains_key(&id) {
                continue;
            }
            match next
                .values_mut()
                .find(|server| server.is_counterpart_of(&pending, skew))
            {
                Some(server) => {
                    server.fill_gaps_from(&pending);
                    tracing::debug!(
                        temp_id = %id,
                        id = %server.id,
                        url = %pending.url,
                        "Optimistic item confirmed by snapshot",
                    );
                }
                None => {
                    kept_optimistic += 1;
                    next.insert(id, pending);
                }
            }
        }

        tracing::debug!(count = next.len(), kept_optimistic, "Loaded capture snapshot");
        self.items = next;
        self.revision += 1;
    }

    /// Insert a placeholder for a just-submitted capture and return its
    /// temporary id.
    pub fn insert_optimistic(&mut self, draft: CaptureDraft) -> Result<CaptureId, CoreError> {
        let url = draft.url.trim();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(CoreError::Validation(format!(
                "Capture URL must start with http:// or https://, got: '{url}'"
            )));
        }

        let id = CaptureId::temporary(self.next_temp);
        self.next_temp += 1;
        let now = Utc::now();

        let item = CaptureItem {
            id: id.clone(),
            kind: draft.kind,
            url: url.to_string(),
            title: draft.title,
            metadata: draft.metadata,
            image_path: None,
            thumbnail_path: None,
            status: CaptureStatus::Processing,
            collection_id: draft.collection_id,
            created_at: now,
            updated_at: Some(now),
            status_at: Some(now),
            is_optimistic: true,
        };
        self.items.insert(id.clone(), item);
        self.revision += 1;
        Ok(id)
    }

    /// Re-key an optimistic item to the id the server assigned.
    ///
    /// If a completion event already created the server item, the local
    /// fields fill its gaps and the optimistic item is dropped. If the
    /// optimistic item is gone (deduplicated on arrival), the server item is
    /// inserted when unknown.
    pub fn confirm_optimistic(&mut self, temp_id: &CaptureId, mut server: CaptureItem) {
        server.is_optimistic = false;
        let local = self
            .items
            .remove(temp_id)
            .filter(|item| item.is_optimistic);

        match (self.items.get_mut(&server.id), local) {
            (Some(existing), local) => {
                existing.merge_from(&server);
                if let Some(local) = local {
                    existing.fill_gaps_from(&local);
                }
            }
            (None, Some(mut local)) => {
                local.id = server.id.clone();
                local.merge_from(&server);
                local.is_optimistic = false;
                self.items.insert(local.id.clone(), local);
            }
            (None, None) => {
                self.items.insert(server.id.clone(), server);
            }
        }
        self.revision += 1;
    }

    /// Roll back an optimistic insert whose submission failed.
    pub fn discard_optimistic(&mut self, temp_id: &CaptureId) -> Option<CaptureItem> {
        if !self.items.get(temp_id).is_some_and(|item| item.is_optimistic) {
            return None;
        }
        self.revision += 1;
        self.items.remove(temp_id)
    }

    /// Merge a progress event into the store.
    ///
    /// Known ids are merged per field. An unknown id that completed is
    /// synthesized from the event payload, and optimistic items for the same
    /// URL and kind are dropped as its duplicates after handing it their
    /// title and metadata.
    pub fn apply_progress(&mut self, event: &ProgressEvent) -> ApplyOutcome {
        if let Some(item) = self.items.get_mut(&event.entity_id) {
            if !item
                .status
                .yields_to(item.status_observed_at(), event.status, event.timestamp)
            {
                tracing::debug!(
                    id = %event.entity_id,
                    held = %item.status,
                    incoming = %event.status,
                    "Ignoring stale progress for capture",
                );
                return ApplyOutcome::Stale;
            }
            let before = item.status;
            item.merge_from(&event.to_capture_item());
            self.revision += 1;
            return ApplyOutcome::Merged {
                status_changed: before != item.status,
            };
        }

        if !event.is_completion() {
            return ApplyOutcome::Untracked;
        }

        let mut item = event.to_capture_item();
        let duplicates = if item.is_child() || item.url.is_empty() {
            Vec::new()
        } else {
            self.take_optimistic(|pending| {
                pending.kind == item.kind && same_capture_url(&pending.url, &item.url)
            })
        };
        let mut dropped_optimistic = Vec::with_capacity(duplicates.len());
        for pending in duplicates {
            item.fill_gaps_from(&pending);
            dropped_optimistic.push(pending.id);
        }
        tracing::debug!(
            id = %item.id,
            kind = %item.kind,
            dropped = dropped_optimistic.len(),
            "Inserted capture from completion event",
        );
        self.items.insert(item.id.clone(), item);
        self.revision += 1;
        ApplyOutcome::Inserted { dropped_optimistic }
    }

    /// Remove an item, its children (for collections) and any optimistic
    /// submission it is the server counterpart of. Returns every removed id
    /// so the caller can release resources held for them.
    pub fn remove(&mut self, id: &CaptureId) -> Vec<CaptureId> {
        let Some(item) = self.items.remove(id) else {
            return Vec::new();
        };
        let mut removed = vec![item.id.clone()];

        if item.kind == CaptureKind::Collection {
            let children: Vec<CaptureId> = self
                .items
                .values()
                .filter(|child| child.collection_id.as_ref() == Some(&item.id))
                .map(|child| child.id.clone())
                .collect();
            for child in children {
                self.items.remove(&child);
                removed.push(child);
            }
        }

        if !item.is_optimistic && !item.url.is_empty() {
            let skew = Duration::seconds(OPTIMISTIC_MATCH_SKEW_SECS);
            removed.extend(
                self.take_optimistic(|pending| item.is_counterpart_of(pending, skew))
                    .into_iter()
                    .map(|pending| pending.id),
            );
        }

        self.revision += 1;
        removed
    }

    /// Remove and return the optimistic items accepted by `matches`.
    fn take_optimistic(&mut self, matches: impl Fn(&CaptureItem) -> bool) -> Vec<CaptureItem> {
        let ids: Vec<CaptureId> = self
            .items
            .values()
            .filter(|candidate| candidate.is_optimistic && matches(candidate))
            .map(|candidate| candidate.id.clone())
            .collect();
        ids.iter().filter_map(|id| self.items.remove(id)).collect()
    }
}
