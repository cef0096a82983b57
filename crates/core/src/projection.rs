//! Read-side projection of the store into the rendered list.
//!
//! [`project`] is a pure function of the store items, the live progress
//! tracker and a search term. It is cheap enough to re-run on every change.

use std::cmp::Reverse;
use std::collections::HashMap;

use serde::Serialize;

use crate::capture::{CaptureItem, CaptureKind, CaptureStatus};
use crate::progress::{ProgressEvent, ProgressTracker};
use crate::types::CaptureId;

/// One top-level entry of the list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectedItem {
    pub item: CaptureItem,
    /// Live progress for the item, unless hidden behind a parent
    /// collection's aggregate card.
    pub live: Option<ProgressEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProjectedView {
    pub items: Vec<ProjectedItem>,
    /// In-flight collections and live screenshots the store does not know
    /// yet, newest first.
    pub progress_cards: Vec<ProgressEvent>,
}

impl ProjectedView {
    pub fn ids(&self) -> impl Iterator<Item = &CaptureId> {
        self.items.iter().map(|projected| &projected.item.id)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.progress_cards.is_empty()
    }
}

/// Derive the ordered, de-duplicated, filtered list.
///
/// 1. Deduplicate by id, the last value wins.
/// 2. Drop child items.
/// 3. Drop collections that are still capturing; they show as a card.
/// 4. Keep items whose title, url or collection name contains `search`
///    (case-insensitive).
/// 5. Completed items first, then newest `updated_at` (or `created_at`).
pub fn project<'a, I>(items: I, tracker: &ProgressTracker, search: &str) -> ProjectedView
where
    I: IntoIterator<Item = &'a CaptureItem>,
{
    let mut by_id: HashMap<&CaptureId, &CaptureItem> = HashMap::new();
    for item in items {
        by_id.insert(&item.id, item);
    }

    let collection_names: HashMap<&CaptureId, &str> = by_id
        .values()
        .filter(|item| item.kind == CaptureKind::Collection)
        .filter_map(|item| item.title.as_deref().map(|title| (&item.id, title)))
        .collect();

    let needle = search.trim().to_lowercase();

    let mut visible: Vec<&CaptureItem> = by_id
        .values()
        .copied()
        .filter(|item| !item.is_child())
        .filter(|item| !tracker.is_collection_in_flight(&item.id))
        .filter(|item| {
            let collection_name = item
                .collection_id
                .as_ref()
                .unwrap_or(&item.id);
            matches_search(
                &needle,
                item.title.as_deref(),
                &item.url,
                collection_names.get(collection_name).copied(),
            )
        })
        .collect();

    visible.sort_by_key(|item| {
        (
            item.status != CaptureStatus::Completed,
            Reverse(item.last_modified()),
            item.id.clone(),
        )
    });

    let projected = visible
        .into_iter()
        .map(|item| ProjectedItem {
            item: item.clone(),
            live: tracker
                .event(&item.id)
                .filter(|event| !tracker.is_suppressed(event))
                .cloned(),
        })
        .collect();

    let mut progress_cards: Vec<ProgressEvent> = tracker
        .events()
        .filter(|event| {
            if event.is_in_flight_collection() {
                return true;
            }
            event.entity_kind == CaptureKind::Screenshot
                && !event.is_final
                && !by_id.contains_key(&event.entity_id)
                && !tracker.is_suppressed(event)
                && !has_known_parent(event, &by_id)
        })
        .filter(|event| {
            matches_search(
                &needle,
                event.title.as_deref(),
                event.url.as_deref().unwrap_or_default(),
                None,
            )
        })
        .cloned()
        .collect();
    progress_cards.sort_by(|a, b| {
        b.start_time
            .cmp(&a.start_time)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });

    ProjectedView {
        items: projected,
        progress_cards,
    }
}

fn has_known_parent(event: &ProgressEvent, by_id: &HashMap<&CaptureId, &CaptureItem>) -> bool {
    event
        .collection_id
        .as_ref()
        .is_some_and(|parent| *parent != event.entity_id && by_id.contains_key(parent))
}

fn matches_search(needle: &str, title: Option<&str>, url: &str, collection_name: Option<&str>) -> bool {
    if needle.is_empty() {
        return true;
    }
    [title, Some(url), collection_name]
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(needle))
}
