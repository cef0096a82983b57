//! Live capture progress.
//!
//! Socket payloads differ in shape between screenshots and collections;
//! [`wire`] normalizes both into the uniform [`ProgressEvent`], and
//! [`tracker`] keeps the per-entity "last seen" state with its settle-delay
//! eviction.

pub mod tracker;
pub mod wire;

use serde::Serialize;

use crate::capture::{CaptureItem, CaptureKind, CaptureStatus, Metadata};
use crate::types::{CaptureId, Timestamp};

pub use tracker::{Ingested, LiveProgress, ProgressTracker, DEFAULT_SETTLE_DELAY};
pub use wire::{parse_message, CollectionProgressData, RawProgress, ScreenshotProgressData};

/// Normalized progress notification for one screenshot or collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub entity_id: CaptureId,
    pub entity_kind: CaptureKind,
    pub status: CaptureStatus,
    /// Completion percentage, clamped to 0-100.
    pub progress_percent: u8,
    /// Human-readable stage label. Display only.
    pub stage: String,
    pub error: Option<String>,
    pub start_time: Timestamp,
    /// Logical time of the notification; orders events for the same id.
    pub timestamp: Timestamp,
    /// No further progress will follow (completed for good, or failed).
    pub is_final: bool,
    /// Parent collection of a screenshot.
    pub collection_id: Option<CaptureId>,
    pub url: Option<String>,
    pub title: Option<String>,
    pub image_path: Option<String>,
    pub thumbnail_path: Option<String>,
    pub metadata: Metadata,
    pub completed_count: Option<u32>,
    pub total_count: Option<u32>,
}

impl ProgressEvent {
    /// The entity finished successfully and for good.
    pub fn is_completion(&self) -> bool {
        self.is_final && self.status == CaptureStatus::Completed
    }

    /// Whether a collection is still capturing (the aggregate progress card
    /// replaces its list entry and its children's indicators).
    pub fn is_in_flight_collection(&self) -> bool {
        self.entity_kind == CaptureKind::Collection && !self.is_final
    }

    /// Synthesize a store item from a completion payload.
    pub fn to_capture_item(&self) -> CaptureItem {
        CaptureItem {
            id: self.entity_id.clone(),
            kind: self.entity_kind,
            url: self.url.clone().unwrap_or_default(),
            title: self.title.clone(),
            metadata: self.metadata.clone(),
            image_path: self.image_path.clone(),
            thumbnail_path: self.thumbnail_path.clone(),
            status: self.status,
            collection_id: self.collection_id.clone(),
            created_at: self.start_time,
            updated_at: Some(self.timestamp),
            status_at: Some(self.timestamp),
            is_optimistic: false,
        }
    }
}
