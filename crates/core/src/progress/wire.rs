//! Socket progress message types and normalization.
//!
//! The capture service sends JSON messages shaped
//! `{"type": "<kind>", "data": {...}}`. Screenshot and collection payloads
//! use different field names, so both are deserialized into the tagged
//! [`RawProgress`] enum and then normalized into a [`ProgressEvent`].

use serde::Deserialize;

use super::ProgressEvent;
use crate::capture::{CaptureKind, CaptureStatus, Metadata};
use crate::socket_events::{MSG_TYPE_COLLECTION_PROGRESS, MSG_TYPE_SCREENSHOT_PROGRESS};
use crate::types::{CaptureId, Timestamp};

/// All progress message types the socket delivers.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RawProgress {
    #[serde(rename = "screenshot_progress")]
    Screenshot(ScreenshotProgressData),

    #[serde(rename = "collection_progress")]
    Collection(CollectionProgressData),
}

/// Payload for `screenshot_progress` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ScreenshotProgressData {
    pub screenshot_id: CaptureId,
    pub status: CaptureStatus,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub thumbnail_path: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub collection_id: Option<CaptureId>,
    #[serde(default)]
    pub started_at: Option<Timestamp>,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

/// Payload for `collection_progress` messages.
///
/// Collections can report 100% while the capture is still scrolling or
/// starting the next frame; `is_final` is the authoritative completion flag
/// when the server sends it.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionProgressData {
    pub collection_id: CaptureId,
    pub status: CaptureStatus,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default, alias = "stage")]
    pub current_stage: Option<String>,
    #[serde(default)]
    pub is_final: Option<bool>,
    #[serde(default)]
    pub is_scrolling: bool,
    #[serde(default)]
    pub is_starting: bool,
    #[serde(default)]
    pub completed_count: Option<u32>,
    #[serde(default)]
    pub total_count: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, alias = "title")]
    pub name: Option<String>,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub thumbnail_path: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub started_at: Option<Timestamp>,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

impl RawProgress {
    /// Message type string as sent on the wire.
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::Screenshot(_) => MSG_TYPE_SCREENSHOT_PROGRESS,
            Self::Collection(_) => MSG_TYPE_COLLECTION_PROGRESS,
        }
    }

    /// Normalize into a [`ProgressEvent`]. Missing timestamps are stamped
    /// with `received_at`.
    pub fn normalize(self, received_at: Timestamp) -> ProgressEvent {
        match self {
            Self::Screenshot(data) => normalize_screenshot(data, received_at),
            Self::Collection(data) => normalize_collection(data, received_at),
        }
    }
}

/// Parse a socket text frame into a typed message.
///
/// Returns `Err` for malformed JSON or unknown `type` values.
/// Callers should log and continue.
pub fn parse_message(text: &str) -> Result<RawProgress, serde_json::Error> {
    serde_json::from_str(text)
}

/// Clamp a reported percentage to 0-100. A payload without a percentage
/// counts as 100 once it reports `completed`.
fn clamp_percent(progress: Option<f64>, status: CaptureStatus) -> u8 {
    match progress {
        Some(p) if p.is_nan() => 0,
        Some(p) => p.round().clamp(0.0, 100.0) as u8,
        None if status == CaptureStatus::Completed => 100,
        None => 0,
    }
}

fn normalize_screenshot(data: ScreenshotProgressData, received_at: Timestamp) -> ProgressEvent {
    let mut percent = clamp_percent(data.progress, data.status);
    if data.status == CaptureStatus::Completed {
        percent = 100;
    }
    let timestamp = data.timestamp.unwrap_or(received_at);

    ProgressEvent {
        entity_id: data.screenshot_id,
        entity_kind: CaptureKind::Screenshot,
        status: data.status,
        progress_percent: percent,
        stage: data.stage.unwrap_or_default(),
        error: data.error,
        start_time: data.started_at.unwrap_or(timestamp),
        timestamp,
        is_final: data.status.is_terminal(),
        collection_id: data.collection_id,
        url: data.url,
        title: data.title,
        image_path: data.image_path,
        thumbnail_path: data.thumbnail_path,
        metadata: data.metadata,
        completed_count: None,
        total_count: None,
    }
}

/// Whether a collection payload describes a finished capture.
///
/// An explicit `is_final` flag decides on its own. Without it, the capture
/// is complete at 100% only when no sub-stage flag reports ongoing work.
fn collection_is_complete(data: &CollectionProgressData, percent: u8) -> bool {
    match data.is_final {
        Some(is_final) => is_final,
        None => percent >= 100 && !data.is_scrolling && !data.is_starting,
    }
}

fn normalize_collection(data: CollectionProgressData, received_at: Timestamp) -> ProgressEvent {
    let percent = clamp_percent(data.progress, data.status);
    let failed = data.status == CaptureStatus::Failed;
    let complete = !failed && collection_is_complete(&data, percent);

    let status = if failed {
        CaptureStatus::Failed
    } else if complete {
        CaptureStatus::Completed
    } else if data.status == CaptureStatus::Completed {
        // Reported done while a sub-stage is still running.
        CaptureStatus::Processing
    } else {
        data.status
    };
    let timestamp = data.timestamp.unwrap_or(received_at);

    ProgressEvent {
        entity_id: data.collection_id.clone(),
        entity_kind: CaptureKind::Collection,
        status,
        progress_percent: if complete { 100 } else { percent },
        stage: data.current_stage.unwrap_or_default(),
        error: data.error,
        start_time: data.started_at.unwrap_or(timestamp),
        timestamp,
        is_final: failed || complete,
        collection_id: Some(data.collection_id),
        url: data.url,
        title: data.name,
        image_path: data.image_path,
        thumbnail_path: data.thumbnail_path,
        metadata: data.metadata,
        completed_count: data.completed_count,
        total_count: data.total_count,
    }
}
