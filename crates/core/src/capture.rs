//! Capture items: the unit of reconciliation.
//!
//! A [`CaptureItem`] is either a single screenshot or a collection (a crawl
//! result or multi-frame capture) that aggregates child screenshots. Items
//! arrive from three sources -- REST snapshots, optimistic local inserts and
//! socket progress events -- and are merged field by field.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{CaptureId, Timestamp};

/// Opaque key/value bag (capture dimensions, file size, capture time, ...).
pub type Metadata = BTreeMap<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Kind / status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureKind {
    Screenshot,
    Collection,
}

impl fmt::Display for CaptureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Screenshot => f.write_str("screenshot"),
            Self::Collection => f.write_str("collection"),
        }
    }
}

/// Capture lifecycle: `pending -> processing -> completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    #[serde(alias = "queued")]
    Pending,
    #[serde(alias = "in_progress", alias = "running", alias = "capturing")]
    Processing,
    #[serde(alias = "done", alias = "success")]
    Completed,
    #[serde(alias = "error")]
    Failed,
}

impl CaptureStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Decide whether an incoming status observed at `incoming_at` replaces
    /// this status observed at `current_at`.
    ///
    /// Terminal statuses beat non-terminal ones regardless of timestamps;
    /// within the same class the later observation wins and ties go to the
    /// incoming write.
    pub fn yields_to(self, current_at: Timestamp, incoming: Self, incoming_at: Timestamp) -> bool {
        match (self.is_terminal(), incoming.is_terminal()) {
            (true, false) => false,
            (false, true) => true,
            _ => incoming_at >= current_at,
        }
    }
}

impl fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// CaptureItem
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureItem {
    pub id: CaptureId,
    pub kind: CaptureKind,
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub thumbnail_path: Option<String>,
    pub status: CaptureStatus,
    /// Parent collection. A value different from `id` marks a child item.
    #[serde(default)]
    pub collection_id: Option<CaptureId>,
    pub created_at: Timestamp,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
    /// When the current `status` was observed. Kept apart from `updated_at`
    /// so a late terminal event is compared against the status write only.
    #[serde(default, skip_serializing)]
    pub status_at: Option<Timestamp>,
    #[serde(default)]
    pub is_optimistic: bool,
}

impl CaptureItem {
    /// Whether this item belongs to a parent collection other than itself.
    pub fn is_child(&self) -> bool {
        self.collection_id.as_ref().is_some_and(|parent| *parent != self.id)
    }

    /// `updated_at`, falling back to `created_at`.
    pub fn last_modified(&self) -> Timestamp {
        self.updated_at.unwrap_or(self.created_at)
    }

    pub fn status_observed_at(&self) -> Timestamp {
        self.status_at.unwrap_or_else(|| self.last_modified())
    }

    /// Apply a status observed at `observed_at`, honouring terminal
    /// stickiness. Returns `true` when the status changed hands.
    pub fn merge_status(&mut self, incoming: CaptureStatus, observed_at: Timestamp) -> bool {
        if !self.status.yields_to(self.status_observed_at(), incoming, observed_at) {
            return false;
        }
        self.status = incoming;
        self.status_at = Some(observed_at);
        true
    }

    /// Raise `updated_at` to `at` if it is newer.
    pub fn touch(&mut self, at: Timestamp) {
        if self.updated_at.map_or(true, |current| at > current) {
            self.updated_at = Some(at);
        }
    }

    /// Per-field merge of another version of the same item.
    ///
    /// Present optional fields overwrite, absent ones keep the local value,
    /// metadata merges key-wise and the status follows [`Self::merge_status`].
    pub fn merge_from(&mut self, other: &CaptureItem) {
        if !other.url.is_empty() {
            self.url.clone_from(&other.url);
        }
        merge_opt(&mut self.title, &other.title);
        merge_opt(&mut self.image_path, &other.image_path);
        merge_opt(&mut self.thumbnail_path, &other.thumbnail_path);
        merge_opt(&mut self.collection_id, &other.collection_id);
        for (key, value) in &other.metadata {
            self.metadata.insert(key.clone(), value.clone());
        }
        self.merge_status(other.status, other.status_observed_at());
        if other.created_at < self.created_at {
            self.created_at = other.created_at;
        }
        self.touch(other.last_modified());
        self.is_optimistic = self.is_optimistic && other.is_optimistic;
    }

    /// Adopt what a superseded local version knew that this one does not:
    /// the title when unset and metadata keys that are missing. Never
    /// overwrites a value already present.
    pub fn fill_gaps_from(&mut self, local: &CaptureItem) {
        if self.title.is_none() {
            self.title.clone_from(&local.title);
        }
        for (key, value) in &local.metadata {
            self.metadata
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    /// Whether this server item can stand for the optimistic `pending` one:
    /// same kind and URL, not a collection child, and created no earlier
    /// than `pending` minus `skew`.
    pub fn is_counterpart_of(&self, pending: &CaptureItem, skew: chrono::Duration) -> bool {
        !self.is_optimistic
            && !self.is_child()
            && self.kind == pending.kind
            && same_capture_url(&self.url, &pending.url)
            && self.created_at >= pending.created_at - skew
    }
}

fn merge_opt<T: Clone>(local: &mut Option<T>, incoming: &Option<T>) {
    if let Some(value) = incoming {
        *local = Some(value.clone());
    }
}

// ---------------------------------------------------------------------------
// Draft
// ---------------------------------------------------------------------------

/// What the user submitted; becomes an optimistic [`CaptureItem`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureDraft {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    pub kind: CaptureKind,
    #[serde(default)]
    pub collection_id: Option<CaptureId>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl CaptureDraft {
    pub fn screenshot(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            kind: CaptureKind::Screenshot,
            collection_id: None,
            metadata: Metadata::new(),
        }
    }

    pub fn collection(url: impl Into<String>) -> Self {
        Self {
            kind: CaptureKind::Collection,
            ..Self::screenshot(url)
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Compare two capture URLs the way duplicate detection does: surrounding
/// whitespace and a single trailing slash are ignored, scheme and host are
/// case-insensitive.
pub fn same_capture_url(a: &str, b: &str) -> bool {
    normalize_url(a) == normalize_url(b)
}

fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    match trimmed.find("://") {
        Some(scheme_end) => {
            let authority_start = scheme_end + 3;
            let path_start = trimmed[authority_start..]
                .find('/')
                .map_or(trimmed.len(), |i| authority_start + i);
            format!(
                "{}{}",
                trimmed[..path_start].to_ascii_lowercase(),
                &trimmed[path_start..]
            )
        }
        None => trimmed.to_string(),
    }
}
