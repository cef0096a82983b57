//! The owning view of one project.
//!
//! [`ProjectSession`] owns the capture store, the live progress tracker and
//! the image blob cache for a single project, and talks to the REST API on
//! their behalf. It is driven by one task (see [`crate::runner`]); every
//! method takes `&mut self`, so writes from different sources are applied
//! one at a time.
//!
//! Nothing here returns an error to the caller. Failures become
//! [`Notification`]s, a rolled-back optimistic item, or a placeholder image.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use shotline_client::api::{
    ApiError, CaptureApi, CaptureRecord, CreateCrawlRequest, CreateScreenshotRequest,
    ProjectSummary,
};
use shotline_client::auth::TokenSource;
use shotline_client::events::ChannelEvent;
use shotline_client::images::ImageVariant;
use shotline_core::capture::{CaptureDraft, CaptureKind, CaptureStatus};
use shotline_core::error::CoreError;
use shotline_core::progress::{Ingested, ProgressEvent, ProgressTracker};
use shotline_core::projection::{project, ProjectedView};
use shotline_core::store::{ApplyOutcome, CaptureStore};
use shotline_core::types::{CaptureId, ProjectId};
use tokio::time::Instant;

use crate::blob_cache::{BlobError, BlobKey, ImageBlobCache, LocalUrl};
use crate::notifications::{Notification, Notifications};

/// A submission whose optimistic item is already in the store and whose
/// REST call has not completed yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSubmission {
    pub temp_id: CaptureId,
    pub request: SubmissionRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionRequest {
    Screenshot(CreateScreenshotRequest),
    Crawl(CreateCrawlRequest),
}

impl SubmissionRequest {
    pub fn url(&self) -> &str {
        match self {
            Self::Screenshot(request) => &request.url,
            Self::Crawl(request) => &request.url,
        }
    }

    /// Send the request.
    pub async fn send(&self, api: &dyn CaptureApi) -> Result<CaptureRecord, ApiError> {
        match self {
            Self::Screenshot(request) => api.create_screenshot(request).await,
            Self::Crawl(request) => api.create_crawl_screenshot(request).await,
        }
    }
}

pub struct ProjectSession {
    project_id: ProjectId,
    project: Option<ProjectSummary>,
    store: CaptureStore,
    tracker: ProgressTracker,
    images: ImageBlobCache,
    api: Arc<dyn CaptureApi>,
    tokens: Arc<dyn TokenSource>,
    notifications: Notifications,
    /// Images whose fetch failed; skipped until retried by hand.
    failed_images: HashSet<BlobKey>,
    search: String,
    /// Bumped by every write that may change [`Self::view`].
    revision: u64,
    closed: bool,
}

impl ProjectSession {
    pub fn new(
        project_id: impl Into<ProjectId>,
        api: Arc<dyn CaptureApi>,
        tokens: Arc<dyn TokenSource>,
        images: ImageBlobCache,
        settle_delay: Duration,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            project: None,
            store: CaptureStore::new(),
            tracker: ProgressTracker::new(settle_delay),
            images,
            api,
            tokens,
            notifications: Notifications::default(),
            failed_images: HashSet::new(),
            search: String::new(),
            revision: 0,
            closed: false,
        }
    }

    // ---- accessors ----

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Project metadata from the last successful snapshot.
    pub fn project(&self) -> Option<&ProjectSummary> {
        self.project.as_ref()
    }

    pub fn store(&self) -> &CaptureStore {
        &self.store
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    pub fn images(&self) -> &ImageBlobCache {
        &self.images
    }

    pub fn notifications(&self) -> &Notifications {
        &self.notifications
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain()
    }

    /// Changes whenever the projected view may have changed.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn set_search(&mut self, term: impl Into<String>) {
        self.search = term.into();
        self.revision += 1;
    }

    /// The ordered, filtered list to render.
    pub fn view(&self) -> ProjectedView {
        project(self.store.all(), &self.tracker, &self.search)
    }

    // ---- snapshot ----

    /// Reload the baseline from REST. Returns `false` (after notifying) if
    /// the request failed; the previous state is kept.
    pub async fn resync(&mut self) -> bool {
        let snapshot = match self.api.get_project(&self.project_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(project_id = %self.project_id, error = %e, "Project resync failed");
                if e.is_unauthorized() {
                    self.notifications
                        .error("Not authorized to load this project, sign in again");
                } else {
                    self.notifications
                        .warn(format!("Could not refresh project: {e}"));
                }
                return false;
            }
        };

        let before: HashSet<CaptureId> = self.store.all().map(|item| item.id.clone()).collect();
        self.project = Some(snapshot.project.clone());
        self.store.load_snapshot(snapshot.into_items());

        let gone: Vec<CaptureId> = before
            .into_iter()
            .filter(|id| !self.store.contains(id))
            .collect();
        self.release_entities(&gone);

        // Progress that ended while the feed was down never arrives; the
        // snapshot's terminal status retires the frozen live entry.
        let store = &self.store;
        let retired = self.tracker.retire_settled(|id| {
            store
                .get(id)
                .is_some_and(|item| item.status.is_terminal())
        });
        self.revision += 1;

        tracing::info!(
            project_id = %self.project_id,
            count = self.store.len(),
            dropped = gone.len(),
            retired = retired.len(),
            "Loaded project snapshot",
        );
        true
    }

    // ---- submissions ----

    /// Insert the optimistic item for a capture and build its request.
    /// Collections become crawl requests.
    pub fn begin_submission(
        &mut self,
        draft: CaptureDraft,
        max_pages: Option<u32>,
    ) -> Result<PendingSubmission, CoreError> {
        let request = match draft.kind {
            CaptureKind::Screenshot => SubmissionRequest::Screenshot(CreateScreenshotRequest {
                project_id: self.project_id.clone(),
                url: draft.url.trim().to_string(),
                title: draft.title.clone(),
                options: draft.metadata.clone(),
            }),
            CaptureKind::Collection => SubmissionRequest::Crawl(CreateCrawlRequest {
                project_id: self.project_id.clone(),
                url: draft.url.trim().to_string(),
                title: draft.title.clone(),
                max_pages,
            }),
        };
        let temp_id = self.store.insert_optimistic(draft)?;
        self.revision += 1;
        Ok(PendingSubmission { temp_id, request })
    }

    /// Apply the outcome of a submission's REST call: re-key the optimistic
    /// item on success, roll it back on failure.
    pub fn finish_submission(
        &mut self,
        pending: PendingSubmission,
        result: Result<CaptureRecord, ApiError>,
    ) -> Option<CaptureId> {
        self.revision += 1;
        match result {
            Ok(record) => {
                let server_id = record.id.clone();
                tracing::info!(
                    temp_id = %pending.temp_id,
                    id = %server_id,
                    url = %pending.request.url(),
                    "Capture submitted",
                );
                self.store.confirm_optimistic(&pending.temp_id, record.into());
                Some(server_id)
            }
            Err(e) => {
                self.store.discard_optimistic(&pending.temp_id);
                self.notifications.error(format!(
                    "Capture request for {} failed: {e}",
                    pending.request.url()
                ));
                None
            }
        }
    }

    /// Submit a screenshot. Returns the server id once confirmed.
    pub async fn submit_capture(&mut self, draft: CaptureDraft) -> Option<CaptureId> {
        self.submit(draft, None).await
    }

    /// Start a crawl of `draft.url`, capturing at most `max_pages` pages.
    pub async fn submit_crawl(
        &mut self,
        draft: CaptureDraft,
        max_pages: Option<u32>,
    ) -> Option<CaptureId> {
        let draft = CaptureDraft {
            kind: CaptureKind::Collection,
            ..draft
        };
        self.submit(draft, max_pages).await
    }

    async fn submit(&mut self, draft: CaptureDraft, max_pages: Option<u32>) -> Option<CaptureId> {
        let pending = match self.begin_submission(draft, max_pages) {
            Ok(pending) => pending,
            Err(e) => {
                self.notifications.error(e.to_string());
                return None;
            }
        };
        let result = pending.request.send(self.api.as_ref()).await;
        self.finish_submission(pending, result)
    }

    /// Forward the user's URL selection for a crawl collection.
    pub async fn select_crawl_urls(&mut self, collection_id: &CaptureId, urls: &[String]) -> bool {
        match self.api.select_crawl_urls(collection_id, urls).await {
            Ok(()) => {
                tracing::info!(id = %collection_id, count = urls.len(), "Crawl URLs selected");
                true
            }
            Err(e) => {
                self.notifications
                    .error(format!("Could not select pages to capture: {e}"));
                false
            }
        }
    }

    // ---- deletion ----

    /// Delete a screenshot or collection.
    ///
    /// Local state changes only after the server confirms; on failure the
    /// item stays and an error is notified. Optimistic items are local only
    /// and are dropped directly.
    pub async fn delete(&mut self, id: &CaptureId) -> bool {
        if id.is_temporary() {
            let discarded = self.store.discard_optimistic(id).is_some();
            if discarded {
                self.revision += 1;
                self.release_entities(std::slice::from_ref(id));
            }
            return discarded;
        }

        let Some(kind) = self.store.get(id).map(|item| item.kind) else {
            tracing::debug!(id = %id, "Delete requested for unknown capture");
            return false;
        };

        let result = match kind {
            CaptureKind::Screenshot => self.api.delete_screenshot(id).await,
            CaptureKind::Collection => self.api.delete_collection(id).await,
        };

        match result {
            Ok(()) => {
                let removed = self.store.remove(id);
                self.revision += 1;
                tracing::info!(id = %id, %kind, removed = removed.len(), "Capture deleted");
                self.release_entities(&removed);
                true
            }
            Err(e) => {
                self.notifications
                    .error(format!("Could not delete {kind} {id}: {e}"));
                false
            }
        }
    }

    // ---- progress ----

    /// Apply one event from the progress feed.
    ///
    /// Every `Connected` triggers a resync: progress sent while disconnected
    /// is not replayed.
    pub async fn handle_channel_event(&mut self, event: ChannelEvent, now: Instant) {
        match event {
            ChannelEvent::Connected { client_id, .. } => {
                tracing::info!(project_id = %self.project_id, client_id = %client_id, "Progress feed connected");
                self.resync().await;
            }
            ChannelEvent::Disconnected { .. } => {
                self.notifications
                    .warn("Live progress disconnected, reconnecting");
            }
            ChannelEvent::Progress(event) => {
                self.apply_progress(event, now);
            }
        }
    }

    /// Record a progress event and merge it into the store.
    pub fn apply_progress(&mut self, event: ProgressEvent, now: Instant) -> Option<ApplyOutcome> {
        let verdict = self.tracker.record(event.clone(), now);
        if verdict == Ingested::Stale {
            return None;
        }
        self.revision += 1;

        let outcome = self.store.apply_progress(&event);
        match &outcome {
            ApplyOutcome::Inserted { dropped_optimistic } => {
                self.release_entities(dropped_optimistic);
            }
            // A late event for an item that already settled must not start
            // a fresh live entry that nothing would evict.
            ApplyOutcome::Stale if verdict == Ingested::Started => {
                self.tracker.forget(&event.entity_id);
            }
            _ => {}
        }

        if verdict == Ingested::Finalized && event.status == CaptureStatus::Failed {
            let what = event
                .title
                .clone()
                .or_else(|| event.url.clone())
                .unwrap_or_else(|| format!("{} {}", event.entity_kind, event.entity_id));
            let reason = event.error.as_deref().unwrap_or("unknown error");
            self.notifications
                .warn(format!("Capture of {what} failed: {reason}"));
        }
        Some(outcome)
    }

    /// Evict live progress whose settle delay elapsed.
    pub fn evict_due(&mut self, now: Instant) -> Vec<CaptureId> {
        let evicted = self.tracker.evict_due(now);
        if !evicted.is_empty() {
            tracing::debug!(count = evicted.len(), "Evicted settled progress");
            self.revision += 1;
        }
        evicted
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.tracker.next_deadline()
    }

    // ---- images ----

    pub fn image(&self, id: &CaptureId, variant: ImageVariant) -> Option<LocalUrl> {
        self.images.get(id, variant)
    }

    /// Whether the image failed and waits for [`retry_image`](Self::retry_image).
    pub fn image_failed(&self, id: &CaptureId, variant: ImageVariant) -> bool {
        self.failed_images
            .contains(&BlobKey::new(id.clone(), variant))
    }

    /// Load one image unless it already failed. `None` means "show the
    /// placeholder".
    pub async fn ensure_image(&mut self, id: &CaptureId, variant: ImageVariant) -> Option<LocalUrl> {
        let key = BlobKey::new(id.clone(), variant);
        if let Some(url) = self.images.get(id, variant) {
            return Some(url);
        }
        if self.failed_images.contains(&key) {
            return None;
        }

        let token = self.tokens.bearer_token();
        match self.images.ensure(id, variant, token.as_deref()).await {
            Ok(url) => Some(url),
            Err(e) => {
                if let Some(message) = self.record_image_failure(key, &e) {
                    self.notifications.warn(message);
                }
                None
            }
        }
    }

    /// Explicit "try again" for an image that failed.
    pub async fn retry_image(&mut self, id: &CaptureId, variant: ImageVariant) -> Option<LocalUrl> {
        self.failed_images
            .remove(&BlobKey::new(id.clone(), variant));
        self.ensure_image(id, variant).await
    }

    /// Load images for every completed item in the current view,
    /// concurrently. Returns how many are available afterwards.
    pub async fn ensure_visible_images(&mut self, variant: ImageVariant) -> usize {
        let keys: Vec<BlobKey> = self
            .view()
            .items
            .into_iter()
            .filter(|projected| {
                projected.item.status == CaptureStatus::Completed && !projected.item.is_optimistic
            })
            .map(|projected| BlobKey::new(projected.item.id, variant))
            .filter(|key| !self.failed_images.contains(key))
            .collect();

        let token = self.tokens.bearer_token();
        let results = join_all(keys.iter().map(|key| {
            let cache = self.images.clone();
            let token = token.clone();
            async move { cache.ensure(&key.entity_id, key.variant, token.as_deref()).await }
        }))
        .await;

        let mut available = 0;
        let mut failures: Vec<String> = Vec::new();
        for (key, result) in keys.into_iter().zip(results) {
            match result {
                Ok(_) => available += 1,
                Err(e) => failures.extend(self.record_image_failure(key, &e)),
            }
        }
        if let Some(first) = failures.first() {
            self.notifications.warn(if failures.len() == 1 {
                first.clone()
            } else {
                format!("{} images could not be loaded: {first}", failures.len())
            });
        }
        available
    }

    /// Returns the message to notify, if any.
    fn record_image_failure(&mut self, key: BlobKey, error: &BlobError) -> Option<String> {
        match error {
            BlobError::Released => None,
            BlobError::MissingToken => Some("Sign in to load images".to_string()),
            BlobError::Fetch(_) => {
                let message = format!("Image for {} could not be loaded: {error}", key.entity_id);
                self.failed_images.insert(key);
                Some(message)
            }
        }
    }

    // ---- lifetime ----

    fn release_entities(&mut self, ids: &[CaptureId]) {
        for id in ids {
            self.images.release(id);
            self.tracker.forget(id);
        }
        self.failed_images
            .retain(|key| !ids.contains(&key.entity_id));
    }

    /// Release every image URL this session created. Idempotent; also runs
    /// on drop.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let released = self.images.release_all();
        tracing::info!(project_id = %self.project_id, released, "Project session closed");
    }
}

impl Drop for ProjectSession {
    fn drop(&mut self) {
        self.close();
    }
}
