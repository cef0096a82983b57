#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use shotline_client::api::{
    ApiError, CaptureApi, CaptureRecord, CreateCrawlRequest, CreateScreenshotRequest,
    ProjectSnapshot, ProjectSummary,
};
use shotline_client::auth::StaticToken;
use shotline_client::images::{ImageBytes, ImageFetchError, ImageFetcher, ImageVariant};
use shotline_core::capture::{CaptureKind, CaptureStatus, Metadata};
use shotline_core::progress::{parse_message, ProgressEvent};
use shotline_core::types::CaptureId;
use shotline_session::blob_cache::{ImageBlobCache, MemoryObjectStore};
use shotline_session::session::ProjectSession;

// ---------------------------------------------------------------------------
// Fake REST API
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeApiState {
    pub records: Vec<CaptureRecord>,
    pub next_id: u64,
    pub fail_create: bool,
    pub fail_delete: bool,
    pub fail_get: bool,
    pub reject_token: bool,
    pub get_calls: usize,
    pub deleted: Vec<CaptureId>,
    pub selected: Vec<(CaptureId, Vec<String>)>,
}

#[derive(Default)]
pub struct FakeApi {
    pub state: Mutex<FakeApiState>,
}

impl FakeApi {
    pub fn with_records(records: Vec<CaptureRecord>) -> Self {
        let api = Self::default();
        api.state.lock().unwrap().records = records;
        api
    }

    pub fn set_records(&self, records: Vec<CaptureRecord>) {
        self.state.lock().unwrap().records = records;
    }

    pub fn update(&self, f: impl FnOnce(&mut FakeApiState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn deleted(&self) -> Vec<CaptureId> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn get_calls(&self) -> usize {
        self.state.lock().unwrap().get_calls
    }

    fn rejected() -> ApiError {
        ApiError::Status {
            status: 500,
            body: "internal error".into(),
        }
    }

    fn create(
        &self,
        url: &str,
        title: Option<String>,
        kind: CaptureKind,
    ) -> Result<CaptureRecord, ApiError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create {
            return Err(Self::rejected());
        }
        state.next_id += 1;
        let id = CaptureId::from(format!("{}", 100 + state.next_id));
        let mut created = record(id.as_str(), url, CaptureStatus::Pending);
        created.kind = kind;
        created.title = title;
        if kind == CaptureKind::Collection {
            created.collection_id = Some(id);
        }
        Ok(created)
    }
}

#[async_trait]
impl CaptureApi for FakeApi {
    async fn get_project(&self, project_id: &str) -> Result<ProjectSnapshot, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.get_calls += 1;
        if state.reject_token {
            return Err(ApiError::Status {
                status: 401,
                body: "invalid token".into(),
            });
        }
        if state.fail_get {
            return Err(Self::rejected());
        }
        Ok(ProjectSnapshot {
            project: ProjectSummary {
                id: project_id.to_string(),
                name: "Marketing site".into(),
                description: None,
            },
            screenshots: state.records.clone(),
        })
    }

    async fn create_screenshot(
        &self,
        request: &CreateScreenshotRequest,
    ) -> Result<CaptureRecord, ApiError> {
        self.create(&request.url, request.title.clone(), CaptureKind::Screenshot)
    }

    async fn create_crawl_screenshot(
        &self,
        request: &CreateCrawlRequest,
    ) -> Result<CaptureRecord, ApiError> {
        self.create(&request.url, request.title.clone(), CaptureKind::Collection)
    }

    async fn select_crawl_urls(
        &self,
        collection_id: &CaptureId,
        urls: &[String],
    ) -> Result<(), ApiError> {
        self.state
            .lock()
            .unwrap()
            .selected
            .push((collection_id.clone(), urls.to_vec()));
        Ok(())
    }

    async fn delete_screenshot(&self, id: &CaptureId) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_delete {
            return Err(Self::rejected());
        }
        state.deleted.push(id.clone());
        state.records.retain(|r| r.id != *id);
        Ok(())
    }

    async fn delete_collection(&self, id: &CaptureId) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_delete {
            return Err(Self::rejected());
        }
        state.deleted.push(id.clone());
        state
            .records
            .retain(|r| r.id != *id && r.collection_id.as_ref() != Some(id));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fake image endpoint
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeFetcher {
    pub calls: AtomicUsize,
    pub failing: Mutex<HashSet<CaptureId>>,
}

impl FakeFetcher {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_for(&self, id: &str) {
        self.failing.lock().unwrap().insert(CaptureId::from(id));
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }
}

#[async_trait]
impl ImageFetcher for FakeFetcher {
    async fn fetch(
        &self,
        id: &CaptureId,
        variant: ImageVariant,
        _token: &str,
    ) -> Result<ImageBytes, ImageFetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(id) {
            return Err(ImageFetchError::Status { status: 401 });
        }
        Ok(ImageBytes {
            bytes: format!("{id}-{variant}").into_bytes(),
            content_type: "image/webp".into(),
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub session: ProjectSession,
    pub api: Arc<FakeApi>,
    pub fetcher: Arc<FakeFetcher>,
    pub objects: Arc<MemoryObjectStore>,
    pub tokens: Arc<StaticToken>,
}

pub const SETTLE_DELAY: Duration = Duration::from_millis(2000);

pub fn harness(records: Vec<CaptureRecord>) -> Harness {
    let api = Arc::new(FakeApi::with_records(records));
    let fetcher = Arc::new(FakeFetcher::default());
    let objects = Arc::new(MemoryObjectStore::new());
    let tokens = Arc::new(StaticToken::new(Some("token-1".into())));
    let images = ImageBlobCache::new(fetcher.clone(), objects.clone());
    let session = ProjectSession::new("p1", api.clone(), tokens.clone(), images, SETTLE_DELAY);
    Harness {
        session,
        api,
        fetcher,
        objects,
        tokens,
    }
}

pub fn record(id: &str, url: &str, status: CaptureStatus) -> CaptureRecord {
    CaptureRecord {
        id: CaptureId::from(id),
        kind: CaptureKind::Screenshot,
        url: url.into(),
        title: None,
        metadata: Metadata::new(),
        image_path: None,
        thumbnail_path: None,
        status,
        collection_id: None,
        created_at: Utc::now(),
        updated_at: None,
    }
}

pub fn collection_record(id: &str, url: &str, status: CaptureStatus) -> CaptureRecord {
    CaptureRecord {
        kind: CaptureKind::Collection,
        collection_id: Some(CaptureId::from(id)),
        ..record(id, url, status)
    }
}

/// Parse and normalize a raw socket frame, as the processor does.
pub fn socket_event(json: &str) -> ProgressEvent {
    parse_message(json).unwrap().normalize(Utc::now())
}

pub fn screenshot_completed(id: &str, url: &str) -> ProgressEvent {
    socket_event(&format!(
        r#"{{"type":"screenshot_progress","data":{{"screenshot_id":"{id}","status":"completed","progress":100,"url":"{url}","image_path":"/images/{id}.png"}}}}"#
    ))
}

pub fn collection_progress(id: &str, percent: u8, scrolling: bool) -> ProgressEvent {
    socket_event(&format!(
        r#"{{"type":"collection_progress","data":{{"collection_id":"{id}","status":"processing","progress":{percent},"is_scrolling":{scrolling},"url":"https://docs.example.org","name":"Docs crawl"}}}}"#
    ))
}
