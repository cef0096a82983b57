//! `shotline-watch` -- follow one project's captures from the terminal.
//!
//! Loads the project snapshot, subscribes to live capture progress and logs
//! the reconciled list whenever it changes. Thumbnails of completed
//! captures are downloaded into the in-memory blob cache.
//!
//! # Environment variables
//!
//! | Variable                   | Required | Default                     |
//! |----------------------------|----------|-----------------------------|
//! | `SHOTLINE_API_URL`         | no       | `http://localhost:8000/api` |
//! | `SHOTLINE_WS_URL`          | no       | `ws://localhost:8000/ws`    |
//! | `SHOTLINE_PROJECT_ID`      | yes      | --                          |
//! | `SHOTLINE_API_TOKEN`       | no       | --                          |
//! | `SHOTLINE_SETTLE_DELAY_MS` | no       | `2000`                      |
//! | `SHOTLINE_SEARCH`          | no       | --                          |

use std::sync::Arc;

use shotline_client::api::HttpCaptureApi;
use shotline_client::auth::StaticToken;
use shotline_client::client::ProgressSocket;
use shotline_client::feed::ProgressFeed;
use shotline_client::images::{HttpImageFetcher, ImageVariant};
use shotline_session::blob_cache::{ImageBlobCache, MemoryObjectStore};
use shotline_session::config::SessionConfig;
use shotline_session::runner;
use shotline_session::session::ProjectSession;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shotline_session=info,shotline_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SessionConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    tracing::info!(
        project_id = %config.project_id,
        api_url = %config.api_url,
        ws_url = %config.ws_url,
        authenticated = config.api_token.is_some(),
        "Starting shotline-watch",
    );

    // One token source for REST, images and the socket.
    let tokens = Arc::new(StaticToken::new(config.api_token.clone()));
    let http = reqwest::Client::new();
    let api = Arc::new(HttpCaptureApi::with_client(
        http.clone(),
        config.api_url.clone(),
        tokens.clone(),
    ));
    let fetcher = Arc::new(HttpImageFetcher::with_client(http, config.api_url.clone()));
    let images = ImageBlobCache::new(fetcher, Arc::new(MemoryObjectStore::new()));

    let mut session = ProjectSession::new(
        config.project_id.clone(),
        api,
        tokens.clone(),
        images,
        config.settle_delay,
    );
    session.set_search(config.search.clone());

    let cancel = CancellationToken::new();
    let socket = ProgressSocket::new(
        config.ws_url.clone(),
        config.project_id.clone(),
        tokens.clone(),
    );
    let (feed, events) = ProgressFeed::start(socket, config.reconnect.clone(), cancel.clone());

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, shutting down");
        }
        shutdown.cancel();
    });

    // Image requests require a token.
    let prefetch = config.api_token.is_some().then_some(ImageVariant::Thumbnail);
    runner::run(&mut session, events, cancel, prefetch, log_view).await;

    feed.shutdown().await;
}

fn log_view(session: &mut ProjectSession) {
    for notification in session.take_notifications() {
        tracing::info!(level = %notification.level, "{}", notification.message);
    }

    let view = session.view();
    tracing::info!(
        project = session.project().map(|p| p.name.as_str()).unwrap_or("-"),
        items = view.items.len(),
        in_progress = view.progress_cards.len(),
        "Capture list updated",
    );
    for card in &view.progress_cards {
        tracing::info!(
            id = %card.entity_id,
            kind = %card.entity_kind,
            percent = card.progress_percent,
            stage = %card.stage,
            "In progress",
        );
    }
    for projected in &view.items {
        let item = &projected.item;
        tracing::info!(
            id = %item.id,
            status = %item.status,
            url = %item.url,
            thumbnail = %session
                .image(&item.id, ImageVariant::Thumbnail)
                .map(|url| url.to_string())
                .unwrap_or_default(),
            "Capture",
        );
    }
}
