//! Event loop behaviour under paused tokio time.

mod common;

use std::time::Duration;

use shotline_client::events::ChannelEvent;
use shotline_client::images::ImageVariant;
use shotline_core::capture::CaptureStatus;
use shotline_core::types::CaptureId;
use shotline_session::runner;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use common::*;

#[derive(Debug, Clone, PartialEq)]
struct Frame {
    live: usize,
    cards: usize,
    items: usize,
}

// ---------------------------------------------------------------------------
// Feed-driven updates
// ---------------------------------------------------------------------------

/// Progress events update the view, the settle timer evicts the final
/// entry, and the loop ends once the feed closes.
#[tokio::test(start_paused = true)]
async fn runner_applies_progress_and_evicts() {
    let mut h = harness(vec![collection_record(
        "c1",
        "https://docs.example.org",
        CaptureStatus::Processing,
    )]);
    let (tx, rx) = mpsc::channel(16);

    tokio::spawn(async move {
        tx.send(ChannelEvent::Progress(collection_progress("c1", 50, false)))
            .await
            .unwrap();
        tx.send(ChannelEvent::Progress(collection_progress("c1", 100, false)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(tx);
    });

    let mut frames = Vec::new();
    runner::run(
        &mut h.session,
        rx,
        CancellationToken::new(),
        Some(ImageVariant::Thumbnail),
        |session| {
            let view = session.view();
            frames.push(Frame {
                live: session.tracker().len(),
                cards: view.progress_cards.len(),
                items: view.items.len(),
            });
        },
    )
    .await;

    // Initial snapshot: the collection is listed, nothing is live.
    assert_eq!(frames.first(), Some(&Frame { live: 0, cards: 0, items: 1 }));
    // The crawl was shown as a card at some point.
    assert!(frames.iter().any(|f| f.cards == 1 && f.items == 0));
    // The settle timer ran before the feed closed.
    assert_eq!(frames.last(), Some(&Frame { live: 0, cards: 0, items: 1 }));

    assert_eq!(
        h.session.store().get(&CaptureId::from("c1")).unwrap().status,
        CaptureStatus::Completed
    );
    // Thumbnail fetched once the collection completed, then released on close.
    assert_eq!(h.fetcher.calls(), 1);
    assert_eq!(h.objects.live_count(), 0);
}

/// A reconnect mid-run triggers a second snapshot load.
#[tokio::test(start_paused = true)]
async fn runner_resyncs_on_reconnect() {
    let mut h = harness(vec![]);
    let (tx, rx) = mpsc::channel(16);
    h.api
        .set_records(vec![record("7", "https://a.com", CaptureStatus::Completed)]);

    tx.send(ChannelEvent::Disconnected {
        project_id: "p1".into(),
    })
    .await
    .unwrap();
    tx.send(ChannelEvent::Connected {
        project_id: "p1".into(),
        client_id: "client-2".into(),
    })
    .await
    .unwrap();
    drop(tx);

    let mut warnings = 0;
    runner::run(&mut h.session, rx, CancellationToken::new(), None, |session| {
        warnings += session.take_notifications().len();
    })
    .await;

    assert_eq!(h.api.get_calls(), 2);
    assert_eq!(warnings, 1);
    assert!(h.session.store().contains(&CaptureId::from("7")));
    assert_eq!(h.fetcher.calls(), 0);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// A cancelled token stops the loop after the initial snapshot.
#[tokio::test(start_paused = true)]
async fn runner_stops_on_cancel() {
    let mut h = harness(vec![record("7", "https://a.com", CaptureStatus::Completed)]);
    let (_tx, rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut calls = 0;
    runner::run(&mut h.session, rx, cancel, None, |_| calls += 1).await;

    assert_eq!(calls, 1);
    assert_eq!(h.api.get_calls(), 1);
    assert_eq!(h.session.store().len(), 1);
}
