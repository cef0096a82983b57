//! Integration tests for the progress feed against a local WebSocket
//! server.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use futures::{SinkExt, StreamExt};
use shotline_client::auth::StaticToken;
use shotline_client::backoff::BackoffConfig;
use shotline_client::client::ProgressSocket;
use shotline_client::events::ChannelEvent;
use shotline_client::feed::ProgressFeed;
use shotline_core::capture::CaptureStatus;
use shotline_core::types::CaptureId;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Accept one connection, read the subscribe frame, push `frames`, then
/// close. Returns the parsed subscribe frame.
async fn serve_once(listener: &TcpListener, frames: &[&str]) -> serde_json::Value {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

    let subscribe = match ws.next().await {
        Some(Ok(Message::Text(text))) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected subscribe frame, got {other:?}"),
    };
    for frame in frames {
        ws.send(Message::Text(frame.to_string())).await.unwrap();
    }
    ws.close(None).await.unwrap();
    subscribe
}

async fn next_event(rx: &mut mpsc::Receiver<ChannelEvent>) -> ChannelEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for feed event")
        .expect("feed closed")
}

fn fast_reconnect() -> BackoffConfig {
    BackoffConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        multiplier: 2.0,
    }
}

fn socket_for(addr: std::net::SocketAddr, tokens: Arc<StaticToken>) -> ProgressSocket {
    ProgressSocket::new(format!("ws://{addr}"), "p1".into(), tokens)
}

fn signed_out() -> Arc<StaticToken> {
    Arc::new(StaticToken::new(None))
}

// ---------------------------------------------------------------------------
// Test: subscribe, forward, reconnect
// ---------------------------------------------------------------------------

/// The feed subscribes, forwards normalized progress, reports the drop and
/// reconnects with a fresh `Connected`.
#[tokio::test]
async fn feed_forwards_progress_and_reconnects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let first = serve_once(
            &listener,
            &[r#"{"type":"screenshot_progress","data":{"screenshot_id":"1","status":"processing","progress":40}}"#],
        )
        .await;
        let second = serve_once(
            &listener,
            &[r#"{"type":"screenshot_progress","data":{"screenshot_id":"1","status":"completed","url":"https://a.com"}}"#],
        )
        .await;
        (first, second)
    });

    let socket = socket_for(addr, signed_out());
    let (feed, mut rx) = ProgressFeed::start(socket, fast_reconnect(), CancellationToken::new());

    assert_matches!(next_event(&mut rx).await, ChannelEvent::Connected { project_id, .. } if project_id == "p1");
    assert_matches!(
        next_event(&mut rx).await,
        ChannelEvent::Progress(e) if e.entity_id == CaptureId::from("1") && e.progress_percent == 40
    );
    assert_matches!(next_event(&mut rx).await, ChannelEvent::Disconnected { .. });
    assert_matches!(next_event(&mut rx).await, ChannelEvent::Connected { .. });
    assert_matches!(
        next_event(&mut rx).await,
        ChannelEvent::Progress(e) if e.status == CaptureStatus::Completed && e.is_completion()
    );

    let (first, second) = server.await.unwrap();
    assert_eq!(first["type"], "subscribe");
    assert_eq!(first["data"]["project_id"], "p1");
    assert_ne!(first["data"]["client_id"], second["data"]["client_id"]);

    feed.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: malformed frames
// ---------------------------------------------------------------------------

/// Malformed and unknown frames are skipped without dropping the
/// connection.
#[tokio::test]
async fn feed_skips_malformed_frames() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        serve_once(
            &listener,
            &[
                "{broken",
                r#"{"type":"export_ready","data":{"id":"x"}}"#,
                r#"{"type":"collection_progress","data":{"collection_id":"c1","status":"processing","progress":33}}"#,
            ],
        )
        .await
    });

    let socket = socket_for(addr, Arc::new(StaticToken::new(Some("token".into()))));
    let (feed, mut rx) = ProgressFeed::start(socket, fast_reconnect(), CancellationToken::new());

    assert_matches!(next_event(&mut rx).await, ChannelEvent::Connected { .. });
    assert_matches!(
        next_event(&mut rx).await,
        ChannelEvent::Progress(e) if e.entity_id == CaptureId::from("c1") && e.is_in_flight_collection()
    );
    assert_matches!(next_event(&mut rx).await, ChannelEvent::Disconnected { .. });

    let subscribe = server.await.unwrap();
    assert_eq!(subscribe["data"]["token"], "token");

    feed.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: shutdown
// ---------------------------------------------------------------------------

/// Shutting down a connected feed unsubscribes before closing the socket.
#[tokio::test]
async fn shutdown_unsubscribes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let mut frames = Vec::new();
        while let Some(Ok(Message::Text(text))) = ws.next().await {
            frames.push(serde_json::from_str::<serde_json::Value>(&text).unwrap());
        }
        frames
    });

    let socket = socket_for(addr, signed_out());
    let (feed, mut rx) = ProgressFeed::start(socket, fast_reconnect(), CancellationToken::new());
    assert_matches!(next_event(&mut rx).await, ChannelEvent::Connected { .. });

    feed.shutdown().await;

    let frames = server.await.unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["type"], "subscribe");
    assert_eq!(frames[1]["type"], "unsubscribe");
    assert_eq!(frames[1]["data"]["client_id"], frames[0]["data"]["client_id"]);
}

// ---------------------------------------------------------------------------
// Test: token refresh
// ---------------------------------------------------------------------------

/// A resubscription after a drop carries the token current at that moment,
/// not the one the feed started with.
#[tokio::test]
async fn resubscribe_uses_refreshed_token() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (refreshed_tx, refreshed_rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let first: serde_json::Value = match ws.next().await {
            Some(Ok(Message::Text(text))) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected subscribe frame, got {other:?}"),
        };
        refreshed_rx.await.unwrap();
        ws.close(None).await.unwrap();
        let second = serve_once(&listener, &[]).await;
        (first, second)
    });

    let tokens = Arc::new(StaticToken::new(Some("expiring".into())));
    let (feed, mut rx) = ProgressFeed::start(
        socket_for(addr, tokens.clone()),
        fast_reconnect(),
        CancellationToken::new(),
    );
    assert_matches!(next_event(&mut rx).await, ChannelEvent::Connected { .. });
    tokens.set(Some("refreshed".into()));
    refreshed_tx.send(()).unwrap();

    assert_matches!(next_event(&mut rx).await, ChannelEvent::Disconnected { .. });
    assert_matches!(next_event(&mut rx).await, ChannelEvent::Connected { .. });

    let (first, second) = server.await.unwrap();
    assert_eq!(first["data"]["token"], "expiring");
    assert_eq!(second["data"]["token"], "refreshed");

    feed.shutdown().await;
}
