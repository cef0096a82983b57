//! Persistent progress feed for one project.
//!
//! [`ProgressFeed`] owns a spawned connection task (connect -> process ->
//! reconnect loop) and hands [`ChannelEvent`]s to the consumer over an
//! mpsc channel. The consumer sees `Connected` after every successful
//! (re)connect and `Disconnected` whenever the socket drops.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backoff::{Backoff, BackoffConfig};
use crate::client::{ProgressConnection, ProgressSocket};
use crate::events::ChannelEvent;
use crate::processor::{process_messages, ProcessExit};

/// Channel capacity between the socket task and the consumer.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct ProgressFeed {
    task_handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl ProgressFeed {
    /// Spawn the connection task. It stops when `cancel` fires, when
    /// [`shutdown`](Self::shutdown) is called, or when the receiver is
    /// dropped.
    pub fn start(
        socket: ProgressSocket,
        backoff: BackoffConfig,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<ChannelEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let task_cancel = cancel.child_token();
        let loop_cancel = task_cancel.clone();

        let task_handle = tokio::spawn(async move {
            tracing::info!(project_id = %socket.project_id(), "Starting progress feed");
            let mut backoff = Backoff::new(backoff);
            run_connection_loop(&socket, &mut backoff, &event_tx, &loop_cancel).await;
            tracing::info!(project_id = %socket.project_id(), "Progress feed exited");
        });

        (
            Self {
                task_handle,
                cancel: task_cancel,
            },
            event_rx,
        )
    }

    /// Stop the connection task, waiting up to 5 seconds for it to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = tokio::time::timeout(std::time::Duration::from_secs(5), self.task_handle).await;
    }
}

/// Connect, forward frames until the socket drops, and repeat. The first
/// attempt is immediate; retries follow `backoff`, which restarts from its
/// initial delay after every successful subscription.
async fn run_connection_loop(
    socket: &ProgressSocket,
    backoff: &mut Backoff,
    event_tx: &mpsc::Sender<ChannelEvent>,
    cancel: &CancellationToken,
) {
    let mut retry = false;
    loop {
        let Some(mut conn) = connect_with_backoff(socket, backoff, retry, cancel).await else {
            return;
        };
        retry = true;
        backoff.reset();

        let connected = ChannelEvent::Connected {
            project_id: conn.project_id.clone(),
            client_id: conn.client_id.clone(),
        };
        if event_tx.send(connected).await.is_err() {
            return;
        }

        let exit = tokio::select! {
            _ = cancel.cancelled() => None,
            exit = process_messages(&mut conn.ws_stream, socket.project_id(), event_tx) => Some(exit),
        };
        let exit = match exit {
            None => {
                if let Err(e) = conn.close().await {
                    tracing::debug!(project_id = %socket.project_id(), error = %e, "Unsubscribe on shutdown failed");
                }
                return;
            }
            Some(ProcessExit::ConsumerGone) => return,
            Some(exit) => exit,
        };

        tracing::warn!(
            project_id = %socket.project_id(),
            client_id = %conn.client_id,
            reason = %exit,
            "Progress socket disconnected",
        );
        let disconnected = ChannelEvent::Disconnected {
            project_id: socket.project_id().to_string(),
        };
        if event_tx.send(disconnected).await.is_err() || cancel.is_cancelled() {
            return;
        }
    }
}

/// Try to connect until it works or `cancel` fires. When `retry` is set
/// (a previous connection existed) the first attempt waits too.
async fn connect_with_backoff(
    socket: &ProgressSocket,
    backoff: &mut Backoff,
    retry: bool,
    cancel: &CancellationToken,
) -> Option<ProgressConnection> {
    let mut wait = retry;
    loop {
        if wait {
            let delay = backoff.next_delay();
            tracing::info!(
                project_id = %socket.project_id(),
                attempt = backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                "Reconnecting to progress socket",
            );
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        wait = true;

        let result = tokio::select! {
            _ = cancel.cancelled() => return None,
            result = socket.connect() => result,
        };
        match result {
            Ok(conn) => return Some(conn),
            Err(e) => tracing::warn!(
                project_id = %socket.project_id(),
                attempt = backoff.attempts(),
                error = %e,
                "Progress socket connection failed",
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::auth::StaticToken;

    fn unreachable_socket() -> ProgressSocket {
        ProgressSocket::new(
            "ws://127.0.0.1:9".into(),
            "p1".into(),
            Arc::new(StaticToken::new(None)),
        )
    }

    #[tokio::test]
    async fn shutdown_stops_feed_while_reconnecting() {
        let config = BackoffConfig {
            initial_delay: Duration::from_millis(10),
            ..Default::default()
        };
        let (feed, mut rx) =
            ProgressFeed::start(unreachable_socket(), config, CancellationToken::new());

        feed.shutdown().await;

        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn parent_cancellation_stops_feed() {
        let cancel = CancellationToken::new();
        let (_feed, mut rx) =
            ProgressFeed::start(unreachable_socket(), BackoffConfig::default(), cancel.clone());

        cancel.cancel();

        let closed = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(matches!(closed, Ok(None)));
    }

    /// Failed attempts count towards the schedule and the loop keeps
    /// retrying until cancelled.
    #[tokio::test]
    async fn failed_attempts_advance_backoff() {
        let cancel = CancellationToken::new();
        let mut backoff = Backoff::new(BackoffConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
        });

        let attempt = tokio::time::timeout(
            Duration::from_millis(200),
            connect_with_backoff(&unreachable_socket(), &mut backoff, false, &cancel),
        )
        .await;

        assert!(attempt.is_err());
        assert!(backoff.attempts() >= 1);
    }
}
