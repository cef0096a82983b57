//! WebSocket message processing loop.
//!
//! Reads raw frames from the progress socket, parses them into
//! [`RawProgress`](shotline_core::progress::RawProgress) messages,
//! normalizes them and forwards [`ChannelEvent::Progress`] to the consumer.

use std::fmt;

use chrono::Utc;
use futures::{Stream, StreamExt};
use shotline_core::progress::parse_message;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::events::ChannelEvent;

/// Why [`process_messages`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    /// The server closed the socket; carries `"<code> <reason>"` when the
    /// close frame had one. Reconnect.
    Closed(Option<String>),
    /// Receive error, or the stream ended without a close frame. Reconnect.
    Dropped(String),
    /// The consumer dropped its receiver; stop for good.
    ConsumerGone,
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed(Some(reason)) => write!(f, "closed by server ({reason})"),
            Self::Closed(None) => f.write_str("closed by server"),
            Self::Dropped(error) => write!(f, "connection dropped: {error}"),
            Self::ConsumerGone => f.write_str("consumer gone"),
        }
    }
}

/// Process frames until the socket closes, fails, or the consumer goes
/// away.
///
/// Unparseable text frames are logged and skipped. Binary frames are not
/// part of the protocol and are ignored.
pub async fn process_messages<S>(
    ws_stream: &mut S,
    project_id: &str,
    event_tx: &mpsc::Sender<ChannelEvent>,
) -> ProcessExit
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(msg_result) = ws_stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                if !handle_text_message(&text, project_id, event_tx).await {
                    return ProcessExit::ConsumerGone;
                }
            }
            Ok(Message::Binary(_)) => {
                tracing::trace!(project_id, "Ignoring binary frame");
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {
                // Handled automatically by tungstenite.
            }
            Ok(Message::Close(frame)) => {
                let reason =
                    frame.map(|frame| format!("{} {}", u16::from(frame.code), frame.reason));
                return ProcessExit::Closed(reason);
            }
            Ok(Message::Frame(_)) => {}
            Err(e) => return ProcessExit::Dropped(e.to_string()),
        }
    }
    ProcessExit::Dropped("stream ended".to_string())
}

/// Parse, normalize and forward one text frame. Returns `false` once the
/// receiver is gone.
async fn handle_text_message(
    text: &str,
    project_id: &str,
    event_tx: &mpsc::Sender<ChannelEvent>,
) -> bool {
    let raw = match parse_message(text) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(
                project_id,
                error = %e,
                raw_message = %text,
                "Failed to parse progress message",
            );
            return true;
        }
    };

    let message_type = raw.message_type();
    let event = raw.normalize(Utc::now());
    tracing::debug!(
        project_id,
        message_type,
        entity_id = %event.entity_id,
        status = %event.status,
        percent = event.progress_percent,
        is_final = event.is_final,
        "Capture progress",
    );

    event_tx.send(ChannelEvent::Progress(event)).await.is_ok()
}
