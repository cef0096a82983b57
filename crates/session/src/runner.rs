//! Cooperative event loop for a project session.
//!
//! One task owns the [`ProjectSession`] and multiplexes feed events, the
//! next settle-delay deadline and cancellation with `tokio::select!`.

use shotline_client::events::ChannelEvent;
use shotline_client::images::ImageVariant;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::session::ProjectSession;

/// Drive `session` until `cancel` fires or the feed closes.
///
/// Loads the initial snapshot first. After every step that changed the
/// session's revision, images of the visible items are loaded (when
/// `prefetch` names a variant) and `on_change` runs. The session is closed
/// (all image URLs released) before returning.
pub async fn run<F>(
    session: &mut ProjectSession,
    mut events: mpsc::Receiver<ChannelEvent>,
    cancel: CancellationToken,
    prefetch: Option<ImageVariant>,
    mut on_change: F,
) where
    F: FnMut(&mut ProjectSession),
{
    session.resync().await;
    if let Some(variant) = prefetch {
        session.ensure_visible_images(variant).await;
    }
    on_change(session);
    let mut seen_revision = session.revision();

    loop {
        let deadline = session.next_deadline();

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(project_id = %session.project_id(), "Session cancelled");
                break;
            }
            event = events.recv() => match event {
                Some(event) => session.handle_channel_event(event, Instant::now()).await,
                None => {
                    tracing::info!(project_id = %session.project_id(), "Progress feed closed");
                    break;
                }
            },
            _ = sleep_until(deadline) => {
                session.evict_due(Instant::now());
            }
        }

        if session.revision() != seen_revision || !session.notifications().is_empty() {
            if let Some(variant) = prefetch {
                session.ensure_visible_images(variant).await;
            }
            on_change(session);
            seen_revision = session.revision();
        }
    }

    session.close();
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
