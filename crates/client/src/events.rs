//! Events the progress feed hands to its consumer.
//!
//! Produced by the socket processor and connection loop after
//! interpreting raw WebSocket frames.

use serde::Serialize;
use shotline_core::progress::ProgressEvent;
use shotline_core::types::ProjectId;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ChannelEvent {
    /// The socket is (re)connected and subscribed. Consumers should resync
    /// from REST, progress sent while disconnected is not replayed.
    Connected {
        project_id: ProjectId,
        client_id: String,
    },

    /// The socket dropped; a reconnect is under way.
    Disconnected { project_id: ProjectId },

    /// A normalized progress notification.
    Progress(ProgressEvent),
}
