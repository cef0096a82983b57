//! WebSocket message type constants for the capture progress channel.
//!
//! Used by the progress wire types in `progress/wire.rs` and by the socket
//! client when subscribing to a project.

/// Per-screenshot progress update (percentage, stage, final payload).
pub const MSG_TYPE_SCREENSHOT_PROGRESS: &str = "screenshot_progress";

/// Per-collection progress update (aggregate percentage, frame counts).
pub const MSG_TYPE_COLLECTION_PROGRESS: &str = "collection_progress";

/// Client -> server: start receiving progress for one project.
pub const MSG_TYPE_SUBSCRIBE: &str = "subscribe";

/// Client -> server: stop receiving progress for one project.
pub const MSG_TYPE_UNSUBSCRIBE: &str = "unsubscribe";
