//! Remote collaborators of a capture session.
//!
//! Provides the REST client, the authenticated image fetcher, and the
//! progress socket with typed message processing and reconnect backoff.

pub mod api;
pub mod auth;
pub mod backoff;
pub mod client;
pub mod events;
pub mod feed;
pub mod images;
pub mod processor;
