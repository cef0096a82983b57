//! `shotline-session` library crate.
//!
//! The owning view of one project: reconciled capture list, live progress,
//! image blob cache and the event loop that drives them. The
//! `shotline-watch` binary entrypoint lives in `main.rs`.

pub mod blob_cache;
pub mod config;
pub mod notifications;
pub mod runner;
pub mod session;
