//! Capture state reconciliation.
//!
//! Pure, synchronous domain logic shared by the client and session crates:
//!
//! - [`capture`]: capture items, statuses and the per-field merge rules.
//! - [`progress`]: socket payload normalization and the live progress
//!   tracker with its settle delay.
//! - [`store`]: the keyed item store merging snapshots, optimistic inserts
//!   and progress events.
//! - [`projection`]: the ordered, filtered list derived from the store.

pub mod capture;
pub mod error;
pub mod progress;
pub mod projection;
pub mod socket_events;
pub mod store;
pub mod types;
