//! Run Stream Sync
//!
//! Client-side synchronization of agent run records: a bounded, ordered,
//! deduplicated view kept current from one authoritative snapshot plus a
//! long-lived push channel, surviving channel failures transparently.
//!
//! # Architecture
//!
//! - **Snapshot**: one request/response listing of current runs
//! - **Stream**: Server-Sent Events channel of incremental run events
//! - **Reconciler**: pure `(list, event) -> list` upsert with capacity eviction
//! - **Supervisor**: single-task state machine that re-baselines and reopens
//!   the stream after a fixed delay whenever it fails
//!
//! # Modules
//!
//! - [`domain`]: run records, stream events and filters
//! - [`sync`]: fetcher, connector, reconciler and the [`sync::RunFeed`] supervisor
//! - [`config`]: layered configuration for the `run-watch` binary
//! - [`telemetry`]: tracing subscriber setup

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod domain;
pub mod error;
pub mod sync;
pub mod telemetry;

pub use error::{Result, SyncError};
pub use sync::{ConnectionStatus, FeedOptions, RunFeed, RunFeedState};
