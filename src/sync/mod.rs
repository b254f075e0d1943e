//! Run synchronization engine.
//!
//! A [`RunFeed`] combines a one-shot snapshot ([`SnapshotFetcher`]) with a
//! long-lived push channel ([`StreamConnector`]) and folds every pushed event
//! into a bounded, deduplicated list via [`reconcile`]. When the channel
//! dies the supervisor waits a fixed delay, re-fetches the snapshot and
//! reopens the channel, indefinitely, until the feed is disposed.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use run_stream_sync::domain::StreamParams;
//! use run_stream_sync::sync::{FeedOptions, HttpSnapshotFetcher, RunFeed, SseStreamConnector};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let base = url::Url::parse("http://localhost:3000")?;
//! let feed = RunFeed::spawn(
//!     Arc::new(HttpSnapshotFetcher::new(&base, "/api/runs")?),
//!     Arc::new(SseStreamConnector::new(&base, "/api/runs/stream")?),
//!     StreamParams::default(),
//!     FeedOptions::default(),
//! );
//!
//! let mut updates = feed.subscribe();
//! while updates.changed().await.is_ok() {
//!     let state = updates.borrow().clone();
//!     println!("{} runs, connected: {}", state.runs.len(), state.is_connected());
//! }
//! # Ok(())
//! # }
//! ```

pub mod connector;
pub mod fetcher;
pub mod reconcile;
pub mod sse;
pub mod state;
pub mod supervisor;

pub use connector::{
    ConnectionId, SignalSink, SseStreamConnector, StreamConnector, StreamHandle, StreamSignal,
    TaggedSignal, TaskStreamHandle,
};
pub use fetcher::{HttpSnapshotFetcher, SnapshotFetcher};
pub use reconcile::{DEFAULT_MAX_RUNS, reconcile, truncate_runs};
pub use state::{ConnectionStatus, RunFeedState};
pub use supervisor::{DEFAULT_RETRY_DELAY, FeedOptions, RunFeed};
