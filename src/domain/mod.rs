//! Wire types shared by the snapshot listing and the run stream.
//!
//! - [`Run`]: a run record, identified by `id`, with mutable fields
//! - [`RunStreamEvent`]: one incremental change delivered by the stream
//! - [`RunQuery`] / [`StreamParams`]: snapshot and stream filters

pub mod events;
pub mod filter;
pub mod runs;

pub use events::{RunEventKind, RunStreamEvent};
pub use filter::{RunQuery, StreamParams};
pub use runs::{Run, RunStatus};
