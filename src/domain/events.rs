use serde::{Deserialize, Serialize};

use super::runs::Run;

/// Incremental change pushed over the run stream.
///
/// `kind` selects the merge policy; identity always comes from `data.id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunStreamEvent {
    #[serde(rename = "type")]
    pub kind: RunEventKind,
    pub data: Run,
}

impl RunStreamEvent {
    pub fn new(kind: RunEventKind, data: Run) -> Self {
        Self { kind, data }
    }

    pub fn start(data: Run) -> Self {
        Self::new(RunEventKind::Start, data)
    }

    pub fn update(data: Run) -> Self {
        Self::new(RunEventKind::Update, data)
    }

    pub fn complete(data: Run) -> Self {
        Self::new(RunEventKind::Complete, data)
    }

    pub fn error(data: Run) -> Self {
        Self::new(RunEventKind::Error, data)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunEventKind {
    Start,
    Update,
    Complete,
    Error,
}
