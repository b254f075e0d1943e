//! Consumer-facing view of a run feed.

use serde::Serialize;

use crate::domain::Run;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// Everything a consumer observes: the bounded list, the channel status and
/// the last recorded error.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFeedState {
    /// Most recently started first; ids are unique.
    pub runs: Vec<Run>,
    pub status: ConnectionStatus,
    pub error: Option<String>,
    /// Retry timers that fired since the feed (or its current filter) started.
    pub reconnect_attempts: u64,
}

impl RunFeedState {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}
