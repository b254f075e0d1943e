use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One execution of an agent, keyed by a stable `id`.
///
/// Every field except `id` is optional so that partial payloads (a stream
/// `update` carrying only `id` and `status`, say) still decode. Unknown
/// fields survive in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Run {
    /// Create a bare run carrying only its identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Shallow-merge `patch` into `self`.
    ///
    /// Fields present in the patch win; absent fields keep their current
    /// value. Extra keys are inserted or replaced one level deep.
    pub fn merge(&mut self, patch: Run) {
        let Run {
            id: _,
            agent_id,
            status,
            started_at,
            updated_at,
            extra,
        } = patch;

        if agent_id.is_some() {
            self.agent_id = agent_id;
        }
        if status.is_some() {
            self.status = status;
        }
        if started_at.is_some() {
            self.started_at = started_at;
        }
        if updated_at.is_some() {
            self.updated_at = updated_at;
        }
        self.extra.extend(extra);
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_partial_run_deserializes() {
        let run: Run = serde_json::from_value(json!({ "id": "r1", "status": "running" })).unwrap();
        assert_eq!(run.id, "r1");
        assert_eq!(run.status, Some(RunStatus::Running));
        assert!(run.agent_id.is_none());
        assert!(run.extra.is_empty());
    }

    #[test]
    fn test_extra_fields_are_preserved() {
        let run: Run = serde_json::from_value(json!({
            "id": "r1",
            "agentId": "agent-7",
            "startedAt": "2026-01-02T03:04:05Z",
            "durationMs": 1200,
            "tags": ["nightly"]
        }))
        .unwrap();
        assert_eq!(run.agent_id.as_deref(), Some("agent-7"));
        assert!(run.started_at.is_some());
        assert_eq!(run.extra.get("durationMs"), Some(&json!(1200)));

        let back = serde_json::to_value(&run).unwrap();
        assert_eq!(back["tags"], json!(["nightly"]));
        assert_eq!(back["agentId"], json!("agent-7"));
    }

    #[test]
    fn test_unknown_status_falls_back() {
        let run: Run = serde_json::from_value(json!({ "id": "r1", "status": "queued" })).unwrap();
        assert_eq!(run.status, Some(RunStatus::Unknown));
    }

    #[test]
    fn test_merge_overwrites_present_fields_only() {
        let mut run = Run::new("r1").with_agent("a1").with_status(RunStatus::Running);
        run.extra.insert("step".into(), json!(1));
        run.extra.insert("label".into(), json!("build"));

        let mut patch = Run::new("r1").with_status(RunStatus::Completed);
        patch.extra.insert("step".into(), json!(2));
        run.merge(patch);

        assert_eq!(run.status, Some(RunStatus::Completed));
        assert_eq!(run.agent_id.as_deref(), Some("a1"));
        assert_eq!(run.extra.get("step"), Some(&json!(2)));
        assert_eq!(run.extra.get("label"), Some(&json!("build")));
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!("Running".parse::<RunStatus>(), Ok(RunStatus::Running));
        assert!("bogus".parse::<RunStatus>().is_err());
    }
}
