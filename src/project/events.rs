use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event kinds appended to a project's `events.log`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ProjectCreated,
    PlanningStarted,
    PlanAccepted,
    PlanningFailed,
    StageStarted,
    StageCompleted,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskRequeued,
    TaskBlocked,
    TaskDemoted,
    AdmissionDenied,
    RestoredFromBackup,
    ProjectPaused,
    ProjectResumed,
    ProjectCompleted,
    ProjectFailed,
}

/// One line of the append-only event log. Timestamps are totally ordered
/// per project by the store's single writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub message: String,
}

impl EventRecord {
    pub fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            task_id: None,
            agent_id: None,
            attempt: None,
            error_kind: None,
            message: message.into(),
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_error_kind(mut self, kind: impl Into<String>) -> Self {
        self.error_kind = Some(kind.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_snake_case_jsonl() {
        let event = EventRecord::new(EventKind::TaskFailed, "deadline expired")
            .with_task("t-1")
            .with_attempt(2)
            .with_error_kind("timeout");

        let line = serde_json::to_string(&event).unwrap();
        assert!(line.contains("\"kind\":\"task_failed\""));
        assert!(line.contains("\"task_id\":\"t-1\""));
        assert!(line.contains("\"attempt\":2"));
        assert!(!line.contains("agent_id"));

        let parsed: EventRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.kind, EventKind::TaskFailed);
        assert_eq!(parsed.error_kind.as_deref(), Some("timeout"));
    }
}
