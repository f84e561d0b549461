use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MaosError, Result};

/// Team a task is routed to. Selects the Team Lead and the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    #[default]
    General,
    Frontend,
    Backend,
    Qa,
}

impl Team {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Frontend => "frontend",
            Self::Backend => "backend",
            Self::Qa => "qa",
        }
    }
}

impl std::fmt::Display for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Team {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "general" => Ok(Self::General),
            "frontend" => Ok(Self::Frontend),
            "backend" => Ok(Self::Backend),
            "qa" => Ok(Self::Qa),
            _ => Err(format!("Unknown team: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Queued,
    InProgress,
    Complete,
    Failed,
    /// A dependency failed permanently; this task can never start.
    Blocked,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Blocked)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured record of why a task failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    /// Stable kind: `timeout`, `cli_failed`, `cli_not_found`,
    /// `encoding_error`, `atomic_deadline_exceeded`, `planning_error`.
    pub kind: String,
    pub message: String,
    /// Attempt number that produced this error (1-based).
    pub attempt: u32,
}

impl TaskError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>, attempt: u32) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            attempt,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub title: String,
    pub description: String,

    #[serde(default)]
    pub team: Team,

    /// Informational sub-tag; selects a prompt template, never the contract.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialty: Option<String>,

    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub status: TaskStatus,

    #[serde(default)]
    pub attempts: u32,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_agent_id: Option<String>,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,

    /// Locator of the raw-output artifact produced by the last successful run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,

    /// Fields written by newer versions are carried through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

fn default_max_attempts() -> u32 {
    3
}

impl Task {
    pub fn new(
        task_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            title: title.into(),
            description: description.into(),
            team: Team::General,
            specialty: None,
            depends_on: Vec::new(),
            status: TaskStatus::Queued,
            attempts: 0,
            max_attempts: default_max_attempts(),
            assigned_agent_id: None,
            started_at: None,
            ended_at: None,
            result_ref: None,
            error: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_team(mut self, team: Team) -> Self {
        self.team = team;
        self
    }

    pub fn with_depends_on(mut self, deps: Vec<String>) -> Self {
        self.depends_on = deps;
        self
    }

    pub fn with_specialty(mut self, specialty: impl Into<String>) -> Self {
        self.specialty = Some(specialty.into());
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Ready means queued with every dependency complete.
    pub fn is_ready(&self, completed: &[&str]) -> bool {
        self.status == TaskStatus::Queued
            && self
                .depends_on
                .iter()
                .all(|dep| completed.contains(&dep.as_str()))
    }

    /// `queued -> in_progress`. The agent id is mandatory; an in-progress
    /// task without an assignee violates the model.
    pub fn start(&mut self, agent_id: impl Into<String>) -> Result<()> {
        if self.status != TaskStatus::Queued {
            return Err(self.transition_error(TaskStatus::InProgress));
        }
        self.status = TaskStatus::InProgress;
        self.assigned_agent_id = Some(agent_id.into());
        self.started_at = Some(Utc::now());
        self.attempts += 1;
        Ok(())
    }

    /// `in_progress -> complete`.
    pub fn complete(&mut self, result_ref: impl Into<String>) -> Result<()> {
        if self.status != TaskStatus::InProgress {
            return Err(self.transition_error(TaskStatus::Complete));
        }
        self.status = TaskStatus::Complete;
        self.result_ref = Some(result_ref.into());
        self.ended_at = Some(Utc::now());
        self.error = None;
        Ok(())
    }

    /// `in_progress -> failed`.
    pub fn fail(&mut self, error: TaskError) -> Result<()> {
        if self.status != TaskStatus::InProgress {
            return Err(self.transition_error(TaskStatus::Failed));
        }
        self.status = TaskStatus::Failed;
        self.error = Some(error);
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    /// `failed -> queued`, permitted while under the attempt budget.
    pub fn requeue(&mut self) -> Result<()> {
        if self.status != TaskStatus::Failed {
            return Err(self.transition_error(TaskStatus::Queued));
        }
        if !self.can_retry() {
            return Err(MaosError::Other(format!(
                "Task {} exhausted its {} attempts",
                self.task_id, self.max_attempts
            )));
        }
        self.status = TaskStatus::Queued;
        self.assigned_agent_id = None;
        Ok(())
    }

    /// A task found `in_progress` on load was never durably acknowledged;
    /// put it back in the queue without consuming an attempt.
    pub fn demote(&mut self) {
        if self.status == TaskStatus::InProgress {
            self.status = TaskStatus::Queued;
            self.assigned_agent_id = None;
            self.attempts = self.attempts.saturating_sub(1);
        }
    }

    pub fn block(&mut self) {
        if !self.status.is_terminal() {
            self.status = TaskStatus::Blocked;
            self.assigned_agent_id = None;
        }
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Permanently failed: failed with no attempts left, or blocked.
    pub fn is_permanently_failed(&self) -> bool {
        match self.status {
            TaskStatus::Failed => !self.can_retry(),
            TaskStatus::Blocked => true,
            _ => false,
        }
    }

    fn transition_error(&self, to: TaskStatus) -> MaosError {
        MaosError::InvalidTransition {
            entity: format!("task {}", self.task_id),
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }
}
