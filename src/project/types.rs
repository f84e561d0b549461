use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::{Task, TaskStatus};
use crate::config::MaosConfig;
use crate::error::{MaosError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Planning,
    Executing,
    Complete,
    Failed,
    Paused,
}

impl ProjectStatus {
    pub fn allowed_transitions(&self) -> &'static [ProjectStatus] {
        use ProjectStatus::*;
        match self {
            Planning => &[Executing, Complete, Failed],
            Executing => &[Complete, Failed, Paused],
            Paused => &[Executing, Failed],
            Complete => &[],
            Failed => &[],
        }
    }

    pub fn can_transition_to(&self, target: ProjectStatus) -> bool {
        self.allowed_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// `run()` on an existing project is only legal from these states.
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Executing | Self::Paused)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Paused => "paused",
        }
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Token and call counters for one agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentUsage {
    pub tokens: u64,
    pub calls: u64,
}

/// Aggregate usage across the project plus per-agent breakdown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub tokens: u64,
    pub calls: u64,
    #[serde(default)]
    pub per_agent: HashMap<String, AgentUsage>,
}

impl UsageStats {
    pub fn record(&mut self, agent_id: &str, tokens: u64) {
        self.tokens += tokens;
        self.calls += 1;
        let entry = self.per_agent.entry(agent_id.to_string()).or_default();
        entry.tokens += tokens;
        entry.calls += 1;
    }
}

/// The persisted project document. One file per project; see the state store
/// for atomicity and versioning rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Monotonically increasing write counter. Readers refuse versions older
    /// than one they have already observed.
    #[serde(default)]
    pub version: u64,
    pub project_id: String,
    pub objective: String,
    #[serde(default)]
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub usage: UsageStats,
    pub config_snapshot: MaosConfig,
}

impl Project {
    pub fn new(objective: impl Into<String>, config: MaosConfig) -> Self {
        let now = Utc::now();
        Self {
            version: 0,
            project_id: Uuid::new_v4().to_string(),
            objective: objective.into(),
            status: ProjectStatus::Planning,
            created_at: now,
            updated_at: now,
            tasks: Vec::new(),
            usage: UsageStats::default(),
            config_snapshot: config,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn transition(&mut self, target: ProjectStatus) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(MaosError::InvalidTransition {
                entity: format!("project {}", self.project_id),
                from: self.status.to_string(),
                to: target.to_string(),
            });
        }
        self.status = target;
        self.touch();
        Ok(())
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.task_id == task_id)
    }

    pub fn completed_ids(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Complete)
            .map(|t| t.task_id.as_str())
            .collect()
    }

    /// Tasks that are queued with every dependency complete.
    pub fn ready_tasks(&self) -> Vec<&Task> {
        let completed = self.completed_ids();
        self.tasks
            .iter()
            .filter(|t| t.is_ready(&completed))
            .collect()
    }

    pub fn queued_tasks(&self) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Queued)
            .collect()
    }

    pub fn all_tasks_complete(&self) -> bool {
        !self.tasks.is_empty() && self.tasks.iter().all(|t| t.status == TaskStatus::Complete)
    }

    pub fn permanently_failed_tasks(&self) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| t.is_permanently_failed())
            .collect()
    }

    /// No task can make progress: nothing ready, nothing running, and
    /// nothing failed-but-retryable.
    pub fn is_stalled(&self) -> bool {
        let retryable_failures = self
            .tasks
            .iter()
            .any(|t| t.status == TaskStatus::Failed && t.can_retry());
        let running = self
            .tasks
            .iter()
            .any(|t| t.status == TaskStatus::InProgress);
        self.ready_tasks().is_empty() && !running && !retryable_failures
    }

    /// Mark queued tasks whose dependency chain contains a permanent failure.
    /// Returns the ids that were blocked.
    pub fn block_unreachable_tasks(&mut self) -> Vec<String> {
        let failed: Vec<String> = self
            .permanently_failed_tasks()
            .iter()
            .map(|t| t.task_id.clone())
            .collect();
        if failed.is_empty() {
            return Vec::new();
        }

        // Transitively propagate: a task is unreachable if any dependency is
        // permanently failed or already marked unreachable.
        let mut unreachable: Vec<String> = failed;
        let mut changed = true;
        while changed {
            changed = false;
            for task in &self.tasks {
                if task.status != TaskStatus::Queued {
                    continue;
                }
                if unreachable.contains(&task.task_id) {
                    continue;
                }
                if task.depends_on.iter().any(|d| unreachable.contains(d)) {
                    unreachable.push(task.task_id.clone());
                    changed = true;
                }
            }
        }

        let mut blocked = Vec::new();
        for task in &mut self.tasks {
            if task.status == TaskStatus::Queued && unreachable.contains(&task.task_id) {
                task.block();
                blocked.push(task.task_id.clone());
            }
        }
        if !blocked.is_empty() {
            self.touch();
        }
        blocked
    }

    /// Crash recovery: anything found `in_progress` was never durably
    /// acknowledged. Returns the demoted ids.
    pub fn demote_in_progress(&mut self) -> Vec<String> {
        let mut demoted = Vec::new();
        for task in &mut self.tasks {
            if task.status == TaskStatus::InProgress {
                task.demote();
                demoted.push(task.task_id.clone());
            }
        }
        if !demoted.is_empty() {
            self.touch();
        }
        demoted
    }
}
