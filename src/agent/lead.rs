use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use super::specialty::{is_validation_task, Specialty};
use super::worker::Worker;
use super::AgentContext;
use crate::planner::Group;
use crate::project::Team;

/// Per-group result counts surfaced to the orchestrator. The Lead never
/// decides continuation; it only reports.
#[derive(Debug, Clone)]
pub struct GroupSummary {
    pub group_id: String,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

impl GroupSummary {
    pub fn success_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Fans one group of same-team tasks out across a bounded worker pool.
///
/// The pool is a semaphore: the first free worker takes the next task, so
/// ordering within a group is not observable and callers must not rely on
/// it. One worker's failure never cancels its peers.
pub struct TeamLead {
    team: Team,
    agent_id: String,
    ctx: AgentContext,
}

impl TeamLead {
    pub fn new(team: Team, ctx: AgentContext) -> Self {
        Self {
            agent_id: format!("{}_lead", team),
            team,
            ctx,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub async fn run_group(&self, group: &Group, max_workers: usize) -> GroupSummary {
        let pool_size = group.len().min(max_workers).max(1);
        info!(
            group_id = %group.id,
            team = %self.team,
            tasks = group.len(),
            pool_size,
            "Lead dispatching group"
        );

        let semaphore = Arc::new(Semaphore::new(pool_size));

        let executions = group.task_ids.iter().map(|task_id| {
            let semaphore = Arc::clone(&semaphore);
            let ctx = self.ctx.clone();
            let task_id = task_id.clone();
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("group semaphore never closed");

                let worker = match build_worker(&ctx, &task_id).await {
                    Some(worker) => worker,
                    None => {
                        warn!(task_id = %task_id, "Task vanished before dispatch");
                        return (task_id, false);
                    }
                };

                match worker.execute(&task_id).await {
                    Ok(report) => (task_id, report.success),
                    Err(e) => {
                        warn!(task_id = %task_id, error = %e, "Worker errored outside the task protocol");
                        (task_id, false)
                    }
                }
            }
        });

        let results = join_all(executions).await;

        let mut summary = GroupSummary {
            group_id: group.id.clone(),
            succeeded: Vec::new(),
            failed: Vec::new(),
        };
        for (task_id, success) in results {
            if success {
                summary.succeeded.push(task_id);
            } else {
                summary.failed.push(task_id);
            }
        }

        info!(
            group_id = %summary.group_id,
            succeeded = summary.success_count(),
            failed = summary.failure_count(),
            "Group drained"
        );
        summary
    }
}

/// Delegation rule: validation-flavored tasks get a specialty-matched worker
/// under the atomic time bound; everything else gets a general worker.
async fn build_worker(ctx: &AgentContext, task_id: &str) -> Option<Worker> {
    let snapshot = ctx.shared.snapshot().await;
    let task = snapshot.task(task_id)?;
    let text = format!("{} {}", task.title, task.description);

    let worker = if task.team == Team::Qa || is_validation_task(&task.description) {
        Worker::new(Specialty::from_task(task.team, &text), ctx.clone()).with_atomic_bound()
    } else {
        Worker::new(Specialty::from_task(task.team, &text), ctx.clone())
    };
    Some(worker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MaosConfig, ProviderSpec};
    use crate::project::{Task, TaskStatus};
    use crate::state::{ProjectStore, SharedProject};
    use tempfile::TempDir;

    fn shell_provider(script: &str) -> ProviderSpec {
        ProviderSpec::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            script.to_string(),
        ])
    }

    async fn context_with_tasks(script: &str, tasks: Vec<Task>) -> (TempDir, AgentContext) {
        let dir = TempDir::new().unwrap();
        let mut config = MaosConfig::default();
        config.projects_dir = dir.path().to_path_buf();
        config.base_timeout_secs = 10;
        config
            .providers
            .insert("general".to_string(), shell_provider(script));

        let store = std::sync::Arc::new(ProjectStore::new(dir.path()));
        let mut project = store.create("obj", config.clone()).await.unwrap();
        project.tasks = tasks;
        store.save(&mut project).await.unwrap();

        let shared = SharedProject::new(store, project);
        (dir, AgentContext::new(shared, config))
    }

    fn group_of(team: Team, ids: &[&str]) -> Group {
        Group {
            id: "g0".to_string(),
            team,
            task_ids: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn group_completes_all_tasks() {
        let tasks = vec![
            Task::new("t-1", "One", "first piece").with_team(Team::Frontend),
            Task::new("t-2", "Two", "second piece").with_team(Team::Frontend),
            Task::new("t-3", "Three", "third piece").with_team(Team::Frontend),
        ];
        let (_dir, ctx) = context_with_tasks("cat >/dev/null; echo done", tasks).await;

        let lead = TeamLead::new(Team::Frontend, ctx.clone());
        let summary = lead
            .run_group(&group_of(Team::Frontend, &["t-1", "t-2", "t-3"]), 3)
            .await;

        assert!(summary.all_succeeded());
        assert_eq!(summary.success_count(), 3);

        let snapshot = ctx.shared.snapshot().await;
        assert!(snapshot
            .tasks
            .iter()
            .all(|t| t.status == TaskStatus::Complete));
    }

    #[tokio::test]
    async fn one_failure_does_not_cancel_peers() {
        // The marker in the description routes this provider script: tasks
        // whose prompt contains FAILME exit nonzero with output (permanent).
        let script = "input=$(cat); case \"$input\" in *FAILME*) echo bad; exit 1;; *) echo fine;; esac";
        let tasks = vec![
            Task::new("t-1", "Good one", "produce output"),
            Task::new("t-2", "Bad one", "FAILME now"),
            Task::new("t-3", "Good two", "produce output"),
        ];
        let (_dir, ctx) = context_with_tasks(script, tasks).await;

        let lead = TeamLead::new(Team::General, ctx.clone());
        let summary = lead
            .run_group(&group_of(Team::General, &["t-1", "t-2", "t-3"]), 2)
            .await;

        assert_eq!(summary.success_count(), 2);
        assert_eq!(summary.failed, vec!["t-2".to_string()]);

        let snapshot = ctx.shared.snapshot().await;
        assert_eq!(snapshot.task("t-1").unwrap().status, TaskStatus::Complete);
        assert_eq!(snapshot.task("t-2").unwrap().status, TaskStatus::Failed);
        assert_eq!(snapshot.task("t-3").unwrap().status, TaskStatus::Complete);
    }

    #[tokio::test]
    async fn pool_size_bounds_concurrency() {
        // Each invocation sleeps briefly; with a pool of 1 the group still
        // drains, serially.
        let tasks = vec![
            Task::new("t-1", "One", "a"),
            Task::new("t-2", "Two", "b"),
        ];
        let (_dir, ctx) = context_with_tasks("cat >/dev/null; sleep 0.2; echo ok", tasks).await;

        let lead = TeamLead::new(Team::General, ctx.clone());
        let summary = lead.run_group(&group_of(Team::General, &["t-1", "t-2"]), 1).await;
        assert!(summary.all_succeeded());
    }

    #[tokio::test]
    async fn unknown_task_counts_as_failure() {
        let (_dir, ctx) = context_with_tasks("cat >/dev/null; echo ok", Vec::new()).await;
        let lead = TeamLead::new(Team::General, ctx.clone());
        let summary = lead.run_group(&group_of(Team::General, &["ghost"]), 1).await;
        assert_eq!(summary.failed, vec!["ghost".to_string()]);
    }
}
