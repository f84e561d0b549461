use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use super::store::ProjectStore;
use crate::error::{MaosError, Result};
use crate::project::{EventKind, EventRecord, Project, ProjectStatus, TaskError};

/// Typed mutation applied to the owned project state.
///
/// Mutators never touch the `Project` directly; they submit one of these and
/// the shared wrapper serializes the write, persists it, and logs the
/// corresponding event. Readers get immutable snapshots.
#[derive(Debug, Clone)]
pub enum StateUpdate {
    TaskStarted {
        task_id: String,
        agent_id: String,
    },
    TaskCompleted {
        task_id: String,
        result_ref: String,
        agent_id: String,
        tokens: u64,
    },
    TaskFailed {
        task_id: String,
        error: TaskError,
    },
    TaskRequeued {
        task_id: String,
    },
    StatusChanged {
        status: ProjectStatus,
    },
    UsageRecorded {
        agent_id: String,
        tokens: u64,
    },
}

/// Sole write owner of one project's state.
///
/// All mutations funnel through [`SharedProject::apply`], which holds the
/// per-project write lock across mutate-and-persist so concurrent workers
/// are linearized and a reader sees either the pre- or post-image.
#[derive(Clone)]
pub struct SharedProject {
    store: Arc<ProjectStore>,
    project: Arc<Mutex<Project>>,
    project_id: String,
}

impl SharedProject {
    pub fn new(store: Arc<ProjectStore>, project: Project) -> Self {
        let project_id = project.project_id.clone();
        Self {
            store,
            project: Arc::new(Mutex::new(project)),
            project_id,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn store(&self) -> &Arc<ProjectStore> {
        &self.store
    }

    /// Immutable snapshot of the current state.
    pub async fn snapshot(&self) -> Project {
        self.project.lock().await.clone()
    }

    /// Apply one typed update, persist, and log the matching event.
    ///
    /// The write lock is held across mutate, save and event append, so the
    /// event log stays totally ordered with monotonic timestamps.
    pub async fn apply(&self, update: StateUpdate) -> Result<()> {
        let mut project = self.project.lock().await;
        let event = self.mutate(&mut project, &update)?;
        self.store.save(&mut project).await?;
        if let Some(event) = event {
            self.store.append_event(&self.project_id, event).await?;
        }
        drop(project);

        debug!(project_id = %self.project_id, update = ?update, "State update applied");
        Ok(())
    }

    fn mutate(&self, project: &mut Project, update: &StateUpdate) -> Result<Option<EventRecord>> {
        let event = match update {
            StateUpdate::TaskStarted { task_id, agent_id } => {
                let task = self.task_mut(project, task_id)?;
                task.start(agent_id.clone())?;
                let attempt = task.attempts;
                Some(
                    EventRecord::new(EventKind::TaskStarted, format!("attempt {}", attempt))
                        .with_task(task_id.clone())
                        .with_agent(agent_id.clone())
                        .with_attempt(attempt),
                )
            }
            StateUpdate::TaskCompleted {
                task_id,
                result_ref,
                agent_id,
                tokens,
            } => {
                let task = self.task_mut(project, task_id)?;
                task.complete(result_ref.clone())?;
                project.usage.record(agent_id, *tokens);
                Some(
                    EventRecord::new(EventKind::TaskCompleted, result_ref.clone())
                        .with_task(task_id.clone())
                        .with_agent(agent_id.clone()),
                )
            }
            StateUpdate::TaskFailed { task_id, error } => {
                let task = self.task_mut(project, task_id)?;
                task.fail(error.clone())?;
                Some(
                    EventRecord::new(EventKind::TaskFailed, error.message.clone())
                        .with_task(task_id.clone())
                        .with_attempt(error.attempt)
                        .with_error_kind(error.kind.clone()),
                )
            }
            StateUpdate::TaskRequeued { task_id } => {
                let task = self.task_mut(project, task_id)?;
                task.requeue()?;
                let attempt = task.attempts;
                Some(
                    EventRecord::new(EventKind::TaskRequeued, "retrying after transient failure")
                        .with_task(task_id.clone())
                        .with_attempt(attempt),
                )
            }
            StateUpdate::StatusChanged { status } => {
                project.transition(*status)?;
                let kind = match status {
                    ProjectStatus::Complete => EventKind::ProjectCompleted,
                    ProjectStatus::Failed => EventKind::ProjectFailed,
                    ProjectStatus::Paused => EventKind::ProjectPaused,
                    ProjectStatus::Executing => EventKind::ProjectResumed,
                    ProjectStatus::Planning => EventKind::PlanningStarted,
                };
                Some(EventRecord::new(kind, format!("status -> {}", status)))
            }
            StateUpdate::UsageRecorded { agent_id, tokens } => {
                project.usage.record(agent_id, *tokens);
                None
            }
        };
        Ok(event)
    }

    /// Crash recovery: demote every `in_progress` task back to the queue.
    pub async fn demote_in_progress(&self) -> Result<Vec<String>> {
        let mut project = self.project.lock().await;
        let demoted = project.demote_in_progress();
        if !demoted.is_empty() {
            self.store.save(&mut project).await?;
        }
        for task_id in &demoted {
            self.store
                .append_event(
                    &self.project_id,
                    EventRecord::new(EventKind::TaskDemoted, "found in_progress on load")
                        .with_task(task_id.clone()),
                )
                .await?;
        }
        Ok(demoted)
    }

    /// Block queued tasks whose dependency chain contains a permanent
    /// failure, then persist.
    pub async fn block_unreachable(&self) -> Result<Vec<String>> {
        let mut project = self.project.lock().await;
        let blocked = project.block_unreachable_tasks();
        if !blocked.is_empty() {
            self.store.save(&mut project).await?;
        }
        for task_id in &blocked {
            self.store
                .append_event(
                    &self.project_id,
                    EventRecord::new(EventKind::TaskBlocked, "dependency permanently failed")
                        .with_task(task_id.clone()),
                )
                .await?;
        }
        Ok(blocked)
    }

    /// Install the accepted plan's tasks and persist.
    pub async fn install_tasks(&self, tasks: Vec<crate::project::Task>) -> Result<()> {
        let mut project = self.project.lock().await;
        if !project.tasks.is_empty() {
            return Err(MaosError::Planning(
                "project already has tasks; planning runs once".to_string(),
            ));
        }
        project.tasks = tasks;
        self.store.save(&mut project).await?;
        self.store
            .append_event(
                &self.project_id,
                EventRecord::new(EventKind::PlanAccepted, "task list installed"),
            )
            .await?;
        Ok(())
    }

    /// Passthrough for orchestration events that do not mutate task state.
    /// Still takes the write lock and re-stamps the event, keeping the log
    /// ordered relative to concurrent task updates.
    pub async fn append_event(&self, mut event: EventRecord) -> Result<()> {
        let _guard = self.project.lock().await;
        event.timestamp = chrono::Utc::now();
        self.store.append_event(&self.project_id, event).await
    }

    fn task_mut<'a>(
        &self,
        project: &'a mut Project,
        task_id: &str,
    ) -> Result<&'a mut crate::project::Task> {
        let project_id = self.project_id.clone();
        project
            .task_mut(task_id)
            .ok_or_else(|| MaosError::TaskNotFound {
                project_id,
                task_id: task_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MaosConfig;
    use crate::project::{Task, TaskStatus};
    use tempfile::TempDir;

    async fn shared_with_task() -> (TempDir, SharedProject) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ProjectStore::new(dir.path()));
        let mut project = store.create("obj", MaosConfig::default()).await.unwrap();
        project.tasks.push(Task::new("t-1", "Title", "Desc"));
        store.save(&mut project).await.unwrap();
        (dir, SharedProject::new(store, project))
    }

    #[tokio::test]
    async fn updates_persist_and_log() {
        let (_dir, shared) = shared_with_task().await;

        shared
            .apply(StateUpdate::TaskStarted {
                task_id: "t-1".to_string(),
                agent_id: "worker-1".to_string(),
            })
            .await
            .unwrap();

        shared
            .apply(StateUpdate::TaskCompleted {
                task_id: "t-1".to_string(),
                result_ref: "artifacts/t-1/raw_output.txt".to_string(),
                agent_id: "worker-1".to_string(),
                tokens: 42,
            })
            .await
            .unwrap();

        let snapshot = shared.snapshot().await;
        assert_eq!(snapshot.task("t-1").unwrap().status, TaskStatus::Complete);
        assert_eq!(snapshot.usage.tokens, 42);
        assert_eq!(snapshot.usage.calls, 1);

        // The persisted copy matches the snapshot.
        let reloaded = shared.store().load(shared.project_id()).await.unwrap();
        assert_eq!(reloaded.task("t-1").unwrap().status, TaskStatus::Complete);

        let events = shared
            .store()
            .read_events(shared.project_id())
            .await
            .unwrap();
        assert!(events.iter().any(|e| e.kind == EventKind::TaskStarted));
        assert!(events.iter().any(|e| e.kind == EventKind::TaskCompleted));
    }

    #[tokio::test]
    async fn invalid_update_leaves_state_unchanged() {
        let (_dir, shared) = shared_with_task().await;

        // Completing a queued task is an invalid transition.
        let err = shared
            .apply(StateUpdate::TaskCompleted {
                task_id: "t-1".to_string(),
                result_ref: "x".to_string(),
                agent_id: "w".to_string(),
                tokens: 10,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MaosError::InvalidTransition { .. }));

        let snapshot = shared.snapshot().await;
        assert_eq!(snapshot.task("t-1").unwrap().status, TaskStatus::Queued);
        assert_eq!(snapshot.usage.tokens, 0);
    }

    #[tokio::test]
    async fn install_tasks_only_once() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ProjectStore::new(dir.path()));
        let project = store.create("obj", MaosConfig::default()).await.unwrap();
        let shared = SharedProject::new(store, project);

        shared
            .install_tasks(vec![Task::new("t-1", "A", "a")])
            .await
            .unwrap();
        let err = shared
            .install_tasks(vec![Task::new("t-2", "B", "b")])
            .await
            .unwrap_err();
        assert!(matches!(err, MaosError::Planning(_)));
    }
}
