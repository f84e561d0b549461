use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use super::signal::{Signal, SignalHandler};
use crate::agent::{AgentContext, ProjectManager, TeamLead};
use crate::config::{ExecutionMode, MaosConfig};
use crate::error::{MaosError, Result};
use crate::planner::{analyze, ExecutionPlan, Group, Stage};
use crate::project::{EventKind, EventRecord, Project, ProjectStatus, TaskStatus};
use crate::resource::{ResourceAllocation, ResourceManager};
use crate::state::{ProjectStore, SharedProject, StateUpdate};

/// Hybrid mode switches to parallel dispatch at this parallelism score.
const HYBRID_PARALLEL_THRESHOLD: f64 = 1.5;

/// Polling interval while waiting on resource admission.
const ADMISSION_POLL: Duration = Duration::from_millis(250);

/// Terminal result of driving a project, mapped to exit codes for headless
/// runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Complete,
    Failed,
    PlanningError,
    Paused,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Complete => 0,
            Self::Failed => 1,
            Self::PlanningError => 2,
            Self::Paused => 130,
        }
    }
}

#[derive(Debug, Default)]
struct ExecutionMetrics {
    stages_executed: usize,
    groups_executed: usize,
    max_concurrent_groups: usize,
    tasks_completed: usize,
    tasks_failed: usize,
}

/// Drives one or more projects through `planning -> executing -> terminal`.
///
/// Holds no global state: the store, resource manager and signal handler are
/// all instance-scoped, so independent orchestrators can coexist in one
/// process with different budgets.
pub struct Orchestrator {
    config: MaosConfig,
    store: Arc<ProjectStore>,
    resources: Arc<ResourceManager>,
    signals: SignalHandler,
}

impl Orchestrator {
    pub fn new(config: MaosConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(ProjectStore::new(&config.projects_dir));
        let resources = Arc::new(ResourceManager::new(config.resource_limits.clone()));
        Ok(Self {
            config,
            store,
            resources,
            signals: SignalHandler::new(),
        })
    }

    /// Handle for pausing or cancelling from outside the run loop.
    pub fn signals(&self) -> SignalHandler {
        self.signals.clone()
    }

    pub fn store(&self) -> &Arc<ProjectStore> {
        &self.store
    }

    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    /// Create a fresh project for the objective and drive it to a terminal
    /// state (or pause).
    pub async fn start(&self, objective: &str) -> Result<(String, RunOutcome)> {
        self.start_inner(objective, None).await
    }

    /// Like [`Orchestrator::start`], overriding the configured mode.
    pub async fn start_with_mode(
        &self,
        objective: &str,
        mode: ExecutionMode,
    ) -> Result<(String, RunOutcome)> {
        self.start_inner(objective, Some(mode)).await
    }

    async fn start_inner(
        &self,
        objective: &str,
        mode: Option<ExecutionMode>,
    ) -> Result<(String, RunOutcome)> {
        let project = self.store.create(objective, self.config.clone()).await?;
        let project_id = project.project_id.clone();
        let shared = SharedProject::new(Arc::clone(&self.store), project);
        let outcome = self.drive(shared, mode).await?;
        Ok((project_id, outcome))
    }

    /// Resume an existing project. `in_progress` tasks found on load were
    /// never durably acknowledged and are demoted back to the queue.
    pub async fn run(&self, project_id: &str, mode: Option<ExecutionMode>) -> Result<RunOutcome> {
        let project = self.store.load(project_id).await?;
        match project.status {
            ProjectStatus::Complete => Ok(RunOutcome::Complete),
            ProjectStatus::Failed => Ok(RunOutcome::Failed),
            _ => {
                let shared = SharedProject::new(Arc::clone(&self.store), project);
                self.drive(shared, mode).await
            }
        }
    }

    async fn drive(
        &self,
        shared: SharedProject,
        mode_override: Option<ExecutionMode>,
    ) -> Result<RunOutcome> {
        self.signals.clear();
        self.resources.start_monitoring();

        let mode = mode_override.unwrap_or(self.config.mode);
        let ctx = AgentContext::new(shared.clone(), self.config.clone());
        let snapshot = shared.snapshot().await;

        info!(
            project_id = %snapshot.project_id,
            status = %snapshot.status,
            %mode,
            "Driving project"
        );

        match snapshot.status {
            ProjectStatus::Planning => {
                if let Some(outcome) = self.plan_project(&ctx, &snapshot).await? {
                    return Ok(outcome);
                }
            }
            ProjectStatus::Paused => {
                shared
                    .apply(StateUpdate::StatusChanged {
                        status: ProjectStatus::Executing,
                    })
                    .await?;
                shared.demote_in_progress().await?;
            }
            ProjectStatus::Executing => {
                shared.demote_in_progress().await?;
            }
            ProjectStatus::Complete | ProjectStatus::Failed => {
                unreachable!("terminal states handled by run()")
            }
        }

        self.execute_stages(&ctx, mode).await
    }

    /// Run the Project Manager once. Returns a terminal outcome for the
    /// empty-plan and planning-failure shortcuts, `None` to proceed into
    /// execution.
    async fn plan_project(
        &self,
        ctx: &AgentContext,
        snapshot: &Project,
    ) -> Result<Option<RunOutcome>> {
        ctx.shared
            .append_event(EventRecord::new(
                EventKind::PlanningStarted,
                snapshot.objective.clone(),
            ))
            .await?;

        let manager = ProjectManager::new(ctx.clone());
        match manager.plan(&snapshot.objective).await {
            Ok(tasks) if tasks.is_empty() => {
                // Nothing to do is success, not failure.
                ctx.shared
                    .apply(StateUpdate::StatusChanged {
                        status: ProjectStatus::Complete,
                    })
                    .await?;
                Ok(Some(RunOutcome::Complete))
            }
            Ok(tasks) => {
                info!(task_count = tasks.len(), "Plan installed");
                ctx.shared.install_tasks(tasks).await?;
                ctx.shared
                    .apply(StateUpdate::StatusChanged {
                        status: ProjectStatus::Executing,
                    })
                    .await?;
                Ok(None)
            }
            Err(e) => {
                error!(error = %e, "Planning failed");
                ctx.shared
                    .append_event(
                        EventRecord::new(EventKind::PlanningFailed, e.to_string())
                            .with_error_kind("planning_error"),
                    )
                    .await?;
                ctx.shared
                    .apply(StateUpdate::StatusChanged {
                        status: ProjectStatus::Failed,
                    })
                    .await?;
                Ok(Some(RunOutcome::PlanningError))
            }
        }
    }

    /// Main loop: recompute the plan, drain the earliest stage with queued
    /// work, repeat until nothing is queued.
    async fn execute_stages(&self, ctx: &AgentContext, mode: ExecutionMode) -> Result<RunOutcome> {
        let mut metrics = ExecutionMetrics::default();

        let outcome = loop {
            if self.signals.check() == Signal::Pause {
                ctx.shared
                    .apply(StateUpdate::StatusChanged {
                        status: ProjectStatus::Paused,
                    })
                    .await?;
                break RunOutcome::Paused;
            }

            ctx.shared.block_unreachable().await?;
            let snapshot = ctx.shared.snapshot().await;

            if snapshot.tasks.is_empty() || snapshot.all_tasks_complete() {
                ctx.shared
                    .apply(StateUpdate::StatusChanged {
                        status: ProjectStatus::Complete,
                    })
                    .await?;
                break RunOutcome::Complete;
            }

            if snapshot.queued_tasks().is_empty() {
                // Some tasks are permanently failed or blocked and nothing
                // is executable.
                ctx.shared
                    .append_event(EventRecord::new(
                        EventKind::ProjectFailed,
                        "no executable task remains",
                    ))
                    .await?;
                ctx.shared
                    .apply(StateUpdate::StatusChanged {
                        status: ProjectStatus::Failed,
                    })
                    .await?;
                break RunOutcome::Failed;
            }

            // The plan is never cached; retries and blocking can reshape it.
            let plan = match analyze(&snapshot.tasks, self.config.strategy) {
                Ok(plan) => plan,
                Err(e) => {
                    error!(error = %e, "Plan recomputation failed");
                    ctx.shared
                        .apply(StateUpdate::StatusChanged {
                            status: ProjectStatus::Failed,
                        })
                        .await?;
                    break RunOutcome::Failed;
                }
            };

            let Some(stage) = first_stage_with_queued(&plan, &snapshot) else {
                // Queued tasks exist but none appear in the plan; should be
                // impossible with a validated graph.
                warn!("Queued tasks missing from plan; failing project");
                ctx.shared
                    .apply(StateUpdate::StatusChanged {
                        status: ProjectStatus::Failed,
                    })
                    .await?;
                break RunOutcome::Failed;
            };

            let parallel = match mode {
                ExecutionMode::Sequential => false,
                ExecutionMode::Parallel => true,
                // Recomputed per stage: the score reflects the current plan.
                ExecutionMode::Hybrid => plan.parallelism_score() >= HYBRID_PARALLEL_THRESHOLD,
            };

            let completed_before = count_complete(&snapshot);
            self.run_stage(ctx, &stage, &snapshot, parallel, &mut metrics)
                .await?;

            if self.signals.has_signal() {
                // Pause arrived mid-stage; let the loop top transition.
                continue;
            }

            let completed_after = count_complete(&ctx.shared.snapshot().await);
            if completed_after == completed_before {
                warn!("Stage drained without progress; failing project");
                // Mark unreachable descendants before the terminal write so
                // the persisted state explains itself.
                ctx.shared.block_unreachable().await?;
                ctx.shared
                    .append_event(EventRecord::new(
                        EventKind::ProjectFailed,
                        "stage completed without progress",
                    ))
                    .await?;
                ctx.shared
                    .apply(StateUpdate::StatusChanged {
                        status: ProjectStatus::Failed,
                    })
                    .await?;
                break RunOutcome::Failed;
            }
        };

        info!(
            stages = metrics.stages_executed,
            groups = metrics.groups_executed,
            max_concurrent_groups = metrics.max_concurrent_groups,
            tasks_completed = metrics.tasks_completed,
            tasks_failed = metrics.tasks_failed,
            outcome = ?outcome,
            "Run finished"
        );
        Ok(outcome)
    }

    async fn run_stage(
        &self,
        ctx: &AgentContext,
        stage: &Stage,
        snapshot: &Project,
        parallel: bool,
        metrics: &mut ExecutionMetrics,
    ) -> Result<()> {
        // Only the still-queued slice of each group runs this pass.
        let groups: Vec<Group> = stage
            .groups
            .iter()
            .filter_map(|g| queued_subset(g, snapshot))
            .collect();
        if groups.is_empty() {
            return Ok(());
        }

        metrics.stages_executed += 1;
        ctx.shared
            .append_event(EventRecord::new(
                EventKind::StageStarted,
                format!(
                    "stage {} with {} group(s), {} dispatch",
                    stage.index,
                    groups.len(),
                    if parallel { "parallel" } else { "sequential" }
                ),
            ))
            .await?;

        let max_workers = if parallel {
            self.config.strategy.max_group_size()
        } else {
            1
        };

        if parallel {
            let limit = self.resources.optimal_concurrency().max(1);
            metrics.max_concurrent_groups = metrics.max_concurrent_groups.max(groups.len().min(limit));
            let gate = Arc::new(Semaphore::new(limit));

            let runs = groups.iter().map(|group| {
                let gate = Arc::clone(&gate);
                async move {
                    let _slot = gate.acquire().await.expect("stage gate never closed");
                    self.run_group(ctx, group, max_workers).await
                }
            });
            let results = futures::future::join_all(runs).await;
            for result in results {
                self.absorb_group_result(result, metrics);
            }
        } else {
            metrics.max_concurrent_groups = metrics.max_concurrent_groups.max(1);
            for group in &groups {
                let result = self.run_group(ctx, group, max_workers).await;
                self.absorb_group_result(result, metrics);
                if self.signals.has_signal() {
                    break;
                }
            }
        }

        ctx.shared
            .append_event(EventRecord::new(
                EventKind::StageCompleted,
                format!("stage {} drained", stage.index),
            ))
            .await?;
        Ok(())
    }

    fn absorb_group_result(
        &self,
        result: Result<Option<(usize, usize)>>,
        metrics: &mut ExecutionMetrics,
    ) {
        match result {
            Ok(Some((succeeded, failed))) => {
                metrics.groups_executed += 1;
                metrics.tasks_completed += succeeded;
                metrics.tasks_failed += failed;
            }
            Ok(None) => {} // skipped (pause or admission starvation)
            Err(e) => warn!(error = %e, "Group execution errored"),
        }
    }

    /// Acquire budget, dispatch to the team's Lead, release. Returns the
    /// summary counts, or `None` if the group was skipped this pass.
    async fn run_group(
        &self,
        ctx: &AgentContext,
        group: &Group,
        max_workers: usize,
    ) -> Result<Option<(usize, usize)>> {
        let planned = plan_pool_size(group, max_workers, self.resources.as_ref());
        let allocation = satisfiable_allocation(planned, self.resources.as_ref()).ok_or_else(
            || {
                MaosError::ResourceExhausted(format!(
                    "group {} cannot fit configured limits even with one worker",
                    group.id
                ))
            },
        )?;
        // The admitted allocation caps the pool; it may be smaller than
        // planned when budgets are tight.
        let workers = allocation.agents.max(1);

        let key = format!("{}:{}", ctx.shared.project_id(), group.id);
        if !self.acquire_with_wait(ctx, &key, allocation).await? {
            return Ok(None);
        }

        let lead = TeamLead::new(group.team, ctx.clone());
        let summary = lead.run_group(group, workers).await;
        self.resources.release(&key);

        Ok(Some((summary.success_count(), summary.failure_count())))
    }

    /// Non-blocking admission turned into bounded cooperative waiting.
    /// Pause pending or starvation past the deadline skips the group.
    async fn acquire_with_wait(
        &self,
        ctx: &AgentContext,
        key: &str,
        allocation: ResourceAllocation,
    ) -> Result<bool> {
        let deadline = Duration::from_secs(self.config.base_timeout_secs.max(40) * 3);
        let started = std::time::Instant::now();
        let mut denials: u32 = 0;

        loop {
            if self.signals.has_signal() {
                // Pause blocks new acquisitions; running workers drain.
                return Ok(false);
            }
            if self.resources.try_acquire(key, allocation) {
                return Ok(true);
            }

            denials += 1;
            if denials == 1 {
                ctx.shared
                    .append_event(
                        EventRecord::new(
                            EventKind::AdmissionDenied,
                            format!("waiting for budget: {:?}", allocation),
                        )
                        .with_task(key.to_string()),
                    )
                    .await?;
            }

            if started.elapsed() > deadline {
                warn!(key, "Admission starved past deadline; skipping group this pass");
                return Ok(false);
            }
            tokio::time::sleep(ADMISSION_POLL).await;
        }
    }
}

/// Largest worker-pool size whose allocation the configured limits could
/// ever admit.
fn plan_pool_size(group: &Group, max_workers: usize, resources: &ResourceManager) -> usize {
    let allowance = resources.limits().concurrent_agents;
    group.len().min(max_workers).min(allowance).max(1)
}

fn satisfiable_allocation(
    workers: usize,
    resources: &ResourceManager,
) -> Option<ResourceAllocation> {
    for size in (1..=workers).rev() {
        let allocation = ResourceAllocation::for_workers(size);
        if resources.is_satisfiable(&allocation) {
            return Some(allocation);
        }
    }
    None
}

fn first_stage_with_queued(plan: &ExecutionPlan, project: &Project) -> Option<Stage> {
    plan.stages
        .iter()
        .find(|stage| {
            stage.task_ids().any(|id| {
                project
                    .task(id)
                    .map(|t| t.status == TaskStatus::Queued)
                    .unwrap_or(false)
            })
        })
        .cloned()
}

fn queued_subset(group: &Group, project: &Project) -> Option<Group> {
    let task_ids: Vec<String> = group
        .task_ids
        .iter()
        .filter(|id| {
            project
                .task(id)
                .map(|t| t.status == TaskStatus::Queued)
                .unwrap_or(false)
        })
        .cloned()
        .collect();

    if task_ids.is_empty() {
        None
    } else {
        Some(Group {
            id: group.id.clone(),
            team: group.team,
            task_ids,
        })
    }
}

fn count_complete(project: &Project) -> usize {
    project
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Complete)
        .count()
}
