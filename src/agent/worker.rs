use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use tracing::{info, warn};
use uuid::Uuid;

use super::prompt::worker_prompt;
use super::specialty::Specialty;
use super::AgentContext;
use crate::config::ProviderSpec;
use crate::error::{InvokeError, MaosError, Result};
use crate::project::{Project, Task, TaskError};
use crate::provider::{adaptive_timeout, complexity_score, MAX_SCORE};
use crate::state::StateUpdate;

/// Hard wall for atomic validation work, regardless of adaptive scaling.
pub const QA_ATOMIC_CEILING: Duration = Duration::from_secs(180);

/// Outcome of one worker's ownership of a task, after all retries.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub task_id: String,
    pub success: bool,
    pub attempts: u32,
}

/// Executes exactly one ready task: prompt, invoke, extract, persist.
///
/// The worker owns the retry policy. Transient failures requeue the task
/// under its attempt budget with exponential backoff; the next attempt runs
/// against the router's fallback provider when another is configured, and a
/// timeout raises the complexity score so the adaptive deadline grows.
pub struct Worker {
    agent_id: String,
    specialty: Specialty,
    /// Atomic validation work fails on its first timeout instead of
    /// retrying, so validation loops stay bounded.
    atomic_bound: bool,
    ctx: AgentContext,
}

impl Worker {
    pub fn new(specialty: Specialty, ctx: AgentContext) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            agent_id: format!("worker_{}_{}", specialty, &suffix[..8]),
            specialty,
            atomic_bound: specialty.is_qa(),
            ctx,
        }
    }

    /// Enforce the atomic time bound even for non-QA specialties.
    pub fn with_atomic_bound(mut self) -> Self {
        self.atomic_bound = true;
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub async fn execute(&self, task_id: &str) -> Result<WorkerReport> {
        let mut score_bump: u8 = 0;
        // Set when a failure swaps the model; later attempts stick with it.
        let mut active_provider: Option<(String, ProviderSpec)> = None;

        loop {
            let snapshot = self.ctx.shared.snapshot().await;
            let task = snapshot
                .task(task_id)
                .ok_or_else(|| MaosError::TaskNotFound {
                    project_id: snapshot.project_id.clone(),
                    task_id: task_id.to_string(),
                })?
                .clone();
            let attempt = task.attempts + 1;

            let (provider_name, provider) = match active_provider.clone() {
                Some(selected) => selected,
                None => self.ctx.router.select(task.team.as_str()).ok_or_else(|| {
                    MaosError::Config(format!("no provider for team {}", task.team))
                })?,
            };

            self.ctx
                .shared
                .apply(StateUpdate::TaskStarted {
                    task_id: task_id.to_string(),
                    agent_id: self.agent_id.clone(),
                })
                .await?;

            let upstream = upstream_summaries(&snapshot, &task);
            let prompt = worker_prompt(&task, self.specialty, &upstream);

            let score = complexity_score(&prompt).saturating_add(score_bump).min(MAX_SCORE);
            let base = Duration::from_secs(self.ctx.config.base_timeout_secs);
            let mut deadline = adaptive_timeout(base, score);
            if self.atomic_bound {
                deadline = deadline.min(QA_ATOMIC_CEILING);
            }

            info!(
                task_id,
                agent_id = %self.agent_id,
                attempt,
                provider = %provider_name,
                score,
                deadline_secs = deadline.as_secs(),
                "Worker executing task"
            );

            let attempt_started = Instant::now();
            match self.ctx.invoker.invoke(&provider, &prompt, deadline).await {
                Ok(outcome) => {
                    self.ctx
                        .router
                        .record(&provider_name, task.team.as_str(), true, outcome.elapsed);

                    let persisted = self
                        .ctx
                        .artifacts
                        .persist(task_id, &task.title, &outcome.stdout)
                        .await?;

                    self.ctx
                        .shared
                        .apply(StateUpdate::TaskCompleted {
                            task_id: task_id.to_string(),
                            result_ref: persisted.artifact_ref,
                            agent_id: self.agent_id.clone(),
                            tokens: outcome.tokens_estimate,
                        })
                        .await?;

                    return Ok(WorkerReport {
                        task_id: task_id.to_string(),
                        success: true,
                        attempts: attempt,
                    });
                }
                Err(err) => {
                    self.ctx.router.record(
                        &provider_name,
                        task.team.as_str(),
                        false,
                        attempt_started.elapsed(),
                    );

                    let timed_out = matches!(err, InvokeError::Timeout { .. });

                    // A timeout on atomic validation work is final.
                    let (kind, permanent) = if self.atomic_bound && timed_out {
                        ("atomic_deadline_exceeded", true)
                    } else {
                        (err.kind(), err.is_permanent())
                    };

                    warn!(
                        task_id,
                        attempt,
                        kind,
                        permanent,
                        error = %err,
                        "Worker attempt failed"
                    );

                    self.ctx
                        .shared
                        .apply(StateUpdate::TaskFailed {
                            task_id: task_id.to_string(),
                            error: TaskError::new(kind, err.to_string(), attempt),
                        })
                        .await?;

                    let snapshot = self.ctx.shared.snapshot().await;
                    let task = snapshot.task(task_id).expect("task persisted above");
                    if permanent || !task.can_retry() {
                        return Ok(WorkerReport {
                            task_id: task_id.to_string(),
                            success: false,
                            attempts: task.attempts,
                        });
                    }

                    self.ctx
                        .shared
                        .apply(StateUpdate::TaskRequeued {
                            task_id: task_id.to_string(),
                        })
                        .await?;

                    // Swap models before burning another attempt on the one
                    // that just failed.
                    if let Some((name, spec)) =
                        self.ctx.router.fallback(&provider_name, task.team.as_str())
                    {
                        info!(
                            task_id,
                            failed = %provider_name,
                            fallback = %name,
                            "Switching provider for next attempt"
                        );
                        active_provider = Some((name, spec));
                    }

                    if timed_out {
                        score_bump = score_bump.saturating_add(1);
                    }
                    tokio::time::sleep(backoff_delay(task_id, attempt)).await;
                }
            }
        }
    }
}

/// One-line summaries of completed dependencies for the prompt.
fn upstream_summaries(project: &Project, task: &Task) -> Vec<String> {
    task.depends_on
        .iter()
        .filter_map(|dep| project.task(dep))
        .map(|dep| {
            let artifacts = dep
                .result_ref
                .as_deref()
                .map(|r| format!(" (output at {})", r))
                .unwrap_or_default();
            format!("{}: {}{}", dep.title, dep.status, artifacts)
        })
        .collect()
}

/// Exponential backoff with deterministic jitter derived from the task id
/// and attempt, so tests are reproducible without an RNG dependency.
fn backoff_delay(task_id: &str, attempt: u32) -> Duration {
    let exp = 500u64.saturating_mul(1u64 << attempt.saturating_sub(1).min(6));
    let mut hasher = DefaultHasher::new();
    (task_id, attempt).hash(&mut hasher);
    let jitter = hasher.finish() % 250;
    Duration::from_millis(exp + jitter).min(Duration::from_secs(30))
}
