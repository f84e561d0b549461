use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::prompt::planner_prompt;
use super::AgentContext;
use crate::config::ProviderSpec;
use crate::error::{MaosError, Result};
use crate::planner::validate_dependencies;
use crate::project::{Task, Team};
use crate::provider::{adaptive_timeout, complexity_score, MAX_SCORE};
use crate::state::StateUpdate;

const PLANNER_AGENT_ID: &str = "project_manager";

/// Role key for provider selection and performance history.
const PLANNER_ROLE: &str = "planner";

/// One task as the planning model emits it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTask {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Plans once per project, before any execution stage.
///
/// The Manager is itself a worker whose task is planning: the invocation
/// goes through the same sanitizer, adaptive timeout and transient-retry
/// machinery as any other task.
pub struct ProjectManager {
    ctx: AgentContext,
}

impl ProjectManager {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx }
    }

    /// Decompose the objective into a validated task list.
    ///
    /// An empty list is legal (the project completes without executing);
    /// an invalid one (cycles, unknown references, malformed payload)
    /// aborts with a planning error rather than executing a bad plan.
    pub async fn plan(&self, objective: &str) -> Result<Vec<Task>> {
        let (mut provider_name, mut provider) =
            self.ctx.router.select(PLANNER_ROLE).ok_or_else(|| {
                MaosError::Config("no planner or general provider configured".to_string())
            })?;

        let max_attempts = self.ctx.config.max_attempts.max(1);
        let base = Duration::from_secs(self.ctx.config.base_timeout_secs);
        let mut score_bump: u8 = 0;

        for attempt in 1..=max_attempts {
            // Rebuilt each attempt: a fallback provider may use different
            // JSON markers.
            let (start_marker, end_marker) = markers_of(&provider);
            let prompt = planner_prompt(objective, &start_marker, &end_marker);

            let score = complexity_score(&prompt).saturating_add(score_bump).min(MAX_SCORE);
            let deadline = adaptive_timeout(base, score);

            info!(attempt, provider = %provider_name, score, "Project manager planning");

            let attempt_started = Instant::now();
            match self.ctx.invoker.invoke(&provider, &prompt, deadline).await {
                Ok(outcome) => {
                    self.ctx
                        .router
                        .record(&provider_name, PLANNER_ROLE, true, outcome.elapsed);
                    self.ctx
                        .shared
                        .apply(StateUpdate::UsageRecorded {
                            agent_id: PLANNER_AGENT_ID.to_string(),
                            tokens: outcome.tokens_estimate,
                        })
                        .await?;

                    let tasks = self.materialize(outcome.text())?;
                    validate_dependencies(&tasks)?;
                    info!(task_count = tasks.len(), "Plan accepted");
                    return Ok(tasks);
                }
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    self.ctx.router.record(
                        &provider_name,
                        PLANNER_ROLE,
                        false,
                        attempt_started.elapsed(),
                    );
                    warn!(attempt, error = %err, "Planning attempt failed; retrying");
                    if matches!(err, crate::error::InvokeError::Timeout { .. }) {
                        score_bump = score_bump.saturating_add(1);
                    }
                    // Try a different model before spending another attempt.
                    if let Some((name, spec)) =
                        self.ctx.router.fallback(&provider_name, PLANNER_ROLE)
                    {
                        info!(failed = %provider_name, fallback = %name, "Planner switching provider");
                        provider_name = name;
                        provider = spec;
                    }
                    tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
                }
                Err(err) => {
                    self.ctx.router.record(
                        &provider_name,
                        PLANNER_ROLE,
                        false,
                        attempt_started.elapsed(),
                    );
                    return Err(MaosError::Planning(err.to_string()));
                }
            }
        }

        Err(MaosError::Planning(format!(
            "planning exhausted {} attempts",
            max_attempts
        )))
    }

    /// Turn the raw payload into task records with stable ids.
    fn materialize(&self, payload: &str) -> Result<Vec<Task>> {
        let planned: Vec<PlannedTask> = serde_json::from_str(payload)
            .map_err(|e| MaosError::Planning(format!("malformed task list: {}", e)))?;

        let mut tasks = Vec::with_capacity(planned.len());
        for (index, item) in planned.into_iter().enumerate() {
            let task_id = item
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| format!("task-{}", index + 1));

            if tasks.iter().any(|t: &Task| t.task_id == task_id) {
                return Err(MaosError::Planning(format!(
                    "duplicate task id in plan: {}",
                    task_id
                )));
            }

            let team = match item.team.as_deref() {
                None | Some("") => Team::General,
                Some(raw) => raw
                    .parse()
                    .map_err(|e: String| MaosError::Planning(e))?,
            };

            tasks.push(
                Task::new(task_id, item.title, item.description)
                    .with_team(team)
                    .with_depends_on(item.depends_on)
                    .with_max_attempts(self.ctx.config.max_attempts),
            );
        }

        Ok(tasks)
    }
}

fn markers_of(provider: &ProviderSpec) -> (String, String) {
    if provider.json_markers.len() == 2 {
        (
            provider.json_markers[0].clone(),
            provider.json_markers[1].clone(),
        )
    } else {
        let defaults = ProviderSpec::default_json_markers();
        (defaults[0].clone(), defaults[1].clone())
    }
}
