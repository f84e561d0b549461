//! The agent hierarchy: Project Manager plans, Team Leads fan out groups,
//! Workers execute atomic tasks against the LLM CLI.

mod lead;
mod manager;
mod prompt;
mod specialty;
mod worker;

pub use lead::{GroupSummary, TeamLead};
pub use manager::{PlannedTask, ProjectManager};
pub use prompt::{planner_prompt, worker_prompt};
pub use specialty::{is_validation_task, Specialty};
pub use worker::{Worker, WorkerReport, QA_ATOMIC_CEILING};

use std::sync::Arc;

use crate::artifact::ArtifactStore;
use crate::config::MaosConfig;
use crate::provider::{CliInvoker, ModelRouter};
use crate::state::SharedProject;

/// Everything an agent needs, threaded explicitly so one process can run
/// several projects with independent budgets and providers.
#[derive(Clone)]
pub struct AgentContext {
    pub shared: SharedProject,
    pub invoker: CliInvoker,
    pub artifacts: Arc<ArtifactStore>,
    /// Model selection, per-provider performance history and on-failure
    /// fallback, shared by every agent of this project.
    pub router: Arc<ModelRouter>,
    pub config: MaosConfig,
}

impl AgentContext {
    pub fn new(shared: SharedProject, config: MaosConfig) -> Self {
        let artifacts = Arc::new(ArtifactStore::new(
            shared.project_id(),
            shared.store().project_dir(shared.project_id()),
        ));
        let router = Arc::new(ModelRouter::new(config.providers.clone()));
        Self {
            shared,
            invoker: CliInvoker::new(),
            artifacts,
            router,
            config,
        }
    }
}
