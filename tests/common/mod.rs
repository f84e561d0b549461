//! Shared fixtures for the end-to-end suite. Providers are plain `sh`
//! scripts that read the prompt from stdin and answer on stdout, standing in
//! for real LLM CLI tools.

use std::path::Path;
use std::sync::Arc;

use maos::project::Task;
use maos::state::{ProjectStore, SharedProject};
use maos::{MaosConfig, ProjectStatus, ProviderSpec};

pub fn shell_provider(script: &str) -> ProviderSpec {
    ProviderSpec::new(vec![
        "sh".to_string(),
        "-c".to_string(),
        script.to_string(),
    ])
}

/// Config rooted in a temp dir with short timeouts for test speed.
pub fn base_config(projects_dir: &Path) -> MaosConfig {
    let mut config = MaosConfig::default();
    config.projects_dir = projects_dir.to_path_buf();
    config.base_timeout_secs = 5;
    config.max_attempts = 3;
    config
}

/// A provider script that wraps the given JSON plan in the default markers.
pub fn planning_script(plan_json: &str) -> String {
    format!(
        "cat >/dev/null; echo 'Here is the plan. BEGIN_JSON {} END_JSON'",
        plan_json
    )
}

/// Seed a project that is already past planning, with the given tasks
/// installed and status `executing`.
pub async fn seeded_project(
    store: &Arc<ProjectStore>,
    config: &MaosConfig,
    objective: &str,
    tasks: Vec<Task>,
) -> String {
    let mut project = store.create(objective, config.clone()).await.unwrap();
    project.tasks = tasks;
    project.transition(ProjectStatus::Executing).unwrap();
    store.save(&mut project).await.unwrap();
    project.project_id
}

#[allow(dead_code)]
pub fn shared(store: Arc<ProjectStore>, project: maos::Project) -> SharedProject {
    SharedProject::new(store, project)
}
