//! Prompt construction for the agent hierarchy.
//!
//! Templates are keyed by specialty. The ASCII output preamble is appended
//! by the invoker, not here.

use super::specialty::Specialty;
use crate::project::Task;

fn role_line(specialty: Specialty) -> &'static str {
    match specialty {
        Specialty::General => "You are a senior software engineer handling a focused task.",
        Specialty::Html => "You are an HTML specialist. Produce semantic, accessible markup.",
        Specialty::Css => "You are a CSS specialist. Produce clean, responsive styling.",
        Specialty::Js => "You are a JavaScript specialist. Produce small, dependency-free scripts.",
        Specialty::Api => "You are a backend API specialist. Design clear request/response contracts.",
        Specialty::Db => "You are a database specialist. Design minimal, normalized schemas.",
        Specialty::Security => {
            "You are a security specialist. Harden the given surface without breaking behavior."
        }
        Specialty::QaHtml => {
            "You are a QA engineer validating HTML structure. Report findings as [PASS]/[FAIL] lines."
        }
        Specialty::QaCss => {
            "You are a QA engineer validating CSS. Report findings as [PASS]/[FAIL] lines."
        }
        Specialty::QaJs => {
            "You are a QA engineer validating JavaScript behavior. Report findings as [PASS]/[FAIL] lines."
        }
        Specialty::QaPerformance => {
            "You are a QA engineer auditing performance budgets. Report findings as [PASS]/[FAIL] lines."
        }
    }
}

/// Build the prompt for one atomic task.
///
/// Upstream summaries give the worker just enough context about completed
/// dependencies without replaying their full outputs.
pub fn worker_prompt(task: &Task, specialty: Specialty, upstream: &[String]) -> String {
    let mut prompt = String::with_capacity(512);
    prompt.push_str(role_line(specialty));
    prompt.push_str("\n\nTask: ");
    prompt.push_str(&task.title);
    prompt.push_str("\n\n");
    prompt.push_str(&task.description);
    prompt.push('\n');

    if !upstream.is_empty() {
        prompt.push_str("\nCompleted prerequisite work:\n");
        for summary in upstream {
            prompt.push_str("- ");
            prompt.push_str(summary);
            prompt.push('\n');
        }
    }

    prompt.push_str(
        "\nComplete this single task now. Emit any files as fenced code blocks \
         with a language tag. Do not ask for permission to write files; \
         emit their full contents directly.\n",
    );
    prompt
}

/// Build the planning prompt for the Project Manager.
///
/// The task list must come back as JSON between the provider's markers so
/// the rest of the output can stay free-form.
pub fn planner_prompt(objective: &str, start_marker: &str, end_marker: &str) -> String {
    format!(
        "You are a project manager decomposing an objective into atomic tasks \
         for specialist teams.\n\n\
         Objective: {objective}\n\n\
         Rules:\n\
         - Every task must be completable by one specialist in a single \
           sitting (atomic decomposition).\n\
         - Tag each task with exactly one team: general, frontend, backend, qa.\n\
         - Express validation as separate per-concern qa tasks (HTML structure, \
           CSS, JavaScript behavior, performance), never one catch-all test task.\n\
         - depends_on lists ids of tasks that must finish first. No cycles.\n\n\
         Respond with the task list as JSON between {start_marker} and \
         {end_marker}, shaped like:\n\
         {start_marker}\n\
         [{{\"id\": \"task-1\", \"title\": \"...\", \"description\": \"...\", \
         \"team\": \"frontend\", \"depends_on\": []}}]\n\
         {end_marker}\n",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Team;

    #[test]
    fn worker_prompt_includes_task_and_upstream() {
        let task = Task::new("t-2", "Style the hero", "Add CSS for the hero section")
            .with_team(Team::Frontend);
        let upstream = vec!["Build page skeleton: complete".to_string()];
        let prompt = worker_prompt(&task, Specialty::Css, &upstream);

        assert!(prompt.contains("CSS specialist"));
        assert!(prompt.contains("Style the hero"));
        assert!(prompt.contains("Build page skeleton"));
        assert!(prompt.is_ascii());
    }

    #[test]
    fn worker_prompt_without_upstream_omits_section() {
        let task = Task::new("t-1", "T", "D");
        let prompt = worker_prompt(&task, Specialty::General, &[]);
        assert!(!prompt.contains("prerequisite"));
    }

    #[test]
    fn planner_prompt_carries_markers_and_teams() {
        let prompt = planner_prompt("Build a landing page", "BEGIN_JSON", "END_JSON");
        assert!(prompt.contains("Build a landing page"));
        assert!(prompt.contains("BEGIN_JSON"));
        assert!(prompt.contains("END_JSON"));
        assert!(prompt.contains("frontend"));
        assert!(prompt.contains("qa"));
        assert!(prompt.is_ascii());
    }
}
