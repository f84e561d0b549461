//! Project and task data model.
//!
//! `Project` is the single persisted document per orchestration run. Tasks
//! live inside it; events are logged separately as an append-only stream.

mod events;
mod task;
mod types;

pub use events::{EventKind, EventRecord};
pub use task::{Task, TaskError, TaskStatus, Team};
pub use types::{AgentUsage, Project, ProjectStatus, UsageStats};
