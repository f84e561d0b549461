//! Dependency analysis and stage planning.
//!
//! Turns a flat task list into an execution plan: stages ordered by
//! dependency depth, each stage partitioned into same-team groups bounded by
//! the strategy's group size. The plan is recomputed from the live task set
//! on every orchestrator pass, so it is cheap and pure by design.

mod graph;
mod stages;

pub use graph::{dependency_depths, detect_cycle, validate_dependencies};
pub use stages::{analyze, ExecutionPlan, Group, Stage};
