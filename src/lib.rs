//! maos: multi-agent orchestration of external LLM CLI tools.
//!
//! A Project Manager decomposes an objective into a task graph, Team Leads
//! fan tasks out across bounded worker pools, and Workers fulfil each leaf
//! task by invoking an external LLM CLI and persisting its output as
//! artifacts and deliverables. Crash-safe, resumable state lives on disk.

pub mod agent;
pub mod artifact;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod planner;
pub mod project;
pub mod provider;
pub mod resource;
pub mod sanitize;
pub mod state;

pub use agent::{ProjectManager, Specialty, TeamLead, Worker};
pub use artifact::{ArtifactKind, ArtifactStore};
pub use config::{ExecutionMode, MaosConfig, ProviderSpec, ResourceLimits, Strategy};
pub use error::{InvokeError, MaosError, Result};
pub use orchestrator::{Orchestrator, RunOutcome, Signal, SignalHandler};
pub use planner::{analyze, ExecutionPlan};
pub use project::{Project, ProjectStatus, Task, TaskStatus, Team};
pub use provider::{CliInvoker, ModelRouter};
pub use resource::{ResourceAllocation, ResourceManager};
pub use state::{ProjectStore, SharedProject, StateUpdate};
