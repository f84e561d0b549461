//! Crash-safe project persistence.
//!
//! One directory per project under the configured projects root:
//!
//! ```text
//! <projects_dir>/<project_id>/
//!   state.json                 canonical document, replaced atomically
//!   state.json.bak-<ts>        prior versions
//!   events.log                 append-only newline-delimited JSON
//!   artifacts/<task_id>/...    raw LLM outputs
//!   deliverables/...           extracted files
//!   logs/                      per-run logs
//! ```

mod shared;
mod store;

pub use shared::{SharedProject, StateUpdate};
pub use store::ProjectStore;
