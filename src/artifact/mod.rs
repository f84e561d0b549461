//! Artifact-to-deliverable pipeline.
//!
//! Raw LLM output is always persisted verbatim (post-sanitization) as a
//! `raw_output` artifact; the extractor additionally turns recognizable code
//! regions into named deliverable files.

mod extract;
mod store;

pub use extract::{extract, slug, ExtractedFile};
pub use store::{ArtifactMeta, ArtifactStore, ExtractionOutcome};

use serde::{Deserialize, Serialize};

/// What a persisted blob is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    RawOutput,
    Deliverable,
}
