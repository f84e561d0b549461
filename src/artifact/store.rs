use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info};

use super::extract::{extract, ExtractedFile};
use super::ArtifactKind;
use crate::error::Result;
use crate::sanitize;

const RAW_OUTPUT_NAME: &str = "raw_output.txt";

/// Metadata for one persisted blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub project_id: String,
    pub task_id: String,
    pub kind: ArtifactKind,
    pub name: String,
    /// Path relative to the project directory.
    pub path: String,
    pub sha: String,
    pub created_at: DateTime<Utc>,
}

/// Result of persisting one task's output.
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    /// Locator of the raw output blob, stored on the task as `result_ref`.
    pub artifact_ref: String,
    pub raw: ArtifactMeta,
    pub deliverables: Vec<ArtifactMeta>,
}

/// Writes raw outputs and extracted deliverables for one project.
///
/// Raw outputs are partitioned by task id, so concurrent workers never touch
/// the same path. Deliverable names are deterministic per task, so a rerun
/// overwrites its own files instead of duplicating them.
pub struct ArtifactStore {
    project_id: String,
    project_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(project_id: impl Into<String>, project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_id: project_id.into(),
            project_dir: project_dir.into(),
        }
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.project_dir.join("artifacts")
    }

    pub fn deliverables_dir(&self) -> PathBuf {
        self.project_dir.join("deliverables")
    }

    /// Persist the raw output and every extractable deliverable.
    pub async fn persist(
        &self,
        task_id: &str,
        task_title: &str,
        raw_text: &str,
    ) -> Result<ExtractionOutcome> {
        let clean = sanitize::sanitize(raw_text);

        // The verbatim output is always kept, however many deliverables
        // come out of it.
        let raw_rel = format!("artifacts/{}/{}", task_id, RAW_OUTPUT_NAME);
        let raw_path = self.project_dir.join(&raw_rel);
        let raw = self
            .write_blob(task_id, ArtifactKind::RawOutput, RAW_OUTPUT_NAME, &raw_rel, &raw_path, &clean)
            .await?;

        let mut deliverables = Vec::new();
        for ExtractedFile { name, content } in extract(task_title, &clean) {
            let rel = format!("deliverables/{}", name);
            let path = self.project_dir.join(&rel);
            let meta = self
                .write_blob(task_id, ArtifactKind::Deliverable, &name, &rel, &path, &content)
                .await?;
            deliverables.push(meta);
        }

        if !deliverables.is_empty() {
            info!(
                task_id,
                count = deliverables.len(),
                "Extracted deliverables"
            );
        }

        Ok(ExtractionOutcome {
            artifact_ref: raw_rel,
            raw,
            deliverables,
        })
    }

    async fn write_blob(
        &self,
        task_id: &str,
        kind: ArtifactKind,
        name: &str,
        rel: &str,
        path: &Path,
        content: &str,
    ) -> Result<ArtifactMeta> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, content.as_bytes()).await?;
        debug!(path = %path.display(), bytes = content.len(), "Wrote artifact");

        Ok(ArtifactMeta {
            project_id: self.project_id.clone(),
            task_id: task_id.to_string(),
            kind,
            name: name.to_string(),
            path: rel.to_string(),
            sha: sha256_hex(content.as_bytes()),
            created_at: Utc::now(),
        })
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
