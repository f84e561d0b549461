use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::MaosConfig;
use crate::error::{MaosError, Result};
use crate::project::{EventKind, EventRecord, Project};

const STATE_FILE: &str = "state.json";
const EVENTS_FILE: &str = "events.log";
const BACKUP_PREFIX: &str = "state.json.bak-";

/// On-disk store for project state.
///
/// `save` is atomic: the document is written to a sibling temp file, synced,
/// then renamed over the canonical path; the directory is synced afterwards
/// so the rename itself is durable. The previous canonical file is copied
/// aside as a timestamped backup before being replaced.
pub struct ProjectStore {
    projects_dir: PathBuf,
    /// Highest version observed per project in this process. Loads refuse
    /// anything older, preventing stale-write races between orchestrators.
    observed_versions: Mutex<HashMap<String, u64>>,
}

impl ProjectStore {
    pub fn new(projects_dir: impl Into<PathBuf>) -> Self {
        Self {
            projects_dir: projects_dir.into(),
            observed_versions: Mutex::new(HashMap::new()),
        }
    }

    pub fn projects_dir(&self) -> &Path {
        &self.projects_dir
    }

    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.projects_dir.join(project_id)
    }

    fn state_path(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join(STATE_FILE)
    }

    fn events_path(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join(EVENTS_FILE)
    }

    /// Create the project directory tree and persist the initial document.
    pub async fn create(&self, objective: &str, config: MaosConfig) -> Result<Project> {
        let mut project = Project::new(objective, config);
        let dir = self.project_dir(&project.project_id);

        fs::create_dir_all(dir.join("artifacts")).await?;
        fs::create_dir_all(dir.join("deliverables")).await?;
        fs::create_dir_all(dir.join("logs")).await?;

        self.save(&mut project).await?;
        self.append_event(
            &project.project_id,
            EventRecord::new(EventKind::ProjectCreated, objective),
        )
        .await?;

        info!(project_id = %project.project_id, "Project created");
        Ok(project)
    }

    /// Persist the document atomically, bumping its version.
    pub async fn save(&self, project: &mut Project) -> Result<()> {
        project.version += 1;
        project.touch();

        let path = self.state_path(&project.project_id);
        let content = serde_json::to_string_pretty(project)?;

        self.backup_existing(&project.project_id).await?;
        self.write_atomic(&path, &content).await?;

        self.observed_versions
            .lock()
            .insert(project.project_id.clone(), project.version);

        debug!(
            project_id = %project.project_id,
            version = project.version,
            "State saved"
        );
        Ok(())
    }

    /// Load a project, falling back to the most recent valid backup if the
    /// canonical file fails schema validation.
    pub async fn load(&self, project_id: &str) -> Result<Project> {
        let path = self.state_path(project_id);
        if !path.exists() {
            return Err(MaosError::ProjectNotFound(project_id.to_string()));
        }

        self.remove_interrupted_writes(project_id).await;

        let (project, restored) = match self.read_and_validate(&path).await {
            Ok(project) => (project, false),
            Err(e) => {
                warn!(project_id, error = %e, "Canonical state invalid; trying backups");
                let project = self.restore_latest_backup(project_id).await?;
                self.append_event(
                    project_id,
                    EventRecord::new(
                        EventKind::RestoredFromBackup,
                        format!("canonical state rejected: {}", e),
                    ),
                )
                .await?;
                (project, true)
            }
        };

        {
            let mut observed = self.observed_versions.lock();
            let prior = observed.get(project_id).copied().unwrap_or(0);
            // A backup restore legitimately rewinds the version; only an
            // unexplained rewind of the canonical file is a stale write.
            if !restored && project.version < prior {
                return Err(MaosError::StaleState {
                    project_id: project_id.to_string(),
                    loaded: project.version,
                    observed: prior,
                });
            }
            observed.insert(project_id.to_string(), project.version);
        }

        Ok(project)
    }

    /// Append one event line to the project's log.
    pub async fn append_event(&self, project_id: &str, event: EventRecord) -> Result<()> {
        let path = self.events_path(project_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Read the full event log, skipping lines that no longer parse.
    pub async fn read_events(&self, project_id: &str) -> Result<Vec<EventRecord>> {
        let path = self.events_path(project_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path).await?;
        Ok(content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }

    /// Copy the canonical file aside and return the backup id.
    pub async fn snapshot(&self, project_id: &str) -> Result<String> {
        let path = self.state_path(project_id);
        if !path.exists() {
            return Err(MaosError::ProjectNotFound(project_id.to_string()));
        }
        let backup_id = Utc::now().format("%Y%m%dT%H%M%S%3f").to_string();
        let backup_path = self
            .project_dir(project_id)
            .join(format!("{}{}", BACKUP_PREFIX, backup_id));
        fs::copy(&path, &backup_path).await?;
        Ok(backup_id)
    }

    /// Replace the canonical file with a named backup, atomically.
    pub async fn restore(&self, project_id: &str, backup_id: &str) -> Result<Project> {
        let backup_path = self
            .project_dir(project_id)
            .join(format!("{}{}", BACKUP_PREFIX, backup_id));
        if !backup_path.exists() {
            return Err(MaosError::StatePersistence(format!(
                "backup {} not found for project {}",
                backup_id, project_id
            )));
        }

        let project = self.read_and_validate(&backup_path).await?;
        let content = fs::read_to_string(&backup_path).await?;
        self.write_atomic(&self.state_path(project_id), &content)
            .await?;

        self.observed_versions
            .lock()
            .insert(project_id.to_string(), project.version);

        info!(project_id, backup_id, "State restored from backup");
        Ok(project)
    }

    /// Project ids with a canonical state file on disk.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        if !self.projects_dir.exists() {
            return Ok(ids);
        }
        let mut entries = fs::read_dir(&self.projects_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_dir() && path.join(STATE_FILE).exists() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn read_and_validate(&self, path: &Path) -> Result<Project> {
        let content = fs::read_to_string(path).await?;
        let project: Project = serde_json::from_str(&content)
            .map_err(|e| MaosError::SchemaValidation(e.to_string()))?;
        if project.project_id.is_empty() {
            return Err(MaosError::SchemaValidation(
                "empty project_id".to_string(),
            ));
        }
        Ok(project)
    }

    async fn restore_latest_backup(&self, project_id: &str) -> Result<Project> {
        let mut backups = self.backup_paths(project_id).await?;
        // Backup ids are lexicographically ordered timestamps.
        backups.sort();
        backups.reverse();

        for backup in backups {
            match self.read_and_validate(&backup).await {
                Ok(project) => {
                    let content = fs::read_to_string(&backup).await?;
                    self.write_atomic(&self.state_path(project_id), &content)
                        .await?;
                    return Ok(project);
                }
                Err(e) => {
                    warn!(path = %backup.display(), error = %e, "Backup invalid, trying older");
                }
            }
        }

        Err(MaosError::SchemaValidation(format!(
            "no valid state or backup for project {}",
            project_id
        )))
    }

    async fn backup_paths(&self, project_id: &str) -> Result<Vec<PathBuf>> {
        let dir = self.project_dir(project_id);
        let mut backups = Vec::new();
        if !dir.exists() {
            return Ok(backups);
        }
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_backup = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(BACKUP_PREFIX))
                .unwrap_or(false);
            if is_backup {
                backups.push(path);
            }
        }
        Ok(backups)
    }

    async fn backup_existing(&self, project_id: &str) -> Result<()> {
        let path = self.state_path(project_id);
        if path.exists() {
            self.snapshot(project_id).await?;
        }
        Ok(())
    }

    async fn write_atomic(&self, path: &Path, content: &str) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| MaosError::StatePersistence("state path has no parent".into()))?
            .to_path_buf();
        fs::create_dir_all(&parent).await?;

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, content).await?;

        // fsync the temp file off the async runtime.
        let sync_target = tmp_path.clone();
        let synced = tokio::task::spawn_blocking(move || {
            std::fs::File::open(&sync_target).and_then(|f| f.sync_all())
        })
        .await;
        match synced {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to sync temp state file"),
            Err(e) => warn!(error = %e, "Sync task failed"),
        }

        // POSIX rename is atomic; readers see the old or the new document,
        // never a mixture.
        fs::rename(&tmp_path, path).await?;

        // Sync the directory so the rename survives a crash.
        let dir_synced = tokio::task::spawn_blocking(move || {
            std::fs::File::open(&parent).and_then(|f| f.sync_all())
        })
        .await;
        match dir_synced {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to sync state directory"),
            Err(e) => warn!(error = %e, "Directory sync task failed"),
        }

        Ok(())
    }

    async fn remove_interrupted_writes(&self, project_id: &str) {
        let dir = self.project_dir(project_id);
        if let Ok(mut entries) = fs::read_dir(&dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "tmp") {
                    debug!(path = %path.display(), "Removing interrupted write");
                    let _ = fs::remove_file(&path).await;
                }
            }
        }
    }
}
