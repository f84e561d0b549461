use std::time::Duration;

use thiserror::Error;

/// Failure of a single CLI invocation.
///
/// Carries enough context for the caller to decide between retrying the
/// invocation and failing the owning task permanently. The invoker itself is
/// single-shot; retry policy lives with the worker.
#[derive(Debug, Clone)]
pub enum InvokeError {
    /// Wall-clock deadline expired. Partial stdout is kept so callers can
    /// log or salvage whatever the tool managed to emit.
    Timeout {
        elapsed: Duration,
        partial_stdout: String,
    },
    /// The configured command could not be spawned at all.
    CliNotFound { command: String },
    /// The subprocess exited non-zero.
    CliFailed {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    /// Output still contained non-ASCII bytes after sanitization.
    Encoding { detail: String },
}

impl InvokeError {
    /// Transient failures are retried by the worker under its attempt budget.
    /// A non-zero exit with non-empty stdout is treated as permanent: the
    /// tool ran and produced a real answer before failing.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::CliFailed { stdout, .. } => stdout.trim().is_empty(),
            Self::CliNotFound { .. } | Self::Encoding { .. } => false,
        }
    }

    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Stable identifier recorded into task error records and event logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::CliNotFound { .. } => "cli_not_found",
            Self::CliFailed { .. } => "cli_failed",
            Self::Encoding { .. } => "encoding_error",
        }
    }
}

impl std::fmt::Display for InvokeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout {
                elapsed,
                partial_stdout,
            } => write!(
                f,
                "timed out after {:.1}s ({} bytes of partial output)",
                elapsed.as_secs_f64(),
                partial_stdout.len()
            ),
            Self::CliNotFound { command } => write!(f, "CLI not found: {}", command),
            Self::CliFailed {
                exit_code, stderr, ..
            } => match exit_code {
                Some(code) => write!(f, "CLI exited with code {}: {}", code, stderr.trim()),
                None => write!(f, "CLI terminated by signal: {}", stderr.trim()),
            },
            Self::Encoding { detail } => write!(f, "encoding error: {}", detail),
        }
    }
}

impl std::error::Error for InvokeError {}

#[derive(Error, Debug)]
pub enum MaosError {
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Task not found: {project_id}/{task_id}")]
    TaskNotFound {
        project_id: String,
        task_id: String,
    },

    #[error("Cycle detected in task graph: {}", path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    #[error("Task {task_id} depends on unknown task: {dependency}")]
    UnknownDependency { task_id: String, dependency: String },

    #[error("Planning failed: {0}")]
    Planning(String),

    #[error("Invalid status transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },

    #[error("Stale state for project {project_id}: loaded version {loaded} < observed {observed}")]
    StaleState {
        project_id: String,
        loaded: u64,
        observed: u64,
    },

    #[error("State persistence failed: {0}")]
    StatePersistence(String),

    #[error("State schema validation failed: {0}")]
    SchemaValidation(String),

    #[error("Invocation failed: {0}")]
    Invoke(#[from] InvokeError),

    #[error("Resource limits can never admit this allocation: {0}")]
    ResourceExhausted(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Project is paused")]
    Paused,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, MaosError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_transient() {
        let err = InvokeError::Timeout {
            elapsed: Duration::from_secs(30),
            partial_stdout: String::new(),
        };
        assert!(err.is_transient());
        assert_eq!(err.kind(), "timeout");
    }

    #[test]
    fn failed_with_output_is_permanent() {
        let err = InvokeError::CliFailed {
            exit_code: Some(1),
            stdout: "partial answer".to_string(),
            stderr: String::new(),
        };
        assert!(err.is_permanent());

        let empty = InvokeError::CliFailed {
            exit_code: Some(1),
            stdout: "  \n".to_string(),
            stderr: "boom".to_string(),
        };
        assert!(empty.is_transient());
    }

    #[test]
    fn not_found_and_encoding_are_permanent() {
        let nf = InvokeError::CliNotFound {
            command: "claude".to_string(),
        };
        assert!(nf.is_permanent());

        let enc = InvokeError::Encoding {
            detail: "byte 0xE2 at offset 10".to_string(),
        };
        assert!(enc.is_permanent());
    }
}
