//! Configuration types and loading.
//!
//! A single `MaosConfig` covers execution settings, resource limits and the
//! provider registry. Unknown keys are rejected at parse time so a typo in a
//! config file fails loudly instead of silently falling back to defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{MaosError, Result};

/// Grouping strategy for the dependency analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Conservative,
    #[default]
    Balanced,
    Aggressive,
}

impl Strategy {
    /// Maximum tasks per group.
    pub fn max_group_size(&self) -> usize {
        match self {
            Self::Conservative => 2,
            Self::Balanced => 4,
            Self::Aggressive => 8,
        }
    }

    /// Conservative stages never mix teams; balanced and aggressive stages
    /// may hold groups from several teams at once.
    pub fn allows_cross_team_stages(&self) -> bool {
        !matches!(self, Self::Conservative)
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conservative => write!(f, "conservative"),
            Self::Balanced => write!(f, "balanced"),
            Self::Aggressive => write!(f, "aggressive"),
        }
    }
}

/// How stages are driven by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
    #[default]
    Hybrid,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel => write!(f, "parallel"),
            Self::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Process-wide admission budgets. All dimensions must hold simultaneously
/// for an allocation to be admitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceLimits {
    /// Tokens admitted per sliding 60s window.
    pub tokens_per_min: u64,
    /// Instantaneous accounted memory in MB.
    pub memory_mb: u64,
    /// Instantaneous accounted CPU percentage.
    pub cpu_pct: u32,
    /// Live agent count.
    pub concurrent_agents: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            tokens_per_min: 10_000,
            memory_mb: 2048,
            cpu_pct: 80,
            concurrent_agents: 8,
        }
    }
}

/// One LLM CLI tool: the command vector to execute and how to find a
/// structured payload in its output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderSpec {
    /// Command vector; first element is the executable.
    pub cmd: Vec<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Start/end tokens around an embedded JSON payload. When both appear in
    /// stdout, the text between them is parsed as JSON; otherwise the full
    /// stdout is treated as prose.
    #[serde(default = "ProviderSpec::default_json_markers")]
    pub json_markers: Vec<String>,
}

impl ProviderSpec {
    pub fn default_json_markers() -> Vec<String> {
        vec!["BEGIN_JSON".to_string(), "END_JSON".to_string()]
    }

    pub fn new(cmd: Vec<String>) -> Self {
        Self {
            cmd,
            extra_args: Vec::new(),
            json_markers: Self::default_json_markers(),
        }
    }

    /// Full argument vector as executed: `[cmd..., extra_args...]`.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = self.cmd.clone();
        argv.extend(self.extra_args.iter().cloned());
        argv
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MaosConfig {
    /// Per-task attempt budget for transient failures.
    pub max_attempts: u32,
    /// Base subprocess deadline before adaptive scaling.
    pub base_timeout_secs: u64,
    pub strategy: Strategy,
    pub mode: ExecutionMode,
    pub resource_limits: ResourceLimits,
    pub projects_dir: PathBuf,
    /// Role name -> provider. The `general` role is the fallback for any
    /// role without its own entry.
    pub providers: HashMap<String, ProviderSpec>,
}

impl Default for MaosConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_timeout_secs: 300,
            strategy: Strategy::default(),
            mode: ExecutionMode::default(),
            resource_limits: ResourceLimits::default(),
            projects_dir: PathBuf::from("projects"),
            providers: HashMap::new(),
        }
    }
}

impl MaosConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate values for consistency. Collects every problem instead of
    /// stopping at the first one.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.max_attempts == 0 {
            errors.push("max_attempts must be greater than 0".into());
        }
        if self.base_timeout_secs == 0 {
            errors.push("base_timeout_secs must be greater than 0".into());
        }
        if self.resource_limits.concurrent_agents == 0 {
            errors.push("resource_limits.concurrent_agents must be greater than 0".into());
        }
        if self.resource_limits.tokens_per_min == 0 {
            errors.push("resource_limits.tokens_per_min must be greater than 0".into());
        }
        if self.resource_limits.cpu_pct == 0 || self.resource_limits.cpu_pct > 100 {
            errors.push("resource_limits.cpu_pct must be within 1..=100".into());
        }

        for (role, spec) in &self.providers {
            if spec.cmd.is_empty() {
                errors.push(format!("provider '{}' has an empty command vector", role));
            }
            if !spec.json_markers.is_empty() && spec.json_markers.len() != 2 {
                errors.push(format!(
                    "provider '{}' json_markers must be empty or exactly [start, end]",
                    role
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(MaosError::Config(errors.join("; ")))
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = MaosConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.strategy, Strategy::Balanced);
        assert_eq!(config.mode, ExecutionMode::Hybrid);
        assert_eq!(config.resource_limits.concurrent_agents, 8);
    }

    #[test]
    fn strategy_group_sizes() {
        assert_eq!(Strategy::Conservative.max_group_size(), 2);
        assert_eq!(Strategy::Balanced.max_group_size(), 4);
        assert_eq!(Strategy::Aggressive.max_group_size(), 8);
        assert!(Strategy::Aggressive.allows_cross_team_stages());
        assert!(Strategy::Balanced.allows_cross_team_stages());
        assert!(!Strategy::Conservative.allows_cross_team_stages());
    }

    #[test]
    fn rejects_unknown_keys() {
        let toml = r#"
            max_attempts = 3
            not_a_real_option = true
        "#;
        let parsed: std::result::Result<MaosConfig, _> = toml::from_str(toml);
        assert!(parsed.is_err());
    }

    #[test]
    fn rejects_unknown_resource_keys() {
        let toml = r#"
            [resource_limits]
            tokens_per_min = 5000
            gpus = 4
        "#;
        let parsed: std::result::Result<MaosConfig, _> = toml::from_str(toml);
        assert!(parsed.is_err());
    }

    #[test]
    fn validate_collects_errors() {
        let mut config = MaosConfig::default();
        config.max_attempts = 0;
        config.resource_limits.cpu_pct = 150;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("max_attempts"));
        assert!(err.contains("cpu_pct"));
    }

    #[test]
    fn provider_argv_concatenates() {
        let spec = ProviderSpec {
            cmd: vec!["claude".to_string(), "-p".to_string()],
            extra_args: vec!["--model".to_string(), "sonnet".to_string()],
            json_markers: ProviderSpec::default_json_markers(),
        };
        assert_eq!(spec.argv(), vec!["claude", "-p", "--model", "sonnet"]);
    }

    #[test]
    fn parses_full_config() {
        let toml = r#"
            max_attempts = 2
            base_timeout_secs = 120
            strategy = "aggressive"
            mode = "parallel"
            projects_dir = "/tmp/projects"

            [resource_limits]
            tokens_per_min = 5000
            memory_mb = 1024
            cpu_pct = 50
            concurrent_agents = 4

            [providers.general]
            cmd = ["claude", "-p"]
            extra_args = ["--model", "sonnet"]

            [providers.planner]
            cmd = ["claude", "-p"]
            json_markers = ["BEGIN_JSON", "END_JSON"]
        "#;
        let config: MaosConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.strategy, Strategy::Aggressive);
        assert_eq!(config.mode, ExecutionMode::Parallel);
        assert_eq!(config.providers.len(), 2);
    }
}
