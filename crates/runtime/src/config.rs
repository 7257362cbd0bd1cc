//! Gateway configuration loader.
//!
//! One YAML document with a section per component. Every field has a
//! default, so an empty file (or no file) yields the stock thresholds.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use switchyard_core::{ClassifierConfig, Locale, RoutingConfig, ThinkingBudgets};
use switchyard_ledger::LedgerConfig;
use switchyard_memory::CompactionConfig;
use switchyard_tools::ToolLimits;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Switchyard, a personal assistant. \
Use the available tools when they help, and answer concisely.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    pub system_prompt: String,
    pub max_iterations: usize,
    /// Compact between iterations once the history holds more messages.
    pub mid_loop_compact_messages: usize,
    pub max_continuations: usize,
    pub lock_wait_secs: u64,
    pub shutdown_drain_secs: u64,
    pub provider_timeout_secs: u64,
    /// Recent messages kept by the successive hard trims after a context
    /// overflow, once a forced compaction was not enough.
    pub overflow_trims: Vec<usize>,
    pub locale: Locale,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_iterations: 25,
            mid_loop_compact_messages: 40,
            max_continuations: 2,
            lock_wait_secs: 15,
            shutdown_drain_secs: 30,
            provider_timeout_secs: 120,
            overflow_trims: vec![10, 4],
            locale: Locale::En,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub idle_ttl_secs: u64,
    pub capacity: usize,
    pub store_dir: PathBuf,
    /// Root directory the workspace tools operate in.
    pub workspace_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: 3_600,
            capacity: 256,
            store_dir: PathBuf::from("./data/sessions"),
            workspace_dir: PathBuf::from("./workspace"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub classifier: ClassifierConfig,
    pub routing: RoutingConfig,
    pub thinking: ThinkingBudgets,
    pub tools: ToolLimits,
    pub compaction: CompactionConfig,
    pub orchestration: OrchestrationConfig,
    pub sessions: SessionConfig,
    pub ledger: LedgerConfig,
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestration.max_iterations == 0 {
            return Err(ConfigError::Invalid {
                field: "orchestration.max_iterations",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.tools.pool_size == 0 {
            return Err(ConfigError::Invalid {
                field: "tools.pool_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.classifier.short_len > self.classifier.complex_len {
            return Err(ConfigError::Invalid {
                field: "classifier.short_len",
                reason: format!(
                    "{} exceeds complex_len {}",
                    self.classifier.short_len, self.classifier.complex_len
                ),
            });
        }
        Ok(())
    }
}

/// Load and validate configuration from a YAML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    let config = if content.trim().is_empty() {
        GatewayConfig::default()
    } else {
        serde_yaml::from_str(&content)?
    };
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_empty_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gateway.yaml");
        fs::write(&path, "").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.orchestration.max_iterations, 25);
        assert_eq!(config.compaction.threshold_chars, 60_000);
        assert_eq!(config.tools.circuit_threshold, 3);
        assert_eq!(config.ledger.batch_size, 20);
        assert_eq!(config.thinking.xhigh, 32_000);
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gateway.yaml");
        fs::write(
            &path,
            "orchestration:\n  max_iterations: 5\n  locale: ko\nrouting:\n  table:\n    simple: gpt-4.1-mini\ntools:\n  timeouts:\n    exec: 300\n",
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.orchestration.max_iterations, 5);
        assert_eq!(config.orchestration.locale, Locale::Ko);
        assert_eq!(config.orchestration.lock_wait_secs, 15);
        assert_eq!(config.routing.table.simple.as_deref(), Some("gpt-4.1-mini"));
        assert_eq!(config.tools.timeouts.get("exec"), Some(&300));
        assert_eq!(config.tools.pool_size, 4);
    }

    #[test]
    fn test_missing_and_invalid_files() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            load_config(&dir.path().join("nope.yaml")),
            Err(ConfigError::NotFound(_))
        ));

        let path = dir.path().join("bad.yaml");
        fs::write(&path, "orchestration: [not, a, map]").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Yaml(_))));

        fs::write(&path, "orchestration:\n  max_iterations: 0\n").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Invalid { .. })));
    }
}
