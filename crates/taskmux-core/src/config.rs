//! Configuration resolution for taskmux.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`<config dir>/taskmux/settings.json`)
//! 3. Project config (.taskmux/settings.json)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Lowest accepted concurrency limit.
pub const MIN_CONCURRENCY: usize = 1;

/// Highest accepted concurrency limit.
pub const MAX_CONCURRENCY: usize = 20;

/// Complete taskmux configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub multiplexer: MultiplexerConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig::default(),
            multiplexer: MultiplexerConfig::default(),
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Bounded-concurrency orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Concurrency used when a caller does not pick one.
    pub default_concurrency: usize,
    /// Upper bound accepted from callers.
    pub max_concurrency: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_concurrency: 3,
            max_concurrency: MAX_CONCURRENCY,
        }
    }
}

impl OrchestratorConfig {
    /// Check that a requested limit is inside the accepted range.
    pub fn validate_concurrency(&self, limit: usize) -> Result<usize> {
        let max = self.max_concurrency.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY);
        if (MIN_CONCURRENCY..=max).contains(&limit) {
            Ok(limit)
        } else {
            Err(Error::Config(format!(
                "concurrency limit {limit} outside {MIN_CONCURRENCY}..={max}"
            )))
        }
    }
}

/// Task event multiplexer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiplexerConfig {
    /// Maximum unconsumed events held per task before the oldest is dropped.
    pub buffer_capacity: usize,
    /// How many recently closed task ids are remembered so late events for
    /// them are discarded instead of buffered.
    pub tombstone_capacity: usize,
    /// Capacity of the host runtime's broadcast event stream.
    pub event_capacity: usize,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 4096,
            tombstone_capacity: 1024,
            event_capacity: 1024,
        }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        config = load_config_file(&global_path)?;
        debug!(path = %global_path.display(), "Loaded global config");
    }

    if let Some(dir) = project_dir {
        let project_path = dir.join(".taskmux").join("settings.json");
        if project_path.exists() {
            let project = load_config_file(&project_path)?;
            merge_config(&mut config, project);
            debug!(path = %project_path.display(), "Loaded project config");
        }
    }

    apply_env_overrides(&mut config);

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("taskmux").join("settings.json"))
}

pub fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut Config, overlay: Config) {
    base.orchestrator = overlay.orchestrator;
    base.multiplexer = overlay.multiplexer;
    base.log_level = overlay.log_level;
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("TASKMUX_CONCURRENCY")
        && let Some(n) = parse_override("TASKMUX_CONCURRENCY", &val)
    {
        config.orchestrator.default_concurrency = n;
    }
    if let Ok(val) = std::env::var("TASKMUX_BUFFER_CAPACITY")
        && let Some(n) = parse_override("TASKMUX_BUFFER_CAPACITY", &val)
    {
        config.multiplexer.buffer_capacity = n;
    }
    if let Ok(val) = std::env::var("TASKMUX_LOG_LEVEL") {
        config.log_level = val;
    }
}

/// Parse an environment override, ignoring values that do not parse.
fn parse_override<T: FromStr>(var: &str, value: &str) -> Option<T> {
    let parsed = value.trim().parse().ok();
    if parsed.is_none() {
        warn!(var, value, "Ignoring unparsable environment override");
    }
    parsed
}
