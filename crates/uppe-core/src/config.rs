use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::TicketPriority;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: std::io::Error },

    #[error("Failed to write config {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: std::io::Error },

    #[error("Failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),

    #[error("No config path available (neither XDG_CONFIG_HOME nor HOME is set)")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub workflow: WorkflowConfig,
    pub recommendation: RecommendationPolicy,
    pub dispatch: DispatchConfig,
    pub oncall: OnCallConfig,
    pub retention: RetentionPolicy,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Local libsql database file
    pub path: String,
    pub pool_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "uppe.db".into(), pool_size: 8 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Fixed bound on in-flight checks; derived from the monitor count when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_checks: Option<usize>,
    pub min_concurrency: usize,
    pub concurrency_ratio: f64,
    /// Upper bound of the random delay added before every check
    pub jitter_ms: u64,
    pub result_buffer: usize,
    pub maintenance_tick_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_checks: None,
            min_concurrency: 4,
            concurrency_ratio: 0.25,
            jitter_ms: 1000,
            result_buffer: 1024,
            maintenance_tick_secs: 30,
        }
    }
}

impl SchedulerConfig {
    /// Global check bound for `monitors` scheduled monitors
    pub fn concurrency_for(&self, monitors: usize) -> usize {
        match self.max_concurrent_checks {
            Some(max) => max.max(1),
            None => {
                let proportional = (monitors as f64 * self.concurrency_ratio).ceil() as usize;
                proportional.max(self.min_concurrency).max(1)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// A (rule, ticket) pair runs at most once per window
    pub idempotency_window_secs: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self { idempotency_window_secs: 3600 }
    }
}

/// When an external recommendation may run without a human
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationPolicy {
    /// Confidence must be strictly greater than this
    pub auto_execute_confidence: f64,
    pub auto_execute_priorities: Vec<TicketPriority>,
    pub auto_execute_delay_secs: u64,
}

impl Default for RecommendationPolicy {
    fn default() -> Self {
        Self {
            auto_execute_confidence: 0.8,
            auto_execute_priorities: vec![TicketPriority::Critical],
            auto_execute_delay_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub attempt_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { max_attempts: 3, base_backoff_ms: 100, attempt_timeout_secs: 10 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnCallConfig {
    /// How far `next_on_call` searches for a handoff
    pub horizon_days: u32,
}

impl Default for OnCallConfig {
    fn default() -> Self {
        Self { horizon_days: 30 }
    }
}

/// Heartbeat retention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    pub heartbeat_days: i64,
    pub cleanup_interval_secs: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { heartbeat_days: 90, cleanup_interval_secs: 3600 }
    }
}

impl RetentionPolicy {
    pub fn heartbeat_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.heartbeat_days)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "127.0.0.1".into(), port: 8080 }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/uppe/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::var_os("HOME") {
        path::PathBuf::from(home_dir).join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("uppe/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        let max_checks = match self.scheduler.max_concurrent_checks {
            Some(max) => max.to_string(),
            None => format!(
                "auto (min {}, ratio {})",
                self.scheduler.min_concurrency, self.scheduler.concurrency_ratio
            ),
        };
        let auto_priorities = self
            .recommendation
            .auto_execute_priorities
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path)?;
        write_1(f, "Pool Size", &self.database.pool_size)?;
        write_title_1(f, "Scheduler")?;
        write_1(f, "Max Concurrent Checks", &max_checks)?;
        write_1(f, "Jitter (ms)", &self.scheduler.jitter_ms)?;
        write_1(f, "Maintenance Tick (s)", &self.scheduler.maintenance_tick_secs)?;
        write_title_1(f, "Workflow")?;
        write_1(f, "Idempotency Window (s)", &self.workflow.idempotency_window_secs)?;
        write_title_1(f, "Recommendation")?;
        write_1(f, "Auto-execute Confidence", &self.recommendation.auto_execute_confidence)?;
        write_1(f, "Auto-execute Priorities", &auto_priorities)?;
        write_1(f, "Auto-execute Delay (s)", &self.recommendation.auto_execute_delay_secs)?;
        write_title_1(f, "Dispatch")?;
        write_1(f, "Max Attempts", &self.dispatch.max_attempts)?;
        write_1(f, "Base Backoff (ms)", &self.dispatch.base_backoff_ms)?;
        write_1(f, "Attempt Timeout (s)", &self.dispatch.attempt_timeout_secs)?;
        write_title_1(f, "On-call")?;
        write_1(f, "Search Horizon (days)", &self.oncall.horizon_days)?;
        write_title_1(f, "Retention")?;
        write_1(f, "Heartbeat Days", &self.retention.heartbeat_days)?;
        write_title_1(f, "Server")?;
        write_1(f, "Bind Address", &self.server.bind)?;
        write_1(f, "Port", &self.server.port)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/uppe/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```no_run
    /// use std::path::Path;
    /// let cfg = uppe_core::Config::from_config(None::<&Path>).unwrap();
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| ConfigError::ReadFailed { path: config_path.clone(), source })?;
            Ok(toml::from_str(raw_string.as_str())?)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| ConfigError::WriteFailed { path: parent.to_path_buf(), source })?;
        }

        fs::write(path, config_str)
            .map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config");

        let config = Config::from_config(Some(&path)).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join("nested/config.toml").exists());

        let reloaded = Config::from_config(Some(&path)).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[scheduler]\nmax_concurrent_checks = 16\n\n[recommendation]\nauto_execute_confidence = 0.9\n",
        )
        .unwrap();

        let config = Config::from_config(Some(&path)).unwrap();
        assert_eq!(config.scheduler.max_concurrent_checks, Some(16));
        assert_eq!(config.scheduler.jitter_ms, 1000);
        assert_eq!(config.recommendation.auto_execute_confidence, 0.9);
        assert_eq!(config.recommendation.auto_execute_priorities, vec![TicketPriority::Critical]);
        assert_eq!(config.dispatch.max_attempts, 3);
    }

    #[test]
    fn concurrency_grows_with_monitors() {
        let scheduler = SchedulerConfig::default();
        assert_eq!(scheduler.concurrency_for(0), 4);
        assert_eq!(scheduler.concurrency_for(40), 10);

        let fixed = SchedulerConfig { max_concurrent_checks: Some(2), ..Default::default() };
        assert_eq!(fixed.concurrency_for(100), 2);
    }

    #[test]
    fn display_lists_sections() {
        let rendered = Config::default().to_string();
        assert!(rendered.contains("Scheduler"));
        assert!(rendered.contains("Auto-execute Priorities: critical"));
    }
}
