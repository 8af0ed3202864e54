use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::planner::corpus::KeywordCorpus;
use crate::registry::{AuthProfile, DataSourceDescriptor};

pub const ENV_MAX_CONCURRENT: &str = "DASHPLAN_MAX_CONCURRENT";
pub const ENV_BATCH_SIZE: &str = "DASHPLAN_BATCH_SIZE";
pub const ENV_RETRY_ATTEMPTS: &str = "DASHPLAN_RETRY_ATTEMPTS";
pub const ENV_RETRY_DELAY_MS: &str = "DASHPLAN_RETRY_DELAY_MS";
pub const ENV_TIMEOUT_MS: &str = "DASHPLAN_TIMEOUT_MS";

/// Execution limits for the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum number of sub-queries running at once
    pub max_concurrent: usize,
    /// Records per chunk before a result is split
    pub batch_size: usize,
    /// Retries after the first attempt on transient failures
    pub retry_attempts: u32,
    /// Base delay, multiplied by the attempt number
    pub retry_delay_ms: u64,
    /// Wall-clock budget for one sub-query's whole retry loop
    pub timeout_ms: u64,
    /// Plan deadline = estimated time * margin
    pub plan_timeout_margin: f64,
    /// Lower bound for the plan deadline
    pub min_plan_timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            batch_size: 50,
            retry_attempts: 3,
            retry_delay_ms: 500,
            timeout_ms: 30_000,
            plan_timeout_margin: 3.0,
            min_plan_timeout_ms: 10_000,
        }
    }
}

impl ExecutorConfig {
    /// Deadline for a whole plan with the given estimate.
    pub fn plan_timeout(&self, estimated_time_ms: u64) -> Duration {
        let margin = if self.plan_timeout_margin.is_finite() && self.plan_timeout_margin > 0.0 {
            self.plan_timeout_margin
        } else {
            1.0
        };
        let derived = (estimated_time_ms as f64 * margin).ceil() as u64;
        Duration::from_millis(derived.max(self.min_plan_timeout_ms))
    }
}

/// Tuning for complexity classification and time estimation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Fixed cost charged per sub-query
    pub base_cost_ms: u64,
    /// Cost per expected result record
    pub per_result_cost_ms: f64,
    /// Estimates are always strictly below this value
    pub max_estimate_ms: u64,
    /// Total keyword matches that promote to High
    pub high_match_threshold: usize,
    /// Medium-weight matches that promote to Medium
    pub medium_match_threshold: usize,
    /// Concurrency assumed when discounting parallel groups
    pub concurrency: usize,
    /// Data source for generic fallback sub-queries
    pub default_data_source: String,
    /// Replaces the built-in keyword corpus when present
    pub corpus: Option<KeywordCorpus>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            base_cost_ms: 400,
            per_result_cost_ms: 2.0,
            max_estimate_ms: 120_000,
            high_match_threshold: 4,
            medium_match_threshold: 1,
            concurrency: ExecutorConfig::default().max_concurrent,
            default_data_source: "default".to_string(),
            corpus: None,
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashplanConfig {
    pub executor: ExecutorConfig,
    pub planner: PlannerConfig,
    pub data_sources: Vec<DataSourceDescriptor>,
    pub auth_profiles: Vec<AuthProfile>,
}

impl DashplanConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: DashplanConfig = toml::from_str(content)?;
        if let Some(corpus) = &config.planner.corpus {
            corpus.validate().map_err(ConfigError::Corpus)?;
        }
        Ok(config)
    }

    /// Apply `DASHPLAN_*` environment overrides on top of the loaded values.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_override::<usize, _>(&lookup, ENV_MAX_CONCURRENT)? {
            self.executor.max_concurrent = v;
            self.planner.concurrency = v;
        }
        if let Some(v) = parse_override::<usize, _>(&lookup, ENV_BATCH_SIZE)? {
            self.executor.batch_size = v;
        }
        if let Some(v) = parse_override::<u32, _>(&lookup, ENV_RETRY_ATTEMPTS)? {
            self.executor.retry_attempts = v;
        }
        if let Some(v) = parse_override::<u64, _>(&lookup, ENV_RETRY_DELAY_MS)? {
            self.executor.retry_delay_ms = v;
        }
        if let Some(v) = parse_override::<u64, _>(&lookup, ENV_TIMEOUT_MS)? {
            self.executor.timeout_ms = v;
        }
        Ok(())
    }
}

fn parse_override<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                key: key.to_string(),
                value: raw,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_when_sections_missing() {
        let config = DashplanConfig::from_toml_str("").unwrap();
        assert_eq!(config, DashplanConfig::default());
        assert_eq!(config.executor.max_concurrent, 4);
        assert_eq!(config.planner.default_data_source, "default");
    }

    #[test]
    fn test_partial_executor_section() {
        let config = DashplanConfig::from_toml_str(
            r#"
[executor]
retry_attempts = 5
batch_size = 10
"#,
        )
        .unwrap();
        assert_eq!(config.executor.retry_attempts, 5);
        assert_eq!(config.executor.batch_size, 10);
        assert_eq!(config.executor.timeout_ms, 30_000);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[planner]
max_estimate_ms = 5000

[[data_sources]]
id = "courses"
kind = "rest"
connection_info = "https://api.example.test/courses"
"#
        )
        .unwrap();

        let config = DashplanConfig::from_file(file.path()).unwrap();
        assert_eq!(config.planner.max_estimate_ms, 5000);
        assert_eq!(config.data_sources.len(), 1);
        assert_eq!(config.data_sources[0].id, "courses");
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = DashplanConfig::from_file("/nonexistent/dashplan.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/dashplan.toml"));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> =
            [(ENV_MAX_CONCURRENT, "8"), (ENV_RETRY_DELAY_MS, " 25 ")].into_iter().collect();
        let mut config = DashplanConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.executor.max_concurrent, 8);
        assert_eq!(config.planner.concurrency, 8);
        assert_eq!(config.executor.retry_delay_ms, 25);
    }

    #[test]
    fn test_invalid_env_override() {
        let mut config = DashplanConfig::default();
        let err = config
            .apply_overrides(|key| (key == ENV_BATCH_SIZE).then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn test_plan_timeout_has_floor() {
        let config = ExecutorConfig::default();
        assert_eq!(config.plan_timeout(100), Duration::from_millis(10_000));
        assert_eq!(config.plan_timeout(20_000), Duration::from_millis(60_000));
    }
}
