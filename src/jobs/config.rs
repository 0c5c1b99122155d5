//! Flat job configuration.
//!
//! A job is described by a `String -> String` map. Job files are TOML; nested
//! tables are flattened into dotted keys so that
//!
//! ```toml
//! [source]
//! files = "a.txt,b.txt"
//! ```
//!
//! and `source.files = "a.txt,b.txt"` are the same configuration.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::jobs::error::{JobError, JobResult};
use crate::jobs::retry::RetryPolicy;

/// Well-known configuration keys.
pub mod keys {
    pub const JOB_NAME: &str = "job.name";
    pub const JOB_RUN_ONCE: &str = "job.run_once";
    pub const JOB_SCHEDULE: &str = "job.schedule";
    pub const JOB_ALLOW_CONCURRENT_RUNS: &str = "job.allow_concurrent_runs";
    pub const SOURCE_TYPE: &str = "source.type";
    pub const PIPELINE_TYPE: &str = "pipeline.type";
    pub const TASK_MAX_RETRIES: &str = "task.max_retries";
    pub const TASK_RETRY_DELAY_MS: &str = "task.retry_delay_ms";
    pub const TASK_RETRY_BACKOFF_MULTIPLIER: &str = "task.retry_backoff_multiplier";
    pub const TASK_TIMEOUT_SECS: &str = "task.timeout_secs";
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    props: BTreeMap<String, String>,
}

impl JobConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.props.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.props
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn props(&self) -> &BTreeMap<String, String> {
        &self.props
    }

    /// Get a required value, failing with a config error when it is absent.
    pub fn require(&self, key: &str) -> JobResult<&str> {
        self.get(key)
            .ok_or_else(|| JobError::config(key, "required key is missing"))
    }

    pub fn get_bool(&self, key: &str, default: bool) -> JobResult<bool> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => match v.trim().to_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" => Ok(false),
                _ => Err(JobError::config(key, format!("expected a boolean, got '{}'", v))),
            },
        }
    }

    pub fn get_u32(&self, key: &str) -> JobResult<Option<u32>> {
        self.parse(key)
    }

    pub fn get_u64(&self, key: &str) -> JobResult<Option<u64>> {
        self.parse(key)
    }

    pub fn get_f64(&self, key: &str) -> JobResult<Option<f64>> {
        self.parse(key)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str) -> JobResult<Option<T>> {
        self.get(key)
            .map(|v| {
                v.trim().parse::<T>().map_err(|_| {
                    JobError::config(
                        key,
                        format!("'{}' is not a valid {}", v, std::any::type_name::<T>()),
                    )
                })
            })
            .transpose()
    }

    /// Comma separated list, blanks dropped.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn job_name(&self) -> JobResult<&str> {
        self.require(keys::JOB_NAME)
    }

    pub fn schedule(&self) -> Option<&str> {
        self.get(keys::JOB_SCHEDULE)
    }

    /// Jobs without a schedule always run once.
    pub fn is_run_once(&self) -> JobResult<bool> {
        let default = self.schedule().is_none();
        self.get_bool(keys::JOB_RUN_ONCE, default)
    }

    pub fn allow_concurrent_runs(&self) -> JobResult<bool> {
        self.get_bool(keys::JOB_ALLOW_CONCURRENT_RUNS, false)
    }

    /// Retry policy for this job's tasks, starting from the engine defaults.
    pub fn retry_policy(&self, defaults: &RetryPolicy) -> JobResult<RetryPolicy> {
        let mut policy = defaults.clone();
        if let Some(max_retries) = self.get_u32(keys::TASK_MAX_RETRIES)? {
            policy.max_retries = max_retries;
        }
        if let Some(delay_ms) = self.get_u64(keys::TASK_RETRY_DELAY_MS)? {
            policy.delay = Duration::from_millis(delay_ms);
        }
        if let Some(multiplier) = self.get_f64(keys::TASK_RETRY_BACKOFF_MULTIPLIER)? {
            if !multiplier.is_finite() || multiplier < 1.0 {
                return Err(JobError::config(
                    keys::TASK_RETRY_BACKOFF_MULTIPLIER,
                    "backoff multiplier must be a finite number >= 1.0",
                ));
            }
            policy.backoff_multiplier = multiplier;
        }
        Ok(policy)
    }

    /// Per-attempt timeout; `0` disables it.
    pub fn task_timeout(&self, default: Option<Duration>) -> JobResult<Option<Duration>> {
        match self.get_u64(keys::TASK_TIMEOUT_SECS)? {
            Some(0) => Ok(None),
            Some(secs) => Ok(Some(Duration::from_secs(secs))),
            None => Ok(default),
        }
    }

    /// Validate the keys every job needs, before anything is dispatched.
    pub fn validate(&self) -> JobResult<()> {
        let name = self.job_name()?;
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(JobError::config(
                keys::JOB_NAME,
                format!("'{}' may only contain [A-Za-z0-9_.-]", name),
            ));
        }
        // The name becomes a state store directory.
        if name.starts_with('.') {
            return Err(JobError::config(
                keys::JOB_NAME,
                format!("'{}' must not start with '.'", name),
            ));
        }

        self.require(keys::SOURCE_TYPE)?;
        self.require(keys::PIPELINE_TYPE)?;

        let run_once = self.is_run_once()?;
        if !run_once && self.schedule().is_none() {
            return Err(JobError::config(
                keys::JOB_SCHEDULE,
                "recurring jobs (job.run_once = false) need a cron schedule",
            ));
        }

        self.allow_concurrent_runs()?;
        self.retry_policy(&RetryPolicy::default())?;
        self.task_timeout(None)?;
        Ok(())
    }

    pub fn from_toml_str(content: &str) -> JobResult<Self> {
        let table: toml::Table = toml::from_str(content)
            .map_err(|e| JobError::config("<file>", format!("invalid TOML: {}", e)))?;

        let mut props = BTreeMap::new();
        flatten_table("", &table, &mut props);
        Ok(Self { props })
    }

    pub fn from_file(path: &Path) -> JobResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            JobError::config("<file>", format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }
}

impl FromIterator<(String, String)> for JobConfig {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            props: iter.into_iter().collect(),
        }
    }
}

fn flatten_table(prefix: &str, table: &toml::Table, out: &mut BTreeMap<String, String>) {
    for (key, value) in table {
        let full_key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            toml::Value::Table(nested) => flatten_table(&full_key, nested, out),
            other => {
                out.insert(full_key, scalar_to_string(other));
            }
        }
    }
}

fn scalar_to_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Array(items) => items
            .iter()
            .map(scalar_to_string)
            .collect::<Vec<_>>()
            .join(","),
        toml::Value::Integer(i) => i.to_string(),
        toml::Value::Float(f) => f.to_string(),
        toml::Value::Boolean(b) => b.to_string(),
        toml::Value::Datetime(d) => d.to_string(),
        toml::Value::Table(t) => toml::to_string(t).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn valid_config() -> JobConfig {
        JobConfig::new()
            .with(keys::JOB_NAME, "orders_pull")
            .with(keys::SOURCE_TYPE, "file_list")
            .with(keys::PIPELINE_TYPE, "file_transform")
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
        assert!(valid_config().is_run_once().unwrap());
    }

    #[test]
    fn test_missing_required_keys() {
        for key in [keys::JOB_NAME, keys::SOURCE_TYPE, keys::PIPELINE_TYPE] {
            let mut config = valid_config();
            config.set(key, "");
            let err = config.validate().unwrap_err();
            assert!(
                matches!(&err, JobError::Config { key: k, .. } if k == key),
                "expected config error for {}, got {:?}",
                key,
                err
            );
        }
    }

    #[test]
    fn test_invalid_job_name() {
        for name in ["../escape", "..", ".", ".hidden", "a b"] {
            let config = valid_config().with(keys::JOB_NAME, name);
            assert!(config.validate().unwrap_err().is_config(), "'{}'", name);
        }
        for name in ["orders", "daily.orders", "orders-2026_10"] {
            let config = valid_config().with(keys::JOB_NAME, name);
            assert!(config.validate().is_ok(), "'{}'", name);
        }
    }

    #[test]
    fn test_recurring_requires_schedule() {
        let config = valid_config().with(keys::JOB_RUN_ONCE, "false");
        let err = config.validate().unwrap_err();
        assert!(matches!(err, JobError::Config { key, .. } if key == keys::JOB_SCHEDULE));

        let config = valid_config().with(keys::JOB_SCHEDULE, "*/5 * * * * *");
        assert!(config.validate().is_ok());
        assert!(!config.is_run_once().unwrap());
    }

    #[test]
    fn test_run_once_overrides_schedule() {
        let config = valid_config()
            .with(keys::JOB_SCHEDULE, "*/5 * * * * *")
            .with(keys::JOB_RUN_ONCE, "true");
        assert!(config.is_run_once().unwrap());
    }

    #[test]
    fn test_malformed_numbers_are_config_errors() {
        let config = valid_config().with(keys::TASK_MAX_RETRIES, "three");
        assert!(config.validate().unwrap_err().is_config());

        let config = valid_config().with(keys::TASK_RETRY_BACKOFF_MULTIPLIER, "0.5");
        assert!(config.validate().unwrap_err().is_config());

        let config = valid_config().with(keys::JOB_ALLOW_CONCURRENT_RUNS, "maybe");
        assert!(config.validate().unwrap_err().is_config());
    }

    #[test]
    fn test_retry_policy_overrides() {
        let defaults = RetryPolicy::default();
        let config = valid_config()
            .with(keys::TASK_MAX_RETRIES, "7")
            .with(keys::TASK_RETRY_DELAY_MS, "25");
        let policy = config.retry_policy(&defaults).unwrap();
        assert_eq!(policy.max_retries, 7);
        assert_eq!(policy.delay, Duration::from_millis(25));
        assert_eq!(policy.backoff_multiplier, defaults.backoff_multiplier);
    }

    #[test]
    fn test_task_timeout_zero_disables() {
        let default = Some(Duration::from_secs(30));
        let config = valid_config().with(keys::TASK_TIMEOUT_SECS, "0");
        assert_eq!(config.task_timeout(default).unwrap(), None);
        assert_eq!(valid_config().task_timeout(default).unwrap(), default);
    }

    #[test]
    fn test_from_toml_flattens_tables() {
        let config = JobConfig::from_toml_str(
            r#"
[job]
name = "orders_pull"
run_once = true

[source]
type = "file_list"
files = ["a.txt", "b.txt"]

[task]
max_retries = 2
"#,
        )
        .unwrap();

        assert_eq!(config.get("job.name"), Some("orders_pull"));
        assert_eq!(config.get("job.run_once"), Some("true"));
        assert_eq!(config.get("source.files"), Some("a.txt,b.txt"));
        assert_eq!(config.get_list("source.files"), vec!["a.txt", "b.txt"]);
        assert_eq!(config.get_u32("task.max_retries").unwrap(), Some(2));
    }

    #[test]
    fn test_from_toml_accepts_dotted_keys() {
        let config = JobConfig::from_toml_str(
            r#"
"job.name" = "quoted"
source.type = "file_list"
"#,
        )
        .unwrap();
        assert_eq!(config.get("job.name"), Some("quoted"));
        assert_eq!(config.get("source.type"), Some("file_list"));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = JobConfig::from_toml_str("[job\nname=").unwrap_err();
        assert!(err.is_config());
    }

    proptest! {
        #[test]
        fn property_flattened_keys_round_trip(
            section in "[a-z]{1,8}",
            key in "[a-z_]{1,8}",
            value in "[a-zA-Z0-9 ./_-]{0,24}"
        ) {
            let content = format!("[{}]\n{} = {:?}\n", section, key, value);
            let config = JobConfig::from_toml_str(&content).unwrap();
            let full_key = format!("{}.{}", section, key);
            prop_assert_eq!(config.props().get(&full_key), Some(&value));
        }

        #[test]
        fn property_list_parsing_drops_blanks(items in proptest::collection::vec("[a-z0-9]{1,6}", 0..6)) {
            let joined = items.join(" , ,");
            let config = JobConfig::new().with("k", joined);
            prop_assert_eq!(config.get_list("k"), items);
        }
    }
}
