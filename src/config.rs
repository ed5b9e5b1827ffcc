use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::backoff::{BackoffOptions, BackoffStrategy};
use crate::errors::{JobRsError, Result};

/// Queue configuration options
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Name of the sorted set holding pending jobs (default: "job_queue")
    pub queue_name: String,
    /// Redis connection URL (default: "redis://127.0.0.1:6379")
    pub redis_url: String,
    /// Number of worker loops (default: 5)
    pub concurrency: usize,
    /// Base retry delay in milliseconds (default: 5000)
    pub retry_delay_ms: u64,
    /// Backoff strategy applied to the retry delay (default: exponential)
    pub backoff_strategy: BackoffStrategy,
    /// Default attempt budget for jobs that do not set one (default: 3)
    pub max_attempts: u32,
    /// Completed jobs kept in history, 0 disables (default: 100)
    pub keep_completed: usize,
    /// Failed jobs kept in history, 0 disables (default: 500)
    pub keep_failed: usize,
    /// Idle sleep between empty claim attempts in milliseconds (default: 1000)
    pub poll_interval_ms: u64,
    /// Sleep after a store error in milliseconds (default: 5000)
    pub error_backoff_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            queue_name: "job_queue".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            concurrency: 5,
            retry_delay_ms: 5000,
            backoff_strategy: BackoffStrategy::Exponential,
            max_attempts: 3,
            keep_completed: 100,
            keep_failed: 500,
            poll_interval_ms: 1000,
            error_backoff_ms: 5000,
        }
    }
}

impl QueueConfig {
    /// Load configuration from the process environment, reading `.env` first if present
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from a dotenv-style file only
    pub fn from_env_file(path: &Path) -> Result<Self> {
        let iter = dotenv::from_path_iter(path)
            .map_err(|e| JobRsError::ConfigError(format!("{}: {}", path.display(), e)))?;

        let mut vars = HashMap::new();
        for item in iter {
            let (key, value) = item.map_err(|e| JobRsError::ConfigError(e.to_string()))?;
            vars.insert(key, value);
        }

        Self::from_lookup(|key| vars.get(key).cloned())
    }

    /// Build a configuration from an arbitrary variable lookup, starting from the defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = QueueConfig::default();

        if let Some(name) = lookup("JOB_QUEUE_NAME") {
            config.queue_name = name;
        }
        if let Some(url) = lookup("REDIS_URL") {
            config.redis_url = url;
        }

        config.concurrency = parse_var(&lookup, "JOB_CONCURRENCY", config.concurrency)?;
        config.retry_delay_ms = parse_var(&lookup, "JOB_RETRY_DELAY_MS", config.retry_delay_ms)?;
        config.backoff_strategy =
            parse_var(&lookup, "JOB_BACKOFF_STRATEGY", config.backoff_strategy)?;
        config.max_attempts = parse_var(&lookup, "JOB_MAX_ATTEMPTS", config.max_attempts)?;
        config.keep_completed = parse_var(&lookup, "JOB_KEEP_COMPLETED", config.keep_completed)?;
        config.keep_failed = parse_var(&lookup, "JOB_KEEP_FAILED", config.keep_failed)?;
        config.poll_interval_ms =
            parse_var(&lookup, "JOB_POLL_INTERVAL_MS", config.poll_interval_ms)?;
        config.error_backoff_ms =
            parse_var(&lookup, "JOB_ERROR_BACKOFF_MS", config.error_backoff_ms)?;

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the queue cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.queue_name.trim().is_empty() {
            return Err(JobRsError::ConfigError("queue name must not be empty".to_string()));
        }
        if self.concurrency == 0 {
            return Err(JobRsError::ConfigError("concurrency must be at least 1".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(JobRsError::ConfigError("max attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Backoff options derived from the retry settings
    pub fn backoff(&self) -> BackoffOptions {
        BackoffOptions {
            strategy: self.backoff_strategy.clone(),
            delay: self.retry_delay_ms,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| JobRsError::ConfigError(format!("{}={:?}: {}", key, raw, e))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.retry_delay_ms, 5000);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.backoff_strategy, BackoffStrategy::Exponential);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            ("JOB_QUEUE_NAME", "emails"),
            ("JOB_CONCURRENCY", "2"),
            ("JOB_RETRY_DELAY_MS", "250"),
            ("JOB_BACKOFF_STRATEGY", "fixed"),
            ("JOB_KEEP_FAILED", "0"),
        ]
        .into_iter()
        .collect();

        let config = QueueConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.queue_name, "emails");
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.retry_delay_ms, 250);
        assert_eq!(config.backoff_strategy, BackoffStrategy::Fixed);
        assert_eq!(config.keep_failed, 0);
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let bad_number = QueueConfig::from_lookup(|k| {
            (k == "JOB_CONCURRENCY").then(|| "many".to_string())
        });
        assert!(matches!(bad_number, Err(JobRsError::ConfigError(_))));

        let zero = QueueConfig::from_lookup(|k| (k == "JOB_CONCURRENCY").then(|| "0".to_string()));
        assert!(matches!(zero, Err(JobRsError::ConfigError(_))));

        let strategy = QueueConfig::from_lookup(|k| {
            (k == "JOB_BACKOFF_STRATEGY").then(|| "linear".to_string())
        });
        assert!(matches!(strategy, Err(JobRsError::ConfigError(_))));
    }

    #[test]
    fn test_from_env_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "JOB_MAX_ATTEMPTS=7").unwrap();
        writeln!(file, "JOB_POLL_INTERVAL_MS=50").unwrap();
        file.flush().unwrap();

        let config = QueueConfig::from_env_file(file.path()).unwrap();
        assert_eq!(config.max_attempts, 7);
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.concurrency, 5);
    }
}
