use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Backoff strategy types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    Fixed,
    Exponential,
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Exponential
    }
}

impl fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffStrategy::Fixed => write!(f, "fixed"),
            BackoffStrategy::Exponential => write!(f, "exponential"),
        }
    }
}

impl FromStr for BackoffStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(BackoffStrategy::Fixed),
            "exponential" => Ok(BackoffStrategy::Exponential),
            other => Err(format!("unknown backoff strategy '{}'", other)),
        }
    }
}

/// Backoff options for job retries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffOptions {
    /// Type of backoff strategy
    pub strategy: BackoffStrategy,
    /// Base delay in milliseconds
    pub delay: u64,
}

impl Default for BackoffOptions {
    fn default() -> Self {
        BackoffOptions {
            strategy: BackoffStrategy::default(),
            delay: 5000,
        }
    }
}

/// Calculate the retry delay for a job that has just failed its `attempts`-th attempt.
///
/// `attempts` is the post-increment attempt count, so the first failure is 1 and
/// already gets the base delay: `delay * 2^(attempts-1)`.
pub fn calculate_backoff(options: &BackoffOptions, attempts: u32) -> u64 {
    match options.strategy {
        BackoffStrategy::Fixed => options.delay,
        BackoffStrategy::Exponential => {
            let exponent = attempts.saturating_sub(1);
            let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
            options.delay.saturating_mul(factor)
        }
    }
}

/// Timestamp (epoch ms) at which a job failed at `now` becomes ready again
pub fn get_backoff_timestamp(options: &BackoffOptions, attempts: u32, now: u64) -> u64 {
    now.saturating_add(calculate_backoff(options, attempts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_backoff() {
        let options = BackoffOptions {
            strategy: BackoffStrategy::Fixed,
            delay: 5000,
        };

        assert_eq!(calculate_backoff(&options, 1), 5000);
        assert_eq!(calculate_backoff(&options, 2), 5000);
        assert_eq!(calculate_backoff(&options, 3), 5000);
    }

    #[test]
    fn test_exponential_backoff() {
        let options = BackoffOptions {
            strategy: BackoffStrategy::Exponential,
            delay: 1000,
        };

        assert_eq!(calculate_backoff(&options, 1), 1000);
        assert_eq!(calculate_backoff(&options, 2), 2000);
        assert_eq!(calculate_backoff(&options, 3), 4000);
        assert_eq!(calculate_backoff(&options, 4), 8000);
    }

    #[test]
    fn test_exponential_backoff_saturates() {
        let options = BackoffOptions {
            strategy: BackoffStrategy::Exponential,
            delay: 5000,
        };

        assert_eq!(calculate_backoff(&options, 0), 5000);
        assert_eq!(calculate_backoff(&options, 200), u64::MAX);
        assert_eq!(get_backoff_timestamp(&options, 200, 10), u64::MAX);
    }

    #[test]
    fn test_backoff_timestamp() {
        let options = BackoffOptions {
            strategy: BackoffStrategy::Exponential,
            delay: 100,
        };

        assert_eq!(get_backoff_timestamp(&options, 1, 1_000), 1_100);
        assert_eq!(get_backoff_timestamp(&options, 2, 1_000), 1_200);
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("Fixed".parse::<BackoffStrategy>(), Ok(BackoffStrategy::Fixed));
        assert_eq!(
            "exponential".parse::<BackoffStrategy>(),
            Ok(BackoffStrategy::Exponential)
        );
        assert!("linear".parse::<BackoffStrategy>().is_err());
    }
}
