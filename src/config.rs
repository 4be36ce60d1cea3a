//! Runtime configuration.
//!
//! Every knob has a default and can be overridden through `SAGA_*` environment
//! variables. Empty values are treated as unset.

use crate::error::{Result, SagaError};
use crate::observability::LogFormat;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// How long a priced draft survives in the staging cache.
    pub staging_ttl: Duration,
    /// Delivery attempts before a message is dead-lettered.
    pub max_deliveries: u32,
    /// Base delay before a requeued message is redelivered; doubles per attempt.
    pub retry_backoff: Duration,
    /// Period of the pending-collection sweep.
    pub sweep_interval: Duration,
    /// Next-best collectors tried when a commit hits the capacity ceiling.
    pub allocation_attempts: u32,
    pub workers_per_queue: usize,
    /// How long a worker waits on an empty queue before re-checking shutdown.
    pub receive_timeout: Duration,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            staging_ttl: Duration::from_secs(600),
            max_deliveries: 5,
            retry_backoff: Duration::from_millis(200),
            sweep_interval: Duration::from_secs(60),
            allocation_attempts: 3,
            workers_per_queue: 4,
            receive_timeout: Duration::from_millis(100),
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Loads configuration from the process environment.
    ///
    /// # Environment Variables
    ///
    /// - `SAGA_STAGING_TTL_SECS` (default: 600)
    /// - `SAGA_MAX_DELIVERIES` (default: 5)
    /// - `SAGA_RETRY_BACKOFF_MS` (default: 200)
    /// - `SAGA_SWEEP_INTERVAL_SECS` (default: 60)
    /// - `SAGA_ALLOCATION_ATTEMPTS` (default: 3)
    /// - `SAGA_WORKERS_PER_QUEUE` (default: 4)
    /// - `SAGA_LOG_FORMAT` (`pretty` or `json`, default: `pretty`)
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed or is out of range.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`Config::from_env`] but reads variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);
        let mut config = Self::default();

        if let Some(secs) = vars.u64("SAGA_STAGING_TTL_SECS")? {
            if secs == 0 {
                return Err(SagaError::Config(
                    "SAGA_STAGING_TTL_SECS must be greater than 0".to_string(),
                ));
            }
            config.staging_ttl = Duration::from_secs(secs);
        }
        if let Some(max) = vars.u64("SAGA_MAX_DELIVERIES")? {
            config.max_deliveries = at_least_one("SAGA_MAX_DELIVERIES", max)?;
        }
        if let Some(ms) = vars.u64("SAGA_RETRY_BACKOFF_MS")? {
            config.retry_backoff = Duration::from_millis(ms);
        }
        if let Some(secs) = vars.u64("SAGA_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval =
                Duration::from_secs(at_least_one::<u64>("SAGA_SWEEP_INTERVAL_SECS", secs)?);
        }
        if let Some(attempts) = vars.u64("SAGA_ALLOCATION_ATTEMPTS")? {
            config.allocation_attempts = at_least_one("SAGA_ALLOCATION_ATTEMPTS", attempts)?;
        }
        if let Some(workers) = vars.u64("SAGA_WORKERS_PER_QUEUE")? {
            config.workers_per_queue = at_least_one("SAGA_WORKERS_PER_QUEUE", workers)?;
        }
        if let Some(format) = vars.string("SAGA_LOG_FORMAT") {
            config.log_format = match format.to_ascii_lowercase().as_str() {
                "pretty" => LogFormat::Pretty,
                "json" => LogFormat::Json,
                other => {
                    return Err(SagaError::Config(format!(
                        "SAGA_LOG_FORMAT must be `pretty` or `json`, got `{other}`"
                    )));
                }
            };
        }

        Ok(config)
    }
}

struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name).and_then(|v| {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    fn u64(&self, name: &str) -> Result<Option<u64>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<u64>()
            .map(Some)
            .map_err(|e| SagaError::Config(format!("{name} must be an unsigned integer: {e}")))
    }
}

/// Rejects zero and anything that does not fit the target integer type.
fn at_least_one<T: TryFrom<u64>>(name: &str, value: u64) -> Result<T> {
    if value == 0 {
        return Err(SagaError::Config(format!("{name} must be at least 1")));
    }
    T::try_from(value).map_err(|_| SagaError::Config(format!("{name} is too large: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.staging_ttl, Duration::from_secs(600));
        assert_eq!(config.max_deliveries, 5);
        assert_eq!(config.allocation_attempts, 3);
        assert!(matches!(config.log_format, LogFormat::Pretty));
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = Config::from_lookup(lookup(&[
            ("SAGA_STAGING_TTL_SECS", "30"),
            ("SAGA_MAX_DELIVERIES", "2"),
            ("SAGA_RETRY_BACKOFF_MS", "5"),
            ("SAGA_WORKERS_PER_QUEUE", "8"),
            ("SAGA_LOG_FORMAT", "JSON"),
        ]))
        .unwrap();
        assert_eq!(config.staging_ttl, Duration::from_secs(30));
        assert_eq!(config.max_deliveries, 2);
        assert_eq!(config.retry_backoff, Duration::from_millis(5));
        assert_eq!(config.workers_per_queue, 8);
        assert!(matches!(config.log_format, LogFormat::Json));
    }

    #[test]
    fn test_empty_values_are_ignored() {
        let config = Config::from_lookup(lookup(&[("SAGA_MAX_DELIVERIES", "  ")])).unwrap();
        assert_eq!(config.max_deliveries, 5);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            Config::from_lookup(lookup(&[("SAGA_STAGING_TTL_SECS", "0")])),
            Err(SagaError::Config(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("SAGA_MAX_DELIVERIES", "many")])),
            Err(SagaError::Config(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("SAGA_LOG_FORMAT", "xml")])),
            Err(SagaError::Config(_))
        ));
    }

    #[test]
    fn test_values_past_the_field_width_are_rejected() {
        for name in ["SAGA_MAX_DELIVERIES", "SAGA_ALLOCATION_ATTEMPTS"] {
            let result = Config::from_lookup(lookup(&[(name, "4294967296")]));
            match result {
                Err(SagaError::Config(msg)) => assert!(msg.contains("too large"), "{msg}"),
                other => panic!("{name} should overflow, got {other:?}"),
            }
        }
        let config = Config::from_lookup(lookup(&[("SAGA_MAX_DELIVERIES", "4294967295")])).unwrap();
        assert_eq!(config.max_deliveries, u32::MAX);
    }
}
