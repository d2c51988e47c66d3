//! Dispatch configuration

use std::{fmt::Display, str::FromStr, time::Duration};

use herald_common::DeliveryMode;
use serde::Deserialize;

use crate::DispatchError;

const fn default_batch_size() -> usize {
    50
}

const fn default_concurrency() -> usize {
    3
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_initial_retry_delay_ms() -> u64 {
    1000
}

const fn default_stale_after_secs() -> u64 {
    15 * 60
}

const fn default_queue_capacity() -> usize {
    100
}

const fn default_debounce_ms() -> u64 {
    500
}

const fn default_recovery_interval_secs() -> u64 {
    60
}

/// Largest batch a job may be chunked into
pub const MAX_BATCH_SIZE: usize = 1000;

/// Settings for the dispatch engine
///
/// ```ron
/// dispatch: (
///     sender: "news@example.com",
///     batch_size: 50,
///     concurrency: 3,
/// )
/// ```
///
/// `HERALD_BATCH_SIZE`, `HERALD_CONCURRENCY`, `HERALD_MAX_ATTEMPTS`,
/// `HERALD_INITIAL_RETRY_DELAY_MS`, `HERALD_STALE_AFTER_SECS` and
/// `HERALD_QUEUE_CAPACITY` override the file when set.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Address every job is sent from
    #[serde(default)]
    pub sender: String,

    /// How recipients are addressed in each batch
    #[serde(default)]
    pub delivery_mode: DeliveryMode,

    /// Recipients per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Batches of one job sent at the same time
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Transport attempts per batch before it is marked failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the second attempt, doubled for each one after
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,

    /// A job left in `SENDING` longer than this is considered abandoned
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Jobs the in-process queue holds before refusing more
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Quiet period before a job's status is recomputed
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_recovery_interval_secs")]
    pub recovery_interval_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            sender: String::new(),
            delivery_mode: DeliveryMode::default(),
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            initial_retry_delay_ms: default_initial_retry_delay_ms(),
            stale_after_secs: default_stale_after_secs(),
            queue_capacity: default_queue_capacity(),
            debounce_ms: default_debounce_ms(),
            recovery_interval_secs: default_recovery_interval_secs(),
        }
    }
}

impl DispatchConfig {
    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from `lookup`, ignoring values that do not parse
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        override_from(&lookup, "HERALD_BATCH_SIZE", &mut self.batch_size);
        override_from(&lookup, "HERALD_CONCURRENCY", &mut self.concurrency);
        override_from(&lookup, "HERALD_MAX_ATTEMPTS", &mut self.max_attempts);
        override_from(
            &lookup,
            "HERALD_INITIAL_RETRY_DELAY_MS",
            &mut self.initial_retry_delay_ms,
        );
        override_from(&lookup, "HERALD_STALE_AFTER_SECS", &mut self.stale_after_secs);
        override_from(&lookup, "HERALD_QUEUE_CAPACITY", &mut self.queue_capacity);
    }

    /// Reject settings the engine cannot run with
    ///
    /// # Errors
    /// [`DispatchError::Config`] naming the first bad setting
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(DispatchError::Config(format!(
                "batch_size must be between 1 and {MAX_BATCH_SIZE}, got {}",
                self.batch_size
            )));
        }

        if self.concurrency == 0 {
            return Err(DispatchError::Config("concurrency must be at least 1".into()));
        }

        if self.max_attempts == 0 {
            return Err(DispatchError::Config("max_attempts must be at least 1".into()));
        }

        if self.queue_capacity == 0 {
            return Err(DispatchError::Config("queue_capacity must be at least 1".into()));
        }

        Ok(())
    }

    #[must_use]
    pub const fn initial_retry_delay(&self) -> Duration {
        Duration::from_millis(self.initial_retry_delay_ms)
    }

    #[must_use]
    pub const fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[must_use]
    pub const fn recovery_interval(&self) -> Duration {
        Duration::from_secs(self.recovery_interval_secs)
    }
}

fn override_from<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, field: &mut T)
where
    T: FromStr,
    T::Err: Display,
{
    let Some(raw) = lookup(name) else {
        return;
    };

    match raw.trim().parse() {
        Ok(value) => *field = value,
        Err(e) => tracing::warn!(variable = name, value = %raw, error = %e, "Ignoring invalid override"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = DispatchConfig::default();

        assert_eq!(config.batch_size, 50);
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.debounce(), Duration::from_millis(500));
        assert_eq!(config.recovery_interval(), Duration::from_secs(60));
        assert_eq!(config.stale_after(), Duration::from_secs(900));
        assert_eq!(config.delivery_mode, DeliveryMode::Bcc);
    }

    #[test]
    fn test_ron_fills_missing_fields() {
        let config: DispatchConfig =
            ron::from_str(r#"(sender: "news@example.com", batch_size: 10, delivery_mode: INDIVIDUAL)"#)
                .expect("Failed to parse dispatch config");

        assert_eq!(config.sender, "news@example.com");
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.delivery_mode, DeliveryMode::Individual);
        assert_eq!(config.concurrency, 3);
    }

    #[test]
    fn test_overrides_apply_and_ignore_garbage() {
        let env = HashMap::from([
            ("HERALD_BATCH_SIZE", "25"),
            ("HERALD_CONCURRENCY", "five"),
            ("HERALD_MAX_ATTEMPTS", " 4 "),
            ("HERALD_QUEUE_CAPACITY", "7"),
        ]);

        let mut config = DispatchConfig::default();
        config.apply_overrides(|name| env.get(name).map(ToString::to_string));

        assert_eq!(config.batch_size, 25);
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.queue_capacity, 7);
        assert_eq!(config.stale_after_secs, 900);
    }

    #[test]
    fn test_validate_rejects_zeroes() {
        assert!(DispatchConfig::default().validate().is_ok());

        let config = DispatchConfig {
            concurrency: 0,
            ..DispatchConfig::default()
        };
        assert!(matches!(config.validate(), Err(DispatchError::Config(_))));

        let config = DispatchConfig {
            batch_size: MAX_BATCH_SIZE + 1,
            ..DispatchConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
