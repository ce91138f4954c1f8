//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Tunables for the queue, worker and schedule sweep.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    /// Queue capacity. `None` keeps the queue unbounded.
    pub queue_capacity: Option<usize>,
    /// Pause between two full sweeps of the schedule registry.
    pub sweep_interval: Duration,
    /// Pause between two enqueues within one sweep, to avoid bursts.
    pub entry_delay: Duration,
    /// Maximum missed occurrences replayed for one entry in a single sweep.
    pub max_catch_up: usize,
    /// Upper bound on the whole stop phase of a `ServiceHost`.
    pub shutdown_timeout: Duration,
    /// Capacity of the worker event broadcast channel.
    pub event_capacity: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            queue_capacity: None,
            sweep_interval: Duration::from_secs(5),
            entry_delay: Duration::from_millis(100),
            max_catch_up: 16,
            shutdown_timeout: Duration::from_secs(10),
            event_capacity: 256,
        }
    }
}

impl TaskConfig {
    /// Build a config from `TASKS_*` environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let queue_capacity = match lookup("TASKS_QUEUE_CAPACITY") {
            Some(raw) => {
                let capacity: usize = parse_value("TASKS_QUEUE_CAPACITY", &raw)?;
                // 0 is the documented spelling of "unbounded"
                (capacity > 0).then_some(capacity)
            }
            None => defaults.queue_capacity,
        };

        Ok(Self {
            queue_capacity,
            sweep_interval: millis_or(&lookup, "TASKS_SWEEP_INTERVAL_MS", defaults.sweep_interval)?,
            entry_delay: millis_or(&lookup, "TASKS_ENTRY_DELAY_MS", defaults.entry_delay)?,
            max_catch_up: value_or(&lookup, "TASKS_MAX_CATCH_UP", defaults.max_catch_up)?.max(1),
            shutdown_timeout: millis_or(
                &lookup,
                "TASKS_SHUTDOWN_TIMEOUT_MS",
                defaults.shutdown_timeout,
            )?,
            event_capacity: value_or(&lookup, "TASKS_EVENT_CAPACITY", defaults.event_capacity)?
                .max(1),
        })
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{raw}': {e}"),
    })
}

fn value_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn millis_or<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => parse_value::<u64>(key, &raw).map(Duration::from_millis),
        None => Ok(default),
    }
}
