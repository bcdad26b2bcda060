//! Container configuration.
//!
//! Settings come from code, from `FERROUS_LIFECYCLE_*` environment variables,
//! or (with the `config` feature) from JSON.

use std::env;
use std::time::Duration;

#[cfg(feature = "config")]
use serde::{Deserialize, Serialize};

use crate::error::{LifecycleError, LifecycleResult};
use crate::mode::Mode;

/// Prefix of the environment variables read by [`ContainerConfig::from_env`].
pub const ENV_PREFIX: &str = "FERROUS_LIFECYCLE";

/// Configuration for a [`ServiceContainer`](crate::ServiceContainer).
///
/// | Field               | Environment variable                      | Default             |
/// |---------------------|-------------------------------------------|---------------------|
/// | `name`              | `FERROUS_LIFECYCLE_NAME`                  | `"container"`       |
/// | `thread_name_prefix`| `FERROUS_LIFECYCLE_THREAD_NAME_PREFIX`    | `"lifecycle"`       |
/// | `worker_keep_alive` | `FERROUS_LIFECYCLE_WORKER_KEEP_ALIVE_MS`  | 30 seconds          |
/// | `default_mode`      | `FERROUS_LIFECYCLE_DEFAULT_MODE`          | `active`            |
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::{ContainerConfig, Mode};
/// use std::time::Duration;
///
/// let config = ContainerConfig::default()
///     .with_name("orders")
///     .with_worker_keep_alive(Duration::from_secs(5))
///     .with_default_mode(Mode::OnDemand);
/// assert_eq!(config.name, "orders");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct ContainerConfig {
    /// Container name, used in logs
    pub name: String,
    /// Name prefix of pooled worker threads
    pub thread_name_prefix: String,
    /// How long an idle pooled worker lingers before exiting
    #[cfg_attr(feature = "config", serde(with = "duration_ms", rename = "worker_keep_alive_ms"))]
    pub worker_keep_alive: Duration,
    /// Mode given to services whose builder sets none
    pub default_mode: Mode,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            name: "container".to_string(),
            thread_name_prefix: "lifecycle".to_string(),
            worker_keep_alive: Duration::from_secs(30),
            default_mode: Mode::Active,
        }
    }
}

impl ContainerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn with_worker_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.worker_keep_alive = keep_alive;
        self
    }

    pub fn with_default_mode(mut self, mode: Mode) -> Self {
        self.default_mode = mode;
        self
    }

    /// Builds a configuration from `FERROUS_LIFECYCLE_*` environment
    /// variables, falling back to defaults for unset ones.
    ///
    /// Malformed values are rejected rather than silently ignored.
    pub fn from_env() -> LifecycleResult<Self> {
        let mut config = Self::default();
        if let Some(name) = env_var("NAME") {
            config.name = name;
        }
        if let Some(prefix) = env_var("THREAD_NAME_PREFIX") {
            config.thread_name_prefix = prefix;
        }
        if let Some(raw) = env_var("WORKER_KEEP_ALIVE_MS") {
            let millis = raw
                .trim()
                .parse::<u64>()
                .map_err(|_| invalid("WORKER_KEEP_ALIVE_MS", &raw))?;
            config.worker_keep_alive = Duration::from_millis(millis);
        }
        if let Some(raw) = env_var("DEFAULT_MODE") {
            config.default_mode = raw.trim().parse().map_err(|_| invalid("DEFAULT_MODE", &raw))?;
        }
        Ok(config)
    }

    /// Parses a JSON document. Missing fields take their defaults.
    ///
    /// ```rust
    /// # #[cfg(feature = "config")] {
    /// use ferrous_lifecycle::{ContainerConfig, Mode};
    ///
    /// let config = ContainerConfig::from_json(r#"{"name": "edge", "default_mode": "lazy"}"#).unwrap();
    /// assert_eq!(config.default_mode, Mode::Lazy);
    /// # }
    /// ```
    #[cfg(feature = "config")]
    pub fn from_json(json: &str) -> LifecycleResult<Self> {
        serde_json::from_str(json).map_err(|e| LifecycleError::InvalidConfig(e.to_string()))
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(format!("{}_{}", ENV_PREFIX, key)).ok()
}

fn invalid(key: &str, value: &str) -> LifecycleError {
    LifecycleError::InvalidConfig(format!("{}_{}={:?}", ENV_PREFIX, key, value))
}

#[cfg(feature = "config")]
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_methods() {
        let config = ContainerConfig::default()
            .with_name("x")
            .with_thread_name_prefix("x-worker")
            .with_worker_keep_alive(Duration::from_millis(250))
            .with_default_mode(Mode::Passive);
        assert_eq!(config.name, "x");
        assert_eq!(config.thread_name_prefix, "x-worker");
        assert_eq!(config.worker_keep_alive, Duration::from_millis(250));
        assert_eq!(config.default_mode, Mode::Passive);
    }

    #[cfg(feature = "config")]
    #[test]
    fn test_json_round_trip_uses_milliseconds() {
        let config = ContainerConfig::default().with_worker_keep_alive(Duration::from_millis(1500));
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"worker_keep_alive_ms\":1500"));
        assert_eq!(ContainerConfig::from_json(&json).unwrap(), config);
        assert!(matches!(
            ContainerConfig::from_json("{\"default_mode\": \"sometimes\"}"),
            Err(LifecycleError::InvalidConfig(_))
        ));
    }
}
