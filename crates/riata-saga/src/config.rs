//! Coordinator configuration.
//!
//! All knobs load from the environment with strict validation; tests use
//! [`SagaConfig::from_env_with`] with a map-backed lookup instead of
//! mutating process state.

use std::time::Duration;

use ulid::Ulid;

use crate::error::{Error, Result};

/// Environment key for the reconciliation polling interval in milliseconds.
pub const ENV_EVENT_POLLING_INTERVAL_MS: &str = "RIATA_EVENT_POLLING_INTERVAL_MS";
/// Environment key for the compensation retry delay in milliseconds.
pub const ENV_COMPENSATION_RETRY_DELAY_MS: &str = "RIATA_COMPENSATION_RETRY_DELAY_MS";
/// Environment key for the compensation retry queue capacity.
pub const ENV_COMPENSATION_RETRY_CAPACITY: &str = "RIATA_COMPENSATION_RETRY_CAPACITY";
/// Environment key toggling the reconciliation engine.
pub const ENV_EVENT_SCANNER_ENABLED: &str = "RIATA_EVENT_SCANNER_ENABLED";
/// Environment key toggling lease-based cluster leadership.
pub const ENV_CLUSTER_ENABLED: &str = "RIATA_CLUSTER_ENABLED";
/// Environment key for the leadership lease duration in milliseconds.
pub const ENV_CLUSTER_LOCK_EXPIRY_MS: &str = "RIATA_CLUSTER_LOCK_EXPIRY_MS";
/// Environment key for the coordinator service name.
pub const ENV_SERVICE_NAME: &str = "RIATA_SERVICE_NAME";
/// Environment key for the coordinator instance id.
pub const ENV_INSTANCE_ID: &str = "RIATA_INSTANCE_ID";

const DEFAULT_EVENT_POLLING_INTERVAL_MS: u64 = 500;
const DEFAULT_COMPENSATION_RETRY_DELAY_MS: u64 = 3000;
const DEFAULT_COMPENSATION_RETRY_CAPACITY: usize = 1024;
const DEFAULT_CLUSTER_LOCK_EXPIRY_MS: u64 = 5000;
const DEFAULT_SERVICE_NAME: &str = "riata";

/// Runtime configuration of one coordinator instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaConfig {
    /// Interval between reconciliation cycles.
    pub event_polling_interval: Duration,
    /// Delay before each compensation retry attempt.
    pub compensation_retry_delay: Duration,
    /// Bounded capacity of the compensation retry queue.
    pub compensation_retry_capacity: usize,
    /// Whether this instance runs the reconciliation engine at all. When
    /// false, [`EventScanner::run`](crate::scanner::EventScanner::run)
    /// returns without reconciling.
    pub event_scanner_enabled: bool,
    /// Whether lease-based leadership gates the reconciliation engine. The
    /// composition root consults this when deciding whether to construct a
    /// [`ClusterLeadership`](crate::leader::ClusterLeadership) handle for
    /// the engine loop.
    pub cluster_enabled: bool,
    /// Leadership lease duration.
    pub cluster_lock_expiry: Duration,
    /// Coordinator service name, shared by all instances of a cluster.
    pub service_name: String,
    /// This instance's unique id.
    pub instance_id: String,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            event_polling_interval: Duration::from_millis(DEFAULT_EVENT_POLLING_INTERVAL_MS),
            compensation_retry_delay: Duration::from_millis(DEFAULT_COMPENSATION_RETRY_DELAY_MS),
            compensation_retry_capacity: DEFAULT_COMPENSATION_RETRY_CAPACITY,
            event_scanner_enabled: true,
            cluster_enabled: false,
            cluster_lock_expiry: Duration::from_millis(DEFAULT_CLUSTER_LOCK_EXPIRY_MS),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            instance_id: Ulid::new().to_string(),
        }
    }
}

impl SagaConfig {
    /// Loads configuration from the process environment with strict
    /// validation.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a provided value is not a
    /// positive integer (for the numeric knobs) or not a boolean (for the
    /// toggles).
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Loads configuration with a custom environment source.
    ///
    /// This entry point is test-friendly and accepts a key lookup function.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a provided value is malformed.
    pub fn from_env_with<F>(get_env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let polling_ms = parse_positive_u64_env(
            &get_env,
            ENV_EVENT_POLLING_INTERVAL_MS,
            DEFAULT_EVENT_POLLING_INTERVAL_MS,
        )?;
        let retry_delay_ms = parse_positive_u64_env(
            &get_env,
            ENV_COMPENSATION_RETRY_DELAY_MS,
            DEFAULT_COMPENSATION_RETRY_DELAY_MS,
        )?;
        let retry_capacity = parse_positive_u64_env(
            &get_env,
            ENV_COMPENSATION_RETRY_CAPACITY,
            DEFAULT_COMPENSATION_RETRY_CAPACITY as u64,
        )?;
        let lock_expiry_ms = parse_positive_u64_env(
            &get_env,
            ENV_CLUSTER_LOCK_EXPIRY_MS,
            DEFAULT_CLUSTER_LOCK_EXPIRY_MS,
        )?;

        let retry_capacity = usize::try_from(retry_capacity).map_err(|_| {
            Error::configuration(format!(
                "{ENV_COMPENSATION_RETRY_CAPACITY} value {retry_capacity} exceeds supported range"
            ))
        })?;

        Ok(Self {
            event_polling_interval: Duration::from_millis(polling_ms),
            compensation_retry_delay: Duration::from_millis(retry_delay_ms),
            compensation_retry_capacity: retry_capacity,
            event_scanner_enabled: parse_bool_env(
                &get_env,
                ENV_EVENT_SCANNER_ENABLED,
                defaults.event_scanner_enabled,
            )?,
            cluster_enabled: parse_bool_env(&get_env, ENV_CLUSTER_ENABLED, defaults.cluster_enabled)?,
            cluster_lock_expiry: Duration::from_millis(lock_expiry_ms),
            service_name: get_env(ENV_SERVICE_NAME).unwrap_or(defaults.service_name),
            instance_id: get_env(ENV_INSTANCE_ID).unwrap_or(defaults.instance_id),
        })
    }
}

fn parse_positive_u64_env<F>(get_env: &F, key: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(key) else {
        return Ok(default);
    };
    let value: u64 = raw
        .trim()
        .parse()
        .map_err(|_| Error::configuration(format!("{key} value '{raw}' is not a positive integer")))?;
    if value == 0 {
        return Err(Error::configuration(format!("{key} must be greater than zero")));
    }
    Ok(value)
}

fn parse_bool_env<F>(get_env: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(Error::configuration(format!(
            "{key} value '{raw}' is not a boolean"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_parse_from_an_empty_environment() {
        let vars: HashMap<String, String> = HashMap::new();
        let cfg = SagaConfig::from_env_with(|key| vars.get(key).cloned()).unwrap();

        assert_eq!(cfg.event_polling_interval, Duration::from_millis(500));
        assert_eq!(cfg.compensation_retry_delay, Duration::from_millis(3000));
        assert_eq!(cfg.compensation_retry_capacity, 1024);
        assert!(cfg.event_scanner_enabled);
        assert!(!cfg.cluster_enabled);
        assert_eq!(cfg.cluster_lock_expiry, Duration::from_millis(5000));
        assert_eq!(cfg.service_name, "riata");
        assert!(!cfg.instance_id.is_empty());
    }

    #[test]
    fn overrides_apply() {
        let vars = HashMap::from([
            (ENV_EVENT_POLLING_INTERVAL_MS.to_string(), "250".to_string()),
            (ENV_CLUSTER_ENABLED.to_string(), "true".to_string()),
            (ENV_SERVICE_NAME.to_string(), "riata-east".to_string()),
            (ENV_INSTANCE_ID.to_string(), "node-1".to_string()),
        ]);
        let cfg = SagaConfig::from_env_with(|key| vars.get(key).cloned()).unwrap();

        assert_eq!(cfg.event_polling_interval, Duration::from_millis(250));
        assert!(cfg.cluster_enabled);
        assert_eq!(cfg.service_name, "riata-east");
        assert_eq!(cfg.instance_id, "node-1");
    }

    #[test]
    fn zero_and_garbage_values_are_rejected() {
        let zero = HashMap::from([(ENV_EVENT_POLLING_INTERVAL_MS.to_string(), "0".to_string())]);
        assert!(SagaConfig::from_env_with(|key| zero.get(key).cloned()).is_err());

        let garbage =
            HashMap::from([(ENV_COMPENSATION_RETRY_DELAY_MS.to_string(), "fast".to_string())]);
        assert!(SagaConfig::from_env_with(|key| garbage.get(key).cloned()).is_err());

        let bad_bool = HashMap::from([(ENV_CLUSTER_ENABLED.to_string(), "maybe".to_string())]);
        assert!(SagaConfig::from_env_with(|key| bad_bool.get(key).cloned()).is_err());
    }

    #[test]
    fn generated_instance_ids_are_unique() {
        let a = SagaConfig::default();
        let b = SagaConfig::default();
        assert_ne!(a.instance_id, b.instance_id);
    }
}
