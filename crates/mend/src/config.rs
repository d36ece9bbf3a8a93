//! Engine configuration.
//!
//! All knobs load from `MEND_*` environment variables with sensible
//! defaults, so the engine runs unconfigured against an in-memory store.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Configuration consumed by the remediation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long resolved alerts are retained, in hours.
    pub alert_ttl_hours: u64,
    /// Distributed lock TTL in seconds. Must exceed the summed per-action
    /// timeouts of the slowest handler, or dispatches get preempted
    /// mid-flight.
    pub lock_timeout_seconds: u64,
    /// Process-wide cap on in-flight action executions.
    pub max_concurrent_remediations: usize,
    /// Default per-action timeout in seconds when a mapping omits one.
    pub default_timeout_seconds: u64,
    /// Directory of YAML alert-to-action mapping files.
    pub mappings_path: PathBuf,
    /// Identity of this engine instance, recorded as the lock owner.
    pub instance_id: String,
    /// Redis connection URL. Empty selects the in-memory store.
    pub redis_url: String,
    /// Base URL of the automation executor API.
    pub executor_url: String,
    /// Executor API key (preferred auth).
    pub executor_api_key: String,
    /// Executor auth token (fallback auth).
    pub executor_auth_token: String,
    /// Whether to verify the executor's TLS certificate.
    pub executor_verify_ssl: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            alert_ttl_hours: 24,
            lock_timeout_seconds: 300,
            max_concurrent_remediations: 10,
            default_timeout_seconds: 300,
            mappings_path: PathBuf::from("config/mappings"),
            instance_id: default_instance_id(),
            redis_url: String::new(),
            executor_url: "https://localhost".to_string(),
            executor_api_key: String::new(),
            executor_auth_token: String::new(),
            executor_verify_ssl: true,
        }
    }
}

/// Instance identity: the pod hostname when present, else a generated id.
fn default_instance_id() -> String {
    env::var("HOSTNAME").unwrap_or_else(|_| format!("mend-{}", uuid::Uuid::new_v4().simple()))
}

fn var(name: &str) -> Option<String> {
    env::var(format!("MEND_{name}")).ok().filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    var(name).and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl EngineConfig {
    /// Load configuration from `MEND_*` environment variables, falling back
    /// to defaults for anything unset.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            alert_ttl_hours: parse_var("ALERT_TTL_HOURS", defaults.alert_ttl_hours),
            lock_timeout_seconds: parse_var("LOCK_TIMEOUT_SECONDS", defaults.lock_timeout_seconds),
            max_concurrent_remediations: parse_var(
                "MAX_CONCURRENT_REMEDIATIONS",
                defaults.max_concurrent_remediations,
            ),
            default_timeout_seconds: parse_var(
                "DEFAULT_TIMEOUT_SECONDS",
                defaults.default_timeout_seconds,
            ),
            mappings_path: var("MAPPINGS_PATH").map_or(defaults.mappings_path, PathBuf::from),
            instance_id: var("INSTANCE_ID").unwrap_or(defaults.instance_id),
            redis_url: var("REDIS_URL").unwrap_or_default(),
            executor_url: var("EXECUTOR_URL").unwrap_or(defaults.executor_url),
            executor_api_key: var("EXECUTOR_API_KEY").unwrap_or_default(),
            executor_auth_token: var("EXECUTOR_AUTH_TOKEN").unwrap_or_default(),
            executor_verify_ssl: parse_var("EXECUTOR_VERIFY_SSL", defaults.executor_verify_ssl),
        }
    }

    /// Lock TTL as a duration.
    #[must_use]
    pub fn lock_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.lock_timeout_seconds)
    }
}
