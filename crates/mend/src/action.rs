//! Remediation action definitions and executor outcomes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::conditions::ActionConditions;

/// Default per-action timeout in seconds.
pub const DEFAULT_ACTION_TIMEOUT_SECS: u64 = 300;

/// One externally executed automation step with templated parameters.
///
/// Produced fresh per dispatch by the matcher; persisted only through the
/// attempt record that references it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationAction {
    /// Human-readable action name.
    pub name: String,
    /// Opaque executor action identifier (e.g. `linux.service`).
    pub action: String,
    /// Parameters passed to the executor, post-templating.
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Optional predicate gating this action.
    #[serde(default)]
    pub conditions: Option<ActionConditions>,
    /// Per-action timeout in seconds. `0` means fire-and-forget: the action
    /// is submitted and recorded as succeeded without waiting.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_ACTION_TIMEOUT_SECS
}

impl RemediationAction {
    /// Create an action with default timeout and no conditions.
    #[must_use]
    pub fn new(name: &str, action: &str, parameters: Map<String, Value>) -> Self {
        Self {
            name: name.to_string(),
            action: action.to_string(),
            parameters,
            conditions: None,
            timeout_seconds: DEFAULT_ACTION_TIMEOUT_SECS,
        }
    }
}

/// Terminal outcome reported by the action executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Whether the executor reported success.
    pub success: bool,
    /// Execution id assigned by the executor, if any.
    #[serde(default)]
    pub execution_id: Option<String>,
    /// Failure detail, if any.
    #[serde(default)]
    pub detail: Option<String>,
}

impl ExecutionOutcome {
    /// A successful outcome carrying the executor's id.
    #[must_use]
    pub fn succeeded(execution_id: Option<String>) -> Self {
        Self {
            success: true,
            execution_id,
            detail: None,
        }
    }

    /// A failed outcome with detail.
    #[must_use]
    pub fn failed(execution_id: Option<String>, detail: &str) -> Self {
        Self {
            success: false,
            execution_id,
            detail: Some(detail.to_string()),
        }
    }
}
