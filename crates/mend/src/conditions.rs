//! Condition evaluation for remediation actions.
//!
//! Pure and side-effect free: an action's conditions are checked against the
//! triggering alert's labels. All sub-conditions are AND-ed; there are no
//! OR/NOT operators. An absent conditions block always applies.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::alert::AlertEvent;

/// A severity condition: a single value or set membership.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SeverityCondition {
    /// Exact match against one severity.
    One(String),
    /// Membership in a set of severities.
    Any(Vec<String>),
}

impl SeverityCondition {
    fn matches(&self, severity: &str) -> bool {
        match self {
            Self::One(expected) => severity == expected,
            Self::Any(allowed) => allowed.iter().any(|s| s == severity),
        }
    }
}

/// Predicate spec gating a remediation action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionConditions {
    /// Severity must match (exact or set membership).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<SeverityCondition>,
    /// Each listed label must be present with exactly this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
    /// Each listed key must be present with a non-empty value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_labels: Option<Vec<String>>,
}

impl ActionConditions {
    /// Evaluate these conditions against an alert.
    ///
    /// Deterministic and order-independent across condition keys.
    #[must_use]
    pub fn matches(&self, alert: &AlertEvent) -> bool {
        if let Some(severity) = &self.severity {
            if !severity.matches(alert.severity()) {
                return false;
            }
        }

        if let Some(labels) = &self.labels {
            for (key, expected) in labels {
                if alert.labels.get(key) != Some(expected) {
                    return false;
                }
            }
        }

        if let Some(required) = &self.has_labels {
            for key in required {
                match alert.labels.get(key) {
                    Some(value) if !value.is_empty() => {}
                    _ => return false,
                }
            }
        }

        true
    }
}
