//! YAML-declared handler: alert-name to action-list mappings.
//!
//! Mapping files are plain YAML:
//!
//! ```yaml
//! alerts:
//!   HighCPUUsage:
//!     actions:
//!       - name: restart_service
//!         action: linux.service
//!         parameters:
//!           host: "{{instance}}"
//!           service: "{{labels.service}}"
//!         conditions:
//!           severity: [warning, critical]
//!         timeout: 300
//! ```
//!
//! All `*.yaml`/`*.yml` files in the mappings directory are loaded in
//! lexical order; later files override earlier entries for the same alert
//! name. Reload builds a fresh handler and re-registers it (the registry's
//! last-registered-wins replacement keeps its position).

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::action::RemediationAction;
use crate::alert::AlertEvent;
use crate::conditions::ActionConditions;
use crate::error::{EngineError, Result};

use super::Handler;

#[derive(Debug, Clone, Deserialize)]
struct MappingFile {
    #[serde(default)]
    alerts: HashMap<String, AlertMapping>,
}

/// Declared actions for one alert name.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertMapping {
    #[serde(default)]
    actions: Vec<ActionSpec>,
}

#[derive(Debug, Clone, Deserialize)]
struct ActionSpec {
    /// Defaults to the executor action id when omitted.
    #[serde(default)]
    name: Option<String>,
    action: String,
    #[serde(default)]
    parameters: Map<String, Value>,
    #[serde(default)]
    conditions: Option<ActionConditions>,
    #[serde(default)]
    timeout: Option<u64>,
}

/// Data-driven handler built from YAML mapping files.
pub struct YamlMappingHandler {
    mappings: HashMap<String, AlertMapping>,
    default_timeout: u64,
}

impl YamlMappingHandler {
    /// Build a handler from an in-memory mapping set (used by tests and
    /// programmatic configuration).
    #[must_use]
    pub fn new(mappings: HashMap<String, AlertMapping>, default_timeout: u64) -> Self {
        Self {
            mappings,
            default_timeout,
        }
    }

    /// Load all mapping files from a directory.
    ///
    /// A missing directory yields an empty handler - declaring no mappings
    /// is not an error.
    pub fn load_dir(path: &Path, default_timeout: u64) -> Result<Self> {
        let mut mappings: HashMap<String, AlertMapping> = HashMap::new();

        if !path.is_dir() {
            debug!("Mappings directory {} does not exist", path.display());
            return Ok(Self::new(mappings, default_timeout));
        }

        let mut files: Vec<_> = std::fs::read_dir(path)
            .map_err(|e| EngineError::Config(format!("cannot read {}: {e}", path.display())))?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml" | "yml")
                )
            })
            .collect();
        files.sort();

        for file in files {
            let raw = std::fs::read_to_string(&file)
                .map_err(|e| EngineError::Config(format!("cannot read {}: {e}", file.display())))?;
            let parsed: MappingFile = serde_yaml::from_str(&raw)
                .map_err(|e| EngineError::Config(format!("invalid mapping {}: {e}", file.display())))?;
            for (alert_name, mapping) in parsed.alerts {
                mappings.insert(alert_name, mapping);
            }
        }

        info!("Loaded {} alert mappings from {}", mappings.len(), path.display());
        Ok(Self::new(mappings, default_timeout))
    }

    /// Number of alert names with a mapping.
    #[must_use]
    pub fn mapping_count(&self) -> usize {
        self.mappings.len()
    }
}

impl Handler for YamlMappingHandler {
    fn name(&self) -> &str {
        "yaml_mappings"
    }

    fn description(&self) -> &str {
        "Executes remediation actions declared in YAML mapping files"
    }

    fn matches(&self, alert: &AlertEvent) -> bool {
        self.mappings
            .get(alert.alertname())
            .is_some_and(|m| !m.actions.is_empty())
    }

    fn actions(&self, alert: &AlertEvent) -> Vec<RemediationAction> {
        let Some(mapping) = self.mappings.get(alert.alertname()) else {
            return Vec::new();
        };

        mapping
            .actions
            .iter()
            .map(|spec| RemediationAction {
                name: spec.name.clone().unwrap_or_else(|| spec.action.clone()),
                action: spec.action.clone(),
                parameters: spec.parameters.clone(),
                conditions: spec.conditions.clone(),
                timeout_seconds: spec.timeout.unwrap_or(self.default_timeout),
            })
            .collect()
    }
}
