//! Built-in handlers for common infrastructure alerts.
//!
//! These cover the usual suspects - CPU, disk, service availability and
//! memory - with keyword-based matching on the alert name and
//! severity-dependent action lists. Site-specific remediation belongs in
//! YAML mappings; these exist so a fresh deployment does something useful
//! out of the box.

use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::action::RemediationAction;
use crate::alert::AlertEvent;

use super::{Handler, HandlerRegistry};

fn name_contains(alert: &AlertEvent, keywords: &[&str]) -> bool {
    let name = alert.alertname().to_lowercase();
    keywords.iter().any(|k| name.contains(k))
}

fn params(entries: &[(&str, Value)]) -> Map<String, Value> {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

/// Handles high CPU usage alerts.
pub struct HighCpuHandler;

impl Handler for HighCpuHandler {
    fn name(&self) -> &str {
        "high_cpu"
    }

    fn description(&self) -> &str {
        "Identifies CPU-hungry processes and restarts the offending service"
    }

    fn matches(&self, alert: &AlertEvent) -> bool {
        name_contains(alert, &["cpu", "processor", "load"])
    }

    fn actions(&self, alert: &AlertEvent) -> Vec<RemediationAction> {
        let mut actions = Vec::new();
        let severity = alert.severity();

        if severity == "warning" || severity == "critical" {
            actions.push(RemediationAction::new(
                "identify_high_cpu_process",
                "linux.top",
                params(&[("host", json!(alert.instance()))]),
            ));
        }

        if severity == "critical" {
            if let Some(service) = alert.labels.get("service").filter(|s| !s.is_empty()) {
                actions.push(RemediationAction::new(
                    &format!("restart_{service}"),
                    "linux.service",
                    params(&[
                        ("host", json!(alert.instance())),
                        ("service", json!(service)),
                        ("action", json!("restart")),
                    ]),
                ));
            }
        }

        actions
    }
}

/// Handles disk space alerts.
pub struct DiskSpaceHandler;

impl Handler for DiskSpaceHandler {
    fn name(&self) -> &str {
        "disk_space"
    }

    fn description(&self) -> &str {
        "Frees disk space by cleaning old logs and package caches"
    }

    fn matches(&self, alert: &AlertEvent) -> bool {
        name_contains(alert, &["disk", "storage", "filesystem", "space"])
    }

    fn actions(&self, alert: &AlertEvent) -> Vec<RemediationAction> {
        let mountpoint = alert
            .labels
            .get("mountpoint")
            .map_or("/", String::as_str)
            .trim_end_matches('/');

        vec![
            RemediationAction::new(
                "cleanup_old_logs",
                "linux.rm",
                params(&[
                    ("host", json!(alert.instance())),
                    ("target", json!(format!("{mountpoint}/var/log/*.gz"))),
                    ("force", json!(true)),
                ]),
            ),
            RemediationAction::new(
                "cleanup_package_cache",
                "linux.apt_clean",
                params(&[("host", json!(alert.instance()))]),
            ),
        ]
    }
}

/// Handles service availability alerts.
pub struct ServiceDownHandler;

impl Handler for ServiceDownHandler {
    fn name(&self) -> &str {
        "service_down"
    }

    fn description(&self) -> &str {
        "Checks and restarts a service reported down"
    }

    fn matches(&self, alert: &AlertEvent) -> bool {
        name_contains(alert, &["down", "unavailable", "unhealthy", "dead"])
    }

    fn actions(&self, alert: &AlertEvent) -> Vec<RemediationAction> {
        // Prefer the service label, fall back to the scrape job.
        let target = alert
            .labels
            .get("service")
            .filter(|s| !s.is_empty())
            .or_else(|| alert.labels.get("job").filter(|s| !s.is_empty()));

        let Some(service) = target else {
            return Vec::new();
        };

        vec![
            RemediationAction::new(
                &format!("check_{service}_status"),
                "linux.service",
                params(&[
                    ("host", json!(alert.instance())),
                    ("service", json!(service)),
                    ("action", json!("status")),
                ]),
            ),
            RemediationAction::new(
                &format!("restart_{service}"),
                "linux.service",
                params(&[
                    ("host", json!(alert.instance())),
                    ("service", json!(service)),
                    ("action", json!("restart")),
                ]),
            ),
        ]
    }
}

/// Handles memory pressure alerts.
pub struct MemoryHandler;

impl Handler for MemoryHandler {
    fn name(&self) -> &str {
        "memory"
    }

    fn description(&self) -> &str {
        "Clears system caches and identifies memory-hungry processes"
    }

    fn matches(&self, alert: &AlertEvent) -> bool {
        name_contains(alert, &["memory", "ram", "oom", "swap"])
    }

    fn actions(&self, alert: &AlertEvent) -> Vec<RemediationAction> {
        let mut actions = vec![RemediationAction::new(
            "clear_system_caches",
            "core.remote",
            params(&[
                ("hosts", json!(alert.instance())),
                ("cmd", json!("sync; echo 3 > /proc/sys/vm/drop_caches")),
            ]),
        )];

        if alert.severity() == "critical" {
            actions.push(RemediationAction::new(
                "identify_memory_hogs",
                "core.remote",
                params(&[
                    ("hosts", json!(alert.instance())),
                    ("cmd", json!("ps aux --sort=-%mem | head -20")),
                ]),
            ));
        }

        actions
    }
}

/// Register all built-in handlers.
pub fn register_builtin_handlers(registry: &mut HandlerRegistry) {
    registry.register(Arc::new(HighCpuHandler));
    registry.register(Arc::new(DiskSpaceHandler));
    registry.register(Arc::new(ServiceDownHandler));
    registry.register(Arc::new(MemoryHandler));
}
