//! Handler registry and alert-to-action matching.
//!
//! A handler decides whether it applies to an alert and, if so, which
//! remediation actions to produce. The registry iterates handlers in
//! registration order; the matcher filters each produced action through the
//! condition evaluator and renders its parameter templates. Duplicate action
//! names across handlers are kept - more than one handler may remediate the
//! same target, which allows additive remediation strategies.

mod builtin;
mod yaml;

pub use builtin::{
    register_builtin_handlers, DiskSpaceHandler, HighCpuHandler, MemoryHandler, ServiceDownHandler,
};
pub use yaml::YamlMappingHandler;

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::action::RemediationAction;
use crate::alert::AlertEvent;
use crate::template::TemplateRenderer;

/// A unit of remediation logic.
///
/// Exactly two capabilities: decide applicability and produce actions.
/// Built-in handlers and YAML-declared handlers both implement this.
pub trait Handler: Send + Sync {
    /// Unique handler name. Re-registering a name replaces the previous
    /// registration.
    fn name(&self) -> &str;

    /// What this handler does.
    fn description(&self) -> &str {
        ""
    }

    /// Whether this handler applies to the alert.
    fn matches(&self, alert: &AlertEvent) -> bool;

    /// Ordered actions to execute for the alert. Conditions and templates
    /// on the produced actions are evaluated by the matcher, not here.
    fn actions(&self, alert: &AlertEvent) -> Vec<RemediationAction>;
}

/// Standard context block merged into every action's parameters, so
/// executors always receive the triggering alert context.
fn context_parameters(alert: &AlertEvent) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert("alert_name".to_string(), Value::String(alert.alertname().to_string()));
    params.insert("instance".to_string(), Value::String(alert.instance().to_string()));
    params.insert("severity".to_string(), Value::String(alert.severity().to_string()));
    params.insert(
        "alert_labels".to_string(),
        serde_json::to_value(&alert.labels).unwrap_or(Value::Null),
    );
    params.insert(
        "alert_annotations".to_string(),
        serde_json::to_value(&alert.annotations).unwrap_or(Value::Null),
    );
    params
}

/// Immutable, read-mostly registry of handlers.
///
/// Owned by the dispatcher's composition root and passed by reference; hot
/// reload builds a fresh registry and swaps it atomically behind an `Arc`.
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn Handler>>,
    renderer: TemplateRenderer,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            renderer: TemplateRenderer::new(),
        }
    }

    /// Register a handler.
    ///
    /// Duplicate names replace the previous registration in place
    /// (last-registered-wins), which supports hot reload of YAML-declared
    /// handlers without reordering.
    pub fn register(&mut self, handler: Arc<dyn Handler>) {
        if let Some(existing) = self
            .handlers
            .iter_mut()
            .find(|h| h.name() == handler.name())
        {
            warn!("Replacing existing handler: {}", handler.name());
            *existing = handler;
            return;
        }
        info!("Registered handler: {}", handler.name());
        self.handlers.push(handler);
    }

    /// Names of registered handlers, in registration order.
    #[must_use]
    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Match an alert to its ordered remediation actions.
    ///
    /// Iterates handlers in registration order; for each matching handler,
    /// keeps its action order. Each action is condition-filtered, augmented
    /// with the standard context block, and template-rendered.
    #[must_use]
    pub fn actions_for(&self, alert: &AlertEvent) -> Vec<RemediationAction> {
        let mut matched = Vec::new();

        for handler in &self.handlers {
            if !handler.matches(alert) {
                continue;
            }
            debug!("Handler {} matched alert {}", handler.name(), alert.alertname());

            for mut action in handler.actions(alert) {
                if let Some(conditions) = &action.conditions {
                    if !conditions.matches(alert) {
                        debug!(
                            "Action {} skipped by conditions for alert {}",
                            action.name,
                            alert.alertname()
                        );
                        continue;
                    }
                }

                // Context entries override declared parameters, so executors
                // always see the real triggering context.
                for (key, value) in context_parameters(alert) {
                    action.parameters.insert(key, value);
                }
                action.parameters = self.renderer.render_parameters(&action.parameters, alert);
                matched.push(action);
            }
        }

        matched
    }
}
