//! Parameter templating against alert context.
//!
//! Substitutes `{{alertname}}`, `{{instance}}`, `{{severity}}`,
//! `{{labels.<key>}}` and `{{annotations.<key>}}` inside string parameter
//! values, recursing through nested mappings and sequences.
//!
//! Missing label or annotation references render as an empty string rather
//! than failing the action. This is deliberate, user-visible leniency: an
//! optional label's absence must not abort remediation.

use handlebars::Handlebars;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::alert::AlertEvent;

/// Renders action parameters against an alert's context.
pub struct TemplateRenderer {
    registry: Handlebars<'static>,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer {
    /// Create a renderer.
    ///
    /// HTML escaping is disabled: parameters carry shell commands and
    /// hostnames, not markup.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.register_escape_fn(handlebars::no_escape);
        Self { registry }
    }

    /// Build the template context for an alert.
    fn context(alert: &AlertEvent) -> Value {
        json!({
            "alertname": alert.alertname(),
            "instance": alert.instance(),
            "severity": alert.severity(),
            "labels": alert.labels,
            "annotations": alert.annotations,
        })
    }

    /// Render every string inside a parameter map.
    #[must_use]
    pub fn render_parameters(
        &self,
        parameters: &Map<String, Value>,
        alert: &AlertEvent,
    ) -> Map<String, Value> {
        let context = Self::context(alert);
        parameters
            .iter()
            .map(|(key, value)| (key.clone(), self.render_value(value, &context)))
            .collect()
    }

    fn render_value(&self, value: &Value, context: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.render_str(s, context)),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.render_value(v, context)))
                    .collect(),
            ),
            Value::Array(items) => Value::Array(
                items.iter().map(|v| self.render_value(v, context)).collect(),
            ),
            other => other.clone(),
        }
    }

    fn render_str(&self, template: &str, context: &Value) -> String {
        // Fast path: nothing to substitute.
        if !template.contains("{{") {
            return template.to_string();
        }
        match self.registry.render_template(template, context) {
            Ok(rendered) => rendered,
            Err(err) => {
                // Unparsable templates pass through verbatim.
                debug!("Template left unrendered: {err}");
                template.to_string()
            }
        }
    }
}
