//! Alert data model: inbound events, tracked lifecycle records, and attempts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Status of an inbound alert event, as reported by the alert source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertEventStatus {
    /// The alert condition is active.
    Firing,
    /// The alert source reports the condition cleared.
    Resolved,
}

/// Inbound alert event, already parsed by the webhook transport.
///
/// Field names follow the Alertmanager webhook convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Stable identifier for this alert, supplied by the alert source.
    pub fingerprint: String,
    /// "firing" or "resolved".
    pub status: AlertEventStatus,
    /// Alert labels.
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Alert annotations.
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    /// When the alert started firing.
    #[serde(rename = "startsAt")]
    pub starts_at: DateTime<Utc>,
    /// When the alert ended (if resolved).
    #[serde(rename = "endsAt", default)]
    pub ends_at: Option<DateTime<Utc>>,
    /// URL to the triggering expression in the alert source.
    #[serde(rename = "generatorURL", default)]
    pub generator_url: String,
}

impl AlertEvent {
    /// Get the alert name.
    #[must_use]
    pub fn alertname(&self) -> &str {
        self.labels.get("alertname").map_or("unknown", String::as_str)
    }

    /// Get the severity.
    #[must_use]
    pub fn severity(&self) -> &str {
        self.labels.get("severity").map_or("unknown", String::as_str)
    }

    /// Get the instance label.
    #[must_use]
    pub fn instance(&self) -> &str {
        self.labels.get("instance").map_or("unknown", String::as_str)
    }

    /// Check if this is a firing event.
    #[must_use]
    pub fn is_firing(&self) -> bool {
        self.status == AlertEventStatus::Firing
    }
}

/// Lifecycle state of a tracked alert.
///
/// States only move forward along `received -> pending -> remediating ->
/// remediated`; `resolved` is reachable from any non-terminal state and is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    /// First sighting of a fingerprint.
    Received,
    /// Matched to at least one handler, waiting for lock or slot.
    Pending,
    /// Lock held, actions executing.
    Remediating,
    /// All matched actions attempted; outcome detail lives in the attempts.
    Remediated,
    /// The alert source reported the alert cleared. Terminal.
    Resolved,
}

impl AlertState {
    /// Position along the forward lifecycle.
    fn order(self) -> u8 {
        match self {
            Self::Received => 0,
            Self::Pending => 1,
            Self::Remediating => 2,
            Self::Remediated => 3,
            Self::Resolved => 4,
        }
    }

    /// Check whether a transition to `next` is valid.
    ///
    /// Same-state transitions are allowed (idempotent no-op); forward skips
    /// (e.g. `received -> remediating`) are allowed; nothing leaves
    /// `resolved`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        if self == next {
            return true;
        }
        if self == Self::Resolved {
            return false;
        }
        if next == Self::Resolved {
            return true;
        }
        next.order() > self.order()
    }

    /// Lowercase wire name for this state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Pending => "pending",
            Self::Remediating => "remediating",
            Self::Remediated => "remediated",
            Self::Resolved => "resolved",
        }
    }
}

/// Outcome of a single remediation action attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttemptOutcome {
    /// The executor reported success.
    Succeeded,
    /// The executor reported failure or the adapter call failed.
    Failed,
    /// The per-action timeout elapsed before a terminal status.
    TimedOut,
    /// The action was never started (resolve signal or lock loss).
    Skipped,
}

/// Immutable record of one action's execution outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationAttempt {
    /// Name of the attempted action.
    pub action_name: String,
    /// Executor action identifier.
    pub executor_action: String,
    /// How the attempt ended.
    pub outcome: AttemptOutcome,
    /// When execution started (or when the skip was recorded).
    pub started_at: DateTime<Utc>,
    /// When execution finished.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Execution id returned by the external executor.
    #[serde(default)]
    pub execution_id: Option<String>,
    /// Error detail for failed or timed out attempts.
    #[serde(default)]
    pub error: Option<String>,
}

/// A tracked alert with full lifecycle state and attempt history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedAlert {
    /// Stable alert identifier. Immutable once created.
    pub fingerprint: String,
    /// Alert name from labels.
    pub alertname: String,
    /// Instance label, if present.
    #[serde(default)]
    pub instance: Option<String>,
    /// Severity label, if present.
    #[serde(default)]
    pub severity: Option<String>,
    /// Alert labels.
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Alert annotations.
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    /// Current lifecycle state.
    pub status: AlertState,
    /// When the alert started firing, per the alert source.
    pub starts_at: DateTime<Utc>,
    /// When the alert ended, per the alert source.
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    /// When this fingerprint was first seen. Preserved across upserts.
    pub first_seen_at: DateTime<Utc>,
    /// When this record was last touched.
    pub last_updated_at: DateTime<Utc>,
    /// When the status last changed.
    pub status_changed_at: DateTime<Utc>,
    /// When the alert entered `resolved`.
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Ordered attempt history. Append-only.
    #[serde(default)]
    pub attempts: Vec<RemediationAttempt>,
    /// Instance id of the replica that last drove remediation.
    #[serde(default)]
    pub processed_by: Option<String>,
    /// Most recent per-action error detail.
    #[serde(default)]
    pub last_error: Option<String>,
}

impl TrackedAlert {
    /// Create a fresh record from the first sighting of a fingerprint.
    #[must_use]
    pub fn from_event(event: &AlertEvent, now: DateTime<Utc>) -> Self {
        Self {
            fingerprint: event.fingerprint.clone(),
            alertname: event.alertname().to_string(),
            instance: event.labels.get("instance").cloned(),
            severity: event.labels.get("severity").cloned(),
            labels: event.labels.clone(),
            annotations: event.annotations.clone(),
            status: AlertState::Received,
            starts_at: event.starts_at,
            ends_at: event.ends_at,
            first_seen_at: now,
            last_updated_at: now,
            status_changed_at: now,
            resolved_at: None,
            attempts: Vec::new(),
            processed_by: None,
            last_error: None,
        }
    }

    /// Merge a repeat event into this record.
    ///
    /// Refreshes labels, annotations and timestamps; preserves
    /// `first_seen_at`, the current status and the attempt history.
    pub fn merge_event(&mut self, event: &AlertEvent, now: DateTime<Utc>) {
        self.alertname = event.alertname().to_string();
        self.instance = event.labels.get("instance").cloned();
        self.severity = event.labels.get("severity").cloned();
        self.labels = event.labels.clone();
        self.annotations = event.annotations.clone();
        self.starts_at = event.starts_at;
        self.ends_at = event.ends_at;
        self.last_updated_at = now;
    }

    /// Apply a lifecycle transition, stamping the change timestamps.
    ///
    /// Returns `false` if the transition is invalid; the record is untouched.
    pub fn apply_status(
        &mut self,
        next: AlertState,
        now: DateTime<Utc>,
        processed_by: Option<&str>,
    ) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        if self.status != next {
            self.status = next;
            self.status_changed_at = now;
            if next == AlertState::Resolved {
                self.resolved_at = Some(now);
            }
        }
        self.last_updated_at = now;
        if let Some(id) = processed_by {
            self.processed_by = Some(id.to_string());
        }
        true
    }

    /// Append an attempt and update the last-error detail.
    pub fn record_attempt(&mut self, attempt: RemediationAttempt) {
        if let Some(err) = &attempt.error {
            self.last_error = Some(err.clone());
        }
        self.attempts.push(attempt);
    }

    /// Total number of attempts.
    #[must_use]
    pub fn total_attempts(&self) -> usize {
        self.attempts.len()
    }

    /// Number of attempts that succeeded.
    #[must_use]
    pub fn successful_attempts(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.outcome == AttemptOutcome::Succeeded)
            .count()
    }

    /// Number of attempts that failed or timed out.
    #[must_use]
    pub fn failed_attempts(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| matches!(a.outcome, AttemptOutcome::Failed | AttemptOutcome::TimedOut))
            .count()
    }
}

/// Optional filters for listing tracked alerts.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Only alerts in this lifecycle state.
    pub status: Option<AlertState>,
    /// Only alerts with this severity label.
    pub severity: Option<String>,
}

impl ListFilter {
    /// Check whether an alert passes this filter.
    #[must_use]
    pub fn matches(&self, alert: &TrackedAlert) -> bool {
        if let Some(status) = self.status {
            if alert.status != status {
                return false;
            }
        }
        if let Some(severity) = &self.severity {
            if alert.severity.as_deref() != Some(severity.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Aggregate counters over the tracked alert set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertStats {
    /// Total tracked alerts.
    pub total: usize,
    /// Count per lifecycle state.
    pub by_status: HashMap<String, usize>,
    /// Count per severity label.
    pub by_severity: HashMap<String, usize>,
}
