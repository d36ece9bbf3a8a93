//! In-memory state storage for tests and single-instance deployments.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;

use crate::alert::{AlertEvent, AlertState, AlertStats, ListFilter, RemediationAttempt, TrackedAlert};
use crate::error::{EngineError, Result};

use super::{AlertStore, LockManager};

struct StoredAlert {
    record: TrackedAlert,
    expires_at: Option<DateTime<Utc>>,
}

struct LockEntry {
    owner: String,
    expires_at: DateTime<Utc>,
}

struct Inner {
    alerts: HashMap<String, StoredAlert>,
    /// Fingerprints in insertion order.
    order: Vec<String>,
    locks: HashMap<String, LockEntry>,
}

/// In-memory backend. Honors the same owner/TTL lock contract as the Redis
/// backend, but only within a single process.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    alert_ttl_hours: u64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a store with the default 24h retention for resolved alerts.
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl_hours(24)
    }

    /// Create a store with a specific retention for resolved alerts.
    #[must_use]
    pub fn with_ttl_hours(alert_ttl_hours: u64) -> Self {
        warn!("Using in-memory state store - not suitable for horizontal scaling");
        Self {
            inner: Mutex::new(Inner {
                alerts: HashMap::new(),
                order: Vec::new(),
                locks: HashMap::new(),
            }),
            alert_ttl_hours,
        }
    }

    /// Remove a record if its retention expired. Expiry is lazy: an expired
    /// alert must never resurface as "found".
    fn evict_if_expired(inner: &mut Inner, fingerprint: &str, now: DateTime<Utc>) {
        let expired = inner
            .alerts
            .get(fingerprint)
            .and_then(|s| s.expires_at)
            .is_some_and(|at| at <= now);
        if expired {
            inner.alerts.remove(fingerprint);
            inner.order.retain(|fp| fp != fingerprint);
        }
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn upsert_event(&self, event: &AlertEvent, now: DateTime<Utc>) -> Result<TrackedAlert> {
        let mut inner = self.inner.lock().await;
        Self::evict_if_expired(&mut inner, &event.fingerprint, now);

        if let Some(stored) = inner.alerts.get_mut(&event.fingerprint) {
            stored.record.merge_event(event, now);
            return Ok(stored.record.clone());
        }

        let record = TrackedAlert::from_event(event, now);
        inner.order.push(event.fingerprint.clone());
        inner.alerts.insert(
            event.fingerprint.clone(),
            StoredAlert {
                record: record.clone(),
                expires_at: None,
            },
        );
        Ok(record)
    }

    async fn get(&self, fingerprint: &str) -> Result<TrackedAlert> {
        let mut inner = self.inner.lock().await;
        Self::evict_if_expired(&mut inner, fingerprint, Utc::now());
        inner
            .alerts
            .get(fingerprint)
            .map(|s| s.record.clone())
            .ok_or_else(|| EngineError::NotFound(fingerprint.to_string()))
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<TrackedAlert>> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let fingerprints: Vec<String> = inner.order.clone();
        let mut alerts = Vec::new();
        for fingerprint in fingerprints {
            Self::evict_if_expired(&mut inner, &fingerprint, now);
            if let Some(stored) = inner.alerts.get(&fingerprint) {
                if filter.matches(&stored.record) {
                    alerts.push(stored.record.clone());
                }
            }
        }
        Ok(alerts)
    }

    async fn set_status(
        &self,
        fingerprint: &str,
        status: AlertState,
        processed_by: Option<&str>,
    ) -> Result<TrackedAlert> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        Self::evict_if_expired(&mut inner, fingerprint, now);

        let ttl_hours = self.alert_ttl_hours;
        let stored = inner
            .alerts
            .get_mut(fingerprint)
            .ok_or_else(|| EngineError::NotFound(fingerprint.to_string()))?;

        let from = stored.record.status;
        if !stored.record.apply_status(status, now, processed_by) {
            return Err(EngineError::InvalidTransition {
                fingerprint: fingerprint.to_string(),
                from: from.as_str(),
                to: status.as_str(),
            });
        }
        if status == AlertState::Resolved {
            stored.expires_at = Some(now + ChronoDuration::hours(ttl_hours as i64));
        }
        Ok(stored.record.clone())
    }

    async fn append_attempt(&self, fingerprint: &str, attempt: RemediationAttempt) -> Result<()> {
        let mut inner = self.inner.lock().await;
        Self::evict_if_expired(&mut inner, fingerprint, Utc::now());
        let stored = inner
            .alerts
            .get_mut(fingerprint)
            .ok_or_else(|| EngineError::NotFound(fingerprint.to_string()))?;
        stored.record.record_attempt(attempt);
        Ok(())
    }

    async fn delete(&self, fingerprint: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let existed = inner.alerts.remove(fingerprint).is_some();
        inner.order.retain(|fp| fp != fingerprint);
        Ok(existed)
    }

    async fn stats(&self) -> Result<AlertStats> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let fingerprints: Vec<String> = inner.order.clone();
        for fingerprint in &fingerprints {
            Self::evict_if_expired(&mut inner, fingerprint, now);
        }

        let mut stats = AlertStats::default();
        for stored in inner.alerts.values() {
            stats.total += 1;
            *stats
                .by_status
                .entry(stored.record.status.as_str().to_string())
                .or_default() += 1;
            let severity = stored
                .record
                .severity
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            *stats.by_severity.entry(severity).or_default() += 1;
        }
        Ok(stats)
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[async_trait]
impl LockManager for MemoryStore {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        let held = inner
            .locks
            .get(key)
            .is_some_and(|entry| entry.expires_at > now);
        if held {
            return Ok(false);
        }

        inner.locks.insert(
            key.to_string(),
            LockEntry {
                owner: owner.to_string(),
                expires_at: now + ChronoDuration::from_std(ttl).unwrap_or_default(),
            },
        );
        Ok(true)
    }

    async fn release(&self, key: &str, owner: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.locks.get(key).is_some_and(|e| e.owner == owner) {
            inner.locks.remove(key);
        }
        Ok(())
    }

    async fn refresh(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        match inner.locks.get_mut(key) {
            Some(entry) if entry.owner == owner && entry.expires_at > now => {
                entry.expires_at = now + ChronoDuration::from_std(ttl).unwrap_or_default();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
