//! Alert state storage and distributed locking.
//!
//! Both contracts are implemented by the same backends: an in-memory store
//! for tests and single-instance deployments, and a Redis store for
//! horizontally scaled fleets. The coordination store is the single source
//! of truth for alert state and locks.

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::alert::{AlertEvent, AlertState, AlertStats, ListFilter, RemediationAttempt, TrackedAlert};
use crate::error::Result;

/// Durable (TTL-bounded) keyed storage of alert records and their history.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Create or merge an alert record from an inbound event.
    ///
    /// Creation enters the record at `received` with `first_seen_at = now`;
    /// merging preserves `first_seen_at`, the current status, and the
    /// attempt history.
    async fn upsert_event(&self, event: &AlertEvent, now: DateTime<Utc>) -> Result<TrackedAlert>;

    /// Fetch a tracked alert. `NotFound` if missing or expired.
    async fn get(&self, fingerprint: &str) -> Result<TrackedAlert>;

    /// List tracked alerts in insertion order, optionally filtered.
    async fn list(&self, filter: &ListFilter) -> Result<Vec<TrackedAlert>>;

    /// Apply a lifecycle transition and persist it.
    ///
    /// Entering `resolved` arms the retention TTL. Invalid transitions
    /// surface `InvalidTransition`; missing fingerprints surface `NotFound`.
    async fn set_status(
        &self,
        fingerprint: &str,
        status: AlertState,
        processed_by: Option<&str>,
    ) -> Result<TrackedAlert>;

    /// Atomically append an attempt to an alert's history.
    ///
    /// A single atomic store operation, never read-modify-write, so
    /// concurrent appends from different instances are not lost.
    async fn append_attempt(&self, fingerprint: &str, attempt: RemediationAttempt) -> Result<()>;

    /// Delete a tracked alert. Returns whether a record existed.
    async fn delete(&self, fingerprint: &str) -> Result<bool>;

    /// Aggregate counters over the tracked alert set.
    async fn stats(&self) -> Result<AlertStats>;

    /// Whether the backend is reachable.
    async fn health_check(&self) -> bool;
}

/// Per-key mutual exclusion with expiry, shared across instances.
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Atomic set-if-absent with expiry. Returns `false` when another owner
    /// currently holds the lock.
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool>;

    /// Release the lock if `owner` still holds it (compare-and-delete).
    /// Releasing a lock you no longer own is a no-op, never an error.
    async fn release(&self, key: &str, owner: &str) -> Result<()>;

    /// Extend the expiry if `owner` still holds the lock. Returns `false`
    /// when the lock was lost; callers must abort remaining protected work.
    async fn refresh(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool>;
}

/// A backend providing both alert storage and locking.
pub trait StateStore: AlertStore + LockManager {}

impl<T: AlertStore + LockManager> StateStore for T {}
