//! Redis state storage for horizontally scaled fleets.
//!
//! Key layout:
//! - `mend:alert:<fingerprint>` - alert record JSON (attempts held separately)
//! - `mend:attempts:<fingerprint>` - list of attempt JSON, appended with RPUSH
//! - `mend:lock:<key>` - lock owner, created with SET NX PX
//!
//! Attempts live in their own list so an append is one atomic store
//! operation rather than a read-modify-write of the record. Lock release and
//! refresh are Lua scripts so the owner check and the mutation happen in one
//! step.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::time::Duration;
use tracing::{error, info};

use crate::alert::{AlertEvent, AlertState, AlertStats, ListFilter, RemediationAttempt, TrackedAlert};
use crate::error::{EngineError, Result};

use super::{AlertStore, LockManager};

const ALERT_PREFIX: &str = "mend:alert:";
const ATTEMPTS_PREFIX: &str = "mend:attempts:";
const LOCK_PREFIX: &str = "mend:lock:";

/// Release only if the caller still owns the lock.
const RELEASE_SCRIPT: &str = r"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end";

/// Extend expiry only if the caller still owns the lock.
const REFRESH_SCRIPT: &str = r"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('pexpire', KEYS[1], ARGV[2])
else
    return 0
end";

/// Redis-backed store. Safe to share across instances; the lock keys provide
/// cross-instance mutual exclusion.
pub struct RedisStore {
    conn: ConnectionManager,
    alert_ttl_hours: u64,
    release_script: Script,
    refresh_script: Script,
}

impl RedisStore {
    /// Connect to Redis.
    ///
    /// # Errors
    /// Returns a store error if the URL is invalid or the connection fails.
    pub async fn connect(url: &str, alert_ttl_hours: u64) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        info!("Connected to Redis state store");
        Ok(Self {
            conn,
            alert_ttl_hours,
            release_script: Script::new(RELEASE_SCRIPT),
            refresh_script: Script::new(REFRESH_SCRIPT),
        })
    }

    fn alert_key(fingerprint: &str) -> String {
        format!("{ALERT_PREFIX}{fingerprint}")
    }

    fn attempts_key(fingerprint: &str) -> String {
        format!("{ATTEMPTS_PREFIX}{fingerprint}")
    }

    fn lock_key(key: &str) -> String {
        format!("{LOCK_PREFIX}{key}")
    }

    fn ttl_seconds(&self) -> u64 {
        self.alert_ttl_hours * 3600
    }

    /// Serialize a record with the attempt list cleared; attempts are kept
    /// in their own key.
    fn serialize_record(record: &TrackedAlert) -> Result<String> {
        let mut stripped = record.clone();
        stripped.attempts.clear();
        Ok(serde_json::to_string(&stripped)?)
    }

    /// Fetch a record, or `None` when absent (expiry included - Redis drops
    /// the key itself).
    async fn load(&self, fingerprint: &str) -> Result<Option<TrackedAlert>> {
        let mut conn = self.conn.clone();
        let data: Option<String> = redis::AsyncCommands::get(&mut conn, Self::alert_key(fingerprint)).await?;
        let Some(data) = data else {
            return Ok(None);
        };
        let mut record: TrackedAlert = serde_json::from_str(&data)?;

        let raw_attempts: Vec<String> =
            redis::AsyncCommands::lrange(&mut conn, Self::attempts_key(fingerprint), 0, -1).await?;
        record.attempts = raw_attempts
            .iter()
            .map(|raw| serde_json::from_str::<RemediationAttempt>(raw))
            .collect::<std::result::Result<_, _>>()?;
        Ok(Some(record))
    }

    /// Persist a record. Entering `resolved` arms the retention TTL on both
    /// the record and its attempt list.
    async fn save(&self, record: &TrackedAlert) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = Self::alert_key(&record.fingerprint);
        let data = Self::serialize_record(record)?;

        if record.status == AlertState::Resolved {
            let ttl = self.ttl_seconds();
            let _: () = redis::AsyncCommands::set_ex(&mut conn, &key, data, ttl).await?;
            let _: () = redis::AsyncCommands::expire(
                &mut conn,
                Self::attempts_key(&record.fingerprint),
                ttl as i64,
            )
            .await?;
        } else {
            let _: () = redis::AsyncCommands::set(&mut conn, &key, data).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl AlertStore for RedisStore {
    async fn upsert_event(&self, event: &AlertEvent, now: DateTime<Utc>) -> Result<TrackedAlert> {
        let record = match self.load(&event.fingerprint).await? {
            Some(mut existing) => {
                existing.merge_event(event, now);
                existing
            }
            None => TrackedAlert::from_event(event, now),
        };
        self.save(&record).await?;
        Ok(record)
    }

    async fn get(&self, fingerprint: &str) -> Result<TrackedAlert> {
        self.load(fingerprint)
            .await?
            .ok_or_else(|| EngineError::NotFound(fingerprint.to_string()))
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<TrackedAlert>> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> =
            redis::AsyncCommands::keys(&mut conn, format!("{ALERT_PREFIX}*")).await?;

        let mut alerts = Vec::new();
        for key in keys {
            let fingerprint = key.trim_start_matches(ALERT_PREFIX);
            if let Some(record) = self.load(fingerprint).await? {
                if filter.matches(&record) {
                    alerts.push(record);
                }
            }
        }
        // Insertion order across the keyspace.
        alerts.sort_by_key(|a| a.first_seen_at);
        Ok(alerts)
    }

    async fn set_status(
        &self,
        fingerprint: &str,
        status: AlertState,
        processed_by: Option<&str>,
    ) -> Result<TrackedAlert> {
        let mut record = self
            .load(fingerprint)
            .await?
            .ok_or_else(|| EngineError::NotFound(fingerprint.to_string()))?;

        let from = record.status;
        if !record.apply_status(status, Utc::now(), processed_by) {
            return Err(EngineError::InvalidTransition {
                fingerprint: fingerprint.to_string(),
                from: from.as_str(),
                to: status.as_str(),
            });
        }
        self.save(&record).await?;
        Ok(record)
    }

    async fn append_attempt(&self, fingerprint: &str, attempt: RemediationAttempt) -> Result<()> {
        let mut conn = self.conn.clone();
        let exists: bool =
            redis::AsyncCommands::exists(&mut conn, Self::alert_key(fingerprint)).await?;
        if !exists {
            return Err(EngineError::NotFound(fingerprint.to_string()));
        }
        let payload = serde_json::to_string(&attempt)?;
        let _: i64 =
            redis::AsyncCommands::rpush(&mut conn, Self::attempts_key(fingerprint), payload)
                .await?;
        Ok(())
    }

    async fn delete(&self, fingerprint: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::AsyncCommands::del(
            &mut conn,
            vec![
                Self::alert_key(fingerprint),
                Self::attempts_key(fingerprint),
            ],
        )
        .await?;
        Ok(removed > 0)
    }

    async fn stats(&self) -> Result<AlertStats> {
        let alerts = self.list(&ListFilter::default()).await?;
        let mut stats = AlertStats::default();
        for alert in alerts {
            stats.total += 1;
            *stats
                .by_status
                .entry(alert.status.as_str().to_string())
                .or_default() += 1;
            let severity = alert.severity.unwrap_or_else(|| "unknown".to_string());
            *stats.by_severity.entry(severity).or_default() += 1;
        }
        Ok(stats)
    }

    async fn health_check(&self) -> bool {
        let mut conn = self.conn.clone();
        let pong: std::result::Result<String, redis::RedisError> =
            redis::cmd("PING").query_async(&mut conn).await;
        match pong {
            Ok(_) => true,
            Err(err) => {
                error!("Redis health check failed: {err}");
                false
            }
        }
    }
}

#[async_trait]
impl LockManager for RedisStore {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(Self::lock_key(key))
            .arg(owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(result.is_some())
    }

    async fn release(&self, key: &str, owner: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .release_script
            .key(Self::lock_key(key))
            .arg(owner)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn refresh(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let extended: i64 = self
            .refresh_script
            .key(Self::lock_key(key))
            .arg(owner)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(extended == 1)
    }
}
