//! Remediation dispatcher: drives alerts through the lifecycle state machine.
//!
//! One logical invocation per inbound alert event: upsert state, handle
//! resolve signals, match handlers, take the per-alert distributed lock and
//! a concurrency slot, execute matched actions sequentially with per-action
//! timeouts, record attempts, release the lock and finish the transition.
//!
//! Lock contention and per-action failures are absorbed into the dispatch
//! report; only store failures surface as errors, and the upstream webhook
//! layer is expected to retry those.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::action::RemediationAction;
use crate::alert::{
    AlertEvent, AlertState, AlertStats, AttemptOutcome, ListFilter, RemediationAttempt,
    TrackedAlert,
};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::executor::ActionExecutor;
use crate::handlers::HandlerRegistry;
use crate::store::StateStore;

/// How one dispatch invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// A resolve signal was applied; the alert is now terminal.
    Resolved,
    /// A resolve signal arrived for a fingerprint that was never tracked.
    UntrackedResolve,
    /// The alert is already resolved; nothing to do.
    AlreadyResolved,
    /// No handler produced an action; the alert keeps its current status.
    NoActions,
    /// Another instance holds the lock; the alert is `pending`.
    Contended,
    /// No concurrency slot was free; the alert stays `pending` for a later
    /// event.
    Queued,
    /// All matched actions were attempted (including skips); the alert
    /// reached a terminal remediation state.
    Completed,
}

/// Result of one dispatch invocation.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    /// The alert's fingerprint.
    pub fingerprint: String,
    /// How the dispatch ended.
    pub outcome: DispatchOutcome,
    /// Attempts made during this dispatch, in execution order.
    pub attempts: Vec<RemediationAttempt>,
}

impl DispatchReport {
    fn new(fingerprint: &str, outcome: DispatchOutcome) -> Self {
        Self {
            fingerprint: fingerprint.to_string(),
            outcome,
            attempts: Vec::new(),
        }
    }
}

/// The engine's dispatcher. Owns the handler registry snapshot, the
/// process-wide concurrency semaphore, and the per-fingerprint cancellation
/// tokens for in-flight dispatches.
pub struct Dispatcher {
    store: Arc<dyn StateStore>,
    executor: Arc<dyn ActionExecutor>,
    registry: RwLock<Arc<HandlerRegistry>>,
    config: EngineConfig,
    semaphore: Arc<Semaphore>,
    active: Mutex<HashMap<String, CancellationToken>>,
}

impl Dispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(
        store: Arc<dyn StateStore>,
        executor: Arc<dyn ActionExecutor>,
        registry: HandlerRegistry,
        config: EngineConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_remediations));
        Self {
            store,
            executor,
            registry: RwLock::new(Arc::new(registry)),
            config,
            semaphore,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Current handler registry snapshot.
    pub async fn registry(&self) -> Arc<HandlerRegistry> {
        self.registry.read().await.clone()
    }

    /// Atomically replace the handler registry (hot reload).
    pub async fn reload_handlers(&self, registry: HandlerRegistry) {
        let mut guard = self.registry.write().await;
        *guard = Arc::new(registry);
        info!("Handler registry reloaded: {} handlers", guard.len());
    }

    /// Process one inbound alert event through the remediation lifecycle.
    ///
    /// # Errors
    /// Surfaces `NotFound` per the store contract and store failures, which
    /// are fatal to this invocation and must be retried by the caller.
    pub async fn process_event(&self, event: &AlertEvent) -> Result<DispatchReport> {
        let fingerprint = event.fingerprint.as_str();
        debug!(
            "Dispatching event: alert={} fingerprint={fingerprint} firing={}",
            event.alertname(),
            event.is_firing()
        );

        if !event.is_firing() {
            return self.handle_resolved(event).await;
        }

        let tracked = self.store.upsert_event(event, Utc::now()).await?;
        if tracked.status == AlertState::Resolved {
            info!("Skipping already resolved alert {fingerprint}");
            return Ok(DispatchReport::new(fingerprint, DispatchOutcome::AlreadyResolved));
        }

        let actions = self.registry().await.actions_for(event);
        if actions.is_empty() {
            info!("No remediation actions for alert {}", event.alertname());
            return Ok(DispatchReport::new(fingerprint, DispatchOutcome::NoActions));
        }

        let ttl = self.config.lock_timeout();
        let owner = self.config.instance_id.as_str();
        if !self.store.try_acquire(fingerprint, owner, ttl).await? {
            info!("Alert {fingerprint} is being remediated by another instance");
            self.mark_pending(fingerprint).await?;
            return Ok(DispatchReport::new(fingerprint, DispatchOutcome::Contended));
        }

        // Concurrency slot. On exhaustion the alert queues as pending and a
        // later event retries; never block while holding the lock.
        let permit = match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(
                    "Remediation slots exhausted ({}), queueing alert {fingerprint}",
                    self.config.max_concurrent_remediations
                );
                self.release_lock(fingerprint).await;
                self.mark_pending(fingerprint).await?;
                return Ok(DispatchReport::new(fingerprint, DispatchOutcome::Queued));
            }
        };

        // A repeat firing for an already remediated alert runs its actions
        // again; the status stays `remediated` and the new attempts append.
        match self
            .store
            .set_status(fingerprint, AlertState::Remediating, Some(owner))
            .await
        {
            Ok(_) | Err(EngineError::InvalidTransition { .. }) => {}
            Err(err) => {
                self.release_lock(fingerprint).await;
                return Err(err);
            }
        }

        info!(
            "Remediating alert {} with {} actions",
            event.alertname(),
            actions.len()
        );

        // Resolve signals cancel not-yet-started actions via this token.
        let cancel = CancellationToken::new();
        self.active
            .lock()
            .await
            .insert(fingerprint.to_string(), cancel.clone());

        // Heartbeat keeps the lock alive for long action sequences and flags
        // loss so remaining actions are skipped rather than run unprotected.
        let lock_lost = Arc::new(AtomicBool::new(false));
        let heartbeat = CancellationToken::new();
        self.spawn_heartbeat(fingerprint, ttl, heartbeat.clone(), Arc::clone(&lock_lost));

        let run_result = self
            .run_actions(event, &actions, &cancel, &lock_lost)
            .await;

        heartbeat.cancel();
        self.active.lock().await.remove(fingerprint);
        drop(permit);
        if !lock_lost.load(Ordering::SeqCst) {
            self.release_lock(fingerprint).await;
        }

        let attempts = run_result?;

        let mut report = DispatchReport::new(fingerprint, DispatchOutcome::Completed);
        report.attempts = attempts;

        match self
            .store
            .set_status(fingerprint, AlertState::Remediated, Some(owner))
            .await
        {
            Ok(_) => Ok(report),
            // A resolve signal won the race; the terminal state stands and
            // the attempts remain recorded.
            Err(EngineError::InvalidTransition { .. }) => Ok(report),
            Err(err) => Err(err),
        }
    }

    /// Handle a resolve signal from the alert source.
    ///
    /// Cancels not-yet-started actions of an in-flight dispatch for the same
    /// fingerprint; already-started actions finish and are recorded.
    async fn handle_resolved(&self, event: &AlertEvent) -> Result<DispatchReport> {
        let fingerprint = event.fingerprint.as_str();

        if let Some(token) = self.active.lock().await.get(fingerprint) {
            info!("Cancelling queued actions for resolved alert {fingerprint}");
            token.cancel();
        }

        match self.store.get(fingerprint).await {
            Ok(_) => {}
            Err(EngineError::NotFound(_)) => {
                debug!("Resolved alert {fingerprint} was never tracked");
                return Ok(DispatchReport::new(
                    fingerprint,
                    DispatchOutcome::UntrackedResolve,
                ));
            }
            Err(err) => return Err(err),
        }

        // Persist the resolve event's `ends_at` and refreshed labels and
        // annotations before the terminal transition, so the detail view
        // shows when the alert actually cleared.
        let tracked = self.store.upsert_event(event, Utc::now()).await?;
        if tracked.status == AlertState::Resolved {
            return Ok(DispatchReport::new(fingerprint, DispatchOutcome::AlreadyResolved));
        }

        let resolved = self
            .store
            .set_status(fingerprint, AlertState::Resolved, None)
            .await?;
        info!(
            "Alert {} resolved after {} attempts ({} successful)",
            resolved.alertname,
            resolved.total_attempts(),
            resolved.successful_attempts()
        );
        Ok(DispatchReport::new(fingerprint, DispatchOutcome::Resolved))
    }

    /// Execute matched actions sequentially, recording one attempt each.
    ///
    /// A per-action failure never aborts subsequent actions; cancellation or
    /// lock loss records the remainder as skipped.
    async fn run_actions(
        &self,
        event: &AlertEvent,
        actions: &[RemediationAction],
        cancel: &CancellationToken,
        lock_lost: &AtomicBool,
    ) -> Result<Vec<RemediationAttempt>> {
        let mut attempts = Vec::with_capacity(actions.len());

        for action in actions {
            let attempt = if cancel.is_cancelled() {
                skipped_attempt(action, "alert resolved before action started")
            } else if lock_lost.load(Ordering::SeqCst) {
                skipped_attempt(action, "lock lost before action started")
            } else {
                self.execute_action(action).await
            };

            self.store
                .append_attempt(&event.fingerprint, attempt.clone())
                .await?;
            attempts.push(attempt);
        }

        Ok(attempts)
    }

    /// Execute one action, bounded by its timeout.
    async fn execute_action(&self, action: &RemediationAction) -> RemediationAttempt {
        let started_at = Utc::now();
        info!("Executing action {} ({})", action.name, action.action);

        let execution = if action.timeout_seconds == 0 {
            Ok(self.executor.execute(action).await)
        } else {
            tokio::time::timeout(
                Duration::from_secs(action.timeout_seconds),
                self.executor.execute(action),
            )
            .await
        };

        let (outcome, execution_id, error) = match execution {
            Ok(Ok(result)) if result.success => (AttemptOutcome::Succeeded, result.execution_id, None),
            Ok(Ok(result)) => (
                AttemptOutcome::Failed,
                result.execution_id,
                Some(result.detail.unwrap_or_else(|| "execution failed".to_string())),
            ),
            Ok(Err(err)) => {
                warn!("Action {} failed: {err}", action.name);
                (AttemptOutcome::Failed, None, Some(err.to_string()))
            }
            Err(_elapsed) => {
                warn!(
                    "Action {} timed out after {}s",
                    action.name, action.timeout_seconds
                );
                (
                    AttemptOutcome::TimedOut,
                    None,
                    Some(format!("timed out after {}s", action.timeout_seconds)),
                )
            }
        };

        RemediationAttempt {
            action_name: action.name.clone(),
            executor_action: action.action.clone(),
            outcome,
            started_at,
            finished_at: Some(Utc::now()),
            execution_id,
            error,
        }
    }

    /// Spawn the lock refresh heartbeat, scoped to the dispatch lifetime.
    fn spawn_heartbeat(
        &self,
        fingerprint: &str,
        ttl: Duration,
        token: CancellationToken,
        lock_lost: Arc<AtomicBool>,
    ) {
        let store = Arc::clone(&self.store);
        let key = fingerprint.to_string();
        let owner = self.config.instance_id.clone();
        let interval = (ttl / 3).max(Duration::from_secs(1));

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(interval) => {
                        match store.refresh(&key, &owner, ttl).await {
                            Ok(true) => {}
                            Ok(false) | Err(_) => {
                                warn!("Lock lost for alert {key}, aborting remaining actions");
                                lock_lost.store(true, Ordering::SeqCst);
                                break;
                            }
                        }
                    }
                }
            }
        });
    }

    /// Park an alert as `pending`. Tolerates records another instance has
    /// already moved past `pending`; the forward-only state machine wins.
    async fn mark_pending(&self, fingerprint: &str) -> Result<()> {
        match self
            .store
            .set_status(fingerprint, AlertState::Pending, None)
            .await
        {
            Ok(_) | Err(EngineError::InvalidTransition { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Release the per-alert lock; a failed release only shortens the lock
    /// to its TTL, so it is logged and not surfaced.
    async fn release_lock(&self, fingerprint: &str) {
        if let Err(err) = self
            .store
            .release(fingerprint, &self.config.instance_id)
            .await
        {
            warn!("Failed to release lock for {fingerprint}: {err}");
        }
    }

    // Read-only state exposure, consumed by the CLI, UI and metrics exporter.

    /// List tracked alerts, optionally filtered by status/severity.
    pub async fn alerts(&self, filter: &ListFilter) -> Result<Vec<TrackedAlert>> {
        self.store.list(filter).await
    }

    /// Fetch one tracked alert with its full attempt history.
    pub async fn alert(&self, fingerprint: &str) -> Result<TrackedAlert> {
        self.store.get(fingerprint).await
    }

    /// Aggregate counters over the tracked alert set.
    pub async fn stats(&self) -> Result<AlertStats> {
        self.store.stats().await
    }

    /// Names of registered handlers, in registration order.
    pub async fn handler_names(&self) -> Vec<String> {
        self.registry()
            .await
            .handler_names()
            .into_iter()
            .map(ToString::to_string)
            .collect()
    }

    /// Aggregate engine health: store and executor reachability.
    pub async fn health_check(&self) -> EngineHealth {
        let store = self.store.health_check().await;
        let executor = self.executor.health_check().await;
        EngineHealth {
            healthy: store && executor,
            store,
            executor,
            handlers: self.registry().await.len(),
        }
    }
}

/// Engine health snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct EngineHealth {
    /// Overall health.
    pub healthy: bool,
    /// Store reachability.
    pub store: bool,
    /// Executor reachability.
    pub executor: bool,
    /// Registered handler count.
    pub handlers: usize,
}

fn skipped_attempt(action: &RemediationAction, reason: &str) -> RemediationAttempt {
    let now = Utc::now();
    RemediationAttempt {
        action_name: action.name.clone(),
        executor_action: action.action.clone(),
        outcome: AttemptOutcome::Skipped,
        started_at: now,
        finished_at: Some(now),
        execution_id: None,
        error: Some(reason.to_string()),
    }
}
