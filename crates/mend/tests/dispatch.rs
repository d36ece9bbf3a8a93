//! End-to-end dispatch tests over the in-memory store and a scripted
//! executor: lifecycle transitions, multi-instance contention, resolve
//! cancellation, timeouts and lock loss.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

use mend::{
    ActionExecutor, AlertEvent, AlertEventStatus, AlertState, AlertStore, AttemptOutcome,
    DispatchOutcome, Dispatcher, EngineConfig, ExecutionOutcome, ExecutorError, Handler,
    HandlerRegistry, ListFilter, LockManager, MemoryStore, RemediationAction,
};

/// Opt-in log output for debugging test runs (`RUST_LOG=debug`).
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Per-action behavior for the scripted executor.
#[derive(Clone)]
enum Script {
    Succeed,
    Fail(&'static str),
    Error(&'static str),
    /// Never completes; only useful under a per-action timeout.
    Hang,
    /// Blocks until the test adds a permit to the gate.
    Gated,
}

/// Executor stub driven by per-action scripts. Reports each started action
/// on a channel so tests can synchronize with in-flight dispatches.
struct ScriptedExecutor {
    scripts: std::sync::Mutex<HashMap<String, Script>>,
    gate: Arc<Semaphore>,
    started: mpsc::UnboundedSender<String>,
}

impl ScriptedExecutor {
    fn new() -> (Arc<Self>, Arc<Semaphore>, mpsc::UnboundedReceiver<String>) {
        let gate = Arc::new(Semaphore::new(0));
        let (tx, rx) = mpsc::unbounded_channel();
        let executor = Arc::new(Self {
            scripts: std::sync::Mutex::new(HashMap::new()),
            gate: Arc::clone(&gate),
            started: tx,
        });
        (executor, gate, rx)
    }

    fn script(&self, action_name: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(action_name.to_string(), script);
    }
}

#[async_trait]
impl ActionExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        action: &RemediationAction,
    ) -> std::result::Result<ExecutionOutcome, ExecutorError> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&action.name)
            .cloned()
            .unwrap_or(Script::Succeed);
        let _ = self.started.send(action.name.clone());

        match script {
            Script::Succeed => Ok(ExecutionOutcome::succeeded(Some(format!(
                "exec-{}",
                action.name
            )))),
            Script::Fail(detail) => Ok(ExecutionOutcome::failed(None, detail)),
            Script::Error(detail) => Err(ExecutorError::Api(detail.to_string())),
            Script::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Script::Gated => {
                let permit = self.gate.acquire().await.unwrap();
                permit.forget();
                Ok(ExecutionOutcome::succeeded(Some(format!(
                    "exec-{}",
                    action.name
                ))))
            }
        }
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Handler producing a fixed action list for every alert.
struct FixedHandler {
    actions: Vec<(&'static str, u64)>,
}

impl Handler for FixedHandler {
    fn name(&self) -> &str {
        "fixed"
    }

    fn matches(&self, _alert: &AlertEvent) -> bool {
        true
    }

    fn actions(&self, _alert: &AlertEvent) -> Vec<RemediationAction> {
        self.actions
            .iter()
            .map(|(name, timeout)| {
                let mut action =
                    RemediationAction::new(name, "test.noop", serde_json::Map::new());
                action.timeout_seconds = *timeout;
                action
            })
            .collect()
    }
}

fn registry(actions: &[(&'static str, u64)]) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(FixedHandler {
        actions: actions.to_vec(),
    }));
    registry
}

fn config(instance_id: &str) -> EngineConfig {
    EngineConfig {
        instance_id: instance_id.to_string(),
        lock_timeout_seconds: 30,
        ..Default::default()
    }
}

fn firing(fingerprint: &str) -> AlertEvent {
    event(fingerprint, AlertEventStatus::Firing)
}

fn resolved(fingerprint: &str) -> AlertEvent {
    event(fingerprint, AlertEventStatus::Resolved)
}

fn event(fingerprint: &str, status: AlertEventStatus) -> AlertEvent {
    let mut labels = HashMap::new();
    labels.insert("alertname".to_string(), "HighCPU".to_string());
    labels.insert("severity".to_string(), "critical".to_string());
    labels.insert("instance".to_string(), "host1".to_string());
    AlertEvent {
        fingerprint: fingerprint.to_string(),
        status,
        labels,
        annotations: HashMap::new(),
        starts_at: Utc::now(),
        ends_at: None,
        generator_url: String::new(),
    }
}

#[tokio::test]
async fn test_happy_path_reaches_remediated() {
    let store = Arc::new(MemoryStore::new());
    let (executor, _gate, _rx) = ScriptedExecutor::new();
    let dispatcher = Dispatcher::new(
        Arc::clone(&store) as _,
        executor,
        registry(&[("restart", 300), ("verify", 300)]),
        config("mend-a"),
    );

    let report = dispatcher.process_event(&firing("f1")).await.unwrap();
    assert_eq!(report.outcome, DispatchOutcome::Completed);
    assert_eq!(report.attempts.len(), 2);
    assert!(report
        .attempts
        .iter()
        .all(|a| a.outcome == AttemptOutcome::Succeeded));

    let tracked = dispatcher.alert("f1").await.unwrap();
    assert_eq!(tracked.status, AlertState::Remediated);
    assert_eq!(tracked.total_attempts(), 2);
    assert_eq!(tracked.processed_by.as_deref(), Some("mend-a"));
    assert_eq!(
        tracked.attempts[0].execution_id.as_deref(),
        Some("exec-restart")
    );

    // Lock released after dispatch.
    assert!(store
        .try_acquire("f1", "other", std::time::Duration::from_secs(5))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_no_actions_leaves_status_untouched() {
    let store = Arc::new(MemoryStore::new());
    let (executor, _gate, _rx) = ScriptedExecutor::new();
    let dispatcher = Dispatcher::new(
        Arc::clone(&store) as _,
        executor,
        HandlerRegistry::new(),
        config("mend-a"),
    );

    let report = dispatcher.process_event(&firing("f1")).await.unwrap();
    assert_eq!(report.outcome, DispatchOutcome::NoActions);
    assert_eq!(
        dispatcher.alert("f1").await.unwrap().status,
        AlertState::Received
    );
}

#[tokio::test]
async fn test_second_instance_sees_contention() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());

    let (slow, gate, mut started) = ScriptedExecutor::new();
    slow.script("restart", Script::Gated);
    let first = Arc::new(Dispatcher::new(
        Arc::clone(&store) as _,
        slow,
        registry(&[("restart", 300)]),
        config("mend-a"),
    ));

    let (fast, _gate2, _rx2) = ScriptedExecutor::new();
    let second = Dispatcher::new(
        Arc::clone(&store) as _,
        fast,
        registry(&[("restart", 300)]),
        config("mend-b"),
    );

    let first_task = {
        let first = Arc::clone(&first);
        tokio::spawn(async move { first.process_event(&firing("f1")).await })
    };
    // First instance holds the lock and is mid-action.
    started.recv().await.unwrap();
    assert_eq!(
        store.get("f1").await.unwrap().status,
        AlertState::Remediating
    );

    let report = second.process_event(&firing("f1")).await.unwrap();
    assert_eq!(report.outcome, DispatchOutcome::Contended);
    // The loser must not clobber the winner's status.
    assert_eq!(
        store.get("f1").await.unwrap().status,
        AlertState::Remediating
    );

    gate.add_permits(1);
    let report = first_task.await.unwrap().unwrap();
    assert_eq!(report.outcome, DispatchOutcome::Completed);
    let tracked = store.get("f1").await.unwrap();
    assert_eq!(tracked.status, AlertState::Remediated);
    assert_eq!(tracked.processed_by.as_deref(), Some("mend-a"));
}

#[tokio::test]
async fn test_resolve_during_remediation_cancels_pending_actions() {
    let store = Arc::new(MemoryStore::new());
    let (executor, gate, mut started) = ScriptedExecutor::new();
    executor.script("first", Script::Gated);
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&store) as _,
        executor,
        registry(&[("first", 300), ("second", 300)]),
        config("mend-a"),
    ));

    let firing_task = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.process_event(&firing("f1")).await })
    };
    started.recv().await.unwrap();

    // Resolve arrives while the first action is executing.
    let report = dispatcher.process_event(&resolved("f1")).await.unwrap();
    assert_eq!(report.outcome, DispatchOutcome::Resolved);

    gate.add_permits(1);
    let report = firing_task.await.unwrap().unwrap();
    assert_eq!(report.outcome, DispatchOutcome::Completed);

    // The started action finished and is recorded; the queued one never ran.
    let tracked = store.get("f1").await.unwrap();
    assert_eq!(tracked.status, AlertState::Resolved);
    assert_eq!(tracked.attempts.len(), 2);
    assert_eq!(tracked.attempts[0].action_name, "first");
    assert_eq!(tracked.attempts[0].outcome, AttemptOutcome::Succeeded);
    assert_eq!(tracked.attempts[1].action_name, "second");
    assert_eq!(tracked.attempts[1].outcome, AttemptOutcome::Skipped);
}

#[tokio::test]
async fn test_resolve_event_data_is_persisted() {
    let store = Arc::new(MemoryStore::new());
    let (executor, _gate, _rx) = ScriptedExecutor::new();
    let dispatcher = Dispatcher::new(
        Arc::clone(&store) as _,
        executor,
        registry(&[("restart", 300)]),
        config("mend-a"),
    );

    dispatcher.process_event(&firing("f1")).await.unwrap();

    let mut resolve = resolved("f1");
    let ended = Utc::now();
    resolve.ends_at = Some(ended);
    resolve
        .labels
        .insert("severity".to_string(), "warning".to_string());

    let report = dispatcher.process_event(&resolve).await.unwrap();
    assert_eq!(report.outcome, DispatchOutcome::Resolved);

    // The terminal record carries the event's end time and refreshed labels.
    let tracked = store.get("f1").await.unwrap();
    assert_eq!(tracked.status, AlertState::Resolved);
    assert_eq!(tracked.ends_at, Some(ended));
    assert_eq!(tracked.severity.as_deref(), Some("warning"));
}

#[tokio::test]
async fn test_resolve_for_untracked_alert() {
    let store = Arc::new(MemoryStore::new());
    let (executor, _gate, _rx) = ScriptedExecutor::new();
    let dispatcher = Dispatcher::new(
        Arc::clone(&store) as _,
        executor,
        registry(&[("restart", 300)]),
        config("mend-a"),
    );

    let report = dispatcher.process_event(&resolved("ghost")).await.unwrap();
    assert_eq!(report.outcome, DispatchOutcome::UntrackedResolve);
    assert!(store.get("ghost").await.is_err());
}

#[tokio::test]
async fn test_firing_after_resolve_is_ignored() {
    let store = Arc::new(MemoryStore::new());
    let (executor, _gate, _rx) = ScriptedExecutor::new();
    let dispatcher = Dispatcher::new(
        Arc::clone(&store) as _,
        executor,
        registry(&[("restart", 300)]),
        config("mend-a"),
    );

    dispatcher.process_event(&firing("f1")).await.unwrap();
    dispatcher.process_event(&resolved("f1")).await.unwrap();

    let report = dispatcher.process_event(&firing("f1")).await.unwrap();
    assert_eq!(report.outcome, DispatchOutcome::AlreadyResolved);
    assert_eq!(
        store.get("f1").await.unwrap().status,
        AlertState::Resolved
    );
}

#[tokio::test(start_paused = true)]
async fn test_action_timeout_recorded_and_remaining_actions_run() {
    let store = Arc::new(MemoryStore::new());
    let (executor, _gate, _rx) = ScriptedExecutor::new();
    executor.script("stuck", Script::Hang);
    let dispatcher = Dispatcher::new(
        Arc::clone(&store) as _,
        executor,
        registry(&[("stuck", 1), ("cleanup", 300)]),
        config("mend-a"),
    );

    let report = dispatcher.process_event(&firing("f1")).await.unwrap();
    assert_eq!(report.outcome, DispatchOutcome::Completed);
    assert_eq!(report.attempts.len(), 2);
    assert_eq!(report.attempts[0].outcome, AttemptOutcome::TimedOut);
    assert_eq!(report.attempts[1].outcome, AttemptOutcome::Succeeded);

    let tracked = store.get("f1").await.unwrap();
    assert_eq!(tracked.status, AlertState::Remediated);
    assert!(tracked.last_error.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_failed_action_does_not_abort_sequence() {
    let store = Arc::new(MemoryStore::new());
    let (executor, _gate, _rx) = ScriptedExecutor::new();
    executor.script("broken", Script::Fail("service not found"));
    executor.script("flaky", Script::Error("connection refused"));
    let dispatcher = Dispatcher::new(
        Arc::clone(&store) as _,
        executor,
        registry(&[("broken", 300), ("flaky", 300), ("cleanup", 300)]),
        config("mend-a"),
    );

    let report = dispatcher.process_event(&firing("f1")).await.unwrap();
    assert_eq!(report.outcome, DispatchOutcome::Completed);
    let outcomes: Vec<AttemptOutcome> = report.attempts.iter().map(|a| a.outcome).collect();
    assert_eq!(
        outcomes,
        vec![
            AttemptOutcome::Failed,
            AttemptOutcome::Failed,
            AttemptOutcome::Succeeded
        ]
    );
    assert_eq!(
        report.attempts[0].error.as_deref(),
        Some("service not found")
    );

    let tracked = store.get("f1").await.unwrap();
    assert_eq!(tracked.status, AlertState::Remediated);
    assert_eq!(tracked.failed_attempts(), 2);
    assert_eq!(tracked.successful_attempts(), 1);
}

#[tokio::test]
async fn test_slot_exhaustion_queues_alert() {
    let store = Arc::new(MemoryStore::new());
    let (executor, gate, mut started) = ScriptedExecutor::new();
    executor.script("restart", Script::Gated);
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&store) as _,
        executor,
        registry(&[("restart", 300)]),
        EngineConfig {
            instance_id: "mend-a".to_string(),
            max_concurrent_remediations: 1,
            ..Default::default()
        },
    ));

    let first_task = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.process_event(&firing("f1")).await })
    };
    started.recv().await.unwrap();

    // The only slot is busy with f1.
    let report = dispatcher.process_event(&firing("f2")).await.unwrap();
    assert_eq!(report.outcome, DispatchOutcome::Queued);
    assert_eq!(store.get("f2").await.unwrap().status, AlertState::Pending);
    // The queued alert's lock was put back.
    assert!(store
        .try_acquire("f2", "other", std::time::Duration::from_secs(5))
        .await
        .unwrap());

    gate.add_permits(1);
    assert_eq!(
        first_task.await.unwrap().unwrap().outcome,
        DispatchOutcome::Completed
    );
}

#[tokio::test(start_paused = true)]
async fn test_lock_loss_skips_remaining_actions() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let (executor, gate, mut started) = ScriptedExecutor::new();
    executor.script("first", Script::Gated);
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&store) as _,
        executor,
        registry(&[("first", 300), ("second", 300)]),
        EngineConfig {
            instance_id: "mend-a".to_string(),
            lock_timeout_seconds: 3,
            ..Default::default()
        },
    ));

    let firing_task = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.process_event(&firing("f1")).await })
    };
    started.recv().await.unwrap();

    // Simulate expiry-and-steal: drop the holder's lock, let the heartbeat
    // notice, then let the in-flight action finish.
    store.release("f1", "mend-a").await.unwrap();
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    gate.add_permits(1);

    let report = firing_task.await.unwrap().unwrap();
    assert_eq!(report.outcome, DispatchOutcome::Completed);
    assert_eq!(report.attempts[0].outcome, AttemptOutcome::Succeeded);
    assert_eq!(report.attempts[1].outcome, AttemptOutcome::Skipped);
    assert!(report.attempts[1]
        .error
        .as_deref()
        .unwrap()
        .contains("lock lost"));

    // Partial completion is still terminal and reportable.
    assert_eq!(
        store.get("f1").await.unwrap().status,
        AlertState::Remediated
    );
}

#[tokio::test]
async fn test_repeat_firing_after_remediation_runs_again() {
    let store = Arc::new(MemoryStore::new());
    let (executor, _gate, _rx) = ScriptedExecutor::new();
    let dispatcher = Dispatcher::new(
        Arc::clone(&store) as _,
        executor,
        registry(&[("restart", 300)]),
        config("mend-a"),
    );

    dispatcher.process_event(&firing("f1")).await.unwrap();
    let report = dispatcher.process_event(&firing("f1")).await.unwrap();
    assert_eq!(report.outcome, DispatchOutcome::Completed);

    // Status never moved backward; both rounds of attempts are recorded.
    let tracked = store.get("f1").await.unwrap();
    assert_eq!(tracked.status, AlertState::Remediated);
    assert_eq!(tracked.total_attempts(), 2);
}

#[tokio::test]
async fn test_stats_and_list_surface_engine_state() {
    let store = Arc::new(MemoryStore::new());
    let (executor, _gate, _rx) = ScriptedExecutor::new();
    let dispatcher = Dispatcher::new(
        Arc::clone(&store) as _,
        executor,
        registry(&[("restart", 300)]),
        config("mend-a"),
    );

    dispatcher.process_event(&firing("f1")).await.unwrap();
    dispatcher.process_event(&firing("f2")).await.unwrap();
    dispatcher.process_event(&resolved("f2")).await.unwrap();

    let stats = dispatcher.stats().await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_status["remediated"], 1);
    assert_eq!(stats.by_status["resolved"], 1);

    let remediated = dispatcher
        .alerts(&ListFilter {
            status: Some(AlertState::Remediated),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(remediated.len(), 1);
    assert_eq!(remediated[0].fingerprint, "f1");

    let health = dispatcher.health_check().await;
    assert!(health.healthy);
    assert_eq!(health.handlers, 1);
}
