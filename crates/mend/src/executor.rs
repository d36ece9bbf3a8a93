//! Action executor adapter: boundary call to the external automation API.
//!
//! The engine only needs `execute` and a health probe; everything else about
//! the executor is opaque. The shipped `HttpExecutor` targets an
//! executions-style REST API: submit an execution, then poll it to a
//! terminal status unless the action is fire-and-forget.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::action::{ExecutionOutcome, RemediationAction};
use crate::config::EngineConfig;

/// How often the HTTP executor polls a running execution.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Statuses the executor API reports as terminal.
const TERMINAL_STATUSES: &[&str] = &["succeeded", "failed", "timeout", "abandoned", "canceled"];

/// Errors from the executor adapter.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The executor API rejected the request or returned an error status.
    #[error("executor API error: {0}")]
    Api(String),

    /// The request could not be delivered.
    #[error("executor request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Boundary to the external automation executor.
///
/// Must be safe to call concurrently for different actions.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Execute one action to a terminal outcome.
    ///
    /// Implementations must respect the action's `timeout_seconds`; the
    /// dispatcher additionally bounds the call and records a breach as a
    /// timed-out attempt.
    async fn execute(
        &self,
        action: &RemediationAction,
    ) -> std::result::Result<ExecutionOutcome, ExecutorError>;

    /// Whether the executor API is reachable.
    async fn health_check(&self) -> bool;
}

/// HTTP implementation of the executor adapter.
pub struct HttpExecutor {
    base_url: String,
    api_key: String,
    auth_token: String,
    client: reqwest::Client,
}

impl HttpExecutor {
    /// Create an executor client from engine configuration.
    ///
    /// # Errors
    /// Returns a transport error if the HTTP client cannot be built.
    pub fn new(config: &EngineConfig) -> std::result::Result<Self, ExecutorError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!config.executor_verify_ssl)
            .build()?;
        Ok(Self {
            base_url: config.executor_url.trim_end_matches('/').to_string(),
            api_key: config.executor_api_key.clone(),
            auth_token: config.executor_auth_token.clone(),
            client,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if !self.api_key.is_empty() {
            request.header("X-Api-Key", &self.api_key)
        } else if !self.auth_token.is_empty() {
            request.header("X-Auth-Token", &self.auth_token)
        } else {
            request
        }
    }

    /// Submit an execution and return its id.
    async fn submit(
        &self,
        action: &RemediationAction,
    ) -> std::result::Result<String, ExecutorError> {
        let payload = json!({
            "action": action.action,
            "parameters": action.parameters,
        });

        let response = self
            .authorize(self.client.post(format!("{}/v1/executions", self.base_url)))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutorError::Api(format!(
                "execution submit returned {status}: {body}"
            )));
        }

        let body: Value = response.json().await?;
        let id = body
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        info!("Execution started: action={} id={id}", action.action);
        Ok(id)
    }

    /// Fetch current execution state.
    async fn get_execution(&self, id: &str) -> std::result::Result<Value, ExecutorError> {
        let response = self
            .authorize(
                self.client
                    .get(format!("{}/v1/executions/{id}", self.base_url)),
            )
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExecutorError::Api(format!(
                "execution {id} query returned {status}"
            )));
        }
        Ok(response.json().await?)
    }

    /// Poll an execution until it reaches a terminal status.
    async fn wait_for_execution(
        &self,
        id: &str,
        timeout: Duration,
    ) -> std::result::Result<Value, ExecutorError> {
        let mut elapsed = Duration::ZERO;
        loop {
            let execution = self.get_execution(id).await?;
            let status = execution
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if TERMINAL_STATUSES.contains(&status) {
                return Ok(execution);
            }

            if elapsed >= timeout {
                return Err(ExecutorError::Api(format!(
                    "execution {id} did not complete within {}s",
                    timeout.as_secs()
                )));
            }
            debug!("Execution {id} still {status}, polling");
            tokio::time::sleep(POLL_INTERVAL).await;
            elapsed += POLL_INTERVAL;
        }
    }
}

#[async_trait]
impl ActionExecutor for HttpExecutor {
    async fn execute(
        &self,
        action: &RemediationAction,
    ) -> std::result::Result<ExecutionOutcome, ExecutorError> {
        let id = self.submit(action).await?;

        // Fire-and-forget: submission accepted is success.
        if action.timeout_seconds == 0 {
            return Ok(ExecutionOutcome::succeeded(Some(id)));
        }

        let execution = self
            .wait_for_execution(&id, Duration::from_secs(action.timeout_seconds))
            .await?;
        let status = execution
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default();

        if status == "succeeded" {
            Ok(ExecutionOutcome::succeeded(Some(id)))
        } else {
            let detail = execution
                .pointer("/result/stderr")
                .and_then(Value::as_str)
                .map_or_else(|| format!("execution {status}"), ToString::to_string);
            Ok(ExecutionOutcome::failed(Some(id), &detail))
        }
    }

    async fn health_check(&self) -> bool {
        let result = self
            .authorize(self.client.get(format!("{}/v1/actions", self.base_url)))
            .query(&[("limit", "1")])
            .send()
            .await;
        match result {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                error!("Executor health check failed: {err}");
                false
            }
        }
    }
}
