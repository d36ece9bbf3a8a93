//! Alert remediation engine.
//!
//! Mend turns alert events into remediation: it tracks each alert through a
//! forward-only lifecycle, matches it against registered handlers, and
//! dispatches the matched actions to an external automation executor while
//! coordinating with other engine instances through per-alert distributed
//! locks in a shared store.
//!
//! The crate is transport-agnostic: callers feed parsed [`AlertEvent`]s to a
//! [`Dispatcher`] and expose the read-only query surface however they like.
//!
//! ```no_run
//! use std::sync::Arc;
//! use mend::{
//!     register_builtin_handlers, Dispatcher, EngineConfig, HandlerRegistry, HttpExecutor,
//!     MemoryStore,
//! };
//!
//! # fn main() -> mend::Result<()> {
//! let config = EngineConfig::from_env();
//! let mut registry = HandlerRegistry::new();
//! register_builtin_handlers(&mut registry);
//!
//! let dispatcher = Dispatcher::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(HttpExecutor::new(&config)?),
//!     registry,
//!     config,
//! );
//! # let _ = dispatcher;
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod alert;
pub mod conditions;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod store;
pub mod template;

pub use action::{ExecutionOutcome, RemediationAction};
pub use alert::{
    AlertEvent, AlertEventStatus, AlertState, AlertStats, AttemptOutcome, ListFilter,
    RemediationAttempt, TrackedAlert,
};
pub use conditions::{ActionConditions, SeverityCondition};
pub use config::EngineConfig;
pub use dispatch::{DispatchOutcome, DispatchReport, Dispatcher, EngineHealth};
pub use error::{EngineError, Result};
pub use executor::{ActionExecutor, ExecutorError, HttpExecutor};
pub use handlers::{register_builtin_handlers, Handler, HandlerRegistry, YamlMappingHandler};
pub use store::{AlertStore, LockManager, MemoryStore, RedisStore, StateStore};
pub use template::TemplateRenderer;
