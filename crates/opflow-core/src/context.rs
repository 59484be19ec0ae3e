//! Execution context: the ephemeral bundle handed into one flow invocation.

use serde_json::Value;
use std::sync::Arc;

use crate::domain::repository::{EntityRegistry, TransactionManager};
use crate::types::Actor;

/// Everything one invocation may touch: the entity-repository registry, a
/// unit-of-work handle, the caller's parameters verbatim, and the optional
/// authenticated actor. Never persisted; one per invocation.
#[derive(Clone)]
pub struct ExecutionContext {
    /// Repository registry keyed by entity name
    pub repositories: Arc<EntityRegistry>,

    /// Unit-of-work handle for multi-step atomic writes, if the flow wants
    /// one; the flow is responsible for commit/rollback
    pub transactions: Arc<dyn TransactionManager>,

    /// Caller parameters, passed through without validation. The flow must
    /// validate its own input.
    pub params: Value,

    /// Authenticated caller, when the host knows one
    pub actor: Option<Actor>,
}

/// Builds execution contexts from the long-lived handles.
///
/// Construction is pure and cannot fail; the builder just pairs the shared
/// handles with the per-invocation inputs.
#[derive(Clone)]
pub struct ExecutionContextBuilder {
    repositories: Arc<EntityRegistry>,
    transactions: Arc<dyn TransactionManager>,
}

impl ExecutionContextBuilder {
    /// Create a builder over the host's registry and transaction manager
    pub fn new(
        repositories: Arc<EntityRegistry>,
        transactions: Arc<dyn TransactionManager>,
    ) -> Self {
        Self {
            repositories,
            transactions,
        }
    }

    /// Assemble one context for one invocation
    pub fn build(&self, params: Value, actor: Option<Actor>) -> ExecutionContext {
        ExecutionContext {
            repositories: self.repositories.clone(),
            transactions: self.transactions.clone(),
            params,
            actor,
        }
    }
}
