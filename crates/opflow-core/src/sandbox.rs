//! The sandbox seam: how source text becomes an invocable unit.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::context::ExecutionContext;
use crate::EngineError;

/// Default wall-clock bound on one invocation
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(30);

/// An isolated runtime that turns stored source text into a single
/// invocable unit and runs it against an execution context.
///
/// Implementations must expose only a minimal safe surface to the source
/// (logging sink, timers, completion primitives) and none of the host's
/// filesystem, network, process, or configuration. The timeout is a hard
/// wall-clock bound over the whole invocation; on expiry the invocation is
/// abandoned from the caller's view.
#[async_trait]
pub trait FlowSandbox: Send + Sync {
    /// Compile `source` as the body of an anonymous async callable taking
    /// the execution context, invoke it, and return the result verbatim.
    ///
    /// Fails with `CompileError` if the source does not evaluate to a
    /// callable unit, `Timeout` if the bound expires, and `ExecutionError`
    /// (original message preserved) if the flow throws.
    async fn execute(
        &self,
        source: &str,
        context: ExecutionContext,
        timeout: Duration,
    ) -> Result<Value, EngineError>;

    /// Check that `source` compiles without invoking it
    async fn validate(&self, source: &str) -> Result<(), EngineError>;
}
