//! Sandboxed execution of stored flow source using boa_engine.
//!
//! Each invocation gets a fresh engine context on a blocking thread: the
//! source is wrapped as the body of an anonymous async function taking
//! `context`, compiled, and invoked against a context object assembled
//! from the execution context. Results and errors travel as JSON strings,
//! never as engine handles. The wall-clock timeout is enforced outside the
//! engine; a loop-iteration limit inside the engine reaps abandoned
//! workers that would otherwise spin forever.

use std::time::Duration;

use async_trait::async_trait;
use boa_engine::{Context, Source};
use serde_json::Value;

use opflow_core::{EngineError, ExecutionContext, FlowSandbox};

use crate::bridge::{self, BridgeGuard, HostBridge};

/// Sandbox configuration
#[derive(Clone, Debug)]
pub struct JsSandboxConfig {
    /// Max source length (bytes)
    pub max_source_len: usize,

    /// Engine-level backstop for runaway synchronous loops. This is not
    /// the invocation timeout; it bounds how long an abandoned worker can
    /// keep spinning after the caller has already given up.
    pub loop_iteration_limit: u64,
}

impl Default for JsSandboxConfig {
    fn default() -> Self {
        Self {
            max_source_len: 1_000_000, // 1MB
            loop_iteration_limit: 100_000_000,
        }
    }
}

/// JavaScript flow sandbox backed by boa_engine
pub struct JsFlowSandbox {
    config: JsSandboxConfig,
}

impl JsFlowSandbox {
    /// Create a sandbox with the given configuration
    pub fn new(config: JsSandboxConfig) -> Self {
        Self { config }
    }
}

impl Default for JsFlowSandbox {
    fn default() -> Self {
        Self::new(JsSandboxConfig::default())
    }
}

#[async_trait]
impl FlowSandbox for JsFlowSandbox {
    async fn execute(
        &self,
        source: &str,
        context: ExecutionContext,
        timeout: Duration,
    ) -> Result<Value, EngineError> {
        if source.len() > self.config.max_source_len {
            return Err(EngineError::CompileError(format!(
                "Source too large ({} bytes, limit {})",
                source.len(),
                self.config.max_source_len
            )));
        }

        let config = self.config.clone();
        let source = source.to_string();
        let runtime = tokio::runtime::Handle::current();

        // boa is synchronous; run it on a blocking thread and bound the
        // whole invocation, including suspended store calls, from here.
        let task =
            tokio::task::spawn_blocking(move || run_isolated(&config, &source, context, runtime));

        match tokio::time::timeout(timeout, task).await {
            Err(_) => {
                // The worker is abandoned from the caller's view; the
                // loop-iteration limit reaps it if it never yields.
                Err(EngineError::Timeout(timeout))
            }
            Ok(Err(join_err)) => Err(EngineError::Internal(format!(
                "Sandbox task failed: {}",
                join_err
            ))),
            Ok(Ok(result)) => result,
        }
    }

    async fn validate(&self, source: &str) -> Result<(), EngineError> {
        if source.len() > self.config.max_source_len {
            return Err(EngineError::CompileError(format!(
                "Source too large ({} bytes, limit {})",
                source.len(),
                self.config.max_source_len
            )));
        }

        let source = source.to_string();
        tokio::task::spawn_blocking(move || {
            let mut context = Context::default();
            compile_flow(&mut context, &source)
        })
        .await
        .map_err(|e| EngineError::Internal(format!("Sandbox task failed: {}", e)))?
    }
}

/// Program that invokes the compiled flow and captures its settlement
const RUNNER: &str = r#"
var __outcome;
__flow(__ctx).then(
    function (value) {
        try {
            __outcome = JSON.stringify({ status: "ok", value: value === undefined ? null : value });
        } catch (err) {
            __outcome = JSON.stringify({
                status: "error",
                message: "Flow result is not serializable: " + String(err && err.message ? err.message : err)
            });
        }
    },
    function (err) {
        __outcome = JSON.stringify({
            status: "error",
            message: (err && err.message !== undefined) ? String(err.message) : String(err)
        });
    }
);
"#;

fn run_isolated(
    config: &JsSandboxConfig,
    source: &str,
    exec: ExecutionContext,
    runtime: tokio::runtime::Handle,
) -> Result<Value, EngineError> {
    let _bridge = BridgeGuard::install(HostBridge {
        context: exec.clone(),
        runtime,
    });

    let mut context = Context::default();
    context
        .runtime_limits_mut()
        .set_loop_iteration_limit(config.loop_iteration_limit);

    bridge::register_host_functions(&mut context).map_err(|e| {
        EngineError::Internal(format!("Failed to register host functions: {}", e))
    })?;

    context
        .eval(Source::from_bytes(bridge::PRELUDE))
        .map_err(|e| EngineError::Internal(format!("Failed to evaluate sandbox prelude: {}", e)))?;

    compile_flow(&mut context, source)?;

    let params_json = serde_json::to_string(&exec.params)?;
    let actor_json = serde_json::to_string(&exec.actor)?;
    let entities_json = serde_json::to_string(&exec.repositories.entity_names())?;

    let assemble = format!(
        "var __ctx = __makeContext(JSON.parse('{}'), JSON.parse('{}'), JSON.parse('{}'));",
        escape_single_quoted(&params_json),
        escape_single_quoted(&actor_json),
        escape_single_quoted(&entities_json),
    );
    context
        .eval(Source::from_bytes(&assemble))
        .map_err(|e| EngineError::Internal(format!("Failed to assemble context: {}", e)))?;

    // Synchronous throws inside the async body surface as a rejected
    // promise; a thrown runtime-limit abort surfaces here instead.
    context
        .eval(Source::from_bytes(RUNNER))
        .map_err(|e| EngineError::ExecutionError(e.to_string()))?;

    let _ = context.run_jobs();

    let outcome = context
        .eval(Source::from_bytes("__outcome"))
        .map_err(|e| EngineError::Internal(format!("Failed to read outcome: {}", e)))?;

    let outcome = match outcome.as_string().map(|s| s.to_std_string_escaped()) {
        Some(outcome) => outcome,
        None => {
            return Err(EngineError::ExecutionError(
                "Flow did not settle; asynchronous work must complete within the invocation"
                    .to_string(),
            ))
        }
    };

    let report: Value = serde_json::from_str(&outcome)?;
    match report.get("status").and_then(Value::as_str) {
        Some("ok") => Ok(report.get("value").cloned().unwrap_or(Value::Null)),
        Some("error") => Err(EngineError::ExecutionError(
            report
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown flow error")
                .to_string(),
        )),
        _ => Err(EngineError::Internal(
            "Malformed sandbox outcome".to_string(),
        )),
    }
}

fn compile_flow(context: &mut Context, source: &str) -> Result<(), EngineError> {
    let wrapped = format!(
        "var __flow = (async function (context) {{\n{}\n}});",
        source
    );
    context
        .eval(Source::from_bytes(&wrapped))
        .map_err(|e| EngineError::CompileError(e.to_string()))?;

    let callable = context
        .eval(Source::from_bytes("typeof __flow === \"function\""))
        .map_err(|e| EngineError::Internal(format!("Failed to inspect compiled flow: {}", e)))?;
    if !callable.as_boolean().unwrap_or(false) {
        return Err(EngineError::CompileError(
            "Flow source did not produce a callable unit".to_string(),
        ));
    }

    Ok(())
}

/// Escape a JSON document for embedding inside a single-quoted JS literal
fn escape_single_quoted(json: &str) -> String {
    json.replace('\\', "\\\\").replace('\'', "\\'")
}

// ================================
// Tests
// ================================
