use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::FlowCache;
use crate::context::ExecutionContextBuilder;
use crate::domain::repository::FlowRepository;
use crate::sandbox::{FlowSandbox, DEFAULT_EXECUTION_TIMEOUT};
use crate::types::{Actor, FlowKey};
use crate::EngineError;

/// Orchestrates one flow invocation: resolve, refresh the cache, build the
/// context, invoke inside the sandbox, report result or categorized failure.
///
/// There are no automatic retries; a failed invocation is reported to the
/// caller, who decides whether to resubmit.
pub struct FlowExecutor {
    /// Durable flow store
    flows: Arc<dyn FlowRepository>,

    /// Process-local source cache
    cache: Arc<FlowCache>,

    /// Sandboxed runtime
    sandbox: Arc<dyn FlowSandbox>,

    /// Builder for per-invocation contexts
    contexts: ExecutionContextBuilder,

    /// Wall-clock bound per invocation
    timeout: Duration,
}

impl FlowExecutor {
    /// Create an executor with the default timeout
    pub fn new(
        flows: Arc<dyn FlowRepository>,
        cache: Arc<FlowCache>,
        sandbox: Arc<dyn FlowSandbox>,
        contexts: ExecutionContextBuilder,
    ) -> Self {
        Self::with_timeout(flows, cache, sandbox, contexts, DEFAULT_EXECUTION_TIMEOUT)
    }

    /// Create an executor with an explicit timeout
    pub fn with_timeout(
        flows: Arc<dyn FlowRepository>,
        cache: Arc<FlowCache>,
        sandbox: Arc<dyn FlowSandbox>,
        contexts: ExecutionContextBuilder,
        timeout: Duration,
    ) -> Self {
        Self {
            flows,
            cache,
            sandbox,
            contexts,
            timeout,
        }
    }

    /// Run a flow by key with the given parameters and optional actor.
    ///
    /// Returns the flow's result verbatim, or the categorized error
    /// (`FlowNotFound` / `CompileError` / `Timeout` / `ExecutionError`).
    pub async fn run(
        &self,
        key: &FlowKey,
        params: Value,
        actor: Option<Actor>,
    ) -> Result<Value, EngineError> {
        tracing::info!(flow_key = %key, "Executing flow");

        let flow = self
            .flows
            .find_by_key(key)
            .await?
            .filter(|flow| flow.enabled)
            .ok_or_else(|| {
                EngineError::FlowNotFound(format!("{} (missing or disabled)", key))
            })?;

        // Stale or absent entries fall back to the store's current source;
        // the entry is re-stamped only once the source proved compilable.
        let (source, refresh) = match self.cache.lookup(key, flow.updated_at) {
            Some(source) => (source, false),
            None => (flow.source.clone(), true),
        };

        let context = self.contexts.build(params, actor);

        match self.sandbox.execute(&source, context, self.timeout).await {
            Ok(result) => {
                if refresh {
                    self.cache.store(key, &source, flow.updated_at);
                }
                tracing::info!(flow_key = %key, "Flow execution succeeded");
                Ok(result)
            }
            Err(err) => {
                // A CompileError never populates the cache, so a fixed and
                // resaved flow is retried fresh on the very next call.
                if refresh && !matches!(err, EngineError::CompileError(_)) {
                    self.cache.store(key, &source, flow.updated_at);
                }
                tracing::error!(flow_key = %key, error = %err, "Flow execution failed");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::context::ExecutionContext;
    use crate::domain::flow::{FlowPatch, NewFlow};
    use crate::domain::repository::memory::{memory_registry, MemoryFlowRepository};

    /// Sandbox double: echoes the source it was asked to run and counts
    /// invocations, or fails with a canned error.
    struct RecordingSandbox {
        executions: AtomicUsize,
        failure: Option<EngineError>,
    }

    impl RecordingSandbox {
        fn ok() -> Self {
            Self {
                executions: AtomicUsize::new(0),
                failure: None,
            }
        }

        fn failing(err: EngineError) -> Self {
            Self {
                executions: AtomicUsize::new(0),
                failure: Some(err),
            }
        }
    }

    #[async_trait]
    impl FlowSandbox for RecordingSandbox {
        async fn execute(
            &self,
            source: &str,
            context: ExecutionContext,
            _timeout: Duration,
        ) -> Result<Value, EngineError> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            match &self.failure {
                Some(err) => Err(err.clone()),
                None => Ok(json!({ "source": source, "params": context.params })),
            }
        }

        async fn validate(&self, _source: &str) -> Result<(), EngineError> {
            Ok(())
        }
    }

    struct Fixture {
        flows: Arc<MemoryFlowRepository>,
        cache: Arc<FlowCache>,
    }

    fn executor(sandbox: Arc<dyn FlowSandbox>) -> (FlowExecutor, Fixture) {
        let flows = Arc::new(MemoryFlowRepository::new());
        let cache = Arc::new(FlowCache::new());
        let (registry, tx) = memory_registry(&["customer"]);
        let exec = FlowExecutor::new(
            flows.clone(),
            cache.clone(),
            sandbox,
            ExecutionContextBuilder::new(registry, tx),
        );
        (exec, Fixture { flows, cache })
    }

    async fn seed(flows: &MemoryFlowRepository, key: &str, source: &str) {
        flows
            .create(NewFlow {
                key: FlowKey::from(key),
                name: key.to_string(),
                category: None,
                description: None,
                source: source.to_string(),
                enabled: true,
                created_by: None,
                remark: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_unknown_flow_is_not_found() {
        let (exec, _fx) = executor(Arc::new(RecordingSandbox::ok()));

        let result = exec.run(&FlowKey::from("nope"), json!({}), None).await;
        assert!(matches!(result, Err(EngineError::FlowNotFound(_))));
    }

    #[tokio::test]
    async fn test_run_disabled_flow_is_not_found() {
        let (exec, fx) = executor(Arc::new(RecordingSandbox::ok()));
        seed(&fx.flows, "k1", "return 1;").await;
        fx.flows
            .set_enabled(&FlowKey::from("k1"), false)
            .await
            .unwrap();

        let result = exec.run(&FlowKey::from("k1"), json!({}), None).await;
        assert!(matches!(result, Err(EngineError::FlowNotFound(_))));
    }

    #[tokio::test]
    async fn test_run_populates_cache_and_reuses_entry() {
        let sandbox = Arc::new(RecordingSandbox::ok());
        let (exec, fx) = executor(sandbox.clone());
        seed(&fx.flows, "k1", "return 1;").await;

        exec.run(&FlowKey::from("k1"), json!({}), None).await.unwrap();
        assert_eq!(fx.cache.len(), 1);

        // Second run hits the cache: the stored source is still served
        let result = exec.run(&FlowKey::from("k1"), json!({}), None).await.unwrap();
        assert_eq!(result["source"], json!("return 1;"));
        assert_eq!(sandbox.executions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_update_invalidates_cached_source() {
        let (exec, fx) = executor(Arc::new(RecordingSandbox::ok()));
        seed(&fx.flows, "k1", "return 1;").await;

        let before = exec.run(&FlowKey::from("k1"), json!({}), None).await.unwrap();
        assert_eq!(before["source"], json!("return 1;"));

        let updated = fx
            .flows
            .update(
                &FlowKey::from("k1"),
                FlowPatch {
                    source: Some("return 2;".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // The store timestamp strictly advanced past the cache stamp
        let cached_stamp = fx
            .flows
            .find_by_key(&FlowKey::from("k1"))
            .await
            .unwrap()
            .unwrap()
            .updated_at;
        assert_eq!(updated.updated_at, cached_stamp);

        let after = exec.run(&FlowKey::from("k1"), json!({}), None).await.unwrap();
        assert_eq!(after["source"], json!("return 2;"));
    }

    #[tokio::test]
    async fn test_compile_error_never_populates_cache() {
        let (exec, fx) = executor(Arc::new(RecordingSandbox::failing(
            EngineError::CompileError("unexpected token".to_string()),
        )));
        seed(&fx.flows, "k1", "syntax error here").await;

        let result = exec.run(&FlowKey::from("k1"), json!({}), None).await;
        assert!(matches!(result, Err(EngineError::CompileError(_))));
        assert!(fx.cache.is_empty());
    }

    #[tokio::test]
    async fn test_execution_error_still_caches_compiled_source() {
        let (exec, fx) = executor(Arc::new(RecordingSandbox::failing(
            EngineError::ExecutionError("boom".to_string()),
        )));
        seed(&fx.flows, "k1", "throw new Error('boom');").await;

        let result = exec.run(&FlowKey::from("k1"), json!({}), None).await;
        assert!(matches!(result, Err(EngineError::ExecutionError(_))));
        assert_eq!(fx.cache.len(), 1);
    }

    #[tokio::test]
    async fn test_params_reach_sandbox_verbatim() {
        let (exec, fx) = executor(Arc::new(RecordingSandbox::ok()));
        seed(&fx.flows, "k1", "return context.params;").await;

        let params = json!({ "x": 41, "label": "don't validate me" });
        let result = exec
            .run(&FlowKey::from("k1"), params.clone(), None)
            .await
            .unwrap();

        assert_eq!(result["params"], params);
    }
}
