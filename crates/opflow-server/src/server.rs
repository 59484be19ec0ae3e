//! The Opflow server: services wired together behind one facade.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

use opflow_core::{
    Actor, CreateFlowRequest, Flow, FlowExecutor, FlowFilter, FlowKey, FlowPatch, FlowService,
    FlowSummary, UploadOutcome, UploadRecord, UploadService,
};

use crate::api;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};

/// Facade over the engine services, shared as router state
pub struct FlowServer {
    config: ServerConfig,
    flows: FlowService,
    uploads: UploadService,
    executor: FlowExecutor,
}

impl FlowServer {
    /// Create a server from its wired services
    pub fn new(
        config: ServerConfig,
        flows: FlowService,
        uploads: UploadService,
        executor: FlowExecutor,
    ) -> Self {
        Self {
            config,
            flows,
            uploads,
            executor,
        }
    }

    /// Server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Execute a flow
    pub async fn run_flow(
        &self,
        key: &FlowKey,
        params: Value,
        actor: Option<Actor>,
    ) -> ServerResult<Value> {
        Ok(self.executor.run(key, params, actor).await?)
    }

    /// List flow metadata
    pub async fn list_flows(&self, filter: &FlowFilter) -> ServerResult<Vec<FlowSummary>> {
        Ok(self.flows.list(filter).await?)
    }

    /// Full flow record
    pub async fn get_flow(&self, key: &FlowKey) -> ServerResult<Flow> {
        Ok(self.flows.get(key).await?)
    }

    /// Create a flow
    pub async fn create_flow(&self, request: CreateFlowRequest) -> ServerResult<Flow> {
        Ok(self.flows.create(request).await?)
    }

    /// Update a flow
    pub async fn update_flow(&self, key: &FlowKey, patch: FlowPatch) -> ServerResult<Flow> {
        Ok(self.flows.update(key, patch).await?)
    }

    /// Soft delete a flow
    pub async fn soft_delete_flow(&self, key: &FlowKey) -> ServerResult<()> {
        Ok(self.flows.soft_delete(key).await?)
    }

    /// Evict one cache entry, or everything
    pub fn evict_cache(&self, key: Option<&FlowKey>) {
        self.flows.evict_cache(key)
    }

    /// Record a publish time without advancing the optimistic lock
    pub async fn update_publish_status(
        &self,
        key: &FlowKey,
        published_at: DateTime<Utc>,
    ) -> ServerResult<()> {
        Ok(self.flows.update_publish_status(key, published_at).await?)
    }

    /// Reconcile an externally authored upload
    pub async fn reconcile_upload(&self, record: UploadRecord) -> ServerResult<UploadOutcome> {
        Ok(self.uploads.reconcile(record).await?)
    }

    /// Check the shared secret presented by the authoring tool
    pub fn validate_upload_secret(&self, provided: Option<&str>) -> ServerResult<()> {
        let expected = self.config.upload_access_secret.as_deref().ok_or_else(|| {
            ServerError::Unauthorized(
                "Server has no UPLOAD_ACCESS_SECRET configured; contact an administrator"
                    .to_string(),
            )
        })?;

        match provided {
            Some(provided) if provided == expected => Ok(()),
            _ => Err(ServerError::Unauthorized(
                "Invalid access secret".to_string(),
            )),
        }
    }

    /// Bind and serve the HTTP API until the process stops
    pub async fn serve(self) -> ServerResult<()> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let router = api::build_router(Arc::new(self));

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::InternalError(format!("Failed to bind {}: {}", addr, e)))?;

        tracing::info!(%addr, "Opflow server listening");

        axum::serve(listener, router)
            .await
            .map_err(|e| ServerError::InternalError(format!("Server error: {}", e)))
    }
}
