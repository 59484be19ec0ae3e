//!
//! Opflow Server - HTTP surface and wiring for the Opflow platform
//!
//! This module exports all the components of the Opflow Server.

use std::sync::Arc;
use std::time::Duration;

/// API module
pub mod api;

/// Configuration module
pub mod config;

/// Error module
pub mod error;

/// Server module
pub mod server;

// Re-export key types
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::FlowServer;

use opflow_core::{
    ExecutionContextBuilder, FlowCache, FlowExecutor, FlowService, UploadService,
};
use opflow_sandbox_js::JsFlowSandbox;
use opflow_state_inmemory::InMemoryStateProvider;

/// Run function
pub async fn run(config: ServerConfig) -> ServerResult<()> {
    // Initialize logging
    init_logging(&config);

    // Build and serve
    let server = build_server(config)?;
    server.serve().await
}

/// Wire the state provider, sandbox, and services into a server.
///
/// Storage is in-memory; a persistent store slots in by swapping the
/// provider behind the same repository traits.
pub fn build_server(config: ServerConfig) -> ServerResult<FlowServer> {
    let provider = InMemoryStateProvider::new(&config.entities);
    tracing::info!(
        entities = config.entities.len(),
        "Using in-memory state store"
    );

    let flows = provider.flow_repository();
    let cache = Arc::new(FlowCache::new());
    let sandbox = Arc::new(JsFlowSandbox::default());
    let contexts =
        ExecutionContextBuilder::new(provider.entity_registry(), provider.transaction_manager());

    let executor = FlowExecutor::with_timeout(
        flows.clone(),
        cache.clone(),
        sandbox,
        contexts,
        Duration::from_secs(config.flow_timeout_secs),
    );
    let flow_service = FlowService::new(flows.clone(), cache.clone());
    let upload_service = UploadService::new(flows, cache);

    Ok(FlowServer::new(
        config,
        flow_service,
        upload_service,
        executor,
    ))
}

/// Initialize logging
fn init_logging(config: &ServerConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    // Create filter based on config
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    // Initialize subscriber
    fmt().with_env_filter(filter).with_target(true).init();
}
