//!
//! Opflow Core - Core engine for the Opflow platform
//!
//! This crate defines the flow entity, the persistence seams, the
//! compiled-flow cache, the execution context, and the application services
//! that orchestrate storing and running operator-authored flows. Sandbox
//! and storage implementations live in sibling crates.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - the flow entity, persistence traits, key generation
pub mod domain;

/// Application services - CRUD, execution, upload reconciliation
pub mod application;

/// Compiled-flow cache
pub mod cache;

/// Execution context assembly
pub mod context;

/// Error types
pub mod error;

/// Sandbox trait
pub mod sandbox;

/// Shared value types
pub mod types;

// Re-export key types
pub use cache::{CacheEntry, FlowCache};
pub use context::{ExecutionContext, ExecutionContextBuilder};
pub use error::EngineError;
pub use sandbox::{FlowSandbox, DEFAULT_EXECUTION_TIMEOUT};
pub use types::{format_timestamp, Actor, FlowKey};

// Domain types
pub use domain::flow::{Flow, FlowFilter, FlowPatch, FlowSummary, NewFlow};
pub use domain::key::{KeyGenerator, KEY_LENGTH, MAX_KEY_ATTEMPTS};
pub use domain::repository::{
    EntityRegistry, EntityRepository, FlowRepository, TransactionManager,
};

// Application services
pub use application::executor::FlowExecutor;
pub use application::flow_service::{CreateFlowRequest, FlowService};
pub use application::upload_service::{
    UploadConflict, UploadOutcome, UploadReceipt, UploadRecord, UploadService, MAX_UPLOAD_AGE,
};
