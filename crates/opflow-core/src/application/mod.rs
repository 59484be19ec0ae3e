//! Application services: flow CRUD, execution orchestration, and upload
//! reconciliation.

/// Flow execution orchestrator
pub mod executor;

/// Flow CRUD and cache management
pub mod flow_service;

/// Upload/publish reconciliation
pub mod upload_service;
