//! Domain layer: the flow entity, persistence traits, and key generation.

/// Flow entity and its projections
pub mod flow;

/// Flow key generation
pub mod key;

/// Persistence traits and in-memory test doubles
pub mod repository;
