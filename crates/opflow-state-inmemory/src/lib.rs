//! In-memory state store implementation for the Opflow platform
//!
//! This crate provides in-memory implementations of the persistence traits
//! defined in the opflow-core crate. It is primarily useful for
//! development, testing, and simple deployments where persistence is not
//! required.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub mod repositories;
pub use repositories::{
    InMemoryEntityRepository, InMemoryFlowRepository, InMemoryTransactionManager,
};

use opflow_core::{
    EntityRegistry, Flow, FlowRepository, TransactionManager,
};

/// Provider for in-memory state store repositories.
///
/// Constructed once with the host's domain entity names; every handle it
/// hands out shares the same underlying storage, so flows, services, and
/// tests all observe one consistent state.
pub struct InMemoryStateProvider {
    // Shared storage for flow rows
    flows: Arc<RwLock<HashMap<String, Flow>>>,

    // One store per domain entity, keyed by entity name
    entities: Vec<(String, Arc<InMemoryEntityRepository>)>,
}

impl InMemoryStateProvider {
    /// Create a provider exposing the given domain entities
    pub fn new<S: AsRef<str>>(entity_names: &[S]) -> Self {
        let entities = entity_names
            .iter()
            .map(|name| {
                (
                    name.as_ref().to_string(),
                    Arc::new(InMemoryEntityRepository::new()),
                )
            })
            .collect();

        Self {
            flows: Arc::new(RwLock::new(HashMap::new())),
            entities,
        }
    }

    /// Flow store handle
    pub fn flow_repository(&self) -> Arc<dyn FlowRepository> {
        Arc::new(InMemoryFlowRepository::new(self.flows.clone()))
    }

    /// Registry of entity repositories, keyed by entity name
    pub fn entity_registry(&self) -> Arc<EntityRegistry> {
        let mut registry = EntityRegistry::new();
        for (name, store) in &self.entities {
            registry.register(name.clone(), store.clone());
        }
        Arc::new(registry)
    }

    /// Unit-of-work handle over every entity store
    pub fn transaction_manager(&self) -> Arc<dyn TransactionManager> {
        Arc::new(InMemoryTransactionManager::new(self.entities.clone()))
    }

    /// Direct handle to one entity store (test seeding)
    pub fn entity_store(&self, name: &str) -> Option<Arc<InMemoryEntityRepository>> {
        self.entities
            .iter()
            .find(|(entity, _)| entity == name)
            .map(|(_, store)| store.clone())
    }
}

#[cfg(test)]
mod tests;
