//! Repository traits for the Opflow engine
//!
//! This module defines the persistence seams the engine runs against.
//! External crates implement these traits to provide real storage; the
//! `memory` module provides lightweight doubles for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::flow::{Flow, FlowFilter, FlowPatch, FlowSummary, NewFlow};
use crate::types::FlowKey;
use crate::EngineError;

/// Durable store of flow rows
#[async_trait]
pub trait FlowRepository: Send + Sync {
    /// Persist a new flow; fails with `Conflict` if the key already exists.
    /// Returns the stored row with server timestamps.
    async fn create(&self, flow: NewFlow) -> Result<Flow, EngineError>;

    /// Find a flow by key
    async fn find_by_key(&self, key: &FlowKey) -> Result<Option<Flow>, EngineError>;

    /// Check whether a key is taken
    async fn exists(&self, key: &FlowKey) -> Result<bool, EngineError>;

    /// Merge a partial update into an existing flow; fails with
    /// `FlowNotFound` if absent. Advances `updated_at` as a side effect.
    async fn update(&self, key: &FlowKey, patch: FlowPatch) -> Result<Flow, EngineError>;

    /// Flip the enabled flag; `set_enabled(key, false)` is the soft delete
    async fn set_enabled(&self, key: &FlowKey, enabled: bool) -> Result<(), EngineError>;

    /// Record the publish time without touching `updated_at`
    async fn set_published_at(
        &self,
        key: &FlowKey,
        published_at: DateTime<Utc>,
    ) -> Result<(), EngineError>;

    /// List metadata only (no source text), ordered by category then key
    async fn list(&self, filter: &FlowFilter) -> Result<Vec<FlowSummary>, EngineError>;
}

/// Async repository over one domain aggregate, handed to flows at run time.
///
/// Records are plain JSON. Queries are a JSON object of the shape
/// `{ "where": { field: value, ... }, "order": [field, "ASC"|"DESC"],
/// "limit": n, "offset": n }`; matching is field equality.
#[async_trait]
pub trait EntityRepository: Send + Sync {
    /// Find all records matching the query
    async fn find(&self, query: &Value) -> Result<Vec<Value>, EngineError>;

    /// Find the first record matching the query
    async fn find_one(&self, query: &Value) -> Result<Option<Value>, EngineError>;

    /// Insert or update a record; assigns an `id` field when absent.
    /// Returns the stored record.
    async fn save(&self, record: Value) -> Result<Value, EngineError>;

    /// Delete records matching the query; returns the number removed
    async fn remove(&self, query: &Value) -> Result<u64, EngineError>;

    /// Count records matching the query
    async fn count(&self, query: &Value) -> Result<u64, EngineError>;
}

/// Unit-of-work handle spanning multiple repository calls.
///
/// A flow that begins a transaction is responsible for committing or
/// rolling it back; the engine never does so on its behalf.
#[async_trait]
pub trait TransactionManager: Send + Sync {
    /// Open a transaction
    async fn begin(&self) -> Result<(), EngineError>;

    /// Commit the open transaction
    async fn commit(&self) -> Result<(), EngineError>;

    /// Roll back the open transaction
    async fn rollback(&self) -> Result<(), EngineError>;
}

/// Lookup table of entity repositories, keyed by entity name.
///
/// Built once at startup and injected; adding a domain entity means one
/// `register` call rather than a new constructor parameter.
#[derive(Default)]
pub struct EntityRegistry {
    repositories: HashMap<String, Arc<dyn EntityRepository>>,
}

impl EntityRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a repository under an entity name
    pub fn register(&mut self, name: impl Into<String>, repository: Arc<dyn EntityRepository>) {
        self.repositories.insert(name.into(), repository);
    }

    /// Look up a repository by entity name
    pub fn get(&self, name: &str) -> Option<Arc<dyn EntityRepository>> {
        self.repositories.get(name).cloned()
    }

    /// All registered entity names, sorted for deterministic exposure
    pub fn entity_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.repositories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered entities
    pub fn len(&self) -> usize {
        self.repositories.len()
    }

    /// True if no entity is registered
    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }
}

/// Memory implementations for testing
#[cfg(feature = "testing")]
pub mod memory {
    use super::*;
    use dashmap::DashMap;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::RwLock;
    use tokio::sync::Mutex;

    use crate::domain::flow::FlowFilter;

    /// Numbers compare numerically; everything else by JSON rendering
    fn compare_fields(left: Option<&Value>, right: Option<&Value>) -> std::cmp::Ordering {
        match (
            left.and_then(Value::as_f64),
            right.and_then(Value::as_f64),
        ) {
            (Some(l), Some(r)) => l.partial_cmp(&r).unwrap_or(std::cmp::Ordering::Equal),
            _ => {
                let l = left.map(|v| v.to_string()).unwrap_or_default();
                let r = right.map(|v| v.to_string()).unwrap_or_default();
                l.cmp(&r)
            }
        }
    }

    fn advance_clock(prev: DateTime<Utc>) -> DateTime<Utc> {
        let now = Utc::now();
        if now > prev {
            now
        } else {
            // Two saves inside one clock tick must still be ordered
            prev + chrono::Duration::milliseconds(1)
        }
    }

    /// In-memory flow store
    pub struct MemoryFlowRepository {
        flows: RwLock<HashMap<String, Flow>>,
    }

    impl MemoryFlowRepository {
        /// Create an empty in-memory flow store
        pub fn new() -> Self {
            Self {
                flows: RwLock::new(HashMap::new()),
            }
        }
    }

    impl Default for MemoryFlowRepository {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl FlowRepository for MemoryFlowRepository {
        async fn create(&self, flow: NewFlow) -> Result<Flow, EngineError> {
            let mut flows = self.flows.write().map_err(|e| {
                EngineError::StoreError(format!("Failed to acquire write lock: {}", e))
            })?;

            if flows.contains_key(flow.key.as_str()) {
                return Err(EngineError::Conflict(format!(
                    "Flow key already exists: {}",
                    flow.key
                )));
            }

            let now = Utc::now();
            let stored = Flow {
                key: flow.key.clone(),
                name: flow.name,
                category: flow.category,
                description: flow.description,
                source: flow.source,
                enabled: flow.enabled,
                created_by: flow.created_by,
                updated_by: None,
                remark: flow.remark,
                created_at: now,
                updated_at: now,
                published_at: None,
            };
            flows.insert(flow.key.0.clone(), stored.clone());

            Ok(stored)
        }

        async fn find_by_key(&self, key: &FlowKey) -> Result<Option<Flow>, EngineError> {
            let flows = self.flows.read().map_err(|e| {
                EngineError::StoreError(format!("Failed to acquire read lock: {}", e))
            })?;

            Ok(flows.get(key.as_str()).cloned())
        }

        async fn exists(&self, key: &FlowKey) -> Result<bool, EngineError> {
            let flows = self.flows.read().map_err(|e| {
                EngineError::StoreError(format!("Failed to acquire read lock: {}", e))
            })?;

            Ok(flows.contains_key(key.as_str()))
        }

        async fn update(&self, key: &FlowKey, patch: FlowPatch) -> Result<Flow, EngineError> {
            let mut flows = self.flows.write().map_err(|e| {
                EngineError::StoreError(format!("Failed to acquire write lock: {}", e))
            })?;

            let flow = flows
                .get_mut(key.as_str())
                .ok_or_else(|| EngineError::FlowNotFound(key.to_string()))?;

            if let Some(name) = patch.name {
                flow.name = name;
            }
            if let Some(category) = patch.category {
                flow.category = Some(category);
            }
            if let Some(description) = patch.description {
                flow.description = Some(description);
            }
            if let Some(source) = patch.source {
                flow.source = source;
            }
            if let Some(remark) = patch.remark {
                flow.remark = Some(remark);
            }
            if let Some(updated_by) = patch.updated_by {
                flow.updated_by = Some(updated_by);
            }
            flow.updated_at = advance_clock(flow.updated_at);

            Ok(flow.clone())
        }

        async fn set_enabled(&self, key: &FlowKey, enabled: bool) -> Result<(), EngineError> {
            let mut flows = self.flows.write().map_err(|e| {
                EngineError::StoreError(format!("Failed to acquire write lock: {}", e))
            })?;

            let flow = flows
                .get_mut(key.as_str())
                .ok_or_else(|| EngineError::FlowNotFound(key.to_string()))?;

            flow.enabled = enabled;
            flow.updated_at = advance_clock(flow.updated_at);

            Ok(())
        }

        async fn set_published_at(
            &self,
            key: &FlowKey,
            published_at: DateTime<Utc>,
        ) -> Result<(), EngineError> {
            let mut flows = self.flows.write().map_err(|e| {
                EngineError::StoreError(format!("Failed to acquire write lock: {}", e))
            })?;

            let flow = flows
                .get_mut(key.as_str())
                .ok_or_else(|| EngineError::FlowNotFound(key.to_string()))?;

            // Publish status is intentionally decoupled from updated_at
            flow.published_at = Some(published_at);

            Ok(())
        }

        async fn list(&self, filter: &FlowFilter) -> Result<Vec<FlowSummary>, EngineError> {
            let flows = self.flows.read().map_err(|e| {
                EngineError::StoreError(format!("Failed to acquire read lock: {}", e))
            })?;

            let mut result: Vec<FlowSummary> = flows
                .values()
                .filter(|flow| {
                    if filter.enabled_only && !flow.enabled {
                        return false;
                    }
                    if let Some(category) = &filter.category {
                        if flow.category.as_deref() != Some(category.as_str()) {
                            return false;
                        }
                    }
                    true
                })
                .map(Flow::summary)
                .collect();

            result.sort_by(|a, b| {
                a.category
                    .cmp(&b.category)
                    .then_with(|| a.key.0.cmp(&b.key.0))
            });

            Ok(result)
        }
    }

    /// In-memory repository over one entity, keyed by an auto-assigned `id`
    pub struct MemoryEntityRepository {
        records: Arc<DashMap<i64, Value>>,
        next_id: AtomicI64,
    }

    impl MemoryEntityRepository {
        /// Create an empty entity repository
        pub fn new() -> Self {
            Self {
                records: Arc::new(DashMap::new()),
                next_id: AtomicI64::new(1),
            }
        }

        /// Snapshot the full record set (used by the transaction double)
        pub fn snapshot(&self) -> Vec<(i64, Value)> {
            self.records
                .iter()
                .map(|entry| (*entry.key(), entry.value().clone()))
                .collect()
        }

        /// Replace the full record set (used by the transaction double)
        pub fn restore(&self, snapshot: Vec<(i64, Value)>) {
            self.records.clear();
            for (id, record) in snapshot {
                self.records.insert(id, record);
            }
        }

        fn matches(record: &Value, query: &Value) -> bool {
            let clause = match query.get("where") {
                Some(Value::Object(map)) => map,
                _ => return true,
            };
            clause
                .iter()
                .all(|(field, expected)| record.get(field) == Some(expected))
        }

        fn select(&self, query: &Value) -> Vec<Value> {
            let mut rows: Vec<(i64, Value)> = self
                .records
                .iter()
                .filter(|entry| Self::matches(entry.value(), query))
                .map(|entry| (*entry.key(), entry.value().clone()))
                .collect();
            rows.sort_by_key(|(id, _)| *id);

            let mut values: Vec<Value> = rows.into_iter().map(|(_, record)| record).collect();

            if let Some(order) = query.get("order") {
                let (field, descending) = match order {
                    Value::String(field) => (field.clone(), false),
                    Value::Array(parts) => {
                        let field = parts
                            .first()
                            .and_then(Value::as_str)
                            .unwrap_or("id")
                            .to_string();
                        let descending = parts
                            .get(1)
                            .and_then(Value::as_str)
                            .map(|d| d.eq_ignore_ascii_case("DESC"))
                            .unwrap_or(false);
                        (field, descending)
                    }
                    _ => ("id".to_string(), false),
                };
                values.sort_by(|a, b| {
                    let ordering = compare_fields(a.get(&field), b.get(&field));
                    if descending {
                        ordering.reverse()
                    } else {
                        ordering
                    }
                });
            }

            let offset = query
                .get("offset")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize;
            if offset > 0 {
                values = values.into_iter().skip(offset).collect();
            }
            if let Some(limit) = query.get("limit").and_then(Value::as_u64) {
                values.truncate(limit as usize);
            }

            values
        }
    }

    impl Default for MemoryEntityRepository {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl EntityRepository for MemoryEntityRepository {
        async fn find(&self, query: &Value) -> Result<Vec<Value>, EngineError> {
            Ok(self.select(query))
        }

        async fn find_one(&self, query: &Value) -> Result<Option<Value>, EngineError> {
            Ok(self.select(query).into_iter().next())
        }

        async fn save(&self, mut record: Value) -> Result<Value, EngineError> {
            if !record.is_object() {
                return Err(EngineError::StoreError(
                    "Entity records must be JSON objects".to_string(),
                ));
            }

            let id = match record.get("id").and_then(Value::as_i64) {
                Some(id) => id,
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                    record["id"] = Value::from(id);
                    id
                }
            };

            self.records.insert(id, record.clone());
            Ok(record)
        }

        async fn remove(&self, query: &Value) -> Result<u64, EngineError> {
            let doomed: Vec<i64> = self
                .records
                .iter()
                .filter(|entry| Self::matches(entry.value(), query))
                .map(|entry| *entry.key())
                .collect();

            for id in &doomed {
                self.records.remove(id);
            }

            Ok(doomed.len() as u64)
        }

        async fn count(&self, query: &Value) -> Result<u64, EngineError> {
            let count = self
                .records
                .iter()
                .filter(|entry| Self::matches(entry.value(), query))
                .count();
            Ok(count as u64)
        }
    }

    /// Snapshot/restore transaction double over a set of memory repositories
    pub struct MemoryTransactionManager {
        stores: Vec<(String, Arc<MemoryEntityRepository>)>,
        snapshot: Mutex<Option<HashMap<String, Vec<(i64, Value)>>>>,
    }

    impl MemoryTransactionManager {
        /// Create a transaction double over the given repositories
        pub fn new(stores: Vec<(String, Arc<MemoryEntityRepository>)>) -> Self {
            Self {
                stores,
                snapshot: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl TransactionManager for MemoryTransactionManager {
        async fn begin(&self) -> Result<(), EngineError> {
            let mut snapshot = self.snapshot.lock().await;
            if snapshot.is_some() {
                return Err(EngineError::StoreError(
                    "A transaction is already active".to_string(),
                ));
            }

            let mut captured = HashMap::new();
            for (name, store) in &self.stores {
                captured.insert(name.clone(), store.snapshot());
            }
            *snapshot = Some(captured);

            Ok(())
        }

        async fn commit(&self) -> Result<(), EngineError> {
            let mut snapshot = self.snapshot.lock().await;
            if snapshot.take().is_none() {
                return Err(EngineError::StoreError(
                    "No active transaction to commit".to_string(),
                ));
            }
            Ok(())
        }

        async fn rollback(&self) -> Result<(), EngineError> {
            let mut snapshot = self.snapshot.lock().await;
            let captured = snapshot.take().ok_or_else(|| {
                EngineError::StoreError("No active transaction to roll back".to_string())
            })?;

            for (name, store) in &self.stores {
                if let Some(records) = captured.get(name) {
                    store.restore(records.clone());
                }
            }

            Ok(())
        }
    }

    /// Build a registry plus matching transaction double over entity names
    pub fn memory_registry(
        entity_names: &[&str],
    ) -> (Arc<EntityRegistry>, Arc<MemoryTransactionManager>) {
        let mut registry = EntityRegistry::new();
        let mut stores = Vec::new();
        for name in entity_names {
            let store = Arc::new(MemoryEntityRepository::new());
            stores.push((name.to_string(), store.clone()));
            registry.register(*name, store);
        }
        (
            Arc::new(registry),
            Arc::new(MemoryTransactionManager::new(stores)),
        )
    }
}
