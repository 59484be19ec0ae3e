//! In-memory implementations of the Opflow persistence traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use opflow_core::{
    EngineError, EntityRepository, Flow, FlowFilter, FlowKey, FlowPatch, FlowRepository,
    FlowSummary, NewFlow, TransactionManager,
};

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

/// Advance a stored timestamp past its previous value.
///
/// Consecutive saves within one clock instant must still be strictly
/// ordered, or the cache-staleness check could serve a superseded source.
fn advance_clock(prev: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > prev {
        now
    } else {
        prev + chrono::Duration::milliseconds(1)
    }
}

/// In-memory implementation of the flow store
pub struct InMemoryFlowRepository {
    flows: Arc<RwLock<HashMap<String, Flow>>>,
}

impl InMemoryFlowRepository {
    /// Create a repository over shared storage
    pub fn new(flows: Arc<RwLock<HashMap<String, Flow>>>) -> Self {
        Self { flows }
    }
}

#[async_trait]
impl FlowRepository for InMemoryFlowRepository {
    async fn create(&self, flow: NewFlow) -> Result<Flow, EngineError> {
        let mut flows = self.flows.write().await;

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

        tracing::debug!(flow_key = %stored.key, "Stored new flow");

        Ok(stored)
    }

    async fn find_by_key(&self, key: &FlowKey) -> Result<Option<Flow>, EngineError> {
        let flows = self.flows.read().await;
        Ok(flows.get(key.as_str()).cloned())
    }

    async fn exists(&self, key: &FlowKey) -> Result<bool, EngineError> {
        let flows = self.flows.read().await;
        Ok(flows.contains_key(key.as_str()))
    }

    async fn update(&self, key: &FlowKey, patch: FlowPatch) -> Result<Flow, EngineError> {
        let mut flows = self.flows.write().await;

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
        let mut flows = self.flows.write().await;

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
        let mut flows = self.flows.write().await;

        let flow = flows
            .get_mut(key.as_str())
            .ok_or_else(|| EngineError::FlowNotFound(key.to_string()))?;

        // The publish stamp must not disturb the optimistic lock
        flow.published_at = Some(published_at);

        Ok(())
    }

    async fn list(&self, filter: &FlowFilter) -> Result<Vec<FlowSummary>, EngineError> {
        let flows = self.flows.read().await;

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

/// In-memory repository over one domain entity, keyed by an auto-assigned
/// integer `id`. Queries are matched by field equality.
pub struct InMemoryEntityRepository {
    records: Arc<DashMap<i64, Value>>,
    next_id: AtomicI64,
}

impl InMemoryEntityRepository {
    /// Create an empty entity repository
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::with_capacity(32)),
            next_id: AtomicI64::new(1),
        }
    }

    fn snapshot(&self) -> Vec<(i64, Value)> {
        self.records
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    fn restore(&self, snapshot: Vec<(i64, Value)>) {
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
                        .map(|direction| direction.eq_ignore_ascii_case("DESC"))
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

        let offset = query.get("offset").and_then(Value::as_u64).unwrap_or(0) as usize;
        if offset > 0 {
            values = values.into_iter().skip(offset).collect();
        }
        if let Some(limit) = query.get("limit").and_then(Value::as_u64) {
            values.truncate(limit as usize);
        }

        values
    }
}

impl Default for InMemoryEntityRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntityRepository for InMemoryEntityRepository {
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

/// Snapshot/restore unit-of-work over the in-memory entity stores.
///
/// One transaction may be active at a time; `begin` captures every store,
/// `rollback` restores the capture, `commit` discards it. This is the test
/// stand-in for a real database unit of work.
pub struct InMemoryTransactionManager {
    stores: Vec<(String, Arc<InMemoryEntityRepository>)>,
    snapshot: Mutex<Option<HashMap<String, Vec<(i64, Value)>>>>,
}

impl InMemoryTransactionManager {
    /// Create a transaction manager over the given entity stores
    pub fn new(stores: Vec<(String, Arc<InMemoryEntityRepository>)>) -> Self {
        Self {
            stores,
            snapshot: Mutex::new(None),
        }
    }
}

#[async_trait]
impl TransactionManager for InMemoryTransactionManager {
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
