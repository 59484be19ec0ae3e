use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::cache::FlowCache;
use crate::domain::flow::{
    default_source_template, Flow, FlowFilter, FlowPatch, FlowSummary, NewFlow,
};
use crate::domain::key::{KeyGenerator, MAX_KEY_ATTEMPTS};
use crate::domain::repository::FlowRepository;
use crate::types::FlowKey;
use crate::EngineError;

/// Request to create a flow. Key and source are optional: a missing key is
/// allocated from the generator, a missing source gets the starter template.
#[derive(Debug, Clone, Default)]
pub struct CreateFlowRequest {
    /// Explicit key, if the caller brings one
    pub key: Option<String>,
    /// Human-readable name
    pub name: String,
    /// Free-text grouping
    pub category: Option<String>,
    /// What the flow does
    pub description: Option<String>,
    /// Source text
    pub source: Option<String>,
    /// Free-form operator note
    pub remark: Option<String>,
    /// Identity creating the flow
    pub created_by: Option<String>,
}

/// Service for managing flow rows: CRUD, key allocation, cache eviction,
/// and the decoupled publish-status update.
pub struct FlowService {
    /// Durable flow store
    flows: Arc<dyn FlowRepository>,

    /// Process-local source cache, evicted on soft delete
    cache: Arc<FlowCache>,

    /// Key generator for flows created without an explicit key
    keys: KeyGenerator,
}

impl FlowService {
    /// Create a new flow service
    pub fn new(flows: Arc<dyn FlowRepository>, cache: Arc<FlowCache>) -> Self {
        Self {
            flows,
            cache,
            keys: KeyGenerator::new(),
        }
    }

    /// Create a flow, allocating a key and filling the starter template
    /// where the request leaves them out
    pub async fn create(&self, request: CreateFlowRequest) -> Result<Flow, EngineError> {
        let key = match request.key {
            Some(key) => {
                let key = FlowKey(key);
                if self.flows.exists(&key).await? {
                    return Err(EngineError::Conflict(format!(
                        "Flow key already exists: {}",
                        key
                    )));
                }
                key
            }
            None => self.allocate_key().await?,
        };

        let source = request.source.unwrap_or_else(|| {
            default_source_template(
                &key,
                &request.name,
                request.description.as_deref().unwrap_or(""),
            )
        });

        let flow = self
            .flows
            .create(NewFlow {
                key: key.clone(),
                name: request.name,
                category: request.category,
                description: request.description,
                source,
                enabled: true,
                created_by: request.created_by,
                remark: request.remark,
            })
            .await?;

        tracing::info!(flow_key = %flow.key, name = %flow.name, "Flow created");

        Ok(flow)
    }

    /// Full record by key
    pub async fn get(&self, key: &FlowKey) -> Result<Flow, EngineError> {
        self.flows
            .find_by_key(key)
            .await?
            .ok_or_else(|| EngineError::FlowNotFound(key.to_string()))
    }

    /// Merge a partial update; the store advances `updated_at`, so the next
    /// execution sees the cache entry as stale without an explicit evict
    pub async fn update(&self, key: &FlowKey, patch: FlowPatch) -> Result<Flow, EngineError> {
        let flow = self.flows.update(key, patch).await?;

        tracing::info!(flow_key = %key, "Flow updated");

        Ok(flow)
    }

    /// Soft delete: disable the flow and evict its cache entry
    pub async fn soft_delete(&self, key: &FlowKey) -> Result<(), EngineError> {
        // Surface NotFound before mutating anything
        self.get(key).await?;

        self.flows.set_enabled(key, false).await?;
        self.cache.evict(key);

        tracing::info!(flow_key = %key, "Flow disabled");

        Ok(())
    }

    /// Metadata-only listing, ordered by category then key
    pub async fn list(&self, filter: &FlowFilter) -> Result<Vec<FlowSummary>, EngineError> {
        self.flows.list(filter).await
    }

    /// Evict one cache entry, or all of them when no key is given
    pub fn evict_cache(&self, key: Option<&FlowKey>) {
        match key {
            Some(key) => {
                self.cache.evict(key);
                tracing::info!(flow_key = %key, "Flow cache entry evicted");
            }
            None => {
                self.cache.clear();
                tracing::info!("Flow cache cleared");
            }
        }
    }

    /// Record the publish time. Deliberately does not advance `updated_at`,
    /// so publishing never invalidates an author's optimistic lock.
    pub async fn update_publish_status(
        &self,
        key: &FlowKey,
        published_at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.flows.set_published_at(key, published_at).await?;

        tracing::info!(flow_key = %key, %published_at, "Flow publish status updated");

        Ok(())
    }

    /// Draw keys until one is free in the store, within the attempt budget
    async fn allocate_key(&self) -> Result<FlowKey, EngineError> {
        for _ in 0..MAX_KEY_ATTEMPTS {
            let key = self.keys.generate();
            if !self.flows.exists(&key).await? {
                return Ok(key);
            }
        }

        Err(EngineError::KeyGenerationFailed {
            attempts: MAX_KEY_ATTEMPTS,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::key::KEY_LENGTH;
    use crate::domain::repository::memory::MemoryFlowRepository;

    fn service() -> FlowService {
        FlowService::new(
            Arc::new(MemoryFlowRepository::new()),
            Arc::new(FlowCache::new()),
        )
    }

    #[tokio::test]
    async fn test_create_round_trip() {
        let service = service();

        let flow = service
            .create(CreateFlowRequest {
                key: Some("k1".to_string()),
                name: "N".to_string(),
                source: Some("return {ok:true};".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(flow.key.as_str(), "k1");

        let fetched = service.get(&FlowKey::from("k1")).await.unwrap();
        assert_eq!(fetched.source, "return {ok:true};");
        assert!(fetched.enabled);
    }

    #[tokio::test]
    async fn test_create_existing_key_conflicts() {
        let service = service();
        let request = CreateFlowRequest {
            key: Some("k1".to_string()),
            name: "N".to_string(),
            source: Some("return 1;".to_string()),
            ..Default::default()
        };

        service.create(request.clone()).await.unwrap();
        let result = service.create(request).await;

        assert!(matches!(result, Err(EngineError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_create_without_key_allocates_one() {
        let service = service();

        let flow = service
            .create(CreateFlowRequest {
                name: "Generated".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(flow.key.as_str().len(), KEY_LENGTH);
        assert!(flow
            .key
            .as_str()
            .chars()
            .next()
            .unwrap()
            .is_ascii_alphabetic());
    }

    #[tokio::test]
    async fn test_create_without_source_uses_template() {
        let service = service();

        let flow = service
            .create(CreateFlowRequest {
                name: "Templated".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(flow.source.contains("const { repositories, params, actor } = context;"));
        assert!(flow.source.contains(flow.key.as_str()));
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let service = service();

        let result = service.get(&FlowKey::from("nope")).await;
        assert!(matches!(result, Err(EngineError::FlowNotFound(_))));
    }

    #[tokio::test]
    async fn test_soft_delete_keeps_record_readable() {
        let service = service();
        service
            .create(CreateFlowRequest {
                key: Some("k1".to_string()),
                name: "N".to_string(),
                source: Some("return 1;".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        service.soft_delete(&FlowKey::from("k1")).await.unwrap();

        let flow = service.get(&FlowKey::from("k1")).await.unwrap();
        assert!(!flow.enabled);
    }

    #[tokio::test]
    async fn test_soft_delete_unknown_is_not_found() {
        let service = service();

        let result = service.soft_delete(&FlowKey::from("nope")).await;
        assert!(matches!(result, Err(EngineError::FlowNotFound(_))));
    }

    #[tokio::test]
    async fn test_publish_status_does_not_advance_updated_at() {
        let service = service();
        let created = service
            .create(CreateFlowRequest {
                key: Some("k1".to_string()),
                name: "N".to_string(),
                source: Some("return 1;".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        service
            .update_publish_status(&FlowKey::from("k1"), Utc::now())
            .await
            .unwrap();

        let flow = service.get(&FlowKey::from("k1")).await.unwrap();
        assert_eq!(flow.updated_at, created.updated_at);
        assert!(flow.published_at.is_some());
    }
}
