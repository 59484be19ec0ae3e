use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::FlowCache;
use crate::domain::flow::{FlowPatch, NewFlow};
use crate::domain::repository::FlowRepository;
use crate::types::FlowKey;
use crate::EngineError;

/// Requests whose timestamp drifts further than this from the server clock
/// are rejected as replays
pub const MAX_UPLOAD_AGE: Duration = Duration::from_secs(30 * 60);

/// Externally authored flow source pushed at the store.
///
/// `last_known_modified_at` is the author's view of "when was this last
/// changed", tracked by the authoring tool as a `YYYY-MM-DD HH:MM:SS`
/// string; a write is accepted only if it matches the store's current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadRecord {
    /// Flow key being uploaded
    pub key: String,
    /// Name; defaults to the key on first creation
    pub name: Option<String>,
    /// Free-text grouping
    pub category: Option<String>,
    /// What the flow does
    pub description: Option<String>,
    /// Source text
    pub source: String,
    /// Author's last-known modification stamp (second precision)
    pub last_known_modified_at: Option<String>,
    /// Identity pushing the upload
    pub actor_id: Option<String>,
    /// Client clock in epoch milliseconds, for the anti-replay check
    pub request_timestamp_ms: Option<i64>,
    /// Record this version as published after the write lands
    #[serde(default)]
    pub publish: bool,
}

/// What reconciliation decided and the data the authoring tool needs next
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", content = "data", rename_all = "lowercase")]
pub enum UploadOutcome {
    /// No flow existed for the key; one was created
    Created(UploadReceipt),
    /// The optimistic lock matched; the flow was updated
    Updated(UploadReceipt),
    /// The author's stamp disagrees with the store; nothing was mutated
    Conflict(UploadConflict),
}

/// Confirmation of an accepted upload; the stamp is the new optimistic-lock
/// value the author must track
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Flow key
    pub key: String,
    /// Flow name after the write
    pub name: String,
    /// The store's `updated_at`, second precision
    pub modified_at: String,
}

/// Both sides of a rejected write, so the author can refetch and rebase
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadConflict {
    /// Flow key
    pub key: String,
    /// What the author thought the last modification was
    pub client_modified_at: String,
    /// What the store actually holds
    pub store_modified_at: String,
}

/// Reconciles externally authored flow source with the store under an
/// optimistic lock, preventing silent clobbering between concurrent authors.
pub struct UploadService {
    flows: Arc<dyn FlowRepository>,
    cache: Arc<FlowCache>,
    max_age: Duration,
}

impl UploadService {
    /// Create an upload service with the default anti-replay window
    pub fn new(flows: Arc<dyn FlowRepository>, cache: Arc<FlowCache>) -> Self {
        Self {
            flows,
            cache,
            max_age: MAX_UPLOAD_AGE,
        }
    }

    /// Create an upload service with an explicit anti-replay window
    pub fn with_max_age(
        flows: Arc<dyn FlowRepository>,
        cache: Arc<FlowCache>,
        max_age: Duration,
    ) -> Self {
        Self {
            flows,
            cache,
            max_age,
        }
    }

    /// Reconcile one upload against the store.
    ///
    /// Expiry and the optimistic lock are both checked before any mutation;
    /// a conflict is a structured outcome, not an error, because the author
    /// is expected to refetch and resubmit.
    pub async fn reconcile(&self, record: UploadRecord) -> Result<UploadOutcome, EngineError> {
        self.check_expiry(&record)?;

        let key = FlowKey::from(record.key.clone());
        tracing::info!(flow_key = %key, "Received flow upload");

        let existing = self.flows.find_by_key(&key).await?;

        let outcome = match existing {
            None => {
                let flow = self
                    .flows
                    .create(NewFlow {
                        key: key.clone(),
                        name: record.name.clone().unwrap_or_else(|| record.key.clone()),
                        category: record.category.clone(),
                        description: record.description.clone(),
                        source: record.source.clone(),
                        enabled: true,
                        created_by: record.actor_id.clone(),
                        remark: None,
                    })
                    .await?;

                tracing::info!(flow_key = %key, "Flow created from upload");

                UploadOutcome::Created(UploadReceipt {
                    key: flow.key.0.clone(),
                    name: flow.name.clone(),
                    modified_at: flow.modified_stamp(),
                })
            }
            Some(flow) => {
                if let Some(client_stamp) = &record.last_known_modified_at {
                    let store_stamp = flow.modified_stamp();
                    if *client_stamp != store_stamp {
                        tracing::warn!(
                            flow_key = %key,
                            client = %client_stamp,
                            store = %store_stamp,
                            "Upload rejected: modification stamp mismatch"
                        );
                        return Ok(UploadOutcome::Conflict(UploadConflict {
                            key: record.key,
                            client_modified_at: client_stamp.clone(),
                            store_modified_at: store_stamp,
                        }));
                    }
                }

                let updated = self
                    .flows
                    .update(
                        &key,
                        FlowPatch {
                            name: record.name.clone(),
                            category: record.category.clone(),
                            description: record.description.clone(),
                            source: Some(record.source.clone()),
                            remark: None,
                            updated_by: record.actor_id.clone(),
                        },
                    )
                    .await?;
                self.cache.evict(&key);

                tracing::info!(flow_key = %key, "Flow updated from upload");

                UploadOutcome::Updated(UploadReceipt {
                    key: updated.key.0.clone(),
                    name: updated.name.clone(),
                    modified_at: updated.modified_stamp(),
                })
            }
        };

        if record.publish {
            // Decoupled from the source write: stamps published_at without
            // advancing updated_at
            self.flows.set_published_at(&key, Utc::now()).await?;
            tracing::info!(flow_key = %key, "Flow marked published");
        }

        Ok(outcome)
    }

    fn check_expiry(&self, record: &UploadRecord) -> Result<(), EngineError> {
        if let Some(client_ms) = record.request_timestamp_ms {
            let now_ms = Utc::now().timestamp_millis();
            let drift = (now_ms - client_ms).unsigned_abs();
            if drift > self.max_age.as_millis() as u64 {
                return Err(EngineError::Expired(format!(
                    "request timestamp is {}s away from the server clock (limit {}s)",
                    drift / 1000,
                    self.max_age.as_secs()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::memory::MemoryFlowRepository;

    fn fixture() -> (UploadService, Arc<MemoryFlowRepository>, Arc<FlowCache>) {
        let flows = Arc::new(MemoryFlowRepository::new());
        let cache = Arc::new(FlowCache::new());
        (
            UploadService::new(flows.clone(), cache.clone()),
            flows,
            cache,
        )
    }

    fn record(key: &str, source: &str) -> UploadRecord {
        UploadRecord {
            key: key.to_string(),
            name: Some(format!("Flow {}", key)),
            source: source.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_upload_unknown_key_creates() {
        let (service, flows, _cache) = fixture();

        let outcome = service.reconcile(record("k1", "return 1;")).await.unwrap();

        assert!(matches!(outcome, UploadOutcome::Created(_)));
        let flow = flows
            .find_by_key(&FlowKey::from("k1"))
            .await
            .unwrap()
            .unwrap();
        assert!(flow.enabled);
        assert_eq!(flow.source, "return 1;");
    }

    #[tokio::test]
    async fn test_upload_with_matching_stamp_updates() {
        let (service, flows, _cache) = fixture();
        service.reconcile(record("k1", "return 1;")).await.unwrap();

        let current = flows
            .find_by_key(&FlowKey::from("k1"))
            .await
            .unwrap()
            .unwrap();

        let mut upload = record("k1", "return 2;");
        upload.last_known_modified_at = Some(current.modified_stamp());

        let outcome = service.reconcile(upload).await.unwrap();
        assert!(matches!(outcome, UploadOutcome::Updated(_)));

        let updated = flows
            .find_by_key(&FlowKey::from("k1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.source, "return 2;");
        assert!(updated.updated_at >= current.updated_at);
    }

    #[tokio::test]
    async fn test_upload_with_stale_stamp_conflicts_and_mutates_nothing() {
        let (service, flows, _cache) = fixture();
        service.reconcile(record("k1", "return 1;")).await.unwrap();

        let mut upload = record("k1", "return 2;");
        upload.last_known_modified_at = Some("2000-01-01 00:00:00".to_string());

        let outcome = service.reconcile(upload).await.unwrap();
        match outcome {
            UploadOutcome::Conflict(conflict) => {
                assert_eq!(conflict.client_modified_at, "2000-01-01 00:00:00");
                assert_ne!(conflict.store_modified_at, conflict.client_modified_at);
            }
            other => panic!("Expected conflict, got {:?}", other),
        }

        let flow = flows
            .find_by_key(&FlowKey::from("k1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(flow.source, "return 1;");
    }

    #[tokio::test]
    async fn test_upload_without_stamp_overwrites() {
        // An author that tracks no stamp opts out of the lock
        let (service, flows, _cache) = fixture();
        service.reconcile(record("k1", "return 1;")).await.unwrap();

        let outcome = service.reconcile(record("k1", "return 2;")).await.unwrap();
        assert!(matches!(outcome, UploadOutcome::Updated(_)));

        let flow = flows
            .find_by_key(&FlowKey::from("k1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(flow.source, "return 2;");
    }

    #[tokio::test]
    async fn test_upload_evicts_cache_entry() {
        let (service, flows, cache) = fixture();
        service.reconcile(record("k1", "return 1;")).await.unwrap();

        let flow = flows
            .find_by_key(&FlowKey::from("k1"))
            .await
            .unwrap()
            .unwrap();
        cache.store(&FlowKey::from("k1"), &flow.source, flow.updated_at);

        service.reconcile(record("k1", "return 2;")).await.unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_expired_request_rejected_before_store_access() {
        let (service, flows, _cache) = fixture();

        let mut upload = record("k1", "return 1;");
        upload.request_timestamp_ms = Some(Utc::now().timestamp_millis() - 31 * 60 * 1000);

        let result = service.reconcile(upload).await;
        assert!(matches!(result, Err(EngineError::Expired(_))));
        assert!(flows
            .find_by_key(&FlowKey::from("k1"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_recent_request_timestamp_accepted() {
        let (service, _flows, _cache) = fixture();

        let mut upload = record("k1", "return 1;");
        upload.request_timestamp_ms = Some(Utc::now().timestamp_millis() - 60 * 1000);

        let outcome = service.reconcile(upload).await.unwrap();
        assert!(matches!(outcome, UploadOutcome::Created(_)));
    }

    #[tokio::test]
    async fn test_publish_flag_stamps_published_at_only() {
        let (service, flows, _cache) = fixture();
        service.reconcile(record("k1", "return 1;")).await.unwrap();

        let before = flows
            .find_by_key(&FlowKey::from("k1"))
            .await
            .unwrap()
            .unwrap();
        assert!(before.published_at.is_none());

        let mut upload = record("k1", "return 1;");
        upload.last_known_modified_at = Some(before.modified_stamp());
        upload.publish = true;
        service.reconcile(upload).await.unwrap();

        let after = flows
            .find_by_key(&FlowKey::from("k1"))
            .await
            .unwrap()
            .unwrap();
        assert!(after.published_at.is_some());
    }

    #[tokio::test]
    async fn test_outcome_serializes_with_action_tag() {
        let outcome = UploadOutcome::Conflict(UploadConflict {
            key: "k1".to_string(),
            client_modified_at: "2024-01-01 00:00:00".to_string(),
            store_modified_at: "2024-01-02 00:00:00".to_string(),
        });

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["action"], "conflict");
        assert_eq!(json["data"]["key"], "k1");
    }
}
