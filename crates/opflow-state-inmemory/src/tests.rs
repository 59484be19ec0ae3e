use super::*;
use serde_json::json;

use opflow_core::{EngineError, EntityRepository, FlowFilter, FlowKey, FlowPatch, NewFlow};

fn new_flow(key: &str, category: Option<&str>) -> NewFlow {
    NewFlow {
        key: FlowKey::from(key),
        name: format!("Flow {}", key),
        category: category.map(str::to_string),
        description: None,
        source: "return { ok: true };".to_string(),
        enabled: true,
        created_by: Some("u1".to_string()),
        remark: None,
    }
}

#[tokio::test]
async fn test_create_and_round_trip() {
    let provider = InMemoryStateProvider::new(&["customer"]);
    let flows = provider.flow_repository();

    let created = flows.create(new_flow("k1", None)).await.unwrap();
    assert_eq!(created.created_at, created.updated_at);
    assert_eq!(created.created_by.as_deref(), Some("u1"));

    let fetched = flows
        .find_by_key(&FlowKey::from("k1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched.source, "return { ok: true };");
    assert!(fetched.enabled);
}

#[tokio::test]
async fn test_duplicate_key_is_conflict() {
    let provider = InMemoryStateProvider::new(&["customer"]);
    let flows = provider.flow_repository();

    flows.create(new_flow("k1", None)).await.unwrap();
    let result = flows.create(new_flow("k1", None)).await;

    assert!(matches!(result, Err(EngineError::Conflict(_))));
}

#[tokio::test]
async fn test_update_merges_and_advances_updated_at() {
    let provider = InMemoryStateProvider::new(&["customer"]);
    let flows = provider.flow_repository();
    let created = flows.create(new_flow("k1", None)).await.unwrap();

    let updated = flows
        .update(
            &FlowKey::from("k1"),
            FlowPatch {
                source: Some("return 2;".to_string()),
                updated_by: Some("u2".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(updated.updated_at > created.updated_at);
    assert_eq!(updated.source, "return 2;");
    assert_eq!(updated.updated_by.as_deref(), Some("u2"));
    // Untouched fields survive the merge
    assert_eq!(updated.name, "Flow k1");

    // Back-to-back updates stay strictly ordered even within one tick
    let again = flows
        .update(
            &FlowKey::from("k1"),
            FlowPatch {
                source: Some("return 3;".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(again.updated_at > updated.updated_at);
}

#[tokio::test]
async fn test_update_unknown_key_is_not_found() {
    let provider = InMemoryStateProvider::new(&["customer"]);
    let flows = provider.flow_repository();

    let result = flows
        .update(&FlowKey::from("ghost"), FlowPatch::default())
        .await;

    assert!(matches!(result, Err(EngineError::FlowNotFound(_))));
}

#[tokio::test]
async fn test_soft_delete_keeps_row() {
    let provider = InMemoryStateProvider::new(&["customer"]);
    let flows = provider.flow_repository();
    flows.create(new_flow("k1", None)).await.unwrap();

    flows.set_enabled(&FlowKey::from("k1"), false).await.unwrap();

    let flow = flows
        .find_by_key(&FlowKey::from("k1"))
        .await
        .unwrap()
        .unwrap();
    assert!(!flow.enabled);
}

#[tokio::test]
async fn test_publish_stamp_is_decoupled_from_updated_at() {
    let provider = InMemoryStateProvider::new(&["customer"]);
    let flows = provider.flow_repository();
    let created = flows.create(new_flow("k1", None)).await.unwrap();

    flows
        .set_published_at(&FlowKey::from("k1"), chrono::Utc::now())
        .await
        .unwrap();

    let flow = flows
        .find_by_key(&FlowKey::from("k1"))
        .await
        .unwrap()
        .unwrap();
    assert!(flow.published_at.is_some());
    assert_eq!(flow.updated_at, created.updated_at);
}

#[tokio::test]
async fn test_list_is_ordered_and_idempotent() {
    let provider = InMemoryStateProvider::new(&["customer"]);
    let flows = provider.flow_repository();

    flows.create(new_flow("zz", Some("billing"))).await.unwrap();
    flows.create(new_flow("aa", Some("crm"))).await.unwrap();
    flows.create(new_flow("mm", Some("billing"))).await.unwrap();

    let first = flows.list(&FlowFilter::default()).await.unwrap();
    let keys: Vec<&str> = first.iter().map(|s| s.key.as_str()).collect();
    assert_eq!(keys, vec!["mm", "zz", "aa"]);

    let second = flows.list(&FlowFilter::default()).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_list_filters_by_category() {
    let provider = InMemoryStateProvider::new(&["customer"]);
    let flows = provider.flow_repository();

    flows.create(new_flow("k1", Some("billing"))).await.unwrap();
    flows.create(new_flow("k2", Some("crm"))).await.unwrap();

    let listed = flows
        .list(&FlowFilter {
            category: Some("crm".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].key.as_str(), "k2");
}

#[tokio::test]
async fn test_entity_registry_shares_storage_with_provider() {
    let provider = InMemoryStateProvider::new(&["customer", "order"]);
    let registry = provider.entity_registry();

    assert_eq!(
        registry.entity_names(),
        vec!["customer".to_string(), "order".to_string()]
    );

    let customers = registry.get("customer").unwrap();
    customers.save(json!({ "name": "Alice" })).await.unwrap();

    // The direct store handle observes the same write
    let direct = provider.entity_store("customer").unwrap();
    assert_eq!(direct.count(&json!({})).await.unwrap(), 1);
}

#[tokio::test]
async fn test_entity_query_order_and_limit() {
    let provider = InMemoryStateProvider::new(&["order"]);
    let orders = provider.entity_store("order").unwrap();

    orders.save(json!({ "total": 30 })).await.unwrap();
    orders.save(json!({ "total": 10 })).await.unwrap();
    orders.save(json!({ "total": 20 })).await.unwrap();

    let rows = orders
        .find(&json!({ "order": ["total", "ASC"], "limit": 2 }))
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["total"], json!(10));
    assert_eq!(rows[1]["total"], json!(20));
}

#[tokio::test]
async fn test_transaction_commit_keeps_writes() {
    let provider = InMemoryStateProvider::new(&["payment"]);
    let tx = provider.transaction_manager();
    let payments = provider.entity_store("payment").unwrap();

    tx.begin().await.unwrap();
    payments.save(json!({ "amount": 100 })).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(payments.count(&json!({})).await.unwrap(), 1);
}

#[tokio::test]
async fn test_transaction_rollback_discards_writes() {
    let provider = InMemoryStateProvider::new(&["payment"]);
    let tx = provider.transaction_manager();
    let payments = provider.entity_store("payment").unwrap();

    payments.save(json!({ "amount": 50 })).await.unwrap();

    tx.begin().await.unwrap();
    payments.save(json!({ "amount": 100 })).await.unwrap();
    payments
        .remove(&json!({ "where": { "amount": 50 } }))
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    let rows = payments.find(&json!({})).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["amount"], json!(50));
}

#[tokio::test]
async fn test_commit_without_begin_fails() {
    let provider = InMemoryStateProvider::new(&["payment"]);
    let tx = provider.transaction_manager();

    assert!(matches!(tx.commit().await, Err(EngineError::StoreError(_))));
    assert!(matches!(
        tx.rollback().await,
        Err(EngineError::StoreError(_))
    ));
}
