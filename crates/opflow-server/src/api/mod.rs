//! API module for the Opflow Server
//!
//! This module contains the API routes and handlers for the Opflow Server.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, TimeZone, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub mod errors;

use crate::error::ServerError;
use crate::server::FlowServer;
use errors::api_error_response;
use opflow_core::{Actor, CreateFlowRequest, FlowFilter, FlowKey, FlowPatch, UploadRecord};

/// Build the router for API endpoints
pub fn build_router(server: Arc<FlowServer>) -> Router {
    Router::new()
        // Flow management
        .route("/v1/flows", get(list_flows_handler).post(create_flow_handler))
        .route(
            "/v1/flows/:flow_key",
            get(get_flow_handler)
                .put(update_flow_handler)
                .delete(delete_flow_handler),
        )
        .route("/v1/flows/:flow_key/run", post(run_flow_handler))
        .route(
            "/v1/flows/:flow_key/publish-status",
            put(publish_status_handler),
        )
        .route(
            "/v1/flows/:flow_key/clear-cache",
            post(clear_flow_cache_handler),
        )
        .route("/v1/cache/clear", post(clear_cache_handler))
        // Upload protocol
        .route("/v1/upload", post(upload_handler))
        .route("/v1/upload/secret", post(generate_secret_handler))
        // Health check
        .route("/health", get(health_handler))
        // Shared state
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

/// Request body for executing a flow
#[derive(Debug, Deserialize)]
pub struct RunFlowRequest {
    /// Business parameters handed to the flow verbatim
    #[serde(default)]
    pub params: Value,
    /// Caller identity, when the request layer resolved one
    #[serde(default)]
    pub actor: Option<Actor>,
}

/// Query parameters for listing flows
#[derive(Debug, Deserialize)]
pub struct ListFlowsQuery {
    /// Only flows in this category
    pub category: Option<String>,
    /// Only enabled flows (default: true, matching what callers can run)
    #[serde(default = "default_enabled_only")]
    pub enabled_only: bool,
}

fn default_enabled_only() -> bool {
    true
}

/// Request body for creating a flow
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFlowBody {
    /// Explicit key; generated when omitted
    pub key: Option<String>,
    /// Flow name
    pub name: String,
    /// Free-text grouping
    pub category: Option<String>,
    /// What the flow does
    pub description: Option<String>,
    /// Source text; a starter template is used when omitted
    pub source_text: Option<String>,
    /// Free-form operator note
    pub remark: Option<String>,
    /// Identity creating the flow
    pub actor_id: Option<String>,
}

/// Request body for updating a flow
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFlowBody {
    /// New name
    pub name: Option<String>,
    /// New category
    pub category: Option<String>,
    /// New description
    pub description: Option<String>,
    /// New source text
    pub source_text: Option<String>,
    /// New remark
    pub remark: Option<String>,
    /// Identity applying the update
    pub actor_id: Option<String>,
}

/// Request body for the publish-status update
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishStatusBody {
    /// When this version went live; RFC 3339 or `YYYY-MM-DD HH:MM:SS`
    pub published_at: String,
}

/// Upload payload pushed by the external authoring tool
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadBody {
    /// Flow key
    pub key: String,
    /// Flow name
    pub name: Option<String>,
    /// Free-text grouping
    pub category: Option<String>,
    /// What the flow does
    pub description: Option<String>,
    /// Source text
    pub source_text: String,
    /// Author's last-known modification stamp
    pub last_known_modified_at: Option<String>,
    /// Identity pushing the upload
    pub actor_id: Option<String>,
    /// Client clock in epoch milliseconds (anti-replay)
    pub request_timestamp: Option<i64>,
    /// Record this version as published
    #[serde(default)]
    pub is_publish: bool,
}

/// Response for a freshly generated access secret
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessSecretResponse {
    /// The new shared secret
    pub access_secret: String,
    /// Where to configure it
    pub usage: String,
}

/// Handler for executing a flow
async fn run_flow_handler(
    State(server): State<Arc<FlowServer>>,
    Path(flow_key): Path<String>,
    Json(request): Json<RunFlowRequest>,
) -> impl IntoResponse {
    info!(%flow_key, "Running flow");

    let key = FlowKey::from(flow_key.clone());
    match server.run_flow(&key, request.params, request.actor).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(err) => {
            error!(%flow_key, %err, "Failed to run flow");
            api_error_response(&err)
        }
    }
}

/// Handler for listing flows
async fn list_flows_handler(
    State(server): State<Arc<FlowServer>>,
    Query(query): Query<ListFlowsQuery>,
) -> impl IntoResponse {
    let filter = FlowFilter {
        category: query.category,
        enabled_only: query.enabled_only,
    };

    match server.list_flows(&filter).await {
        Ok(flows) => (StatusCode::OK, Json(json!({ "flows": flows }))).into_response(),
        Err(err) => {
            error!(%err, "Failed to list flows");
            api_error_response(&err)
        }
    }
}

/// Handler for getting a flow by key
async fn get_flow_handler(
    State(server): State<Arc<FlowServer>>,
    Path(flow_key): Path<String>,
) -> impl IntoResponse {
    match server.get_flow(&FlowKey::from(flow_key.clone())).await {
        Ok(flow) => (StatusCode::OK, Json(flow)).into_response(),
        Err(err) => {
            error!(%flow_key, %err, "Failed to get flow");
            api_error_response(&err)
        }
    }
}

/// Handler for creating a flow
async fn create_flow_handler(
    State(server): State<Arc<FlowServer>>,
    Json(body): Json<CreateFlowBody>,
) -> impl IntoResponse {
    let request = CreateFlowRequest {
        key: body.key,
        name: body.name,
        category: body.category,
        description: body.description,
        source: body.source_text,
        remark: body.remark,
        created_by: body.actor_id,
    };

    match server.create_flow(request).await {
        Ok(flow) => (StatusCode::CREATED, Json(flow)).into_response(),
        Err(err) => {
            error!(%err, "Failed to create flow");
            api_error_response(&err)
        }
    }
}

/// Handler for updating a flow
async fn update_flow_handler(
    State(server): State<Arc<FlowServer>>,
    Path(flow_key): Path<String>,
    Json(body): Json<UpdateFlowBody>,
) -> impl IntoResponse {
    let patch = FlowPatch {
        name: body.name,
        category: body.category,
        description: body.description,
        source: body.source_text,
        remark: body.remark,
        updated_by: body.actor_id,
    };

    match server.update_flow(&FlowKey::from(flow_key.clone()), patch).await {
        Ok(flow) => (StatusCode::OK, Json(flow)).into_response(),
        Err(err) => {
            error!(%flow_key, %err, "Failed to update flow");
            api_error_response(&err)
        }
    }
}

/// Handler for the decoupled publish-status update
async fn publish_status_handler(
    State(server): State<Arc<FlowServer>>,
    Path(flow_key): Path<String>,
    Json(body): Json<PublishStatusBody>,
) -> impl IntoResponse {
    let published_at = match parse_timestamp(&body.published_at) {
        Ok(published_at) => published_at,
        Err(err) => return api_error_response(&err),
    };

    match server
        .update_publish_status(&FlowKey::from(flow_key.clone()), published_at)
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "message": "Publish status updated" })),
        )
            .into_response(),
        Err(err) => {
            error!(%flow_key, %err, "Failed to update publish status");
            api_error_response(&err)
        }
    }
}

/// Handler for disabling a flow (soft delete)
async fn delete_flow_handler(
    State(server): State<Arc<FlowServer>>,
    Path(flow_key): Path<String>,
) -> impl IntoResponse {
    match server.soft_delete_flow(&FlowKey::from(flow_key.clone())).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "message": "Flow disabled" }))).into_response(),
        Err(err) => {
            error!(%flow_key, %err, "Failed to disable flow");
            api_error_response(&err)
        }
    }
}

/// Handler for evicting one flow's cache entry
async fn clear_flow_cache_handler(
    State(server): State<Arc<FlowServer>>,
    Path(flow_key): Path<String>,
) -> impl IntoResponse {
    server.evict_cache(Some(&FlowKey::from(flow_key)));
    (StatusCode::OK, Json(json!({ "message": "Cache entry evicted" })))
}

/// Handler for clearing the whole cache
async fn clear_cache_handler(State(server): State<Arc<FlowServer>>) -> impl IntoResponse {
    server.evict_cache(None);
    (StatusCode::OK, Json(json!({ "message": "Cache cleared" })))
}

/// Handler for the authoring-tool upload endpoint
async fn upload_handler(
    State(server): State<Arc<FlowServer>>,
    headers: HeaderMap,
    Json(body): Json<UploadBody>,
) -> impl IntoResponse {
    let provided = headers
        .get("x-access-secret")
        .and_then(|value| value.to_str().ok());

    if let Err(err) = server.validate_upload_secret(provided) {
        return api_error_response(&err);
    }

    let record = UploadRecord {
        key: body.key,
        name: body.name,
        category: body.category,
        description: body.description,
        source: body.source_text,
        last_known_modified_at: body.last_known_modified_at,
        actor_id: body.actor_id,
        request_timestamp_ms: body.request_timestamp,
        publish: body.is_publish,
    };

    match server.reconcile_upload(record).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(err) => {
            error!(%err, "Failed to reconcile upload");
            api_error_response(&err)
        }
    }
}

/// Handler for generating a new upload access secret
async fn generate_secret_handler() -> impl IntoResponse {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    let secret: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();

    (
        StatusCode::OK,
        Json(AccessSecretResponse {
            access_secret: secret,
            usage: "Set UPLOAD_ACCESS_SECRET on the server and in the authoring tool".to_string(),
        }),
    )
}

/// Handler for the health check
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// Accepts RFC 3339 or the upload protocol's `YYYY-MM-DD HH:MM:SS` form
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ServerError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    Err(ServerError::ValidationError(format!(
        "Unparseable timestamp: {}",
        raw
    )))
}
