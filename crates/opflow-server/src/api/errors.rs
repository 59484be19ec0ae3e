//! Error handling for the Opflow Server API
//!
//! This module contains standardized error handling for the API.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::error::ServerError;

/// General error response handler for API errors.
/// Converts a server error into a standardized API error response.
pub fn api_error_response(err: &ServerError) -> axum::response::Response {
    let (status_code, error_code) = match err {
        ServerError::NotFound(_) => (StatusCode::NOT_FOUND, "ERR_NOT_FOUND"),
        ServerError::Conflict(_) => (StatusCode::CONFLICT, "ERR_CONFLICT"),
        ServerError::ValidationError(_) => (StatusCode::BAD_REQUEST, "ERR_VALIDATION_ERROR"),
        ServerError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "ERR_UNAUTHORIZED"),
        ServerError::Expired(_) => (StatusCode::UNAUTHORIZED, "ERR_REQUEST_EXPIRED"),
        ServerError::CompileError(_) => (StatusCode::UNPROCESSABLE_ENTITY, "ERR_FLOW_COMPILE"),
        ServerError::ExecutionTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "ERR_FLOW_TIMEOUT"),
        ServerError::ExecutionError(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "ERR_FLOW_EXECUTION")
        }
        ServerError::ConfigError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ERR_CONFIG_ERROR"),
        ServerError::InternalError(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "ERR_INTERNAL_SERVER_ERROR")
        }
    };

    let error_message = err.to_string();
    let error_response = json!({
        "error": error_message,
        "errorDetails": {
            "errorCode": error_code,
            "errorMessage": error_message,
        }
    });

    (status_code, Json(error_response)).into_response()
}
