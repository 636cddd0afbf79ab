use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::collections::BTreeMap;
use std::sync::Arc;
use warden::error::ErrorResponse;
use warden::{ProbeRequest, WardenError};

use super::AppState;

/// Lowercase operation-name prefixes that may be invoked with GET.
const READ_ONLY_PREFIXES: [&str; 3] = ["get", "check", "list"];

fn is_read_only(operation: &str) -> bool {
    let op = operation.to_ascii_lowercase();
    READ_ONLY_PREFIXES.iter().any(|p| op.starts_with(p))
}

/// `POST|GET /v1.0/bindings/:character_type?operation=...`
///
/// The orchestrator reads the outcome from the body and the `status-code`
/// header, so a dispatched call always answers 200.
pub async fn invoke_binding(
    State(state): State<Arc<AppState>>,
    Path(character_type): Path<String>,
    method: Method,
    Query(mut params): Query<BTreeMap<String, String>>,
    body: Bytes,
) -> Response {
    let query_op = params.remove("operation").unwrap_or_default();

    let req = if method == Method::GET {
        if !is_read_only(&query_op) {
            return method_not_allowed(&query_op);
        }
        ProbeRequest {
            operation: query_op,
            metadata: params,
        }
    } else {
        let mut req = if body.is_empty() {
            ProbeRequest::default()
        } else {
            match serde_json::from_slice::<ProbeRequest>(&body) {
                Ok(r) => r,
                Err(e) => {
                    return WardenError::InvalidRequest(format!("malformed probe request: {}", e))
                        .into_response()
                }
            }
        };
        if req.operation.is_empty() {
            req.operation = query_op;
        }
        req
    };

    tracing::debug!(
        character_type = %character_type,
        operation = %req.operation,
        "[PROBE] binding invoked"
    );

    let resp = match state.dispatcher.invoke(Some(req)).await {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    for (key, value) in &resp.metadata {
        match (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!("[PROBE] dropping unrepresentable metadata {}={:?}", key, value),
        }
    }

    (StatusCode::OK, headers, resp.data).into_response()
}

fn method_not_allowed(operation: &str) -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(ErrorResponse {
            error: "method_not_allowed".to_string(),
            message: format!("operation {:?} must be invoked with POST", operation),
        }),
    )
        .into_response()
}
