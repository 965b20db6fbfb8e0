//! Admin audit queries and the private ingestion endpoint for letero.

use axum::{
    Json,
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use identity_store::audit::{self, AuditFilter};
use identity_store::models::{AuditAction, AuditEntry};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::principal::require_admin;
use super::state::AuthState;
use super::types::{AuditPageResponse, AuditQueryParams, AuditRowPayload, InternalAuditRequest};

const INTERNAL_AUTH_HEADER: &str = "x-internal-auth";

#[utoipa::path(
    get,
    path = "/auth/admin/audit",
    params(AuditQueryParams),
    responses(
        (status = 200, description = "Filtered audit page", body = AuditPageResponse),
        (status = 400, description = "Unknown action filter", body = String),
        (status = 403, description = "Forbidden", body = String)
    ),
    tag = "admin"
)]
pub async fn admin_audit(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    params: Query<AuditQueryParams>,
) -> impl IntoResponse {
    if let Err(rejection) = require_admin(&headers, &pool, &state).await {
        return rejection.into_response();
    }

    let action = match params.action.as_deref() {
        None => None,
        Some(value) => match AuditAction::parse(value) {
            Some(action) => Some(action),
            None => {
                return (StatusCode::BAD_REQUEST, format!("Unknown action {value}"))
                    .into_response();
            }
        },
    };

    let filter = AuditFilter {
        user_id: params.user_id,
        action,
        success: params.success,
        from: params.from,
        to: params.to,
        page: params.page.unwrap_or(1),
        limit: params.limit.unwrap_or(20),
    }
    .normalize();

    match audit::query_audit(&pool, &filter).await {
        Ok(page) => {
            let total_pages = page.total_pages(filter.limit);
            (
                StatusCode::OK,
                Json(AuditPageResponse {
                    logs: page.rows.into_iter().map(AuditRowPayload::from).collect(),
                    total: page.total,
                    page: filter.page,
                    total_pages,
                }),
            )
                .into_response()
        }
        Err(err) => {
            error!("Failed to query audit rows: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to query audit log".to_string(),
            )
                .into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/auth/internal/audit-log",
    request_body = InternalAuditRequest,
    params(
        ("x-internal-auth" = String, Header, description = "Shared private-network secret")
    ),
    responses(
        (status = 201, description = "Row appended"),
        (status = 400, description = "Unknown action", body = String),
        (status = 401, description = "Bad or missing internal secret", body = String)
    ),
    tag = "internal"
)]
pub async fn internal_audit_log(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<InternalAuditRequest>>,
) -> impl IntoResponse {
    let presented = headers
        .get(INTERNAL_AUTH_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if presented.is_empty() || !state.internal_secret_matches(presented) {
        return (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()).into_response();
    }

    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };
    let Some(action) = AuditAction::parse(&request.action) else {
        return (
            StatusCode::BAD_REQUEST,
            format!("Unknown action {}", request.action),
        )
            .into_response();
    };

    let mut entry = AuditEntry::new(action, request.user_id);
    entry.performed_by = request.performed_by;
    entry.resource = request.resource;
    entry.ip_address = request.ip_address;
    entry.user_agent = request.user_agent;
    if let Some(metadata) = request.metadata {
        entry.metadata = metadata;
    }
    if let Some(success) = request.success {
        entry.success = success;
    }
    entry.error_message = request.error_message;

    // Best-effort by contract: the peer's domain action already happened.
    audit::record_audit(&pool, &entry, state.now()).await;

    StatusCode::CREATED.into_response()
}
