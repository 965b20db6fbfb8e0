//! Endpoints scoped to the authenticated caller.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use identity_store::{audit, users};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::principal::require_auth;
use super::state::AuthState;
use super::types::{AuditLogsResponse, AuditRowPayload, ProfileResponse, UserPayload};

const OWN_AUDIT_LIMIT: i64 = 50;

#[utoipa::path(
    get,
    path = "/auth/profile",
    responses(
        (status = 200, description = "Authenticated profile", body = ProfileResponse),
        (status = 401, description = "Unauthorized", body = String)
    ),
    tag = "auth"
)]
pub async fn profile(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool, &state).await {
        Ok(principal) => principal,
        Err(rejection) => return rejection.into_response(),
    };

    match users::find_user_by_id(&pool, principal.user_id).await {
        Ok(Some(user)) => (
            StatusCode::OK,
            Json(ProfileResponse {
                user: UserPayload::from(user.summary()),
            }),
        )
            .into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "User not found".to_string()).into_response(),
        Err(err) => {
            error!("Failed to load profile: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load profile".to_string(),
            )
                .into_response()
        }
    }
}

#[utoipa::path(
    get,
    path = "/auth/audit/me",
    responses(
        (status = 200, description = "Caller's recent audit trail", body = AuditLogsResponse),
        (status = 401, description = "Unauthorized", body = String)
    ),
    tag = "audit"
)]
pub async fn audit_me(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool, &state).await {
        Ok(principal) => principal,
        Err(rejection) => return rejection.into_response(),
    };

    match audit::recent_for_user(&pool, principal.user_id, OWN_AUDIT_LIMIT).await {
        Ok(rows) => (
            StatusCode::OK,
            Json(AuditLogsResponse {
                logs: rows.into_iter().map(AuditRowPayload::from).collect(),
            }),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to load own audit trail: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load audit trail".to_string(),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::test_support::{auth_state, lazy_pool};

    #[tokio::test]
    async fn profile_requires_auth() {
        let response = profile(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(auth_state()),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn audit_me_requires_auth() {
        let response = audit_me(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(auth_state()),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
