//! Session registry endpoints: list, selective and bulk revocation.

use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use identity_store::models::{AuditAction, AuditEntry};
use identity_store::{audit, refresh_tokens, sessions};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use super::principal::require_auth;
use super::state::AuthState;
use super::types::{RevokedResponse, SessionPayload, SessionsResponse};
use super::utils::{extract_cookie, request_meta};

fn internal_error(message: &str) -> axum::response::Response {
    (StatusCode::INTERNAL_SERVER_ERROR, message.to_string()).into_response()
}

#[utoipa::path(
    get,
    path = "/auth/sessions",
    responses(
        (status = 200, description = "Active sessions, most recent first", body = SessionsResponse),
        (status = 401, description = "Unauthorized", body = String)
    ),
    tag = "sessions"
)]
pub async fn list_sessions(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool, &state).await {
        Ok(principal) => principal,
        Err(rejection) => return rejection.into_response(),
    };

    let current_token = extract_cookie(&headers, state.config().cookie_name());
    match sessions::list_active_sessions(&pool, principal.user_id, state.now()).await {
        Ok(rows) => {
            let sessions = rows
                .iter()
                .map(|session| SessionPayload::from_session(session, current_token.as_deref()))
                .collect();
            (StatusCode::OK, Json(SessionsResponse { sessions })).into_response()
        }
        Err(err) => {
            error!("Failed to list sessions: {err}");
            internal_error("Failed to list sessions")
        }
    }
}

#[utoipa::path(
    delete,
    path = "/auth/sessions/{id}",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session revoked"),
        (status = 404, description = "Session not found", body = String)
    ),
    tag = "sessions"
)]
pub async fn revoke_session(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    Path(session_id): Path<Uuid>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool, &state).await {
        Ok(principal) => principal,
        Err(rejection) => return rejection.into_response(),
    };

    let meta = request_meta(&headers);
    let now = state.now();

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to start revoke transaction: {err}");
            return internal_error("Failed to revoke session");
        }
    };

    // Ownership is part of the lookup: someone else's session id yields the
    // same 404 as a nonexistent one.
    let session = match sessions::find_session_for_user(&mut tx, session_id, principal.user_id).await
    {
        Ok(Some(session)) => session,
        Ok(None) => {
            let _ = tx.rollback().await;
            return (StatusCode::NOT_FOUND, "Session not found".to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to load session for revocation: {err}");
            let _ = tx.rollback().await;
            return internal_error("Failed to revoke session");
        }
    };

    let revoke = async {
        refresh_tokens::delete_refresh_token(&mut tx, &session.refresh_token).await?;
        sessions::deactivate_session(&mut tx, session.id).await?;
        let entry = AuditEntry::new(AuditAction::SessionRevoked, Some(principal.user_id))
            .resource("session")
            .request_meta(&meta)
            .metadata(json!({ "sessionId": session.id }));
        audit::append_audit(&mut tx, &entry, now).await?;
        anyhow::Ok(())
    };
    if let Err(err) = revoke.await {
        error!("Failed to revoke session: {err}");
        let _ = tx.rollback().await;
        return internal_error("Failed to revoke session");
    }

    if let Err(err) = tx.commit().await {
        error!("Failed to commit session revocation: {err}");
        return internal_error("Failed to revoke session");
    }

    StatusCode::OK.into_response()
}

#[utoipa::path(
    post,
    path = "/auth/sessions/logout-other-devices",
    responses(
        (status = 200, description = "Other sessions revoked", body = RevokedResponse),
        (status = 401, description = "Unauthorized", body = String)
    ),
    tag = "sessions"
)]
pub async fn logout_other_devices(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool, &state).await {
        Ok(principal) => principal,
        Err(rejection) => return rejection.into_response(),
    };

    let Some(current_token) = extract_cookie(&headers, state.config().cookie_name()) else {
        return (
            StatusCode::UNAUTHORIZED,
            "Refresh token missing".to_string(),
        )
            .into_response();
    };

    let meta = request_meta(&headers);
    let now = state.now();

    let result = async {
        let mut tx = pool.begin().await?;
        let revoked =
            refresh_tokens::delete_other_refresh_tokens(&mut tx, principal.user_id, &current_token)
                .await?;
        sessions::deactivate_other_sessions(&mut tx, principal.user_id, &current_token).await?;
        let entry = AuditEntry::new(AuditAction::UserLogoutOtherDevices, Some(principal.user_id))
            .resource("session")
            .request_meta(&meta)
            .metadata(json!({ "revokedCount": revoked }));
        audit::append_audit(&mut tx, &entry, now).await?;
        tx.commit().await?;
        anyhow::Ok(revoked)
    };

    match result.await {
        Ok(revoked_count) => (
            StatusCode::OK,
            Json(RevokedResponse {
                message: "Other sessions revoked".to_string(),
                revoked_count,
            }),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to revoke other sessions: {err}");
            internal_error("Failed to revoke sessions")
        }
    }
}

#[utoipa::path(
    post,
    path = "/auth/sessions/logout-all-devices",
    responses(
        (status = 200, description = "All sessions revoked", body = RevokedResponse),
        (status = 401, description = "Unauthorized", body = String)
    ),
    tag = "sessions"
)]
pub async fn logout_all_devices(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool, &state).await {
        Ok(principal) => principal,
        Err(rejection) => return rejection.into_response(),
    };

    let meta = request_meta(&headers);
    let now = state.now();

    let result = async {
        let mut tx = pool.begin().await?;
        let revoked =
            refresh_tokens::delete_refresh_tokens_for_user(&mut tx, principal.user_id).await?;
        sessions::deactivate_all_sessions(&mut tx, principal.user_id).await?;
        let entry = AuditEntry::new(AuditAction::UserLogoutAllDevices, Some(principal.user_id))
            .resource("session")
            .request_meta(&meta)
            .metadata(json!({ "revokedCount": revoked }));
        audit::append_audit(&mut tx, &entry, now).await?;
        tx.commit().await?;
        anyhow::Ok(revoked)
    };

    match result.await {
        Ok(revoked_count) => (
            StatusCode::OK,
            Json(RevokedResponse {
                message: "All sessions revoked".to_string(),
                revoked_count,
            }),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to revoke all sessions: {err}");
            internal_error("Failed to revoke sessions")
        }
    }
}
