//! Refresh-token rotation and logout.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use identity_store::models::{AuditAction, AuditEntry};
use identity_store::{audit, begin_serializable, refresh_tokens, sessions, users};
use identity_token::{Error as TokenError, TokenKind};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::state::AuthState;
use super::types::{MessageResponse, RefreshResponse};
use super::utils::{clear_refresh_cookie, extract_cookie, refresh_cookie, request_meta};

fn internal_error(message: &str) -> axum::response::Response {
    (StatusCode::INTERNAL_SERVER_ERROR, message.to_string()).into_response()
}

/// 401 with the cookie cleared; a dead refresh token should not be resent.
fn rejected(state: &AuthState, message: &str) -> axum::response::Response {
    let mut headers = HeaderMap::new();
    if let Ok(cookie) = clear_refresh_cookie(state.config()) {
        headers.insert(SET_COOKIE, cookie);
    }
    (StatusCode::UNAUTHORIZED, headers, message.to_string()).into_response()
}

#[utoipa::path(
    post,
    path = "/auth/refresh",
    responses(
        (status = 200, description = "Rotated", body = RefreshResponse),
        (status = 401, description = "Missing, unknown or invalidated refresh token", body = String)
    ),
    tag = "auth"
)]
pub async fn refresh(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let Some(presented) = extract_cookie(&headers, state.config().cookie_name()) else {
        return (
            StatusCode::UNAUTHORIZED,
            "Refresh token missing".to_string(),
        )
            .into_response();
    };

    let meta = request_meta(&headers);
    let now = state.now();

    let mut tx = match begin_serializable(&pool).await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to start refresh transaction: {err}");
            return internal_error("Refresh failed");
        }
    };

    // The stored row is authoritative; rotation deletes it, so a replayed
    // token can never pass this lookup twice.
    let row = match refresh_tokens::lock_refresh_token(&mut tx, &presented).await {
        Ok(Some(row)) => row,
        Ok(None) => {
            let _ = tx.rollback().await;
            return rejected(&state, "Invalid or expired token");
        }
        Err(err) => {
            error!("Failed to load refresh token: {err}");
            let _ = tx.rollback().await;
            return internal_error("Refresh failed");
        }
    };

    if row.expires_at < now {
        let expired = async {
            refresh_tokens::delete_refresh_token(&mut tx, &presented).await?;
            sessions::deactivate_session_by_token(&mut tx, &presented).await?;
            anyhow::Ok(())
        };
        if let Err(err) = expired.await {
            error!("Failed to clean up expired refresh token: {err}");
            let _ = tx.rollback().await;
            return internal_error("Refresh failed");
        }
        if let Err(err) = tx.commit().await {
            error!("Failed to commit expired-token cleanup: {err}");
            return internal_error("Refresh failed");
        }
        return rejected(&state, "Invalid or expired token");
    }

    let user = match users::lock_user_by_id(&mut tx, row.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            let _ = tx.rollback().await;
            return rejected(&state, "User not found");
        }
        Err(err) => {
            error!("Failed to load user for refresh: {err}");
            let _ = tx.rollback().await;
            return internal_error("Refresh failed");
        }
    };

    // Signature first, then the epoch: a token from before the last password
    // reset carries a stale version and is hard-invalidated here.
    let invalidated = match state.codec().verify(&presented, TokenKind::Refresh) {
        Ok(claims) => claims.token_version != user.token_version,
        Err(TokenError::Expired) => false,
        Err(_) => true,
    };
    if invalidated {
        let cleanup = async {
            refresh_tokens::delete_refresh_token(&mut tx, &presented).await?;
            sessions::deactivate_session_by_token(&mut tx, &presented).await?;
            anyhow::Ok(())
        };
        if let Err(err) = cleanup.await {
            error!("Failed to clean up invalidated refresh token: {err}");
            let _ = tx.rollback().await;
            return internal_error("Refresh failed");
        }
        if let Err(err) = tx.commit().await {
            error!("Failed to commit invalidated-token cleanup: {err}");
            return internal_error("Refresh failed");
        }
        return rejected(&state, "Session expired, please log in again");
    }

    // Rotation: replace the credential, keep the session row and its device
    // context. Exactly one active session remains, owning the new token.
    let (new_refresh, new_expires) = match state.codec().sign(
        TokenKind::Refresh,
        user.id,
        user.role.as_str(),
        user.token_version,
        now,
    ) {
        Ok(signed) => signed,
        Err(err) => {
            error!("Failed to sign refresh token: {err}");
            let _ = tx.rollback().await;
            return internal_error("Refresh failed");
        }
    };
    let (access_token, _) = match state.codec().sign(
        TokenKind::Access,
        user.id,
        user.role.as_str(),
        user.token_version,
        now,
    ) {
        Ok(signed) => signed,
        Err(err) => {
            error!("Failed to sign access token: {err}");
            let _ = tx.rollback().await;
            return internal_error("Refresh failed");
        }
    };

    let rotate = async {
        refresh_tokens::delete_refresh_token(&mut tx, &presented).await?;
        refresh_tokens::insert_refresh_token(&mut tx, user.id, &new_refresh, new_expires, now)
            .await?;
        match sessions::find_session_by_refresh_token(&mut tx, &presented).await? {
            Some(session) => {
                sessions::rotate_session_token(&mut tx, session.id, &new_refresh, new_expires, now)
                    .await?;
            }
            None => {
                // Session row lost (e.g. swept); recreate it so revocation
                // keeps working for this login.
                sessions::insert_session(&mut tx, user.id, &new_refresh, new_expires, &meta, now)
                    .await?;
            }
        }
        let entry = AuditEntry::new(AuditAction::TokenRefreshed, Some(user.id))
            .resource("session")
            .request_meta(&meta);
        audit::append_audit(&mut tx, &entry, now).await?;
        anyhow::Ok(())
    };
    if let Err(err) = rotate.await {
        error!("Failed to rotate refresh token: {err}");
        let _ = tx.rollback().await;
        return internal_error("Refresh failed");
    }

    if let Err(err) = tx.commit().await {
        error!("Failed to commit refresh rotation: {err}");
        return internal_error("Refresh failed");
    }

    let mut response_headers = HeaderMap::new();
    match refresh_cookie(state.config(), &new_refresh, (new_expires - now).num_seconds()) {
        Ok(cookie) => {
            response_headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => {
            error!("Failed to build refresh cookie: {err}");
            return internal_error("Refresh failed");
        }
    }

    (
        StatusCode::OK,
        response_headers,
        Json(RefreshResponse { access_token }),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logged out; idempotent", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let now = state.now();
    let meta = request_meta(&headers);

    if let Some(presented) = extract_cookie(&headers, state.config().cookie_name()) {
        let result = async {
            let mut tx = pool.begin().await?;
            refresh_tokens::delete_refresh_token(&mut tx, &presented).await?;
            let user_id = sessions::deactivate_session_by_token(&mut tx, &presented).await?;
            if let Some(user_id) = user_id {
                let entry = AuditEntry::new(AuditAction::UserLogout, Some(user_id))
                    .resource("session")
                    .request_meta(&meta)
                    .metadata(json!({}));
                audit::append_audit(&mut tx, &entry, now).await?;
            }
            tx.commit().await?;
            anyhow::Ok(())
        };
        // Logout stays 200 even when cleanup fails; the cookie is cleared and
        // the sweeper will reap the leftovers.
        if let Err(err) = result.await {
            error!("Failed to tear down session on logout: {err}");
        }
    }

    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_refresh_cookie(state.config()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (
        StatusCode::OK,
        response_headers,
        Json(MessageResponse {
            message: "Logged out".to_string(),
        }),
    )
        .into_response()
}
