//! Credential login: the lockout state machine plus token issuance.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use identity_store::models::{AuditAction, AuditEntry, User};
use identity_store::{audit, begin_serializable, users};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::state::AuthState;
use super::types::{LockedResponse, LoginRequest, LoginResponse, UserPayload};
use super::utils::{normalize_email, refresh_cookie, request_meta, verify_password};
use super::{lockout, session_issue};

fn internal_error() -> axum::response::Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string()).into_response()
}

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = String),
        (status = 403, description = "Email not verified", body = String),
        (status = 423, description = "Account locked", body = LockedResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let email = normalize_email(&request.email);
    let meta = request_meta(&headers);
    let now = state.now();

    // Password comparison and counter updates share one serializable
    // transaction with the user row locked, so concurrent failures observe
    // each other's increments.
    let mut tx = match begin_serializable(&pool).await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to start login transaction: {err}");
            return internal_error();
        }
    };

    let user = match users::lock_user_by_email(&mut tx, &email).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            let _ = tx.rollback().await;
            let entry = AuditEntry::new(AuditAction::LoginFailed, None)
                .request_meta(&meta)
                .metadata(json!({ "email": email, "reason": "user_not_found" }))
                .failure("user not found");
            audit::record_audit(&pool, &entry, now).await;
            return (StatusCode::UNAUTHORIZED, "Invalid credentials".to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to load user for login: {err}");
            let _ = tx.rollback().await;
            return internal_error();
        }
    };

    if !user.email_verified {
        let _ = tx.rollback().await;
        let entry = AuditEntry::new(AuditAction::LoginFailed, Some(user.id))
            .request_meta(&meta)
            .metadata(json!({ "reason": "email_not_verified" }))
            .failure("email not verified");
        audit::record_audit(&pool, &entry, now).await;
        return (StatusCode::FORBIDDEN, "Email not verified".to_string()).into_response();
    }

    let mut user = user;
    if lockout::is_locked(user.account_locked_until, now) {
        let locked_until = user.account_locked_until.unwrap_or(now);
        let _ = tx.rollback().await;
        let entry = AuditEntry::new(AuditAction::LoginFailed, Some(user.id))
            .request_meta(&meta)
            .metadata(json!({ "reason": "account_locked", "lockedUntil": locked_until }))
            .failure("account locked");
        audit::record_audit(&pool, &entry, now).await;
        return (
            StatusCode::LOCKED,
            Json(LockedResponse {
                message: "Account locked, try again later".to_string(),
                locked_until,
            }),
        )
            .into_response();
    }

    if lockout::lock_expired(user.account_locked_until, now) {
        if let Err(err) = users::update_lockout_state(&mut tx, user.id, 0, None, now).await {
            error!("Failed to clear expired lock: {err}");
            let _ = tx.rollback().await;
            return internal_error();
        }
        let entry = AuditEntry::new(AuditAction::AccountUnlocked, Some(user.id))
            .request_meta(&meta)
            .metadata(json!({ "reason": "lock_expired" }));
        if let Err(err) = audit::append_audit(&mut tx, &entry, now).await {
            error!("Failed to audit unlock: {err}");
            let _ = tx.rollback().await;
            return internal_error();
        }
        user.failed_login_attempts = 0;
        user.account_locked_until = None;
    }

    if !verify_password(&request.password, &user.password_hash) {
        return handle_wrong_password(tx, &user, &meta, now).await;
    }

    if let Err(err) = users::record_login_success(
        &mut tx,
        user.id,
        meta.ip_address.as_deref(),
        now,
    )
    .await
    {
        error!("Failed to record login success: {err}");
        let _ = tx.rollback().await;
        return internal_error();
    }

    let issued = match session_issue::issue_session(&mut tx, &state, &user, &meta, now).await {
        Ok(issued) => issued,
        Err(err) => {
            error!("Failed to issue session: {err}");
            let _ = tx.rollback().await;
            return internal_error();
        }
    };

    let entry = AuditEntry::new(AuditAction::UserLogin, Some(user.id))
        .resource("session")
        .request_meta(&meta)
        .metadata(json!({ "sessionId": issued.session_id }));
    if let Err(err) = audit::append_audit(&mut tx, &entry, now).await {
        error!("Failed to audit login: {err}");
        let _ = tx.rollback().await;
        return internal_error();
    }

    if let Err(err) = tx.commit().await {
        error!("Failed to commit login: {err}");
        return internal_error();
    }

    user.last_login_at = Some(now);

    let mut response_headers = HeaderMap::new();
    match refresh_cookie(
        state.config(),
        &issued.refresh_token,
        (issued.refresh_expires_at - now).num_seconds(),
    ) {
        Ok(cookie) => {
            response_headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => {
            error!("Failed to build refresh cookie: {err}");
            return internal_error();
        }
    }

    (
        StatusCode::OK,
        response_headers,
        Json(LoginResponse {
            access_token: issued.access_token,
            user: UserPayload::from(user.summary()),
        }),
    )
        .into_response()
}

async fn handle_wrong_password(
    mut tx: sqlx::Transaction<'_, sqlx::Postgres>,
    user: &User,
    meta: &identity_store::models::RequestMeta,
    now: chrono::DateTime<chrono::Utc>,
) -> axum::response::Response {
    let decision = lockout::register_failure(user.failed_login_attempts, now);

    if let Err(err) = users::update_lockout_state(
        &mut tx,
        user.id,
        decision.failed_attempts,
        decision.locked_until,
        now,
    )
    .await
    {
        error!("Failed to update lockout state: {err}");
        let _ = tx.rollback().await;
        return internal_error();
    }

    let entry = if let Some(locked_until) = decision.locked_until {
        AuditEntry::new(AuditAction::AccountLocked, Some(user.id))
            .request_meta(meta)
            .metadata(json!({
                "failedAttempts": decision.failed_attempts,
                "lockedUntil": locked_until,
            }))
    } else {
        AuditEntry::new(AuditAction::LoginFailed, Some(user.id))
            .request_meta(meta)
            .metadata(json!({
                "reason": "invalid_password",
                "failedAttempts": decision.failed_attempts,
            }))
            .failure("invalid password")
    };
    if let Err(err) = audit::append_audit(&mut tx, &entry, now).await {
        error!("Failed to audit failed login: {err}");
        let _ = tx.rollback().await;
        return internal_error();
    }

    if let Err(err) = tx.commit().await {
        error!("Failed to commit failed login: {err}");
        return internal_error();
    }

    if let Some(locked_until) = decision.locked_until {
        (
            StatusCode::LOCKED,
            Json(LockedResponse {
                message: "Account locked, try again later".to_string(),
                locked_until,
            }),
        )
            .into_response()
    } else {
        (StatusCode::UNAUTHORIZED, "Invalid credentials".to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::test_support::{auth_state, lazy_pool};

    #[tokio::test]
    async fn login_missing_payload() {
        let response = login(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(auth_state()),
            None,
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
