//! Passwordless magic-link flow: request (with silent signup) and redemption.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use identity_store::models::{AuditAction, AuditEntry, Role, User};
use identity_store::oob_tokens::{self, ConsumeOutcome};
use identity_store::{audit, begin_serializable, users};
use identity_token::OutOfBandKind;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::state::AuthState;
use super::types::{
    LockedResponse, LoginResponse, MagicLinkRequestBody, MagicLinkVerifyRequest, MessageResponse,
    UserPayload,
};
use super::utils::{generate_unusable_password, normalize_email, refresh_cookie, request_meta, valid_email};
use super::{lockout, session_issue};

/// The response is identical for new and existing accounts.
const UNIFORM_MESSAGE: &str = "If the email address is valid, a magic link has been sent";

fn internal_error(message: &str) -> axum::response::Response {
    (StatusCode::INTERNAL_SERVER_ERROR, message.to_string()).into_response()
}

#[utoipa::path(
    post,
    path = "/auth/magic-link/request",
    request_body = MagicLinkRequestBody,
    responses(
        (status = 200, description = "Uniform acknowledgement", body = MessageResponse),
        (status = 423, description = "Account locked", body = LockedResponse)
    ),
    tag = "auth"
)]
pub async fn magic_link_request(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<MagicLinkRequestBody>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "Invalid email address".to_string()).into_response();
    }

    let meta = request_meta(&headers);
    let now = state.now();

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to start magic-link transaction: {err}");
            return internal_error("Magic link request failed");
        }
    };

    // First touch silently creates an unverified account; the caller cannot
    // tell which branch ran.
    let (user, is_new_user) = match users::lock_user_by_email(&mut tx, &email).await {
        Ok(Some(user)) => (user, false),
        Ok(None) => {
            let password_hash = match generate_unusable_password() {
                Ok(hash) => hash,
                Err(err) => {
                    error!("Failed to generate placeholder credential: {err}");
                    let _ = tx.rollback().await;
                    return internal_error("Magic link request failed");
                }
            };
            match users::create_user(&mut tx, &email, &password_hash, Role::User, now).await {
                Ok(users::CreateUserOutcome::Created(user)) => {
                    let entry = AuditEntry::new(AuditAction::UserRegister, Some(user.id))
                        .resource("user")
                        .request_meta(&meta)
                        .metadata(json!({ "via": "magic_link" }));
                    if let Err(err) = audit::append_audit(&mut tx, &entry, now).await {
                        error!("Failed to audit magic-link signup: {err}");
                        let _ = tx.rollback().await;
                        return internal_error("Magic link request failed");
                    }
                    (user, true)
                }
                Ok(users::CreateUserOutcome::EmailTaken) => {
                    // Lost a race with a concurrent signup. The unique
                    // violation aborted this transaction; restart and treat
                    // the address as existing.
                    let _ = tx.rollback().await;
                    tx = match pool.begin().await {
                        Ok(tx) => tx,
                        Err(err) => {
                            error!("Failed to restart magic-link transaction: {err}");
                            return internal_error("Magic link request failed");
                        }
                    };
                    match users::lock_user_by_email(&mut tx, &email).await {
                        Ok(Some(user)) => (user, false),
                        _ => {
                            let _ = tx.rollback().await;
                            return internal_error("Magic link request failed");
                        }
                    }
                }
                Err(err) => {
                    error!("Failed to create magic-link user: {err}");
                    let _ = tx.rollback().await;
                    return internal_error("Magic link request failed");
                }
            }
        }
        Err(err) => {
            error!("Failed to load user for magic link: {err}");
            let _ = tx.rollback().await;
            return internal_error("Magic link request failed");
        }
    };

    if lockout::is_locked(user.account_locked_until, now) {
        let locked_until = user.account_locked_until.unwrap_or(now);
        let _ = tx.rollback().await;
        let entry = AuditEntry::new(AuditAction::MagicLinkFailed, Some(user.id))
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

    let (token, expires_at) = match state.oob().mint(OutOfBandKind::MagicLink, user.id, now) {
        Ok(minted) => minted,
        Err(err) => {
            error!("Failed to mint magic-link token: {err}");
            let _ = tx.rollback().await;
            return internal_error("Magic link request failed");
        }
    };
    if let Err(err) = oob_tokens::replace_token(
        &mut tx,
        OutOfBandKind::MagicLink,
        user.id,
        &token,
        expires_at,
        now,
    )
    .await
    {
        error!("Failed to store magic-link token: {err}");
        let _ = tx.rollback().await;
        return internal_error("Magic link request failed");
    }

    let entry = AuditEntry::new(AuditAction::MagicLinkRequested, Some(user.id))
        .request_meta(&meta)
        .metadata(json!({ "isNewUser": is_new_user }));
    if let Err(err) = audit::append_audit(&mut tx, &entry, now).await {
        error!("Failed to audit magic-link request: {err}");
        let _ = tx.rollback().await;
        return internal_error("Magic link request failed");
    }

    if let Err(err) = tx.commit().await {
        error!("Failed to commit magic-link request: {err}");
        return internal_error("Magic link request failed");
    }

    if let Err(err) = state
        .email()
        .send_magic_link(user.id, &user.email, &token, is_new_user)
        .await
    {
        error!("Failed to dispatch magic link: {err}");
        let entry = AuditEntry::new(AuditAction::MagicLinkFailed, Some(user.id))
            .request_meta(&meta)
            .metadata(json!({ "reason": "dispatch_failed" }))
            .failure("mail dispatch failed");
        audit::record_audit(&pool, &entry, now).await;
        return (
            StatusCode::BAD_GATEWAY,
            "Failed to send magic link".to_string(),
        )
            .into_response();
    }

    let entry = AuditEntry::new(AuditAction::MagicLinkSent, Some(user.id))
        .request_meta(&meta)
        .metadata(json!({ "isNewUser": is_new_user }));
    audit::record_audit(&pool, &entry, now).await;

    (
        StatusCode::OK,
        Json(MessageResponse {
            message: UNIFORM_MESSAGE.to_string(),
        }),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/auth/magic-link/verify",
    request_body = MagicLinkVerifyRequest,
    responses(
        (status = 200, description = "Authenticated", body = LoginResponse),
        (status = 400, description = "Invalid, used or expired link", body = String),
        (status = 423, description = "Account locked", body = LockedResponse)
    ),
    tag = "auth"
)]
pub async fn magic_link_verify(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<MagicLinkVerifyRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };
    let token = request.token.trim();
    if token.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing token".to_string()).into_response();
    }

    let meta = request_meta(&headers);
    let now = state.now();

    let mut tx = match begin_serializable(&pool).await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to start magic-link verify transaction: {err}");
            return internal_error("Magic link login failed");
        }
    };

    let row = match oob_tokens::consume_token(
        &mut tx,
        OutOfBandKind::MagicLink,
        token,
        now,
        meta.ip_address.as_deref(),
        meta.user_agent.as_deref(),
    )
    .await
    {
        Ok(ConsumeOutcome::Consumed(row)) => row,
        Ok(ConsumeOutcome::NotFound) => {
            let _ = tx.rollback().await;
            return (StatusCode::BAD_REQUEST, "Invalid magic link".to_string()).into_response();
        }
        Ok(ConsumeOutcome::AlreadyUsed) => {
            let _ = tx.rollback().await;
            let entry = AuditEntry::new(AuditAction::MagicLinkFailed, None)
                .request_meta(&meta)
                .metadata(json!({ "reason": "already_used" }))
                .failure("magic link already used");
            audit::record_audit(&pool, &entry, now).await;
            return (
                StatusCode::BAD_REQUEST,
                "Magic link already used".to_string(),
            )
                .into_response();
        }
        Ok(ConsumeOutcome::Expired) => {
            // Keep the row deletion even though the login fails.
            if let Err(err) = tx.commit().await {
                error!("Failed to commit expired magic-link cleanup: {err}");
            }
            let entry = AuditEntry::new(AuditAction::MagicLinkFailed, None)
                .request_meta(&meta)
                .metadata(json!({ "reason": "expired" }))
                .failure("magic link expired");
            audit::record_audit(&pool, &entry, now).await;
            return (StatusCode::BAD_REQUEST, "Magic link expired".to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to consume magic-link token: {err}");
            let _ = tx.rollback().await;
            return internal_error("Magic link login failed");
        }
    };

    // Cross-check the signed claim against the stored row.
    match state.oob().verify(token, OutOfBandKind::MagicLink) {
        Ok(claims) if claims.sub == row.user_id => {}
        _ => {
            let _ = tx.rollback().await;
            return (StatusCode::BAD_REQUEST, "Invalid magic link".to_string()).into_response();
        }
    }

    let user = match users::lock_user_by_id(&mut tx, row.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            let _ = tx.rollback().await;
            return (StatusCode::BAD_REQUEST, "Invalid magic link".to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to load user for magic link: {err}");
            let _ = tx.rollback().await;
            return internal_error("Magic link login failed");
        }
    };

    if lockout::is_locked(user.account_locked_until, now) {
        let locked_until = user.account_locked_until.unwrap_or(now);
        let _ = tx.rollback().await;
        let entry = AuditEntry::new(AuditAction::MagicLinkFailed, Some(user.id))
            .request_meta(&meta)
            .metadata(json!({ "reason": "account_locked" }))
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

    let finish = async {
        // Possession of the link proves control of the mailbox.
        users::mark_email_verified(&mut tx, user.id, now).await?;
        users::record_login_success(&mut tx, user.id, meta.ip_address.as_deref(), now).await?;
        let issued = session_issue::issue_session(&mut tx, &state, &user, &meta, now).await?;
        let entry = AuditEntry::new(AuditAction::MagicLinkLogin, Some(user.id))
            .resource("session")
            .request_meta(&meta)
            .metadata(json!({ "sessionId": issued.session_id }));
        audit::append_audit(&mut tx, &entry, now).await?;
        anyhow::Ok(issued)
    };
    let issued = match finish.await {
        Ok(issued) => issued,
        Err(err) => {
            error!("Failed to complete magic-link login: {err}");
            let _ = tx.rollback().await;
            return internal_error("Magic link login failed");
        }
    };

    if let Err(err) = tx.commit().await {
        error!("Failed to commit magic-link login: {err}");
        return internal_error("Magic link login failed");
    }

    let mut refreshed: User = user;
    refreshed.email_verified = true;
    refreshed.last_login_at = Some(now);

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
            return internal_error("Magic link login failed");
        }
    }

    (
        StatusCode::OK,
        response_headers,
        Json(LoginResponse {
            access_token: issued.access_token,
            user: UserPayload::from(refreshed.summary()),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::test_support::{auth_state, lazy_pool};

    #[tokio::test]
    async fn request_missing_payload() {
        let response = magic_link_request(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(auth_state()),
            None,
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn request_rejects_invalid_email() {
        let response = magic_link_request(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(auth_state()),
            Some(Json(MagicLinkRequestBody {
                email: "not-an-email".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn verify_rejects_empty_token() {
        let response = magic_link_verify(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(auth_state()),
            Some(Json(MagicLinkVerifyRequest {
                token: "  ".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn uniform_message_has_no_account_hints() {
        assert!(!UNIFORM_MESSAGE.contains("new"));
        assert!(!UNIFORM_MESSAGE.contains("exist"));
    }
}
