//! Password reset: request and application.
//!
//! Applying a reset is the strongest invalidation in the system: besides the
//! new hash, the user's token version is bumped, so every access and refresh
//! token issued before this instant dies, and all sessions are torn down.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use identity_store::models::{AuditAction, AuditEntry};
use identity_store::oob_tokens::{self, ConsumeOutcome};
use identity_store::{audit, begin_serializable, refresh_tokens, sessions, users};
use identity_token::OutOfBandKind;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use crate::audit_client::AuditEvent;
use crate::mail::{OutgoingEmail, templates};

use super::state::EmailState;
use super::types::{ForgotPasswordRequest, MessageResponse, ResetPasswordRequest};
use super::utils::{
    extract_client_ip, extract_user_agent, hash_password, normalize_email, valid_email,
};

/// Identical response whether or not the address exists.
const UNIFORM_MESSAGE: &str = "If the email exists, a reset link has been sent";
const MIN_PASSWORD_LENGTH: usize = 8;

fn internal_error(message: &str) -> axum::response::Response {
    (StatusCode::INTERNAL_SERVER_ERROR, message.to_string()).into_response()
}

fn uniform_ok() -> axum::response::Response {
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
    path = "/email/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Uniform acknowledgement", body = MessageResponse)
    ),
    tag = "email"
)]
pub async fn forgot_password(
    pool: Extension<PgPool>,
    state: Extension<Arc<EmailState>>,
    payload: Option<Json<ForgotPasswordRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        // Syntactically invalid input gets the uniform body too.
        return uniform_ok();
    }

    let user = match users::find_user_by_email(&pool, &email).await {
        Ok(Some(user)) => user,
        Ok(None) => return uniform_ok(),
        Err(err) => {
            error!("Failed to load user for password reset: {err}");
            return uniform_ok();
        }
    };

    let now = state.now();
    let (token, expires_at) = match state.oob().mint(OutOfBandKind::PasswordReset, user.id, now) {
        Ok(minted) => minted,
        Err(err) => {
            error!("Failed to mint reset token: {err}");
            return uniform_ok();
        }
    };

    let store = async {
        let mut tx = pool.begin().await?;
        oob_tokens::replace_token(
            &mut tx,
            OutOfBandKind::PasswordReset,
            user.id,
            &token,
            expires_at,
            now,
        )
        .await?;
        tx.commit().await?;
        anyhow::Ok(())
    };
    if let Err(err) = store.await {
        error!("Failed to store reset token: {err}");
        return uniform_ok();
    }

    state.audit().record(
        AuditEvent::new("PASSWORD_RESET_REQUESTED", Some(user.id))
            .metadata(json!({ "email": email })),
    );

    let link = state.config().reset_link(&token);
    let (subject, html) = templates::password_reset(&link, &templates::display_name(&email));
    let mail = OutgoingEmail {
        to: email.clone(),
        subject,
        html,
    };
    match state.mailer().send(&mail, state.config().sender_header()).await {
        Ok(()) => {
            state.audit().record(
                AuditEvent::new("RESET_EMAIL_SENT", Some(user.id))
                    .metadata(json!({ "email": email })),
            );
        }
        Err(err) => {
            // Still the uniform body: a dispatch error must not reveal that
            // the address exists.
            error!("Failed to dispatch reset mail: {err}");
            state.audit().record(
                AuditEvent::new("RESET_EMAIL_SENT", Some(user.id))
                    .metadata(json!({ "email": email }))
                    .failure("mail dispatch failed"),
            );
        }
    }

    uniform_ok()
}

#[utoipa::path(
    post,
    path = "/email/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password reset; every session terminated", body = MessageResponse),
        (status = 400, description = "Invalid, expired or used token", body = String)
    ),
    tag = "email"
)]
pub async fn reset_password(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<EmailState>>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };
    let token = request.token.trim();
    if token.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing token".to_string()).into_response();
    }
    if request.new_password.len() < MIN_PASSWORD_LENGTH {
        return (
            StatusCode::BAD_REQUEST,
            format!("Password must be at least {MIN_PASSWORD_LENGTH} characters"),
        )
            .into_response();
    }

    let now = state.now();
    let ip = extract_client_ip(&headers);
    let user_agent = extract_user_agent(&headers);

    let new_hash = match hash_password(&request.new_password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("Failed to hash new password: {err}");
            return internal_error("Password reset failed");
        }
    };

    let mut tx = match begin_serializable(&pool).await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to start reset transaction: {err}");
            return internal_error("Password reset failed");
        }
    };

    let row = match oob_tokens::consume_token(
        &mut tx,
        OutOfBandKind::PasswordReset,
        token,
        now,
        ip.as_deref(),
        user_agent.as_deref(),
    )
    .await
    {
        Ok(ConsumeOutcome::Consumed(row)) => row,
        Ok(ConsumeOutcome::NotFound) => {
            let _ = tx.rollback().await;
            return (StatusCode::BAD_REQUEST, "Invalid reset token".to_string()).into_response();
        }
        Ok(ConsumeOutcome::AlreadyUsed) => {
            let _ = tx.rollback().await;
            return (
                StatusCode::BAD_REQUEST,
                "Reset token already used".to_string(),
            )
                .into_response();
        }
        Ok(ConsumeOutcome::Expired) => {
            if let Err(err) = tx.commit().await {
                error!("Failed to commit expired-reset cleanup: {err}");
            }
            return (StatusCode::BAD_REQUEST, "Reset token expired".to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to consume reset token: {err}");
            let _ = tx.rollback().await;
            return internal_error("Password reset failed");
        }
    };

    match state.oob().verify(token, OutOfBandKind::PasswordReset) {
        Ok(claims) if claims.sub == row.user_id => {}
        _ => {
            let _ = tx.rollback().await;
            return (StatusCode::BAD_REQUEST, "Invalid reset token".to_string()).into_response();
        }
    }

    let apply = async {
        let user = users::lock_user_by_id(&mut tx, row.user_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("reset token references missing user"))?;
        // New hash, cleared lockout, epoch bump: everything issued before
        // this commit is now invalid.
        users::apply_password_reset(&mut tx, user.id, &new_hash, now).await?;
        let tokens = refresh_tokens::delete_refresh_tokens_for_user(&mut tx, user.id).await?;
        let session_count = sessions::deactivate_all_sessions(&mut tx, user.id).await?;
        let entry = AuditEntry::new(AuditAction::PasswordResetCompleted, Some(user.id))
            .resource("user")
            .metadata(json!({
                "revokedRefreshTokens": tokens,
                "terminatedSessions": session_count,
            }));
        audit::append_audit(&mut tx, &entry, now).await?;
        anyhow::Ok(())
    };
    if let Err(err) = apply.await {
        error!("Failed to apply password reset: {err}");
        let _ = tx.rollback().await;
        return internal_error("Password reset failed");
    }

    if let Err(err) = tx.commit().await {
        error!("Failed to commit password reset: {err}");
        return internal_error("Password reset failed");
    }

    (
        StatusCode::OK,
        Json(MessageResponse {
            message: "Password reset. Every existing session has been terminated; sign in again"
                .to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::email::test_support::{email_state, lazy_pool};

    #[tokio::test]
    async fn forgot_password_uniform_for_invalid_email() {
        let response = forgot_password(
            Extension(lazy_pool()),
            Extension(email_state()),
            Some(Json(ForgotPasswordRequest {
                email: "not-an-email".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn reset_password_rejects_short_password() {
        let response = reset_password(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(email_state()),
            Some(Json(ResetPasswordRequest {
                token: "tok".to_string(),
                new_password: "short".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn uniform_message_matches_contract() {
        assert_eq!(UNIFORM_MESSAGE, "If the email exists, a reset link has been sent");
    }
}
