//! Email verification: token issuance, consumption, and resend.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use identity_store::models::{AuditAction, AuditEntry};
use identity_store::oob_tokens::{self, ConsumeOutcome};
use identity_store::{audit, users};
use identity_token::OutOfBandKind;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::audit_client::AuditEvent;
use crate::mail::{OutgoingEmail, templates};

use super::state::EmailState;
use super::types::{
    MessageResponse, ResendVerificationRequest, SendVerificationRequest, VerifyEmailRequest,
};
use super::utils::{extract_client_ip, extract_user_agent, normalize_email, valid_email};

fn internal_error(message: &str) -> axum::response::Response {
    (StatusCode::INTERNAL_SERVER_ERROR, message.to_string()).into_response()
}

/// Mint a fresh verification token for the user and dispatch the mail.
/// Shared by the endpoint, resend, and nothing else; the caller owns the
/// user lookup.
async fn issue_and_send(
    pool: &PgPool,
    state: &EmailState,
    user_id: Uuid,
    email: &str,
) -> Result<(), axum::response::Response> {
    let now = state.now();
    let (token, expires_at) = state
        .oob()
        .mint(OutOfBandKind::Verification, user_id, now)
        .map_err(|err| {
            error!("Failed to mint verification token: {err}");
            internal_error("Failed to send verification email")
        })?;

    let store = async {
        let mut tx = pool.begin().await?;
        oob_tokens::replace_token(
            &mut tx,
            OutOfBandKind::Verification,
            user_id,
            &token,
            expires_at,
            now,
        )
        .await?;
        tx.commit().await?;
        anyhow::Ok(())
    };
    if let Err(err) = store.await {
        error!("Failed to store verification token: {err}");
        return Err(internal_error("Failed to send verification email"));
    }

    let link = state.config().verification_link(&token);
    let (subject, html) = templates::verification(&link, &templates::display_name(email));
    let mail = OutgoingEmail {
        to: email.to_string(),
        subject,
        html,
    };
    if let Err(err) = state.mailer().send(&mail, state.config().sender_header()).await {
        error!("Failed to dispatch verification mail: {err}");
        state.audit().record(
            AuditEvent::new("VERIFICATION_EMAIL_SENT", Some(user_id))
                .metadata(json!({ "email": email }))
                .failure("mail dispatch failed"),
        );
        return Err((
            StatusCode::BAD_GATEWAY,
            "Failed to send verification email".to_string(),
        )
            .into_response());
    }

    state.audit().record(
        AuditEvent::new("VERIFICATION_EMAIL_SENT", Some(user_id))
            .metadata(json!({ "email": email })),
    );
    Ok(())
}

#[utoipa::path(
    post,
    path = "/email/send-verification",
    request_body = SendVerificationRequest,
    responses(
        (status = 200, description = "Verification mail dispatched", body = MessageResponse),
        (status = 404, description = "Unknown user", body = String),
        (status = 502, description = "Mail dispatch failed", body = String)
    ),
    tag = "email"
)]
pub async fn send_verification(
    pool: Extension<PgPool>,
    state: Extension<Arc<EmailState>>,
    payload: Option<Json<SendVerificationRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "Invalid email address".to_string()).into_response();
    }

    match users::find_user_by_id(&pool, request.user_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return (StatusCode::NOT_FOUND, "User not found".to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to load user for verification mail: {err}");
            return internal_error("Failed to send verification email");
        }
    }

    if let Err(response) = issue_and_send(&pool, &state, request.user_id, &email).await {
        return response;
    }

    (
        StatusCode::OK,
        Json(MessageResponse {
            message: "Verification email sent".to_string(),
        }),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/email/verify-email",
    request_body = VerifyEmailRequest,
    responses(
        (status = 200, description = "Email verified", body = MessageResponse),
        (status = 400, description = "Invalid, expired or redundant token", body = String)
    ),
    tag = "email"
)]
pub async fn verify_email(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<EmailState>>,
    payload: Option<Json<VerifyEmailRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };
    let token = request.token.trim();
    if token.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing token".to_string()).into_response();
    }

    let now = state.now();
    let ip = extract_client_ip(&headers);
    let user_agent = extract_user_agent(&headers);

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to start verify-email transaction: {err}");
            return internal_error("Verification failed");
        }
    };

    let row = match oob_tokens::consume_token(
        &mut tx,
        OutOfBandKind::Verification,
        token,
        now,
        ip.as_deref(),
        user_agent.as_deref(),
    )
    .await
    {
        Ok(ConsumeOutcome::Consumed(row)) => row,
        Ok(ConsumeOutcome::NotFound | ConsumeOutcome::AlreadyUsed) => {
            let _ = tx.rollback().await;
            return (
                StatusCode::BAD_REQUEST,
                "Invalid verification token".to_string(),
            )
                .into_response();
        }
        Ok(ConsumeOutcome::Expired) => {
            if let Err(err) = tx.commit().await {
                error!("Failed to commit expired-verification cleanup: {err}");
            }
            return (
                StatusCode::BAD_REQUEST,
                "Verification token expired".to_string(),
            )
                .into_response();
        }
        Err(err) => {
            error!("Failed to consume verification token: {err}");
            let _ = tx.rollback().await;
            return internal_error("Verification failed");
        }
    };

    // Cross-check the signed claim against the stored row.
    match state.oob().verify(token, OutOfBandKind::Verification) {
        Ok(claims) if claims.sub == row.user_id => {}
        _ => {
            let _ = tx.rollback().await;
            return (
                StatusCode::BAD_REQUEST,
                "Invalid verification token".to_string(),
            )
                .into_response();
        }
    }

    let user = match users::lock_user_by_id(&mut tx, row.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            let _ = tx.rollback().await;
            return (
                StatusCode::BAD_REQUEST,
                "Invalid verification token".to_string(),
            )
                .into_response();
        }
        Err(err) => {
            error!("Failed to load user for verification: {err}");
            let _ = tx.rollback().await;
            return internal_error("Verification failed");
        }
    };

    if user.email_verified {
        // Consume the token anyway; it has no further use.
        if let Err(err) = tx.commit().await {
            error!("Failed to commit redundant verification: {err}");
        }
        return (
            StatusCode::BAD_REQUEST,
            "Email already verified".to_string(),
        )
            .into_response();
    }

    let apply = async {
        users::mark_email_verified(&mut tx, user.id, now).await?;
        let entry = AuditEntry::new(AuditAction::EmailVerified, Some(user.id))
            .resource("user")
            .metadata(json!({ "email": user.email }));
        audit::append_audit(&mut tx, &entry, now).await?;
        anyhow::Ok(())
    };
    if let Err(err) = apply.await {
        error!("Failed to verify email: {err}");
        let _ = tx.rollback().await;
        return internal_error("Verification failed");
    }

    if let Err(err) = tx.commit().await {
        error!("Failed to commit verification: {err}");
        return internal_error("Verification failed");
    }

    (
        StatusCode::OK,
        Json(MessageResponse {
            message: "Email verified".to_string(),
        }),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/email/resend-verification",
    request_body = ResendVerificationRequest,
    responses(
        (status = 200, description = "Verification mail re-sent", body = MessageResponse),
        (status = 400, description = "Already verified", body = String),
        (status = 404, description = "Unknown address", body = String)
    ),
    tag = "email"
)]
pub async fn resend_verification(
    pool: Extension<PgPool>,
    state: Extension<Arc<EmailState>>,
    payload: Option<Json<ResendVerificationRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "Invalid email address".to_string()).into_response();
    }

    let user = match users::find_user_by_email(&pool, &email).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return (StatusCode::NOT_FOUND, "User not found".to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to load user for resend: {err}");
            return internal_error("Failed to resend verification email");
        }
    };
    if user.email_verified {
        return (
            StatusCode::BAD_REQUEST,
            "Email already verified".to_string(),
        )
            .into_response();
    }

    if let Err(response) = issue_and_send(&pool, &state, user.id, &email).await {
        return response;
    }

    (
        StatusCode::OK,
        Json(MessageResponse {
            message: "Verification email sent".to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::email::test_support::{email_state, lazy_pool};

    #[tokio::test]
    async fn verify_email_missing_payload() {
        let response = verify_email(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(email_state()),
            None,
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn verify_email_empty_token() {
        let response = verify_email(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(email_state()),
            Some(Json(VerifyEmailRequest {
                token: " ".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn send_verification_rejects_bad_email() {
        let response = send_verification(
            Extension(lazy_pool()),
            Extension(email_state()),
            Some(Json(SendVerificationRequest {
                user_id: Uuid::new_v4(),
                email: "nope".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
