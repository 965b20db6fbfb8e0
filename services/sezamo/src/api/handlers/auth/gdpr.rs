//! GDPR rights: export, anonymization, email change, permanent deletion.

use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use identity_store::models::{AuditAction, AuditEntry};
use identity_store::{audit, oob_tokens, refresh_tokens, sessions, users};
use identity_token::OutOfBandKind;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use super::principal::{require_admin, require_auth};
use super::state::AuthState;
use super::types::{AnonymizeRequest, MessageResponse, UpdateEmailRequest};
use super::utils::{normalize_email, request_meta, valid_email, verify_password};

const ANONYMIZE_CONFIRMATION: &str = "ANONYMIZE_MY_DATA";

fn internal_error(message: &str) -> axum::response::Response {
    (StatusCode::INTERNAL_SERVER_ERROR, message.to_string()).into_response()
}

#[utoipa::path(
    get,
    path = "/auth/gdpr/export",
    responses(
        (status = 200, description = "Right-of-access export as a JSON attachment"),
        (status = 401, description = "Unauthorized", body = String)
    ),
    tag = "gdpr"
)]
pub async fn export_data(
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

    let gather = async {
        let user = users::find_user_by_id(&pool, principal.user_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("user vanished mid-export"))?;
        let sessions = sessions::list_all_sessions(&pool, principal.user_id).await?;
        let audit_rows = audit::all_for_user(&pool, principal.user_id).await?;
        let token_meta = refresh_tokens::list_refresh_token_metadata(&pool, principal.user_id).await?;
        anyhow::Ok((user, sessions, audit_rows, token_meta))
    };

    let (user, session_rows, audit_rows, token_meta) = match gather.await {
        Ok(data) => data,
        Err(err) => {
            error!("Failed to gather export data: {err}");
            return internal_error("Export failed");
        }
    };

    // Profile without the credential hash; refresh tokens as ids and
    // lifetimes only, never values.
    let document = json!({
        "exportedAt": now,
        "profile": {
            "id": user.id,
            "email": user.email,
            "role": user.role.as_str(),
            "emailVerified": user.email_verified,
            "createdAt": user.created_at,
            "updatedAt": user.updated_at,
            "lastLoginAt": user.last_login_at,
            "lastLoginIp": user.last_login_ip,
        },
        "sessions": session_rows.iter().map(|session| json!({
            "id": session.id,
            "browser": session.browser,
            "os": session.os,
            "deviceType": session.device_type,
            "ipAddress": session.ip_address,
            "isActive": session.is_active,
            "createdAt": session.created_at,
            "lastActivityAt": session.last_activity_at,
            "expiresAt": session.expires_at,
        })).collect::<Vec<_>>(),
        "auditLogs": audit_rows,
        "refreshTokens": token_meta.iter().map(|(id, created_at, expires_at)| json!({
            "id": id,
            "createdAt": created_at,
            "expiresAt": expires_at,
        })).collect::<Vec<_>>(),
    });

    let entry = AuditEntry::new(AuditAction::UserDataExported, Some(principal.user_id))
        .resource("user")
        .request_meta(&meta);
    audit::record_audit(&pool, &entry, now).await;

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"export-{}.json\"", principal.user_id),
            ),
        ],
        Json(document),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/auth/gdpr/anonymize",
    request_body = AnonymizeRequest,
    responses(
        (status = 200, description = "Account anonymized", body = MessageResponse),
        (status = 400, description = "Missing confirmation literal", body = String),
        (status = 401, description = "Wrong password", body = String)
    ),
    tag = "gdpr"
)]
pub async fn anonymize(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<AnonymizeRequest>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool, &state).await {
        Ok(principal) => principal,
        Err(rejection) => return rejection.into_response(),
    };

    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };
    if request.confirmation != ANONYMIZE_CONFIRMATION {
        return (
            StatusCode::BAD_REQUEST,
            format!("Confirmation literal {ANONYMIZE_CONFIRMATION} required"),
        )
            .into_response();
    }

    let meta = request_meta(&headers);
    let now = state.now();

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to start anonymize transaction: {err}");
            return internal_error("Anonymization failed");
        }
    };

    let user = match users::lock_user_by_id(&mut tx, principal.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            let _ = tx.rollback().await;
            return (StatusCode::NOT_FOUND, "User not found".to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to load user for anonymization: {err}");
            let _ = tx.rollback().await;
            return internal_error("Anonymization failed");
        }
    };

    if !verify_password(&request.password, &user.password_hash) {
        let _ = tx.rollback().await;
        return (StatusCode::UNAUTHORIZED, "Invalid credentials".to_string()).into_response();
    }

    let apply = async {
        // The final row is written first, then scrubbed together with the
        // rest of the trail.
        let entry = AuditEntry::new(AuditAction::UserDataAnonymized, Some(user.id))
            .resource("user")
            .request_meta(&meta);
        audit::append_audit(&mut tx, &entry, now).await?;
        audit::anonymize_audit_rows(&mut tx, user.id).await?;
        sessions::delete_sessions_for_user(&mut tx, user.id).await?;
        refresh_tokens::delete_refresh_tokens_for_user(&mut tx, user.id).await?;
        oob_tokens::delete_all_for_user(&mut tx, user.id).await?;
        users::anonymize_user(&mut tx, user.id, now).await?;
        anyhow::Ok(())
    };
    if let Err(err) = apply.await {
        error!("Failed to anonymize user: {err}");
        let _ = tx.rollback().await;
        return internal_error("Anonymization failed");
    }

    if let Err(err) = tx.commit().await {
        error!("Failed to commit anonymization: {err}");
        return internal_error("Anonymization failed");
    }

    (
        StatusCode::OK,
        Json(MessageResponse {
            message: "Account anonymized; all sessions and tokens removed".to_string(),
        }),
    )
        .into_response()
}

#[utoipa::path(
    patch,
    path = "/auth/gdpr/update-email",
    request_body = UpdateEmailRequest,
    responses(
        (status = 200, description = "Address updated; verification pending", body = MessageResponse),
        (status = 409, description = "Address already in use", body = String),
        (status = 502, description = "Verification mail dispatch failed", body = String)
    ),
    tag = "gdpr"
)]
pub async fn update_email(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<UpdateEmailRequest>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool, &state).await {
        Ok(principal) => principal,
        Err(rejection) => return rejection.into_response(),
    };

    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };
    let new_email = normalize_email(&request.new_email);
    if !valid_email(&new_email) {
        return (StatusCode::BAD_REQUEST, "Invalid email address".to_string()).into_response();
    }
    let old_email = principal.email.clone();
    if new_email == normalize_email(&old_email) {
        return (
            StatusCode::BAD_REQUEST,
            "New address matches the current one".to_string(),
        )
            .into_response();
    }

    let meta = request_meta(&headers);
    let now = state.now();

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to start email-update transaction: {err}");
            return internal_error("Email update failed");
        }
    };

    let apply = async {
        // Pending verification links target the old address; drop them.
        oob_tokens::delete_unused_for_user(&mut tx, OutOfBandKind::Verification, principal.user_id)
            .await?;
        let outcome = users::update_email(&mut tx, principal.user_id, &new_email, now).await?;
        anyhow::Ok(outcome)
    };
    let outcome = match apply.await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!("Failed to update email: {err}");
            let _ = tx.rollback().await;
            return internal_error("Email update failed");
        }
    };

    if matches!(outcome, users::UpdateEmailOutcome::EmailTaken) {
        let _ = tx.rollback().await;
        return (StatusCode::CONFLICT, "Email already in use".to_string()).into_response();
    }

    if let Err(err) = tx.commit().await {
        error!("Failed to commit email update: {err}");
        return internal_error("Email update failed");
    }

    // The address change is durable either way; dispatch failure is surfaced
    // so the user can retry the verification mail.
    if let Err(err) = state
        .email()
        .send_verification(principal.user_id, &new_email)
        .await
    {
        error!("Failed to dispatch verification for new address: {err}");
        let entry = AuditEntry::new(AuditAction::EmailUpdateFailed, Some(principal.user_id))
            .resource("user")
            .request_meta(&meta)
            .metadata(json!({ "newEmail": new_email, "reason": "dispatch_failed" }))
            .failure("verification mail dispatch failed");
        audit::record_audit(&pool, &entry, now).await;
        return (
            StatusCode::BAD_GATEWAY,
            "Email updated but the verification mail could not be sent; request a resend"
                .to_string(),
        )
            .into_response();
    }

    let entry = AuditEntry::new(AuditAction::EmailUpdated, Some(principal.user_id))
        .resource("user")
        .request_meta(&meta)
        .metadata(json!({ "oldEmail": old_email, "newEmail": new_email }));
    audit::record_audit(&pool, &entry, now).await;

    (
        StatusCode::OK,
        Json(MessageResponse {
            message: "Email updated; verify the new address to keep signing in".to_string(),
        }),
    )
        .into_response()
}

#[utoipa::path(
    delete,
    path = "/auth/admin/users/{id}/permanent",
    params(("id" = Uuid, Path, description = "Target user id")),
    responses(
        (status = 200, description = "User permanently deleted"),
        (status = 400, description = "Self-deletion rejected", body = String),
        (status = 404, description = "User not found", body = String)
    ),
    tag = "admin"
)]
pub async fn permanent_delete(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    Path(target_id): Path<Uuid>,
) -> impl IntoResponse {
    let admin = match require_admin(&headers, &pool, &state).await {
        Ok(principal) => principal,
        Err(rejection) => return rejection.into_response(),
    };

    if target_id == admin.user_id {
        return (
            StatusCode::BAD_REQUEST,
            "Cannot delete your own account".to_string(),
        )
            .into_response();
    }

    let meta = request_meta(&headers);
    let now = state.now();

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to start permanent-delete transaction: {err}");
            return internal_error("Failed to delete user");
        }
    };

    let target = match users::lock_user_by_id(&mut tx, target_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            let _ = tx.rollback().await;
            return (StatusCode::NOT_FOUND, "User not found".to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to load user for permanent deletion: {err}");
            let _ = tx.rollback().await;
            return internal_error("Failed to delete user");
        }
    };

    let apply = async {
        // System-level row: identifiers are pinned into metadata so the trail
        // survives the cascade.
        let entry = AuditEntry::new(AuditAction::UserPermanentlyDeleted, None)
            .performed_by(admin.user_id)
            .resource("user")
            .request_meta(&meta)
            .metadata(json!({
                "deletedUserId": target.id,
                "email": target.email,
                "role": target.role.as_str(),
            }));
        audit::append_audit(&mut tx, &entry, now).await?;
        users::delete_user(&mut tx, target_id).await?;
        anyhow::Ok(())
    };
    if let Err(err) = apply.await {
        error!("Failed permanent deletion: {err}");
        let _ = tx.rollback().await;
        return internal_error("Failed to delete user");
    }

    if let Err(err) = tx.commit().await {
        error!("Failed to commit permanent deletion: {err}");
        return internal_error("Failed to delete user");
    }

    StatusCode::OK.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::test_support::{auth_state, lazy_pool};

    #[tokio::test]
    async fn export_requires_auth() {
        let response = export_data(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(auth_state()),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn anonymize_requires_auth() {
        let response = anonymize(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(auth_state()),
            None,
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn confirmation_literal_is_exact() {
        assert_eq!(ANONYMIZE_CONFIRMATION, "ANONYMIZE_MY_DATA");
    }
}
