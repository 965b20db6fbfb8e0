//! Credential signup.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use identity_store::models::{AuditAction, AuditEntry, Role};
use identity_store::{audit, users};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, warn};

use super::state::AuthState;
use super::types::{RegisterRequest, RegisterResponse, UserPayload};
use super::utils::{hash_password, normalize_email, request_meta, valid_email};

const MIN_PASSWORD_LENGTH: usize = 8;

#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = RegisterResponse),
        (status = 400, description = "Invalid input", body = String),
        (status = 409, description = "Email already registered", body = String)
    ),
    tag = "auth"
)]
pub async fn register(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<RegisterRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "Invalid email address".to_string()).into_response();
    }
    if request.password.len() < MIN_PASSWORD_LENGTH {
        return (
            StatusCode::BAD_REQUEST,
            format!("Password must be at least {MIN_PASSWORD_LENGTH} characters"),
        )
            .into_response();
    }
    let role = match request.role.as_deref() {
        None => Role::User,
        Some(value) => match Role::parse(value) {
            Some(role) => role,
            None => {
                return (StatusCode::BAD_REQUEST, "Invalid role".to_string()).into_response();
            }
        },
    };

    let password_hash = match hash_password(&request.password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("Failed to hash password: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Registration failed".to_string(),
            )
                .into_response();
        }
    };

    let meta = request_meta(&headers);
    let now = state.now();

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to start register transaction: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Registration failed".to_string(),
            )
                .into_response();
        }
    };

    let user = match users::create_user(&mut tx, &email, &password_hash, role, now).await {
        Ok(users::CreateUserOutcome::Created(user)) => user,
        Ok(users::CreateUserOutcome::EmailTaken) => {
            let _ = tx.rollback().await;
            return (
                StatusCode::CONFLICT,
                "Email already registered".to_string(),
            )
                .into_response();
        }
        Err(err) => {
            error!("Failed to create user: {err}");
            let _ = tx.rollback().await;
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Registration failed".to_string(),
            )
                .into_response();
        }
    };

    let entry = AuditEntry::new(AuditAction::UserRegister, Some(user.id))
        .resource("user")
        .request_meta(&meta);
    if let Err(err) = audit::append_audit(&mut tx, &entry, now).await {
        error!("Failed to audit registration: {err}");
        let _ = tx.rollback().await;
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Registration failed".to_string(),
        )
            .into_response();
    }

    if let Err(err) = tx.commit().await {
        error!("Failed to commit registration: {err}");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Registration failed".to_string(),
        )
            .into_response();
    }

    // Verification mail is dispatched after commit; a mail outage must not
    // undo the account.
    let state_for_mail = Arc::clone(&state);
    let user_id = user.id;
    let user_email = user.email.clone();
    tokio::spawn(async move {
        if let Err(err) = state_for_mail
            .email()
            .send_verification(user_id, &user_email)
            .await
        {
            warn!(%user_id, "Failed to dispatch verification email: {err}");
        }
    });

    (
        StatusCode::CREATED,
        Json(RegisterResponse {
            user: UserPayload::from(user.summary()),
        }),
    )
        .into_response()
}
