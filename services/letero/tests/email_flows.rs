//! Email flow scenarios against a disposable Postgres with the log transport.
//! Requires a container runtime.

use anyhow::{Context, Result};
use axum::extract::Extension;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{Duration, Utc};
use identity_store::models::{RequestMeta, Role};
use identity_store::{oob_tokens, refresh_tokens, sessions, users};
use identity_token::{OutOfBandKind, OutOfBandSigner};
use letero::api::handlers::email::types::{
    ForgotPasswordRequest, ResendVerificationRequest, ResetPasswordRequest,
    SendVerificationRequest, VerifyEmailRequest,
};
use letero::api::handlers::email::{EmailConfig, EmailState};
use letero::api::handlers::email::{reset, verification};
use letero::audit_client::AuditClient;
use letero::mail::{MailConfig, Mailer};
use secrecy::SecretString;
use sqlx::PgPool;
use std::sync::Arc;
use test_support::postgres::IdentityDb;
use uuid::Uuid;

const PASSWORD: &str = "Str0ngPass!";

fn email_state() -> Arc<EmailState> {
    let mail_config = MailConfig {
        host: None,
        port: 587,
        secure: false,
        username: None,
        password: None,
        from_email: "noreply@sezamo.dev".to_string(),
        from_name: "Sezamo".to_string(),
    };
    let config = EmailConfig::new(
        "http://localhost:3000".to_string(),
        mail_config.sender_header(),
    );
    let oob = OutOfBandSigner::new("email-secret").expect("signer");
    let mailer = Mailer::from_config(&mail_config).expect("mailer");
    // Points at nothing; dispatch-side audit is fire-and-forget by contract.
    let audit = AuditClient::new(
        "http://127.0.0.1:9",
        SecretString::from("internal-test-secret".to_string()),
    )
    .expect("audit client");
    Arc::new(EmailState::new(
        config,
        oob,
        mailer,
        audit,
        Arc::new(identity_store::SystemClock),
    ))
}

async fn seed_user(pool: &PgPool, email: &str, verified: bool) -> Result<Uuid> {
    let hash = bcrypt::hash(PASSWORD, 12)?;
    let mut tx = pool.begin().await?;
    let outcome = users::create_user(&mut tx, email, &hash, Role::User, Utc::now()).await?;
    let users::CreateUserOutcome::Created(user) = outcome else {
        anyhow::bail!("seed user already exists");
    };
    if verified {
        users::mark_email_verified(&mut tx, user.id, Utc::now()).await?;
    }
    tx.commit().await?;
    Ok(user.id)
}

async fn body_json(response: axum::response::Response) -> Result<serde_json::Value> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    serde_json::from_slice(&bytes).context("response body is not JSON")
}

#[tokio::test]
async fn verification_round_trip_and_one_shot() -> Result<()> {
    let db = IdentityDb::start().await?;
    let pool = db.pool();
    let state = email_state();
    let user_id = seed_user(pool, "alice@example.com", false).await?;

    let response = verification::send_verification(
        Extension(pool.clone()),
        Extension(Arc::clone(&state)),
        Some(Json(SendVerificationRequest {
            user_id,
            email: "alice@example.com".to_string(),
        })),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::OK);

    let token = oob_tokens::latest_unused_token(pool, OutOfBandKind::Verification, user_id)
        .await?
        .context("missing verification token")?;

    let response = verification::verify_email(
        HeaderMap::new(),
        Extension(pool.clone()),
        Extension(Arc::clone(&state)),
        Some(Json(VerifyEmailRequest {
            token: token.clone(),
        })),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::OK);

    let user = users::find_user_by_id(pool, user_id).await?.expect("user");
    assert!(user.email_verified);

    // Consumed by deletion: the same token is invalid from now on.
    let response = verification::verify_email(
        HeaderMap::new(),
        Extension(pool.clone()),
        Extension(Arc::clone(&state)),
        Some(Json(VerifyEmailRequest { token })),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn expired_verification_token_is_reported_as_expired() -> Result<()> {
    let db = IdentityDb::start().await?;
    let pool = db.pool();
    let state = email_state();
    let user_id = seed_user(pool, "bob@example.com", false).await?;

    // Mint a token whose row expired an hour ago.
    let past = Utc::now() - Duration::hours(25);
    let (token, _) = state
        .oob()
        .mint(OutOfBandKind::Verification, user_id, past)
        .expect("mint");
    let mut tx = pool.begin().await?;
    oob_tokens::replace_token(
        &mut tx,
        OutOfBandKind::Verification,
        user_id,
        &token,
        Utc::now() - Duration::hours(1),
        past,
    )
    .await?;
    tx.commit().await?;

    let response = verification::verify_email(
        HeaderMap::new(),
        Extension(pool.clone()),
        Extension(Arc::clone(&state)),
        Some(Json(VerifyEmailRequest { token })),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    assert_eq!(&bytes[..], b"Verification token expired");
    Ok(())
}

#[tokio::test]
async fn resend_requires_existing_unverified_user() -> Result<()> {
    let db = IdentityDb::start().await?;
    let pool = db.pool();
    let state = email_state();

    let response = verification::resend_verification(
        Extension(pool.clone()),
        Extension(Arc::clone(&state)),
        Some(Json(ResendVerificationRequest {
            email: "ghost@example.com".to_string(),
        })),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    seed_user(pool, "carl@example.com", true).await?;
    let response = verification::resend_verification(
        Extension(pool.clone()),
        Extension(Arc::clone(&state)),
        Some(Json(ResendVerificationRequest {
            email: "carl@example.com".to_string(),
        })),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // And for an unverified account it mints a fresh token.
    let unverified = seed_user(pool, "dora@example.com", false).await?;
    let response = verification::resend_verification(
        Extension(pool.clone()),
        Extension(Arc::clone(&state)),
        Some(Json(ResendVerificationRequest {
            email: "dora@example.com".to_string(),
        })),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        oob_tokens::count_for_user(pool, OutOfBandKind::Verification, unverified).await?,
        1
    );
    Ok(())
}

#[tokio::test]
async fn forgot_password_is_enumeration_resistant() -> Result<()> {
    let db = IdentityDb::start().await?;
    let pool = db.pool();
    let state = email_state();
    seed_user(pool, "erin@example.com", true).await?;

    let known = reset::forgot_password(
        Extension(pool.clone()),
        Extension(Arc::clone(&state)),
        Some(Json(ForgotPasswordRequest {
            email: "erin@example.com".to_string(),
        })),
    )
    .await
    .into_response();
    let unknown = reset::forgot_password(
        Extension(pool.clone()),
        Extension(Arc::clone(&state)),
        Some(Json(ForgotPasswordRequest {
            email: "nobody@example.com".to_string(),
        })),
    )
    .await
    .into_response();

    assert_eq!(known.status(), StatusCode::OK);
    assert_eq!(unknown.status(), StatusCode::OK);
    let known_body = body_json(known).await?;
    let unknown_body = body_json(unknown).await?;
    assert_eq!(known_body, unknown_body);
    Ok(())
}

#[tokio::test]
async fn password_reset_bumps_epoch_and_wipes_sessions() -> Result<()> {
    let db = IdentityDb::start().await?;
    let pool = db.pool();
    let state = email_state();
    let user_id = seed_user(pool, "fay@example.com", true).await?;

    // An active login that must die with the reset.
    let now = Utc::now();
    let mut tx = pool.begin().await?;
    refresh_tokens::insert_refresh_token(&mut tx, user_id, "r0", now + Duration::days(7), now)
        .await?;
    sessions::insert_session(
        &mut tx,
        user_id,
        "r0",
        now + Duration::days(7),
        &RequestMeta::default(),
        now,
    )
    .await?;
    tx.commit().await?;

    reset::forgot_password(
        Extension(pool.clone()),
        Extension(Arc::clone(&state)),
        Some(Json(ForgotPasswordRequest {
            email: "fay@example.com".to_string(),
        })),
    )
    .await
    .into_response();

    let token = oob_tokens::latest_unused_token(pool, OutOfBandKind::PasswordReset, user_id)
        .await?
        .context("missing reset token")?;

    let response = reset::reset_password(
        HeaderMap::new(),
        Extension(pool.clone()),
        Extension(Arc::clone(&state)),
        Some(Json(ResetPasswordRequest {
            token: token.clone(),
            new_password: "N3wPassword!".to_string(),
        })),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    let message = body["message"].as_str().context("message")?;
    assert!(message.contains("session"));

    let user = users::find_user_by_id(pool, user_id).await?.expect("user");
    assert_eq!(user.token_version, 1);
    assert!(bcrypt::verify("N3wPassword!", &user.password_hash)?);
    assert!(!bcrypt::verify(PASSWORD, &user.password_hash)?);
    assert_eq!(user.failed_login_attempts, 0);
    assert!(user.account_locked_until.is_none());

    assert_eq!(
        refresh_tokens::count_refresh_tokens_for_user(pool, user_id).await?,
        0
    );
    assert!(sessions::list_active_sessions(pool, user_id, now).await?.is_empty());

    // One-shot: the consumed token reports as already used.
    let response = reset::reset_password(
        HeaderMap::new(),
        Extension(pool.clone()),
        Extension(Arc::clone(&state)),
        Some(Json(ResetPasswordRequest {
            token,
            new_password: "An0therPass!".to_string(),
        })),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    assert_eq!(&bytes[..], b"Reset token already used");
    Ok(())
}
