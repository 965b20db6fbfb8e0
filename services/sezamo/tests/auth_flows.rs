//! End-to-end auth scenarios against a disposable Postgres.
//!
//! Handlers are invoked directly with their extractors; a stub letero server
//! answers the outbound mail calls. Requires a container runtime.

use anyhow::{Context, Result};
use axum::extract::{Extension, Path};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::IntoResponse;
use axum::{Json, Router, routing::post};
use chrono::{Duration, Utc};
use identity_store::models::Role;
use identity_store::{Clock, FixedClock, audit, oob_tokens, sessions, users};
use identity_token::{OutOfBandKind, TokenKind};
use secrecy::SecretString;
use sezamo::api::email_client::EmailClient;
use sezamo::api::handlers::auth::types::{
    LoginRequest, MagicLinkRequestBody, MagicLinkVerifyRequest, RegisterRequest,
};
use sezamo::api::handlers::auth::{AuthConfig, AuthState, require_auth};
use sezamo::api::handlers::auth::{login, magic_link, refresh, register, sessions as session_api};
use sqlx::PgPool;
use std::sync::Arc;
use test_support::postgres::IdentityDb;
use uuid::Uuid;

const PASSWORD: &str = "Str0ngPass!";

async fn spawn_stub_letero() -> Result<String> {
    async fn ok() -> impl IntoResponse {
        (StatusCode::OK, Json(serde_json::json!({ "message": "ok" })))
    }

    let app = Router::new()
        .route("/email/send-verification", post(ok))
        .route("/email/send-magic-link", post(ok));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .context("failed to bind stub listener")?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

fn auth_state(email_url: &str, clock: Arc<FixedClock>) -> Arc<AuthState> {
    let config = AuthConfig::new("http://localhost:3000".to_string(), email_url.to_string());
    let codec = identity_token::TokenCodec::new(
        "access-secret",
        "refresh-secret",
        Duration::minutes(15),
        Duration::days(7),
    )
    .expect("codec");
    let oob = identity_token::OutOfBandSigner::new("email-secret").expect("signer");
    let email = EmailClient::new(email_url).expect("client");
    Arc::new(AuthState::new(
        config,
        codec,
        oob,
        email,
        SecretString::from("internal-test-secret".to_string()),
        clock,
    ))
}

fn refresh_cookie_value(response: &axum::response::Response) -> Option<String> {
    let cookie = response.headers().get(header::SET_COOKIE)?.to_str().ok()?;
    let pair = cookie.split(';').next()?;
    let value = pair.strip_prefix("jid=")?;
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn with_cookie(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::COOKIE,
        HeaderValue::from_str(&format!("jid={token}")).expect("cookie"),
    );
    headers
}

fn with_bearer(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}")).expect("bearer"),
    );
    headers
}

async fn body_json(response: axum::response::Response) -> Result<serde_json::Value> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    serde_json::from_slice(&bytes).context("response body is not JSON")
}

async fn mark_verified(pool: &PgPool, user_id: Uuid) -> Result<()> {
    let mut tx = pool.begin().await?;
    users::mark_email_verified(&mut tx, user_id, Utc::now()).await?;
    tx.commit().await?;
    Ok(())
}

async fn register_user(
    pool: &PgPool,
    state: &Arc<AuthState>,
    email: &str,
) -> Result<Uuid> {
    let response = register::register(
        HeaderMap::new(),
        Extension(pool.clone()),
        Extension(Arc::clone(state)),
        Some(Json(RegisterRequest {
            email: email.to_string(),
            password: PASSWORD.to_string(),
            role: None,
        })),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await?;
    let id = body["user"]["id"]
        .as_str()
        .context("missing user id")?
        .parse()?;
    Ok(id)
}

async fn login_ok(
    pool: &PgPool,
    state: &Arc<AuthState>,
    email: &str,
    password: &str,
) -> Result<axum::response::Response> {
    Ok(login::login(
        HeaderMap::new(),
        Extension(pool.clone()),
        Extension(Arc::clone(state)),
        Some(Json(LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        })),
    )
    .await
    .into_response())
}

#[tokio::test]
async fn register_verify_login_issues_session() -> Result<()> {
    let db = IdentityDb::start().await?;
    let pool = db.pool();
    let letero = spawn_stub_letero().await?;
    let clock = Arc::new(FixedClock::new(Utc::now()));
    let state = auth_state(&letero, clock);

    let user_id = register_user(pool, &state, "alice@example.com").await?;

    // Login before verification is refused.
    let response = login_ok(pool, &state, "alice@example.com", PASSWORD).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    mark_verified(pool, user_id).await?;
    let response = login_ok(pool, &state, "alice@example.com", PASSWORD).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let refresh_token = refresh_cookie_value(&response).context("missing refresh cookie")?;
    let body = body_json(response).await?;
    assert!(body["accessToken"].as_str().is_some());
    assert_eq!(body["user"]["emailVerified"], serde_json::json!(true));

    // One active session, bound to the issued refresh token.
    let active = sessions::list_active_sessions(pool, user_id, Utc::now()).await?;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].refresh_token, refresh_token);

    // Exactly one USER_LOGIN audit row.
    let rows = audit::all_for_user(pool, user_id).await?;
    let logins = rows.iter().filter(|row| row.action == "USER_LOGIN").count();
    assert_eq!(logins, 1);
    Ok(())
}

#[tokio::test]
async fn lockout_threshold_and_auto_release() -> Result<()> {
    let db = IdentityDb::start().await?;
    let pool = db.pool();
    let letero = spawn_stub_letero().await?;
    let clock = Arc::new(FixedClock::new(Utc::now()));
    let state = auth_state(&letero, Arc::clone(&clock));

    let user_id = register_user(pool, &state, "bob@example.com").await?;
    mark_verified(pool, user_id).await?;

    // Four wrong passwords: 401 each.
    for _ in 0..4 {
        let response = login_ok(pool, &state, "bob@example.com", "wrong-password").await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
    // The fifth locks the account.
    let response = login_ok(pool, &state, "bob@example.com", "wrong-password").await?;
    assert_eq!(response.status(), StatusCode::LOCKED);

    let locked = users::find_user_by_id(pool, user_id).await?.expect("user");
    let until = locked.account_locked_until.expect("locked");
    assert!(until >= clock.now() + Duration::minutes(29));

    // Correct password while locked still refuses.
    let response = login_ok(pool, &state, "bob@example.com", PASSWORD).await?;
    assert_eq!(response.status(), StatusCode::LOCKED);

    // After the window passes, the lock clears and login succeeds.
    clock.advance(Duration::minutes(31));
    let response = login_ok(pool, &state, "bob@example.com", PASSWORD).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let user = users::find_user_by_id(pool, user_id).await?.expect("user");
    assert_eq!(user.failed_login_attempts, 0);
    assert!(user.account_locked_until.is_none());
    Ok(())
}

#[tokio::test]
async fn refresh_rotation_rejects_replay() -> Result<()> {
    let db = IdentityDb::start().await?;
    let pool = db.pool();
    let letero = spawn_stub_letero().await?;
    let clock = Arc::new(FixedClock::new(Utc::now()));
    let state = auth_state(&letero, clock);

    let user_id = register_user(pool, &state, "cora@example.com").await?;
    mark_verified(pool, user_id).await?;
    let response = login_ok(pool, &state, "cora@example.com", PASSWORD).await?;
    let r0 = refresh_cookie_value(&response).context("missing cookie")?;

    // R0 -> R1.
    let response = refresh::refresh(
        with_cookie(&r0),
        Extension(pool.clone()),
        Extension(Arc::clone(&state)),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::OK);
    let r1 = refresh_cookie_value(&response).context("missing rotated cookie")?;
    assert_ne!(r0, r1);

    // Replaying R0 fails; R1 still works exactly once more.
    let response = refresh::refresh(
        with_cookie(&r0),
        Extension(pool.clone()),
        Extension(Arc::clone(&state)),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = refresh::refresh(
        with_cookie(&r1),
        Extension(pool.clone()),
        Extension(Arc::clone(&state)),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn password_reset_epoch_invalidates_access_tokens() -> Result<()> {
    let db = IdentityDb::start().await?;
    let pool = db.pool();
    let letero = spawn_stub_letero().await?;
    let clock = Arc::new(FixedClock::new(Utc::now()));
    let state = auth_state(&letero, clock);

    let user_id = register_user(pool, &state, "dana@example.com").await?;
    mark_verified(pool, user_id).await?;
    let response = login_ok(pool, &state, "dana@example.com", PASSWORD).await?;
    let body = body_json(response).await?;
    let access0 = body["accessToken"].as_str().context("token")?.to_string();

    // The bearer works before the reset.
    assert!(require_auth(&with_bearer(&access0), pool, &state).await.is_ok());

    // Apply the reset transition (letero's handler drives this in prod).
    let mut tx = pool.begin().await?;
    users::apply_password_reset(&mut tx, user_id, "$2b$12$newhash", Utc::now()).await?;
    tx.commit().await?;

    // The old token is signed and unexpired, yet dead.
    let rejection = require_auth(&with_bearer(&access0), pool, &state)
        .await
        .expect_err("stale epoch must reject");
    assert_eq!(rejection.0, StatusCode::UNAUTHORIZED);
    assert_eq!(rejection.1, "Session expired, please log in again");
    Ok(())
}

#[tokio::test]
async fn magic_link_signup_and_one_shot_redeem() -> Result<()> {
    let db = IdentityDb::start().await?;
    let pool = db.pool();
    let letero = spawn_stub_letero().await?;
    let clock = Arc::new(FixedClock::new(Utc::now()));
    let state = auth_state(&letero, clock);

    // Unknown address: uniform 200, account silently created unverified.
    let response = magic_link::magic_link_request(
        HeaderMap::new(),
        Extension(pool.clone()),
        Extension(Arc::clone(&state)),
        Some(Json(MagicLinkRequestBody {
            email: "carol@example.com".to_string(),
        })),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::OK);
    let unknown_body = body_json(response).await?;

    let user = users::find_user_by_email(pool, "carol@example.com")
        .await?
        .context("account was not created")?;
    assert!(!user.email_verified);
    assert_eq!(user.role, Role::User);

    // Existing address: same body, byte for byte.
    let response = magic_link::magic_link_request(
        HeaderMap::new(),
        Extension(pool.clone()),
        Extension(Arc::clone(&state)),
        Some(Json(MagicLinkRequestBody {
            email: "carol@example.com".to_string(),
        })),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::OK);
    let known_body = body_json(response).await?;
    assert_eq!(unknown_body, known_body);

    // Redeem the pending link: verifies the email and opens a session.
    let token = oob_tokens::latest_unused_token(pool, OutOfBandKind::MagicLink, user.id)
        .await?
        .context("missing magic-link token")?;
    let response = magic_link::magic_link_verify(
        HeaderMap::new(),
        Extension(pool.clone()),
        Extension(Arc::clone(&state)),
        Some(Json(MagicLinkVerifyRequest {
            token: token.clone(),
        })),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["user"]["emailVerified"], serde_json::json!(true));

    let verified = users::find_user_by_id(pool, user.id).await?.expect("user");
    assert!(verified.email_verified);
    assert_eq!(
        sessions::list_active_sessions(pool, user.id, Utc::now()).await?.len(),
        1
    );

    // One-shot: the same link cannot log in twice.
    let response = magic_link::magic_link_verify(
        HeaderMap::new(),
        Extension(pool.clone()),
        Extension(Arc::clone(&state)),
        Some(Json(MagicLinkVerifyRequest { token })),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn admin_cannot_delete_self_and_leaves_no_audit() -> Result<()> {
    let db = IdentityDb::start().await?;
    let pool = db.pool();
    let letero = spawn_stub_letero().await?;
    let clock = Arc::new(FixedClock::new(Utc::now()));
    let state = auth_state(&letero, clock);

    // Seed an admin directly.
    let hash = bcrypt::hash(PASSWORD, 12)?;
    let mut tx = pool.begin().await?;
    let outcome =
        users::create_user(&mut tx, "root@example.com", &hash, Role::Admin, Utc::now()).await?;
    tx.commit().await?;
    let users::CreateUserOutcome::Created(admin) = outcome else {
        anyhow::bail!("admin seed failed");
    };
    mark_verified(pool, admin.id).await?;

    let (access, _) = state
        .codec()
        .sign(TokenKind::Access, admin.id, "ADMIN", 0, Utc::now())
        .expect("sign");

    let before = audit::all_for_user(pool, admin.id).await?.len();
    let response = sezamo::api::handlers::auth::admin::delete_user(
        with_bearer(&access),
        Extension(pool.clone()),
        Extension(Arc::clone(&state)),
        Path(admin.id),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let after = audit::all_for_user(pool, admin.id).await?.len();
    assert_eq!(before, after);
    assert!(users::find_user_by_id(pool, admin.id).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn session_revocation_is_owner_scoped() -> Result<()> {
    let db = IdentityDb::start().await?;
    let pool = db.pool();
    let letero = spawn_stub_letero().await?;
    let clock = Arc::new(FixedClock::new(Utc::now()));
    let state = auth_state(&letero, clock);

    let owner_id = register_user(pool, &state, "eve@example.com").await?;
    mark_verified(pool, owner_id).await?;
    let response = login_ok(pool, &state, "eve@example.com", PASSWORD).await?;
    let body = body_json(response).await?;
    let owner_access = body["accessToken"].as_str().context("token")?.to_string();

    let other_id = register_user(pool, &state, "mallory@example.com").await?;
    mark_verified(pool, other_id).await?;
    let response = login_ok(pool, &state, "mallory@example.com", PASSWORD).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let other_session = sessions::list_active_sessions(pool, other_id, Utc::now()).await?[0].id;

    // Revoking someone else's session reads as "not found", not "forbidden".
    let response = session_api::revoke_session(
        with_bearer(&owner_access),
        Extension(pool.clone()),
        Extension(Arc::clone(&state)),
        Path(other_session),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // The owner's own session revokes fine.
    let own_session = sessions::list_active_sessions(pool, owner_id, Utc::now()).await?[0].id;
    let response = session_api::revoke_session(
        with_bearer(&owner_access),
        Extension(pool.clone()),
        Extension(Arc::clone(&state)),
        Path(own_session),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(sessions::list_active_sessions(pool, owner_id, Utc::now()).await?.is_empty());
    Ok(())
}
