//! Shared fixtures for handler tests: a state with deterministic secrets and
//! a lazily-connected pool for paths that never reach the database.

use chrono::Duration;
use identity_store::{Clock, SystemClock};
use identity_token::{OutOfBandSigner, TokenCodec};
use secrecy::SecretString;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

use crate::api::email_client::EmailClient;
use crate::api::handlers::auth::state::{AuthConfig, AuthState};

pub(crate) const INTERNAL_SECRET: &str = "internal-test-secret";

pub(crate) fn auth_state() -> Arc<AuthState> {
    auth_state_with("http://localhost:8081", Arc::new(SystemClock))
}

pub(crate) fn auth_state_with(email_service_url: &str, clock: Arc<dyn Clock>) -> Arc<AuthState> {
    let config = AuthConfig::new(
        "http://localhost:3000".to_string(),
        email_service_url.to_string(),
    );
    let codec = TokenCodec::new(
        "access-secret",
        "refresh-secret",
        Duration::minutes(15),
        Duration::days(7),
    )
    .expect("codec");
    let oob = OutOfBandSigner::new("email-secret").expect("signer");
    let email = EmailClient::new(email_service_url).expect("client");
    Arc::new(AuthState::new(
        config,
        codec,
        oob,
        email,
        SecretString::from(INTERNAL_SECRET.to_string()),
        clock,
    ))
}

pub(crate) fn lazy_pool() -> PgPool {
    PgPoolOptions::new()
        .connect_lazy("postgres://postgres@localhost/postgres")
        .expect("lazy pool")
}
