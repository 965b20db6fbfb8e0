//! Bearer authentication: token verification plus the epoch check.
//!
//! Flow Overview: extract the bearer string, verify the access-token
//! signature, then re-read the user and compare the embedded token version
//! against the stored epoch. A stale epoch means a password reset happened
//! after issuance; the token is dead no matter how fresh its `exp` is.

use axum::http::{HeaderMap, StatusCode};
use identity_store::models::Role;
use identity_store::users;
use identity_token::{Error as TokenError, TokenKind};
use sqlx::PgPool;
use tracing::error;

use super::state::AuthState;
use super::utils::extract_bearer_token;

/// Authenticated caller context handed to downstream handlers.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user_id: uuid::Uuid,
    pub email: String,
    /// Current stored role, not the role frozen into the token; a demotion
    /// takes effect on the next request instead of the next refresh.
    pub role: Role,
}

pub(crate) type AuthRejection = (StatusCode, String);

fn unauthorized(message: &str) -> AuthRejection {
    (StatusCode::UNAUTHORIZED, message.to_string())
}

/// Resolve the bearer token into a principal, or reject with 401.
pub async fn require_auth(
    headers: &HeaderMap,
    pool: &PgPool,
    state: &AuthState,
) -> Result<Principal, AuthRejection> {
    let Some(token) = extract_bearer_token(headers) else {
        return Err(unauthorized("Unauthorized"));
    };

    let claims = state
        .codec()
        .verify(&token, TokenKind::Access)
        .map_err(|err| match err {
            TokenError::Expired => unauthorized("Invalid or expired token"),
            _ => unauthorized("Unauthorized"),
        })?;

    let user = users::find_user_by_id(pool, claims.sub).await.map_err(|err| {
        error!("Failed to load user for bearer token: {err}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Authentication failed".to_string(),
        )
    })?;

    let Some(user) = user else {
        return Err(unauthorized("User not found"));
    };

    if claims.token_version != user.token_version {
        return Err(unauthorized("Session expired, please log in again"));
    }

    Ok(Principal {
        user_id: user.id,
        email: user.email,
        role: user.role,
    })
}

/// Like [`require_auth`] but additionally demands the ADMIN role.
pub async fn require_admin(
    headers: &HeaderMap,
    pool: &PgPool,
    state: &AuthState,
) -> Result<Principal, AuthRejection> {
    let principal = require_auth(headers, pool, state).await?;
    if principal.role != Role::Admin {
        return Err((StatusCode::FORBIDDEN, "Forbidden".to_string()));
    }
    Ok(principal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::email_client::EmailClient;
    use crate::api::handlers::auth::state::AuthConfig;
    use chrono::Duration;
    use identity_store::SystemClock;
    use identity_token::{OutOfBandSigner, TokenCodec};
    use secrecy::SecretString;
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Arc;

    fn auth_state() -> AuthState {
        let config = AuthConfig::new(
            "http://localhost:3000".to_string(),
            "http://localhost:8081".to_string(),
        );
        let codec = TokenCodec::new(
            "access-secret",
            "refresh-secret",
            Duration::minutes(15),
            Duration::days(7),
        )
        .expect("codec");
        let oob = OutOfBandSigner::new("email-secret").expect("signer");
        let email = EmailClient::new("http://localhost:8081").expect("client");
        AuthState::new(
            config,
            codec,
            oob,
            email,
            SecretString::from("internal".to_string()),
            Arc::new(SystemClock),
        )
    }

    fn lazy_pool() -> PgPool {
        PgPoolOptions::new()
            .connect_lazy("postgres://postgres@localhost/postgres")
            .expect("lazy pool")
    }

    #[tokio::test]
    async fn missing_bearer_is_unauthorized() {
        let result = require_auth(&HeaderMap::new(), &lazy_pool(), &auth_state()).await;
        let err = result.expect_err("must reject");
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
        assert_eq!(err.1, "Unauthorized");
    }

    #[tokio::test]
    async fn garbage_bearer_is_unauthorized() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            axum::http::HeaderValue::from_static("Bearer not-a-jwt"),
        );
        let err = require_auth(&headers, &lazy_pool(), &auth_state())
            .await
            .expect_err("must reject");
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn refresh_token_is_not_accepted_as_bearer() {
        let state = auth_state();
        let (token, _) = state
            .codec()
            .sign(
                identity_token::TokenKind::Refresh,
                uuid::Uuid::new_v4(),
                "USER",
                0,
                chrono::Utc::now(),
            )
            .expect("sign");
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            axum::http::HeaderValue::from_str(&format!("Bearer {token}")).expect("header"),
        );
        let err = require_auth(&headers, &lazy_pool(), &state)
            .await
            .expect_err("must reject");
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
    }
}
