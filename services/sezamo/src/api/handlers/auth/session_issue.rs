//! Token issuance shared by login, refresh, and magic-link redemption.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use identity_store::models::{RequestMeta, User};
use identity_store::{refresh_tokens, sessions};
use identity_token::TokenKind;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::state::AuthState;

pub(crate) struct IssuedSession {
    pub(crate) access_token: String,
    pub(crate) refresh_token: String,
    pub(crate) refresh_expires_at: DateTime<Utc>,
    pub(crate) session_id: Uuid,
}

/// Mint an access/refresh pair carrying the user's current role and token
/// version, and persist the refresh credential plus its session row.
pub(crate) async fn issue_session(
    tx: &mut Transaction<'_, Postgres>,
    state: &AuthState,
    user: &User,
    meta: &RequestMeta,
    now: DateTime<Utc>,
) -> Result<IssuedSession> {
    let (access_token, _) = state
        .codec()
        .sign(
            TokenKind::Access,
            user.id,
            user.role.as_str(),
            user.token_version,
            now,
        )
        .context("failed to sign access token")?;
    let (refresh_token, refresh_expires_at) = state
        .codec()
        .sign(
            TokenKind::Refresh,
            user.id,
            user.role.as_str(),
            user.token_version,
            now,
        )
        .context("failed to sign refresh token")?;

    refresh_tokens::insert_refresh_token(tx, user.id, &refresh_token, refresh_expires_at, now)
        .await?;
    let session =
        sessions::insert_session(tx, user.id, &refresh_token, refresh_expires_at, meta, now)
            .await?;

    Ok(IssuedSession {
        access_token,
        refresh_token,
        refresh_expires_at,
        session_id: session.id,
    })
}
