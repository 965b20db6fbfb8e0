//! Bare refresh-token credential rows, indexed by exact token value.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use tracing::Instrument;
use uuid::Uuid;

use crate::db_span;
use crate::models::RefreshTokenRow;

const TOKEN_COLUMNS: &str = "id, user_id, token, expires_at, created_at";

fn token_from_row(row: &PgRow) -> RefreshTokenRow {
    RefreshTokenRow {
        id: row.get("id"),
        user_id: row.get("user_id"),
        token: row.get("token"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    }
}

pub async fn insert_refresh_token(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    token: &str,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<()> {
    let query = r"
        INSERT INTO refresh_tokens (user_id, token, expires_at, created_at)
        VALUES ($1, $2, $3, $4)
    ";
    sqlx::query(query)
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .bind(now)
        .execute(&mut **tx)
        .instrument(db_span("INSERT", "refresh_tokens"))
        .await
        .context("failed to insert refresh token")?;
    Ok(())
}

/// Load a refresh token by exact value, locking it for rotation.
pub async fn lock_refresh_token(
    tx: &mut Transaction<'_, Postgres>,
    token: &str,
) -> Result<Option<RefreshTokenRow>> {
    let query = format!("SELECT {TOKEN_COLUMNS} FROM refresh_tokens WHERE token = $1 FOR UPDATE");
    let row = sqlx::query(&query)
        .bind(token)
        .fetch_optional(&mut **tx)
        .instrument(db_span("SELECT", "refresh_tokens by token"))
        .await
        .context("failed to load refresh token")?;
    Ok(row.as_ref().map(token_from_row))
}

/// Delete by exact value; returns whether a row existed.
pub async fn delete_refresh_token(tx: &mut Transaction<'_, Postgres>, token: &str) -> Result<bool> {
    let query = "DELETE FROM refresh_tokens WHERE token = $1";
    let result = sqlx::query(query)
        .bind(token)
        .execute(&mut **tx)
        .instrument(db_span("DELETE", "refresh_tokens by token"))
        .await
        .context("failed to delete refresh token")?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_refresh_tokens_for_user(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<u64> {
    let query = "DELETE FROM refresh_tokens WHERE user_id = $1";
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(db_span("DELETE", "refresh_tokens for user"))
        .await
        .context("failed to delete refresh tokens")?;
    Ok(result.rows_affected())
}

/// Delete every refresh token of a user except the presented one.
/// Backs "log out other devices". Returns the number removed.
pub async fn delete_other_refresh_tokens(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    keep_token: &str,
) -> Result<u64> {
    let query = "DELETE FROM refresh_tokens WHERE user_id = $1 AND token <> $2";
    let result = sqlx::query(query)
        .bind(user_id)
        .bind(keep_token)
        .execute(&mut **tx)
        .instrument(db_span("DELETE", "refresh_tokens other"))
        .await
        .context("failed to delete other refresh tokens")?;
    Ok(result.rows_affected())
}

/// Token ids and lifetimes for the GDPR export; never the token values.
pub async fn list_refresh_token_metadata(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Vec<(Uuid, DateTime<Utc>, DateTime<Utc>)>> {
    let query = r"
        SELECT id, created_at, expires_at
        FROM refresh_tokens
        WHERE user_id = $1
        ORDER BY created_at DESC
    ";
    let rows = sqlx::query(query)
        .bind(user_id)
        .fetch_all(pool)
        .instrument(db_span("SELECT", "refresh_tokens metadata"))
        .await
        .context("failed to list refresh token metadata")?;
    Ok(rows
        .iter()
        .map(|row| (row.get("id"), row.get("created_at"), row.get("expires_at")))
        .collect())
}

pub async fn count_refresh_tokens_for_user(pool: &PgPool, user_id: Uuid) -> Result<i64> {
    let query = "SELECT COUNT(*) AS count FROM refresh_tokens WHERE user_id = $1";
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_one(pool)
        .instrument(db_span("SELECT", "refresh_tokens count"))
        .await
        .context("failed to count refresh tokens")?;
    Ok(row.get("count"))
}
