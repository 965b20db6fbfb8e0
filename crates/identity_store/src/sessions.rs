//! Session rows: one per refresh-token-bearing login, the unit of revocation.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use tracing::Instrument;
use uuid::Uuid;

use crate::db_span;
use crate::models::{RequestMeta, Session};

const SESSION_COLUMNS: &str = r"
    id, user_id, refresh_token, device_name, device_type, browser, os,
    ip_address, country, city, is_active, last_activity_at, created_at,
    expires_at
";

fn session_from_row(row: &PgRow) -> Session {
    Session {
        id: row.get("id"),
        user_id: row.get("user_id"),
        refresh_token: row.get("refresh_token"),
        device_name: row.get("device_name"),
        device_type: row.get("device_type"),
        browser: row.get("browser"),
        os: row.get("os"),
        ip_address: row.get("ip_address"),
        country: row.get("country"),
        city: row.get("city"),
        is_active: row.get("is_active"),
        last_activity_at: row.get("last_activity_at"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
    }
}

pub async fn insert_session(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    refresh_token: &str,
    expires_at: DateTime<Utc>,
    meta: &RequestMeta,
    now: DateTime<Utc>,
) -> Result<Session> {
    let query = format!(
        r"
        INSERT INTO sessions
            (user_id, refresh_token, device_type, browser, os, ip_address,
             is_active, last_activity_at, created_at, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7, $7, $8)
        RETURNING {SESSION_COLUMNS}
        "
    );
    let row = sqlx::query(&query)
        .bind(user_id)
        .bind(refresh_token)
        .bind(meta.device_type.as_deref())
        .bind(meta.browser.as_deref())
        .bind(meta.os.as_deref())
        .bind(meta.ip_address.as_deref())
        .bind(now)
        .bind(expires_at)
        .fetch_one(&mut **tx)
        .instrument(db_span("INSERT", "sessions"))
        .await
        .context("failed to insert session")?;
    Ok(session_from_row(&row))
}

/// Active, unexpired sessions for a user, most recently active first.
pub async fn list_active_sessions(
    pool: &PgPool,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<Session>> {
    let query = format!(
        r"
        SELECT {SESSION_COLUMNS}
        FROM sessions
        WHERE user_id = $1
          AND is_active = TRUE
          AND expires_at >= $2
        ORDER BY last_activity_at DESC
        "
    );
    let rows = sqlx::query(&query)
        .bind(user_id)
        .bind(now)
        .fetch_all(pool)
        .instrument(db_span("SELECT", "sessions active"))
        .await
        .context("failed to list active sessions")?;
    Ok(rows.iter().map(session_from_row).collect())
}

/// Full session history for a user, for the GDPR export.
pub async fn list_all_sessions(pool: &PgPool, user_id: Uuid) -> Result<Vec<Session>> {
    let query = format!(
        r"
        SELECT {SESSION_COLUMNS}
        FROM sessions
        WHERE user_id = $1
        ORDER BY created_at DESC
        "
    );
    let rows = sqlx::query(&query)
        .bind(user_id)
        .fetch_all(pool)
        .instrument(db_span("SELECT", "sessions history"))
        .await
        .context("failed to list session history")?;
    Ok(rows.iter().map(session_from_row).collect())
}

/// Owner-scoped lookup; a session belonging to someone else is simply absent.
pub async fn find_session_for_user(
    tx: &mut Transaction<'_, Postgres>,
    session_id: Uuid,
    user_id: Uuid,
) -> Result<Option<Session>> {
    let query = format!(
        "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1 AND user_id = $2 FOR UPDATE"
    );
    let row = sqlx::query(&query)
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .instrument(db_span("SELECT", "sessions by id for owner"))
        .await
        .context("failed to load session")?;
    Ok(row.as_ref().map(session_from_row))
}

pub async fn find_session_by_refresh_token(
    tx: &mut Transaction<'_, Postgres>,
    refresh_token: &str,
) -> Result<Option<Session>> {
    let query =
        format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE refresh_token = $1 FOR UPDATE");
    let row = sqlx::query(&query)
        .bind(refresh_token)
        .fetch_optional(&mut **tx)
        .instrument(db_span("SELECT", "sessions by refresh token"))
        .await
        .context("failed to load session by refresh token")?;
    Ok(row.as_ref().map(session_from_row))
}

/// Rotation: swap the refresh token of an existing session in place, keeping
/// its device context and creation time, and extend its expiry.
pub async fn rotate_session_token(
    tx: &mut Transaction<'_, Postgres>,
    session_id: Uuid,
    new_refresh_token: &str,
    new_expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<()> {
    let query = r"
        UPDATE sessions
        SET refresh_token = $2,
            expires_at = $3,
            last_activity_at = $4,
            is_active = TRUE
        WHERE id = $1
    ";
    sqlx::query(query)
        .bind(session_id)
        .bind(new_refresh_token)
        .bind(new_expires_at)
        .bind(now)
        .execute(&mut **tx)
        .instrument(db_span("UPDATE", "sessions rotate token"))
        .await
        .context("failed to rotate session token")?;
    Ok(())
}

pub async fn deactivate_session(tx: &mut Transaction<'_, Postgres>, session_id: Uuid) -> Result<()> {
    let query = "UPDATE sessions SET is_active = FALSE WHERE id = $1";
    sqlx::query(query)
        .bind(session_id)
        .execute(&mut **tx)
        .instrument(db_span("UPDATE", "sessions deactivate"))
        .await
        .context("failed to deactivate session")?;
    Ok(())
}

pub async fn deactivate_session_by_token(
    tx: &mut Transaction<'_, Postgres>,
    refresh_token: &str,
) -> Result<Option<Uuid>> {
    let query = r"
        UPDATE sessions
        SET is_active = FALSE
        WHERE refresh_token = $1
        RETURNING user_id
    ";
    let row = sqlx::query(query)
        .bind(refresh_token)
        .fetch_optional(&mut **tx)
        .instrument(db_span("UPDATE", "sessions deactivate by token"))
        .await
        .context("failed to deactivate session by token")?;
    Ok(row.map(|row| row.get("user_id")))
}

/// Deactivate every active session of a user except the one holding
/// `keep_refresh_token`. Returns the number of sessions touched.
pub async fn deactivate_other_sessions(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    keep_refresh_token: &str,
) -> Result<u64> {
    let query = r"
        UPDATE sessions
        SET is_active = FALSE
        WHERE user_id = $1
          AND refresh_token <> $2
          AND is_active = TRUE
    ";
    let result = sqlx::query(query)
        .bind(user_id)
        .bind(keep_refresh_token)
        .execute(&mut **tx)
        .instrument(db_span("UPDATE", "sessions deactivate others"))
        .await
        .context("failed to deactivate other sessions")?;
    Ok(result.rows_affected())
}

pub async fn deactivate_all_sessions(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<u64> {
    let query = r"
        UPDATE sessions
        SET is_active = FALSE
        WHERE user_id = $1
          AND is_active = TRUE
    ";
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(db_span("UPDATE", "sessions deactivate all"))
        .await
        .context("failed to deactivate all sessions")?;
    Ok(result.rows_affected())
}

/// GDPR deletion support: remove every session row for the user.
pub async fn delete_sessions_for_user(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<u64> {
    let query = "DELETE FROM sessions WHERE user_id = $1";
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(db_span("DELETE", "sessions for user"))
        .await
        .context("failed to delete sessions")?;
    Ok(result.rows_affected())
}
