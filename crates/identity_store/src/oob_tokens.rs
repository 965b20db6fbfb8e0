//! Single-use out-of-band token rows (verification, password reset, magic link).
//!
//! One table per kind; rows are the source of truth for one-shot consumption,
//! the signed token alone proves nothing. Verification rows are consumed by
//! deletion; reset and magic-link rows flip `used` and are retained for audit
//! until the sweeper removes them.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use identity_token::OutOfBandKind;
use sqlx::{Postgres, Row, Transaction, postgres::PgRow};
use tracing::Instrument;
use uuid::Uuid;

use crate::db_span;
use crate::models::OutOfBandRow;

const ROW_COLUMNS: &str =
    "id, user_id, token, used, used_at, ip_address, user_agent, expires_at, created_at";

pub(crate) fn table(kind: OutOfBandKind) -> &'static str {
    match kind {
        OutOfBandKind::Verification => "verification_tokens",
        OutOfBandKind::PasswordReset => "password_reset_tokens",
        OutOfBandKind::MagicLink => "magic_link_tokens",
    }
}

fn row_from_row(row: &PgRow) -> OutOfBandRow {
    OutOfBandRow {
        id: row.get("id"),
        user_id: row.get("user_id"),
        token: row.get("token"),
        used: row.get("used"),
        used_at: row.get("used_at"),
        ip_address: row.get("ip_address"),
        user_agent: row.get("user_agent"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    }
}

/// Outcome of attempting to consume a token.
#[derive(Debug)]
pub enum ConsumeOutcome {
    /// The token was valid; the kind-specific effect has been applied.
    Consumed(OutOfBandRow),
    NotFound,
    AlreadyUsed,
    /// The row had expired; it has been deleted as a side effect.
    Expired,
}

/// Mint: delete any prior unused row of the same `(user, kind)`, then insert
/// the replacement. Only the most recent unused token is ever redeemable.
pub async fn replace_token(
    tx: &mut Transaction<'_, Postgres>,
    kind: OutOfBandKind,
    user_id: Uuid,
    token: &str,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<()> {
    let table = table(kind);

    let delete = format!("DELETE FROM {table} WHERE user_id = $1 AND used = FALSE");
    sqlx::query(&delete)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(db_span("DELETE", "out-of-band unused for user"))
        .await
        .with_context(|| format!("failed to purge unused rows from {table}"))?;

    let insert = format!(
        r"
        INSERT INTO {table} (user_id, token, expires_at, created_at)
        VALUES ($1, $2, $3, $4)
        "
    );
    sqlx::query(&insert)
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .bind(now)
        .execute(&mut **tx)
        .instrument(db_span("INSERT", "out-of-band token"))
        .await
        .with_context(|| format!("failed to insert into {table}"))?;
    Ok(())
}

/// One-shot consumption. Looks the row up under a lock, rejects absent, used
/// and expired tokens in that order, then either deletes the row
/// (verification) or marks it used with the request context (reset, magic
/// link).
pub async fn consume_token(
    tx: &mut Transaction<'_, Postgres>,
    kind: OutOfBandKind,
    token: &str,
    now: DateTime<Utc>,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
) -> Result<ConsumeOutcome> {
    let table = table(kind);

    let select = format!("SELECT {ROW_COLUMNS} FROM {table} WHERE token = $1 FOR UPDATE");
    let row = sqlx::query(&select)
        .bind(token)
        .fetch_optional(&mut **tx)
        .instrument(db_span("SELECT", "out-of-band token by value"))
        .await
        .with_context(|| format!("failed to load token from {table}"))?;

    let Some(row) = row else {
        return Ok(ConsumeOutcome::NotFound);
    };
    let row = row_from_row(&row);

    if row.used {
        return Ok(ConsumeOutcome::AlreadyUsed);
    }
    if row.expires_at < now {
        // Amortized cleanup: an expired row rejected here never becomes
        // redeemable again, so drop it immediately.
        let delete = format!("DELETE FROM {table} WHERE id = $1");
        sqlx::query(&delete)
            .bind(row.id)
            .execute(&mut **tx)
            .instrument(db_span("DELETE", "out-of-band expired row"))
            .await
            .with_context(|| format!("failed to delete expired row from {table}"))?;
        return Ok(ConsumeOutcome::Expired);
    }

    match kind {
        OutOfBandKind::Verification => {
            let delete = format!("DELETE FROM {table} WHERE id = $1");
            sqlx::query(&delete)
                .bind(row.id)
                .execute(&mut **tx)
                .instrument(db_span("DELETE", "out-of-band consumed row"))
                .await
                .with_context(|| format!("failed to delete consumed row from {table}"))?;
        }
        OutOfBandKind::PasswordReset | OutOfBandKind::MagicLink => {
            let update = format!(
                r"
                UPDATE {table}
                SET used = TRUE,
                    used_at = $2,
                    ip_address = $3,
                    user_agent = $4
                WHERE id = $1
                "
            );
            sqlx::query(&update)
                .bind(row.id)
                .bind(now)
                .bind(ip_address)
                .bind(user_agent)
                .execute(&mut **tx)
                .instrument(db_span("UPDATE", "out-of-band mark used"))
                .await
                .with_context(|| format!("failed to mark row used in {table}"))?;
        }
    }

    Ok(ConsumeOutcome::Consumed(row))
}

/// Delete the user's unused tokens of one kind (e.g. before re-issuing).
pub async fn delete_unused_for_user(
    tx: &mut Transaction<'_, Postgres>,
    kind: OutOfBandKind,
    user_id: Uuid,
) -> Result<u64> {
    let table = table(kind);
    let query = format!("DELETE FROM {table} WHERE user_id = $1 AND used = FALSE");
    let result = sqlx::query(&query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(db_span("DELETE", "out-of-band unused for user"))
        .await
        .with_context(|| format!("failed to delete unused rows from {table}"))?;
    Ok(result.rows_affected())
}

/// Delete every out-of-band row of every kind for a user (GDPR paths, cascade
/// already covers plain deletion).
pub async fn delete_all_for_user(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<u64> {
    let mut total = 0;
    for kind in [
        OutOfBandKind::Verification,
        OutOfBandKind::PasswordReset,
        OutOfBandKind::MagicLink,
    ] {
        let table = table(kind);
        let query = format!("DELETE FROM {table} WHERE user_id = $1");
        let result = sqlx::query(&query)
            .bind(user_id)
            .execute(&mut **tx)
            .instrument(db_span("DELETE", "out-of-band all for user"))
            .await
            .with_context(|| format!("failed to delete rows from {table}"))?;
        total += result.rows_affected();
    }
    Ok(total)
}

/// How many rows of one kind a user currently has. Test and sweeper support.
pub async fn count_for_user(
    pool: &sqlx::PgPool,
    kind: OutOfBandKind,
    user_id: Uuid,
) -> Result<i64> {
    let table = table(kind);
    let query = format!("SELECT COUNT(*) AS count FROM {table} WHERE user_id = $1");
    let row = sqlx::query(&query)
        .bind(user_id)
        .fetch_one(pool)
        .instrument(db_span("SELECT", "out-of-band count"))
        .await
        .with_context(|| format!("failed to count rows in {table}"))?;
    Ok(row.get("count"))
}

/// Most recent unused token value for `(user, kind)`. Lets flows that only
/// know the user re-derive the pending token (tests, resend paths).
pub async fn latest_unused_token(
    pool: &sqlx::PgPool,
    kind: OutOfBandKind,
    user_id: Uuid,
) -> Result<Option<String>> {
    let table = table(kind);
    let query = format!(
        r"
        SELECT token
        FROM {table}
        WHERE user_id = $1 AND used = FALSE
        ORDER BY created_at DESC
        LIMIT 1
        "
    );
    let row = sqlx::query(&query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(db_span("SELECT", "out-of-band latest unused"))
        .await
        .with_context(|| format!("failed to load latest token from {table}"))?;
    Ok(row.map(|row| row.get("token")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names() {
        assert_eq!(table(OutOfBandKind::Verification), "verification_tokens");
        assert_eq!(table(OutOfBandKind::PasswordReset), "password_reset_tokens");
        assert_eq!(table(OutOfBandKind::MagicLink), "magic_link_tokens");
    }

    #[test]
    fn consume_outcome_debug_names() {
        assert_eq!(format!("{:?}", ConsumeOutcome::NotFound), "NotFound");
        assert_eq!(format!("{:?}", ConsumeOutcome::AlreadyUsed), "AlreadyUsed");
        assert_eq!(format!("{:?}", ConsumeOutcome::Expired), "Expired");
    }
}
