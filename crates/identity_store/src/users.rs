//! User rows: lookup, creation, credential state, lockout counters, GDPR scrub.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use tracing::Instrument;
use uuid::Uuid;

use crate::models::{Role, User};
use crate::{db_span, is_unique_violation};

const USER_COLUMNS: &str = r"
    id, email, password_hash, role, email_verified, failed_login_attempts,
    account_locked_until, token_version, last_login_at, last_login_ip,
    created_at, updated_at
";

fn user_from_row(row: &PgRow) -> Result<User> {
    let role: String = row.get("role");
    let role = Role::parse(&role).with_context(|| format!("unknown role in users row: {role}"))?;
    Ok(User {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        role,
        email_verified: row.get("email_verified"),
        failed_login_attempts: row.get("failed_login_attempts"),
        account_locked_until: row.get("account_locked_until"),
        token_version: row.get("token_version"),
        last_login_at: row.get("last_login_at"),
        last_login_ip: row.get("last_login_ip"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// Outcome when attempting to create a user.
#[derive(Debug)]
pub enum CreateUserOutcome {
    Created(User),
    EmailTaken,
}

/// Outcome when changing a user's email address.
#[derive(Debug)]
pub enum UpdateEmailOutcome {
    Updated,
    EmailTaken,
}

pub async fn find_user_by_email(pool: &PgPool, email: &str) -> Result<Option<User>> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
    let row = sqlx::query(&query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(db_span("SELECT", "users by email"))
        .await
        .context("failed to load user by email")?;
    row.as_ref().map(user_from_row).transpose()
}

pub async fn find_user_by_id(pool: &PgPool, id: Uuid) -> Result<Option<User>> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
    let row = sqlx::query(&query)
        .bind(id)
        .fetch_optional(pool)
        .instrument(db_span("SELECT", "users by id"))
        .await
        .context("failed to load user by id")?;
    row.as_ref().map(user_from_row).transpose()
}

/// Load a user inside a transaction, holding a row lock until commit.
/// Login and the other racy transitions go through this so that concurrent
/// attempts serialize on the row.
pub async fn lock_user_by_email(
    tx: &mut Transaction<'_, Postgres>,
    email: &str,
) -> Result<Option<User>> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1 FOR UPDATE");
    let row = sqlx::query(&query)
        .bind(email)
        .fetch_optional(&mut **tx)
        .instrument(db_span("SELECT", "users by email for update"))
        .await
        .context("failed to lock user by email")?;
    row.as_ref().map(user_from_row).transpose()
}

pub async fn lock_user_by_id(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<Option<User>> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE");
    let row = sqlx::query(&query)
        .bind(id)
        .fetch_optional(&mut **tx)
        .instrument(db_span("SELECT", "users by id for update"))
        .await
        .context("failed to lock user by id")?;
    row.as_ref().map(user_from_row).transpose()
}

pub async fn create_user(
    tx: &mut Transaction<'_, Postgres>,
    email: &str,
    password_hash: &str,
    role: Role,
    now: DateTime<Utc>,
) -> Result<CreateUserOutcome> {
    let query = format!(
        r"
        INSERT INTO users (email, password_hash, role, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $4)
        RETURNING {USER_COLUMNS}
        "
    );
    let row = sqlx::query(&query)
        .bind(email)
        .bind(password_hash)
        .bind(role.as_str())
        .bind(now)
        .fetch_one(&mut **tx)
        .instrument(db_span("INSERT", "users"))
        .await;

    match row {
        Ok(row) => Ok(CreateUserOutcome::Created(user_from_row(&row)?)),
        Err(err) if is_unique_violation(&err) => Ok(CreateUserOutcome::EmailTaken),
        Err(err) => Err(err).context("failed to insert user"),
    }
}

/// Successful credential validation: reset the lockout state and stamp the
/// login context in one statement.
pub async fn record_login_success(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    ip_address: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET failed_login_attempts = 0,
            account_locked_until = NULL,
            last_login_at = $2,
            last_login_ip = $3,
            updated_at = $2
        WHERE id = $1
    ";
    sqlx::query(query)
        .bind(user_id)
        .bind(now)
        .bind(ip_address)
        .execute(&mut **tx)
        .instrument(db_span("UPDATE", "users login success"))
        .await
        .context("failed to record login success")?;
    Ok(())
}

/// Persist the lockout state computed by the caller's policy. Runs inside the
/// same transaction as the password comparison so concurrent failures cannot
/// both slip under the threshold.
pub async fn update_lockout_state(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    failed_attempts: i32,
    locked_until: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET failed_login_attempts = $2,
            account_locked_until = $3,
            updated_at = $4
        WHERE id = $1
    ";
    sqlx::query(query)
        .bind(user_id)
        .bind(failed_attempts)
        .bind(locked_until)
        .bind(now)
        .execute(&mut **tx)
        .instrument(db_span("UPDATE", "users lockout state"))
        .await
        .context("failed to update lockout state")?;
    Ok(())
}

pub async fn mark_email_verified(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET email_verified = TRUE,
            updated_at = $2
        WHERE id = $1
    ";
    sqlx::query(query)
        .bind(user_id)
        .bind(now)
        .execute(&mut **tx)
        .instrument(db_span("UPDATE", "users email verified"))
        .await
        .context("failed to mark email verified")?;
    Ok(())
}

/// Change the address and drop verification; the only transition allowed to
/// revert `email_verified` to false.
pub async fn update_email(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    new_email: &str,
    now: DateTime<Utc>,
) -> Result<UpdateEmailOutcome> {
    let query = r"
        UPDATE users
        SET email = $2,
            email_verified = FALSE,
            updated_at = $3
        WHERE id = $1
    ";
    let result = sqlx::query(query)
        .bind(user_id)
        .bind(new_email)
        .bind(now)
        .execute(&mut **tx)
        .instrument(db_span("UPDATE", "users email"))
        .await;

    match result {
        Ok(_) => Ok(UpdateEmailOutcome::Updated),
        Err(err) if is_unique_violation(&err) => Ok(UpdateEmailOutcome::EmailTaken),
        Err(err) => Err(err).context("failed to update email"),
    }
}

pub async fn set_role(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    role: Role,
    now: DateTime<Utc>,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET role = $2,
            updated_at = $3
        WHERE id = $1
    ";
    sqlx::query(query)
        .bind(user_id)
        .bind(role.as_str())
        .bind(now)
        .execute(&mut **tx)
        .instrument(db_span("UPDATE", "users role"))
        .await
        .context("failed to update role")?;
    Ok(())
}

/// Password reset: new hash, cleared lockout, and the token-version bump that
/// invalidates every token issued before this instant.
pub async fn apply_password_reset(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    new_password_hash: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET password_hash = $2,
            failed_login_attempts = 0,
            account_locked_until = NULL,
            token_version = token_version + 1,
            updated_at = $3
        WHERE id = $1
    ";
    sqlx::query(query)
        .bind(user_id)
        .bind(new_password_hash)
        .bind(now)
        .execute(&mut **tx)
        .instrument(db_span("UPDATE", "users password reset"))
        .await
        .context("failed to apply password reset")?;
    Ok(())
}

/// GDPR anonymization of the user row itself. The row is retained to keep the
/// audit trail's foreign keys intact.
pub async fn anonymize_user(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET email = 'anonymized_' || id::text || '@deleted.local',
            password_hash = 'anonymized',
            email_verified = FALSE,
            failed_login_attempts = 0,
            account_locked_until = NULL,
            last_login_at = NULL,
            last_login_ip = NULL,
            updated_at = $2
        WHERE id = $1
    ";
    sqlx::query(query)
        .bind(user_id)
        .bind(now)
        .execute(&mut **tx)
        .instrument(db_span("UPDATE", "users anonymize"))
        .await
        .context("failed to anonymize user")?;
    Ok(())
}

/// Delete one user; dependent sessions and tokens go with the row via
/// `ON DELETE CASCADE`. Returns whether a row was removed.
pub async fn delete_user(tx: &mut Transaction<'_, Postgres>, user_id: Uuid) -> Result<bool> {
    let query = "DELETE FROM users WHERE id = $1";
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(db_span("DELETE", "users by id"))
        .await
        .context("failed to delete user")?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_non_admin_users(tx: &mut Transaction<'_, Postgres>) -> Result<u64> {
    let query = "DELETE FROM users WHERE role <> 'ADMIN'";
    let result = sqlx::query(query)
        .execute(&mut **tx)
        .instrument(db_span("DELETE", "users non-admin"))
        .await
        .context("failed to delete non-admin users")?;
    Ok(result.rows_affected())
}

pub async fn delete_users_except(tx: &mut Transaction<'_, Postgres>, keep: Uuid) -> Result<u64> {
    let query = "DELETE FROM users WHERE id <> $1";
    let result = sqlx::query(query)
        .bind(keep)
        .execute(&mut **tx)
        .instrument(db_span("DELETE", "users except caller"))
        .await
        .context("failed to delete users")?;
    Ok(result.rows_affected())
}

pub async fn list_users(pool: &PgPool, limit: i64, offset: i64) -> Result<Vec<User>> {
    let query = format!(
        r"
        SELECT {USER_COLUMNS}
        FROM users
        ORDER BY created_at DESC
        LIMIT $1 OFFSET $2
        "
    );
    let rows = sqlx::query(&query)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .instrument(db_span("SELECT", "users list"))
        .await
        .context("failed to list users")?;
    rows.iter().map(user_from_row).collect()
}

pub async fn count_users(pool: &PgPool) -> Result<i64> {
    let query = "SELECT COUNT(*) AS count FROM users";
    let row = sqlx::query(query)
        .fetch_one(pool)
        .instrument(db_span("SELECT", "users count"))
        .await
        .context("failed to count users")?;
    Ok(row.get("count"))
}
