//! Shared transactional store for the identity platform.
//!
//! Both services talk to the same Postgres database through this crate:
//! the auth service (`sezamo`) for credentials, sessions and audit, the email
//! service (`letero`) for out-of-band tokens and the state transitions they
//! drive. The store is the sole owner of unique-constraint enforcement on
//! `users.email`, `sessions.refresh_token` and every out-of-band `token`.
//!
//! Conventions:
//! - Functions take either a pool or an open transaction; multi-row state
//!   transitions always run inside one transaction owned by the caller.
//! - Every query runs under a `db.query` tracing span.
//! - Business outcomes (not found, already used, conflict) are returned as
//!   outcome enums, never as errors; `anyhow::Error` means the database broke.

pub mod audit;
pub mod clock;
pub mod models;
pub mod oob_tokens;
pub mod refresh_tokens;
pub mod sessions;
pub mod sweeper;
pub mod users;

pub use clock::{Clock, FixedClock, SystemClock};

/// Begin a transaction at `SERIALIZABLE` isolation.
///
/// The four transitions that race under concurrency (login lockout, refresh
/// rotation, password reset, magic-link redemption) run under this; everything
/// else uses the default isolation via `pool.begin()`.
///
/// # Errors
/// Returns an error if the transaction cannot be opened.
pub async fn begin_serializable(
    pool: &sqlx::PgPool,
) -> anyhow::Result<sqlx::Transaction<'_, sqlx::Postgres>> {
    use anyhow::Context;

    let mut tx = pool.begin().await.context("failed to begin transaction")?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
        .execute(&mut *tx)
        .await
        .context("failed to set serializable isolation")?;
    Ok(tx)
}

pub(crate) fn db_span(operation: &str, statement: &str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::is_unique_violation;

    #[test]
    fn row_not_found_is_not_unique_violation() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }
}
