//! Background maintenance: expired credentials and audit retention.
//!
//! A single periodic task per service deployment. Each pass is independent
//! and idempotent, so overlapping deployments or a crashed pass need no
//! coordination; the next pass repairs whatever is left.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use identity_token::OutOfBandKind;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{Instrument, error, info};

use crate::clock::Clock;
use crate::{audit, db_span, oob_tokens};

const DEFAULT_INTERVAL_SECONDS: u64 = 300;
const DEFAULT_AUDIT_RETENTION_DAYS: i64 = 90;
const USED_MAGIC_LINK_RETENTION_DAYS: i64 = 7;

#[derive(Clone, Copy, Debug)]
pub struct SweeperConfig {
    interval: std::time::Duration,
    audit_retention_days: i64,
}

impl SweeperConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            interval: std::time::Duration::from_secs(DEFAULT_INTERVAL_SECONDS),
            audit_retention_days: DEFAULT_AUDIT_RETENTION_DAYS,
        }
    }

    #[must_use]
    pub fn with_interval_seconds(mut self, seconds: u64) -> Self {
        self.interval = std::time::Duration::from_secs(seconds.max(1));
        self
    }

    #[must_use]
    pub fn with_audit_retention_days(mut self, days: i64) -> Self {
        self.audit_retention_days = days.max(1);
        self
    }

    #[must_use]
    pub fn interval(&self) -> std::time::Duration {
        self.interval
    }

    #[must_use]
    pub fn audit_retention_days(&self) -> i64 {
        self.audit_retention_days
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// What one pass removed, for the log line.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_oob_tokens: u64,
    pub used_magic_links: u64,
    pub expired_refresh_tokens: u64,
    pub expired_sessions: u64,
    pub audit_rows: u64,
}

impl SweepReport {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.expired_oob_tokens
            + self.used_magic_links
            + self.expired_refresh_tokens
            + self.expired_sessions
            + self.audit_rows
    }
}

/// Spawn the periodic sweeper.
pub fn spawn_sweeper(
    pool: PgPool,
    clock: Arc<dyn Clock>,
    config: SweeperConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match sweep_once(&pool, clock.now(), &config).await {
                Ok(report) if report.total() > 0 => {
                    info!(
                        oob = report.expired_oob_tokens,
                        magic = report.used_magic_links,
                        refresh = report.expired_refresh_tokens,
                        sessions = report.expired_sessions,
                        audit = report.audit_rows,
                        "sweeper pass removed rows"
                    );
                }
                Ok(_) => {}
                Err(err) => error!("sweeper pass failed: {err}"),
            }
            sleep(config.interval()).await;
        }
    })
}

/// One maintenance pass against the shared store.
///
/// # Errors
/// Returns the first database error; partial progress is fine, the next pass
/// picks up where this one stopped.
pub async fn sweep_once(
    pool: &PgPool,
    now: DateTime<Utc>,
    config: &SweeperConfig,
) -> Result<SweepReport> {
    let mut report = SweepReport::default();

    for kind in [
        OutOfBandKind::Verification,
        OutOfBandKind::PasswordReset,
        OutOfBandKind::MagicLink,
    ] {
        report.expired_oob_tokens += delete_expired_oob(pool, kind, now).await?;
    }

    report.used_magic_links =
        delete_used_magic_links(pool, now - Duration::days(USED_MAGIC_LINK_RETENTION_DAYS)).await?;
    report.expired_refresh_tokens = delete_expired_refresh_tokens(pool, now).await?;
    report.expired_sessions = deactivate_expired_sessions(pool, now).await?;
    report.audit_rows =
        audit::sweep_audit_before(pool, now - Duration::days(config.audit_retention_days())).await?;

    Ok(report)
}

async fn delete_expired_oob(pool: &PgPool, kind: OutOfBandKind, now: DateTime<Utc>) -> Result<u64> {
    let table = oob_tokens::table(kind);
    let query = format!("DELETE FROM {table} WHERE expires_at < $1");
    let result = sqlx::query(&query)
        .bind(now)
        .execute(pool)
        .instrument(db_span("DELETE", "out-of-band expired"))
        .await
        .with_context(|| format!("failed to sweep expired rows from {table}"))?;
    Ok(result.rows_affected())
}

async fn delete_used_magic_links(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<u64> {
    let query = "DELETE FROM magic_link_tokens WHERE used = TRUE AND used_at < $1";
    let result = sqlx::query(query)
        .bind(cutoff)
        .execute(pool)
        .instrument(db_span("DELETE", "magic_link_tokens used"))
        .await
        .context("failed to sweep used magic-link rows")?;
    Ok(result.rows_affected())
}

async fn delete_expired_refresh_tokens(pool: &PgPool, now: DateTime<Utc>) -> Result<u64> {
    let query = "DELETE FROM refresh_tokens WHERE expires_at < $1";
    let result = sqlx::query(query)
        .bind(now)
        .execute(pool)
        .instrument(db_span("DELETE", "refresh_tokens expired"))
        .await
        .context("failed to sweep expired refresh tokens")?;
    Ok(result.rows_affected())
}

async fn deactivate_expired_sessions(pool: &PgPool, now: DateTime<Utc>) -> Result<u64> {
    let query = "UPDATE sessions SET is_active = FALSE WHERE is_active = TRUE AND expires_at < $1";
    let result = sqlx::query(query)
        .bind(now)
        .execute(pool)
        .instrument(db_span("UPDATE", "sessions expired"))
        .await
        .context("failed to deactivate expired sessions")?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_and_overrides() {
        let config = SweeperConfig::new();
        assert_eq!(config.interval(), std::time::Duration::from_secs(300));
        assert_eq!(config.audit_retention_days(), 90);

        let config = config
            .with_interval_seconds(0)
            .with_audit_retention_days(-4);
        assert_eq!(config.interval(), std::time::Duration::from_secs(1));
        assert_eq!(config.audit_retention_days(), 1);

        let config = config
            .with_interval_seconds(60)
            .with_audit_retention_days(30);
        assert_eq!(config.interval(), std::time::Duration::from_secs(60));
        assert_eq!(config.audit_retention_days(), 30);
    }

    #[test]
    fn report_total_sums_everything() {
        let report = SweepReport {
            expired_oob_tokens: 1,
            used_magic_links: 2,
            expired_refresh_tokens: 3,
            expired_sessions: 4,
            audit_rows: 5,
        };
        assert_eq!(report.total(), 15);
        assert_eq!(SweepReport::default().total(), 0);
    }
}
