//! Append-only audit trail.
//!
//! Two write paths: [`append_audit`] runs inside the caller's transaction so
//! the audit row commits or rolls back with the state transition it records;
//! [`record_audit`] is best-effort for events outside any transaction (failed
//! logins for unknown users, mail dispatch notices); a write failure is
//! logged and swallowed because the domain action has already happened.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Executor, PgPool, Postgres, Row, Transaction, postgres::PgRow};
use tracing::{Instrument, error};
use uuid::Uuid;

use crate::db_span;
use crate::models::{AuditAction, AuditEntry, AuditLogRow};

const AUDIT_COLUMNS: &str = r"
    id, user_id, performed_by, action, resource, ip_address, user_agent,
    metadata, success, error_message, created_at
";

fn audit_from_row(row: &PgRow) -> AuditLogRow {
    AuditLogRow {
        id: row.get("id"),
        user_id: row.get("user_id"),
        performed_by: row.get("performed_by"),
        action: row.get("action"),
        resource: row.get("resource"),
        ip_address: row.get("ip_address"),
        user_agent: row.get("user_agent"),
        metadata: row.get("metadata"),
        success: row.get("success"),
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
    }
}

async fn insert_entry<'e, E>(executor: E, entry: &AuditEntry, now: DateTime<Utc>) -> Result<()>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = r"
        INSERT INTO audit_logs
            (user_id, performed_by, action, resource, ip_address, user_agent,
             metadata, success, error_message, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
    ";
    sqlx::query(query)
        .bind(entry.user_id)
        .bind(entry.performed_by)
        .bind(entry.action.as_str())
        .bind(entry.resource.as_deref())
        .bind(entry.ip_address.as_deref())
        .bind(entry.user_agent.as_deref())
        .bind(&entry.metadata)
        .bind(entry.success)
        .bind(entry.error_message.as_deref())
        .bind(now)
        .execute(executor)
        .instrument(db_span("INSERT", "audit_logs"))
        .await
        .context("failed to append audit row")?;
    Ok(())
}

/// Append within the caller's transaction.
pub async fn append_audit(
    tx: &mut Transaction<'_, Postgres>,
    entry: &AuditEntry,
    now: DateTime<Utc>,
) -> Result<()> {
    insert_entry(&mut **tx, entry, now).await
}

/// Best-effort append outside a transaction. Never fails the caller.
pub async fn record_audit(pool: &PgPool, entry: &AuditEntry, now: DateTime<Utc>) {
    if let Err(err) = insert_entry(pool, entry, now).await {
        error!(action = entry.action.as_str(), "failed to record audit row: {err}");
    }
}

/// Admin query filter. All fields optional; `page` is 1-based.
#[derive(Clone, Debug, Default)]
pub struct AuditFilter {
    pub user_id: Option<Uuid>,
    pub action: Option<AuditAction>,
    pub success: Option<bool>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: i64,
    pub limit: i64,
}

impl AuditFilter {
    #[must_use]
    pub fn normalize(mut self) -> Self {
        self.page = self.page.max(1);
        self.limit = self.limit.clamp(1, 100);
        self
    }

    #[must_use]
    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }
}

/// A page of audit rows plus the unpaged total.
#[derive(Debug)]
pub struct AuditPage {
    pub rows: Vec<AuditLogRow>,
    pub total: i64,
}

impl AuditPage {
    #[must_use]
    pub fn total_pages(&self, limit: i64) -> i64 {
        if limit <= 0 {
            return 0;
        }
        (self.total + limit - 1) / limit
    }
}

/// Filtered, offset-paginated audit query for the admin surface.
pub async fn query_audit(pool: &PgPool, filter: &AuditFilter) -> Result<AuditPage> {
    // Bind every filter; NULL parameters disable their clause.
    let conditions = r"
        ($1::uuid IS NULL OR user_id = $1)
          AND ($2::text IS NULL OR action = $2)
          AND ($3::boolean IS NULL OR success = $3)
          AND ($4::timestamptz IS NULL OR created_at >= $4)
          AND ($5::timestamptz IS NULL OR created_at <= $5)
    ";
    let action = filter.action.map(AuditAction::as_str);

    let count_query = format!("SELECT COUNT(*) AS count FROM audit_logs WHERE {conditions}");
    let total: i64 = sqlx::query(&count_query)
        .bind(filter.user_id)
        .bind(action)
        .bind(filter.success)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_one(pool)
        .instrument(db_span("SELECT", "audit_logs count"))
        .await
        .context("failed to count audit rows")?
        .get("count");

    let page_query = format!(
        r"
        SELECT {AUDIT_COLUMNS}
        FROM audit_logs
        WHERE {conditions}
        ORDER BY created_at DESC
        LIMIT $6 OFFSET $7
        "
    );
    let rows = sqlx::query(&page_query)
        .bind(filter.user_id)
        .bind(action)
        .bind(filter.success)
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.limit)
        .bind(filter.offset())
        .fetch_all(pool)
        .instrument(db_span("SELECT", "audit_logs page"))
        .await
        .context("failed to query audit rows")?;

    Ok(AuditPage {
        rows: rows.iter().map(audit_from_row).collect(),
        total,
    })
}

/// The caller's own recent trail, newest first.
pub async fn recent_for_user(pool: &PgPool, user_id: Uuid, limit: i64) -> Result<Vec<AuditLogRow>> {
    let query = format!(
        r"
        SELECT {AUDIT_COLUMNS}
        FROM audit_logs
        WHERE user_id = $1
        ORDER BY created_at DESC
        LIMIT $2
        "
    );
    let rows = sqlx::query(&query)
        .bind(user_id)
        .bind(limit.clamp(1, 100))
        .fetch_all(pool)
        .instrument(db_span("SELECT", "audit_logs recent"))
        .await
        .context("failed to load recent audit rows")?;
    Ok(rows.iter().map(audit_from_row).collect())
}

/// Every audit row of a user, for the GDPR export.
pub async fn all_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<AuditLogRow>> {
    let query = format!(
        r"
        SELECT {AUDIT_COLUMNS}
        FROM audit_logs
        WHERE user_id = $1
        ORDER BY created_at DESC
        "
    );
    let rows = sqlx::query(&query)
        .bind(user_id)
        .fetch_all(pool)
        .instrument(db_span("SELECT", "audit_logs for user"))
        .await
        .context("failed to load audit rows for user")?;
    Ok(rows.iter().map(audit_from_row).collect())
}

/// GDPR scrub: replace request context in every row of the user with the
/// sentinel. The only sanctioned in-place update of the audit trail.
pub async fn anonymize_audit_rows(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<u64> {
    let query = r#"
        UPDATE audit_logs
        SET resource = 'anonymized',
            ip_address = 'anonymized',
            user_agent = 'anonymized',
            metadata = '{"anonymized": true}'::jsonb
        WHERE user_id = $1
    "#;
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(db_span("UPDATE", "audit_logs anonymize"))
        .await
        .context("failed to anonymize audit rows")?;
    Ok(result.rows_affected())
}

/// Retention: drop rows older than the cutoff. Returns the count removed.
pub async fn sweep_audit_before(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<u64> {
    let query = "DELETE FROM audit_logs WHERE created_at < $1";
    let result = sqlx::query(query)
        .bind(cutoff)
        .execute(pool)
        .instrument(db_span("DELETE", "audit_logs retention"))
        .await
        .context("failed to sweep audit rows")?;
    Ok(result.rows_affected())
}
