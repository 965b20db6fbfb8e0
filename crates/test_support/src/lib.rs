//! Test-only infrastructure: a disposable Postgres with the identity schema.
//!
//! Integration suites call [`postgres::IdentityDb::start`] to get a pooled
//! connection against a freshly created database with `db/sql/01_identity.sql`
//! applied. Containers are dropped (and removed) with the harness value.

pub mod postgres;
pub mod runtime;

use uuid::Uuid;

/// The shared schema, compiled into the harness so tests never depend on the
/// working directory.
pub const IDENTITY_SCHEMA_SQL: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../../db/sql/01_identity.sql"
));

pub(crate) fn unique_name(prefix: &str) -> String {
    format!("identity-test-{prefix}-{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_name_includes_prefix() {
        let name = unique_name("pg");
        assert!(name.starts_with("identity-test-pg-"));
        assert!(name.len() > "identity-test-pg-".len());
    }

    #[test]
    fn schema_creates_expected_tables() {
        for table in [
            "users",
            "sessions",
            "refresh_tokens",
            "verification_tokens",
            "password_reset_tokens",
            "magic_link_tokens",
            "audit_logs",
        ] {
            assert!(
                IDENTITY_SCHEMA_SQL.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")),
                "schema is missing table {table}"
            );
        }
    }
}
