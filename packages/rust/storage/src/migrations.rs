//! SQL migration definitions for the dedup ledger.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: processed_items ledger",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per (source, unique_id) ever emitted
CREATE TABLE IF NOT EXISTS processed_items (
    source       TEXT NOT NULL,
    unique_id    TEXT NOT NULL,
    processed_at TEXT NOT NULL,
    PRIMARY KEY (source, unique_id)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
