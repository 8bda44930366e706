//! Persistent dedup ledger on embedded libSQL.
//!
//! The [`DedupStore`] remembers every `(source, unique_id)` pair a collector
//! has emitted, across process restarts. It is opened once at startup and
//! shared by handle with every collector.
//!
//! **Failure policy:**
//! - [`DedupStore::exists`] fails open: any storage error reads as "not seen".
//! - [`DedupStore::record`] logs and swallows storage errors; the item may be
//!   processed again next run.

mod migrations;

use std::path::Path;

use chrono::Utc;
use digest_shared::{DigestError, ProcessedItem, Result};
use libsql::{Connection, Database, params};

/// Dedup ledger handle wrapping a libSQL database.
pub struct DedupStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl DedupStore {
    /// Open or create the ledger at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| DigestError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DigestError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| DigestError::Storage(e.to_string()))?;

        let store = Self { db, conn };
        store.run_migrations().await?;
        tracing::debug!(path = %path.display(), "dedup store opened");
        Ok(store)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        DigestError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Ledger contract
    // -----------------------------------------------------------------------

    /// Whether `(source, unique_id)` was recorded before. Never fails: a
    /// storage error is logged and reported as `false`.
    pub async fn exists(&self, source: &str, unique_id: &str) -> bool {
        match self.try_exists(source, unique_id).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(source, unique_id, error = %e, "dedup lookup failed, treating item as new");
                false
            }
        }
    }

    /// Record `(source, unique_id)` as processed. Recording a pair twice is a
    /// no-op; storage errors are logged and swallowed.
    pub async fn record(&self, source: &str, unique_id: &str) {
        if let Err(e) = self.try_record(source, unique_id).await {
            tracing::warn!(source, unique_id, error = %e, "failed to record processed item");
        }
    }

    /// Fallible form of [`exists`](Self::exists).
    pub async fn try_exists(&self, source: &str, unique_id: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM processed_items WHERE source = ?1 AND unique_id = ?2",
                params![source, unique_id],
            )
            .await
            .map_err(|e| DigestError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(row) => Ok(row.is_some()),
            Err(e) => Err(DigestError::Storage(e.to_string())),
        }
    }

    /// Fallible form of [`record`](Self::record). Returns `true` when the
    /// pair was newly inserted.
    pub async fn try_record(&self, source: &str, unique_id: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO processed_items (source, unique_id, processed_at)
                 VALUES (?1, ?2, ?3)",
                params![source, unique_id, now.as_str()],
            )
            .await
            .map_err(|e| DigestError::Storage(e.to_string()))?;
        Ok(inserted == 1)
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// Look up the ledger row for a pair.
    pub async fn get(&self, source: &str, unique_id: &str) -> Result<Option<ProcessedItem>> {
        let mut rows = self
            .conn
            .query(
                "SELECT source, unique_id, processed_at FROM processed_items
                 WHERE source = ?1 AND unique_id = ?2",
                params![source, unique_id],
            )
            .await
            .map_err(|e| DigestError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_processed_item(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DigestError::Storage(e.to_string())),
        }
    }

    /// Number of recorded items per source, ordered by source.
    pub async fn source_counts(&self) -> Result<Vec<(String, u64)>> {
        self.query_counts(
            "SELECT source, COUNT(*) FROM processed_items GROUP BY source ORDER BY source",
        )
        .await
    }

    /// Run a `(text, integer)` query. A failure while stepping through rows
    /// is an error, never a shorter result.
    async fn query_counts(&self, sql: &str) -> Result<Vec<(String, u64)>> {
        let mut rows = self
            .conn
            .query(sql, params![])
            .await
            .map_err(|e| DigestError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        loop {
            let row = match rows.next().await {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(e) => return Err(DigestError::Storage(e.to_string())),
            };
            let source: String = row
                .get(0)
                .map_err(|e| DigestError::Storage(e.to_string()))?;
            let count: i64 = row
                .get(1)
                .map_err(|e| DigestError::Storage(e.to_string()))?;
            results.push((source, count.max(0) as u64));
        }
        Ok(results)
    }
}

/// Convert a database row to a [`ProcessedItem`].
fn row_to_processed_item(row: &libsql::Row) -> Result<ProcessedItem> {
    Ok(ProcessedItem {
        source: row
            .get::<String>(0)
            .map_err(|e| DigestError::Storage(e.to_string()))?,
        unique_id: row
            .get::<String>(1)
            .map_err(|e| DigestError::Storage(e.to_string()))?,
        processed_at: {
            let s: String = row
                .get(2)
                .map_err(|e| DigestError::Storage(e.to_string()))?;
            chrono::DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| DigestError::Storage(format!("invalid date: {e}")))?
        },
    })
}
