//! The collector contract and the context shared by every collector.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use digest_shared::{CollectorConfig, HttpConfig, Result, generate_filename};
use digest_storage::DedupStore;

use crate::document::{Document, write_document};
use crate::http;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Per-run tallies reported by a collector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectOutcome {
    /// Documents written (and recorded) this run.
    pub emitted: usize,
    /// Candidates skipped because they were seen before or filtered out.
    pub skipped: usize,
    /// Candidates abandoned after a per-item error.
    pub failed: usize,
}

/// A pluggable source of research documents.
///
/// `run` writes documents into `output_dir/<name>` and records each emitted
/// item in the dedup ledger. Per-item failures are logged and counted; an
/// `Err` means the collector as a whole could not run.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Registry key and configuration section name.
    fn name(&self) -> &str;

    /// Dedup namespace and filename prefix (`hn`, `reddit`, ...).
    fn source_key(&self) -> &str;

    async fn run(&self, config: &CollectorConfig, output_dir: &Path) -> Result<CollectOutcome>;
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Handles injected into every collector at construction.
#[derive(Clone)]
pub struct CollectorContext {
    pub store: Arc<DedupStore>,
    pub client: Client,
    /// Log per-item skip decisions at info instead of debug.
    pub verbose: bool,
}

impl CollectorContext {
    /// Build a context around an opened store, creating the shared HTTP client.
    pub fn new(store: Arc<DedupStore>, http: &HttpConfig, verbose: bool) -> Result<Self> {
        Ok(Self {
            store,
            client: http::build_client(http)?,
            verbose,
        })
    }

    /// Whether `(source_key, unique_id)` was emitted by an earlier run.
    pub async fn seen(&self, source_key: &str, unique_id: &str) -> bool {
        let seen = self.store.exists(source_key, unique_id).await;
        if seen {
            self.note_skip(source_key, unique_id, "already processed");
        }
        seen
    }

    /// Log a skip decision, louder when verbose.
    pub fn note_skip(&self, source_key: &str, unique_id: &str, reason: &str) {
        if self.verbose {
            tracing::info!(source = source_key, unique_id, reason, "skipping item");
        } else {
            debug!(source = source_key, unique_id, reason, "skipping item");
        }
    }

    /// Write `doc` into `dir` and then record it as processed.
    ///
    /// The item is recorded only after the file is on disk, so a failed
    /// write leaves it eligible for the next run.
    pub async fn emit(&self, dir: &Path, doc: &Document) -> Result<PathBuf> {
        let path = dir.join(generate_filename(&doc.source_key, &doc.title, &doc.unique_id));
        write_document(&path, &doc.content)?;
        self.store.record(&doc.source_key, &doc.unique_id).await;
        debug!(path = %path.display(), "document written");
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------
