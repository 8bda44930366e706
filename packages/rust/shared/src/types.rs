//! Core domain types shared by the store, collectors, and pipeline.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{DigestError, Result};

// ---------------------------------------------------------------------------
// ProcessedItem
// ---------------------------------------------------------------------------

/// One row of the dedup ledger. The pair `(source, unique_id)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedItem {
    /// Source namespace (`hn`, `reddit`, `rss`, `arxiv`, ...).
    pub source: String,
    /// Source-specific identifier (item id, entry URL, ...).
    pub unique_id: String,
    /// When the item was first recorded. Never updated.
    pub processed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// DiscussionNode
// ---------------------------------------------------------------------------

/// A comment or reply in a discussion tree.
///
/// Trees are built for a single fetch, formatted, then dropped. A child's
/// `depth` is always its parent's plus one; top-level replies sit at 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscussionNode {
    pub id: String,
    pub author: String,
    pub text: String,
    pub score: i64,
    pub depth: u32,
    /// Replies in the order the source listed them.
    pub children: Vec<DiscussionNode>,
}

impl DiscussionNode {
    /// Number of nodes in this subtree, including `self`.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(Self::subtree_len).sum::<usize>()
    }

    /// Deepest `depth` value found in this subtree.
    pub fn max_depth(&self) -> u32 {
        self.children
            .iter()
            .map(Self::max_depth)
            .max()
            .unwrap_or(self.depth)
    }
}

// ---------------------------------------------------------------------------
// CollectorConfig
// ---------------------------------------------------------------------------

/// A collector's configuration section.
///
/// The orchestrator only looks at `name` and `enabled`; `options` is decoded
/// by the collector into its own settings type via [`CollectorConfig::decode`].
#[derive(Debug, Clone, Default)]
pub struct CollectorConfig {
    pub name: String,
    pub enabled: bool,
    pub options: toml::Table,
}

impl CollectorConfig {
    pub fn new(name: impl Into<String>, enabled: bool, options: toml::Table) -> Self {
        Self {
            name: name.into(),
            enabled,
            options,
        }
    }

    /// Decode the opaque options into the collector's typed settings.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        toml::Value::Table(self.options.clone())
            .try_into()
            .map_err(|e| DigestError::config(format!("[collectors.{}]: {e}", self.name)))
    }
}
