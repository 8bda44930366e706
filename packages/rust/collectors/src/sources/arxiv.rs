//! arXiv: newest papers per search query from the Atom export API.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use digest_shared::{CollectorConfig, DigestError, Result};

use crate::collector::{CollectOutcome, Collector, CollectorContext};
use crate::document::{Document, Frontmatter, squash_whitespace};
use crate::http::get_bytes;
use crate::registry::CollectorEntry;
use crate::sources::window_start;

pub const NAME: &str = "arxiv";
pub const SOURCE_KEY: &str = "arxiv";

pub(crate) const ENTRY: CollectorEntry = CollectorEntry { name: NAME, build };

fn build(ctx: &CollectorContext) -> Result<Arc<dyn Collector>> {
    Ok(Arc::new(ArxivCollector::new(ctx.clone())))
}

/// `[collectors.arxiv]` options.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArxivSettings {
    /// Raw arXiv query strings (`cat:cs.DC`, `all:raft`, ...).
    #[serde(default)]
    pub search_queries: Vec<String>,
    #[serde(default = "default_days_back")]
    pub days_back: i64,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_days_back() -> i64 {
    30
}
fn default_max_results() -> u32 {
    25
}
fn default_api_base() -> String {
    "http://export.arxiv.org/api/query".into()
}

/// The fields of an Atom entry a paper document needs.
#[derive(Debug, Clone)]
struct Paper {
    entry_id: String,
    title: String,
    authors: Vec<String>,
    summary: String,
    published: Option<DateTime<Utc>>,
    updated: Option<DateTime<Utc>>,
    categories: Vec<String>,
    pdf_url: Option<String>,
}

impl Paper {
    fn from_entry(entry: &Entry) -> Self {
        let pdf_url = entry
            .links
            .iter()
            .find(|l| {
                l.title.as_deref() == Some("pdf")
                    || l.media_type.as_deref() == Some("application/pdf")
            })
            .map(|l| l.href.clone());
        Self {
            entry_id: entry.id.clone(),
            title: entry
                .title
                .as_ref()
                .map(|t| squash_whitespace(&t.content))
                .unwrap_or_default(),
            authors: entry.authors.iter().map(|a| a.name.clone()).collect(),
            summary: entry
                .summary
                .as_ref()
                .map(|s| s.content.trim().to_string())
                .unwrap_or_default(),
            published: entry.published,
            updated: entry.updated,
            categories: entry.categories.iter().map(|c| c.term.clone()).collect(),
            pdf_url,
        }
    }
}

/// Collects recent papers for configured queries.
pub struct ArxivCollector {
    ctx: CollectorContext,
}

impl ArxivCollector {
    pub fn new(ctx: CollectorContext) -> Self {
        Self { ctx }
    }

    async fn search(&self, settings: &ArxivSettings, query: &str) -> Result<Vec<Paper>> {
        let params = [
            ("search_query", query.to_string()),
            ("start", "0".to_string()),
            ("max_results", settings.max_results.to_string()),
            ("sortBy", "submittedDate".to_string()),
            ("sortOrder", "descending".to_string()),
        ];
        let bytes = get_bytes(&self.ctx.client, &settings.api_base, &params).await?;
        let feed = feed_rs::parser::parse(&bytes[..])
            .map_err(|e| DigestError::parse(format!("arXiv response for '{query}': {e}")))?;
        Ok(feed.entries.iter().map(Paper::from_entry).collect())
    }

    async fn collect_query(
        &self,
        settings: &ArxivSettings,
        query: &str,
        cutoff: DateTime<Utc>,
        dir: &Path,
        outcome: &mut CollectOutcome,
    ) -> Result<()> {
        let papers = self.search(settings, query).await?;
        info!(query, papers = papers.len(), "query returned");

        for paper in papers {
            // Results are newest first; everything after the first old paper is older.
            if paper.published.is_some_and(|date| date < cutoff) {
                debug!(query, "reached end of time window");
                break;
            }
            if paper.entry_id.is_empty() {
                outcome.skipped += 1;
                continue;
            }
            if self.ctx.seen(SOURCE_KEY, &paper.entry_id).await {
                outcome.skipped += 1;
                continue;
            }

            let doc = Document::new(
                SOURCE_KEY,
                paper.entry_id.clone(),
                paper.title.clone(),
                format_paper(&paper),
            );
            match self.ctx.emit(dir, &doc).await {
                Ok(_) => outcome.emitted += 1,
                Err(e) => {
                    warn!(entry_id = %paper.entry_id, error = %e, "failed to write paper");
                    outcome.failed += 1;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Collector for ArxivCollector {
    fn name(&self) -> &str {
        NAME
    }

    fn source_key(&self) -> &str {
        SOURCE_KEY
    }

    #[instrument(skip_all, fields(collector = NAME))]
    async fn run(&self, config: &CollectorConfig, output_dir: &Path) -> Result<CollectOutcome> {
        let settings: ArxivSettings = config.decode()?;
        let cutoff = window_start(NAME, settings.days_back, Utc::now())?;
        let dir = output_dir.join(NAME);
        let mut outcome = CollectOutcome::default();

        for query in &settings.search_queries {
            if let Err(e) = self
                .collect_query(&settings, query, cutoff, &dir, &mut outcome)
                .await
            {
                warn!(query = %query, error = %e, "arXiv query failed");
            }
        }
        Ok(outcome)
    }
}

fn format_paper(paper: &Paper) -> String {
    let title = if paper.title.is_empty() {
        "Untitled".to_string()
    } else {
        paper.title.clone()
    };
    let authors = paper.authors.join(", ");
    let day = |d: Option<DateTime<Utc>>| d.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default();
    let published = day(paper.published);
    let pdf_url = paper.pdf_url.clone().unwrap_or_default();
    let primary = paper.categories.first().map(String::as_str).unwrap_or("unknown");

    let mut tags = vec!["arxiv".to_string(), "paper".to_string()];
    tags.extend(paper.categories.iter().cloned());

    let mut md = Frontmatter::new("arxiv")
        .text("title", &title)
        .text("authors", &authors)
        .text("published", &published)
        .text("updated", &day(paper.updated))
        .text("url", &paper.entry_id)
        .text("pdf_url", &pdf_url)
        .tags(&tags)
        .render();

    md.push_str(&format!("\n# {title}\n\n"));
    md.push_str(&format!("**Authors:** {authors}\n"));
    md.push_str(&format!("**Published:** {published}\n"));
    md.push_str(&format!("**Primary Category:** {primary}\n\n"));
    md.push_str(&format!("**Link:** <{}>\n", paper.entry_id));
    if !pdf_url.is_empty() {
        md.push_str(&format!("**PDF:** <{pdf_url}>\n"));
    }
    md.push_str(&format!("\n---\n\n## Abstract\n\n{}\n", squash_whitespace(&paper.summary)));
    md
}
