//! Hacker News: Algolia story search plus Firebase item trees.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use digest_shared::{CollectorConfig, DiscussionNode, Result};

use crate::collector::{CollectOutcome, Collector, CollectorContext};
use crate::document::{Document, Frontmatter, clean_html, format_discussion};
use crate::http::get_json;
use crate::registry::CollectorEntry;
use crate::tree::{FetchedNode, NodeSource, TreeFetcher};

pub const NAME: &str = "hackernews";
pub const SOURCE_KEY: &str = "hn";

pub(crate) const ENTRY: CollectorEntry = CollectorEntry {
    name: NAME,
    build,
};

fn build(ctx: &CollectorContext) -> Result<Arc<dyn Collector>> {
    Ok(Arc::new(HackerNewsCollector::new(ctx.clone())))
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// `[collectors.hackernews]` options.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HnSettings {
    #[serde(default)]
    pub search_topics: Vec<String>,
    #[serde(default = "default_min_points")]
    pub min_points: u32,
    #[serde(default = "default_min_comments")]
    pub min_comments: u64,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_hits_per_page")]
    pub hits_per_page: u32,
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    /// Item API root (`<api_base>/item/<id>.json`).
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Search API root (`<search_base>/search`).
    #[serde(default = "default_search_base")]
    pub search_base: String,
}

fn default_min_points() -> u32 {
    50
}
fn default_min_comments() -> u64 {
    20
}
fn default_max_depth() -> u32 {
    3
}
fn default_max_workers() -> usize {
    10
}
fn default_hits_per_page() -> u32 {
    50
}
fn default_request_delay_ms() -> u64 {
    1000
}
fn default_api_base() -> String {
    "https://hacker-news.firebaseio.com/v0".into()
}
fn default_search_base() -> String {
    "https://hn.algolia.com/api/v1".into()
}

// ---------------------------------------------------------------------------
// API client
// ---------------------------------------------------------------------------

/// Firebase item, as returned by `/item/<id>.json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct HnItem {
    id: u64,
    by: Option<String>,
    title: Option<String>,
    url: Option<String>,
    text: Option<String>,
    score: i64,
    descendants: u64,
    time: i64,
    kids: Vec<u64>,
    deleted: bool,
    dead: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "objectID")]
    object_id: String,
}

struct HnClient {
    client: Client,
    api_base: String,
    search_base: String,
}

impl HnClient {
    async fn item(&self, id: &str) -> Result<Option<HnItem>> {
        let url = format!("{}/item/{id}.json", self.api_base.trim_end_matches('/'));
        get_json(&self.client, &url, &[]).await
    }

    async fn search_stories(&self, topic: &str, settings: &HnSettings) -> Result<Vec<String>> {
        let url = format!("{}/search", self.search_base.trim_end_matches('/'));
        let query = [
            ("query", topic.to_string()),
            ("tags", "story".to_string()),
            ("hitsPerPage", settings.hits_per_page.to_string()),
            ("numericFilters", format!("points>={}", settings.min_points)),
        ];
        let response: SearchResponse = get_json(&self.client, &url, &query).await?;
        Ok(response.hits.into_iter().map(|h| h.object_id).collect())
    }
}

#[async_trait]
impl NodeSource for HnClient {
    async fn fetch_node(&self, id: &str) -> Result<Option<FetchedNode>> {
        Ok(self.item(id).await?.map(|item| FetchedNode {
            id: item.id.to_string(),
            author: item.by,
            text: item.text.as_deref().map(clean_html),
            score: item.score,
            kids: item.kids.iter().map(u64::to_string).collect(),
            removed: item.deleted || item.dead,
        }))
    }
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

/// Collects high-signal Hacker News stories with their discussion trees.
pub struct HackerNewsCollector {
    ctx: CollectorContext,
}

enum StoryOutcome {
    Emitted,
    Skipped,
}

impl HackerNewsCollector {
    pub fn new(ctx: CollectorContext) -> Self {
        Self { ctx }
    }

    async fn process_story(
        &self,
        client: &Arc<HnClient>,
        fetcher: &TreeFetcher,
        settings: &HnSettings,
        story_id: &str,
        dir: &Path,
    ) -> Result<StoryOutcome> {
        if self.ctx.seen(SOURCE_KEY, story_id).await {
            return Ok(StoryOutcome::Skipped);
        }

        let Some(story) = client.item(story_id).await? else {
            self.ctx.note_skip(SOURCE_KEY, story_id, "story not found");
            return Ok(StoryOutcome::Skipped);
        };
        if story.deleted || story.dead {
            self.ctx.note_skip(SOURCE_KEY, story_id, "story removed");
            return Ok(StoryOutcome::Skipped);
        }
        if story.descendants < settings.min_comments {
            self.ctx.note_skip(SOURCE_KEY, story_id, "too few comments");
            return Ok(StoryOutcome::Skipped);
        }

        info!(story_id, title = story.title.as_deref().unwrap_or(""), "processing story");
        let kids: Vec<String> = story.kids.iter().map(u64::to_string).collect();
        let comments = fetcher.fetch(&kids).await;

        let doc = Document::new(
            SOURCE_KEY,
            story_id,
            story.title.clone().unwrap_or_default(),
            format_story(&story, &comments),
        );
        self.ctx.emit(dir, &doc).await?;
        Ok(StoryOutcome::Emitted)
    }
}

#[async_trait]
impl Collector for HackerNewsCollector {
    fn name(&self) -> &str {
        NAME
    }

    fn source_key(&self) -> &str {
        SOURCE_KEY
    }

    #[instrument(skip_all, fields(collector = NAME))]
    async fn run(&self, config: &CollectorConfig, output_dir: &Path) -> Result<CollectOutcome> {
        let settings: HnSettings = config.decode()?;
        let client = Arc::new(HnClient {
            client: self.ctx.client.clone(),
            api_base: settings.api_base.clone(),
            search_base: settings.search_base.clone(),
        });
        let fetcher = TreeFetcher::new(client.clone(), settings.max_depth, settings.max_workers);
        let dir = output_dir.join(NAME);

        // Union of search hits, first-seen order.
        let mut seen = HashSet::new();
        let mut story_ids = Vec::new();
        for topic in &settings.search_topics {
            match client.search_stories(topic, &settings).await {
                Ok(ids) => story_ids.extend(ids.into_iter().filter(|id| seen.insert(id.clone()))),
                Err(e) => warn!(topic = %topic, error = %e, "story search failed"),
            }
        }
        info!(candidates = story_ids.len(), "stories found");

        let mut outcome = CollectOutcome::default();
        for story_id in &story_ids {
            match self
                .process_story(&client, &fetcher, &settings, story_id, &dir)
                .await
            {
                Ok(StoryOutcome::Emitted) => {
                    outcome.emitted += 1;
                    super::pause(settings.request_delay_ms).await;
                }
                Ok(StoryOutcome::Skipped) => outcome.skipped += 1,
                Err(e) => {
                    warn!(story_id = %story_id, error = %e, "failed to process story");
                    outcome.failed += 1;
                }
            }
        }
        Ok(outcome)
    }
}

fn format_story(story: &HnItem, comments: &[DiscussionNode]) -> String {
    let title = story.title.as_deref().unwrap_or("Untitled");
    let author = story.by.as_deref().unwrap_or("unknown");
    let url = story.url.as_deref().unwrap_or("");
    let hn_url = format!("https://news.ycombinator.com/item?id={}", story.id);
    let date = DateTime::from_timestamp(story.time, 0)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default();

    let mut md = Frontmatter::new("hackernews")
        .text("title", title)
        .text("author", author)
        .number("score", story.score)
        .number("comments", story.descendants as i64)
        .text("date", &date)
        .text("url", url)
        .text("hn_url", &hn_url)
        .tags(&["hackernews".to_string(), "discussion".to_string()])
        .render();

    md.push_str(&format!("\n# {title}\n\n"));
    md.push_str(&format!("**Posted by:** {author}\n"));
    md.push_str(&format!("**Score:** {} points\n", story.score));
    md.push_str(&format!("**Comments:** {}\n", story.descendants));
    md.push_str(&format!("**HN Discussion:** <{hn_url}>\n"));
    if !url.is_empty() {
        md.push_str(&format!("**Link:** <{url}>\n"));
    }
    if let Some(text) = story.text.as_deref().map(clean_html).filter(|t| !t.is_empty()) {
        md.push_str(&format!("\n---\n\n{text}\n"));
    }
    if !comments.is_empty() {
        md.push_str("\n---\n\n## Discussion\n\n");
        md.push_str(&format_discussion(comments));
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::testing::{config, markdown_files, test_context};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_item(server: &MockServer, id: u64, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(format!("/item/{id}.json")))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    async fn mount_search(server: &MockServer, topic: &str, ids: &[&str]) {
        let hits: Vec<_> = ids.iter().map(|id| serde_json::json!({ "objectID": id })).collect();
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("query", topic))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "hits": hits })))
            .mount(server)
            .await;
    }

    fn settings_toml(server: &MockServer, topics: &str) -> String {
        format!(
            "search_topics = {topics}\nrequest_delay_ms = 0\napi_base = \"{uri}\"\nsearch_base = \"{uri}\"\n",
            uri = server.uri()
        )
    }

    async fn mount_story_fixture(server: &MockServer) {
        mount_item(
            server,
            1,
            serde_json::json!({
                "id": 1, "type": "story", "by": "pg", "title": "Rust in Production",
                "url": "https://example.com/rust", "score": 300, "descendants": 42,
                "time": 1_700_000_000, "kids": [11, 12, 13]
            }),
        )
        .await;
        mount_item(
            server,
            11,
            serde_json::json!({ "id": 11, "by": "alice", "text": "<p>Great article</p>", "kids": [111] }),
        )
        .await;
        mount_item(
            server,
            12,
            serde_json::json!({ "id": 12, "by": "troll", "text": "flagged", "dead": true, "kids": [121] }),
        )
        .await;
        mount_item(server, 13, serde_json::json!({ "id": 13, "deleted": true })).await;
        mount_item(
            server,
            111,
            serde_json::json!({ "id": 111, "by": "bob", "text": "Agreed and <i>shipped</i>" }),
        )
        .await;
        mount_item(server, 121, serde_json::json!({ "id": 121, "by": "eve", "text": "hidden reply" })).await;
        // Below the comment threshold.
        mount_item(
            server,
            2,
            serde_json::json!({ "id": 2, "by": "x", "title": "Quiet", "score": 80, "descendants": 3, "time": 1_700_000_000 }),
        )
        .await;
    }

    #[tokio::test]
    async fn collects_story_with_pruned_comment_tree() {
        let server = MockServer::start().await;
        mount_search(&server, "rust", &["1", "2"]).await;
        mount_story_fixture(&server).await;

        let (ctx, out) = test_context().await;
        let collector = HackerNewsCollector::new(ctx.clone());
        let cfg = config(NAME, &settings_toml(&server, r#"["rust"]"#));

        let outcome = collector.run(&cfg, &out).await.unwrap();

        assert_eq!(outcome, CollectOutcome { emitted: 1, skipped: 1, failed: 0 });
        let files = markdown_files(&out.join(NAME));
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("hn_1_rust_in_production.md"));

        let body = std::fs::read_to_string(&files[0]).unwrap();
        assert!(body.contains("title: \"Rust in Production\""));
        assert!(body.contains("url: \"https://example.com/rust\""));
        assert!(body.contains("Great article"));
        assert!(body.contains("Agreed and"));
        assert!(body.contains("shipped"));
        assert!(!body.contains("flagged"));
        assert!(!body.contains("hidden reply"));

        assert!(ctx.store.exists(SOURCE_KEY, "1").await);
        assert!(!ctx.store.exists(SOURCE_KEY, "2").await);
    }

    #[tokio::test]
    async fn second_run_skips_processed_stories() {
        let server = MockServer::start().await;
        mount_search(&server, "rust", &["1"]).await;
        mount_story_fixture(&server).await;

        let (ctx, out) = test_context().await;
        let collector = HackerNewsCollector::new(ctx);
        let cfg = config(NAME, &settings_toml(&server, r#"["rust"]"#));

        assert_eq!(collector.run(&cfg, &out).await.unwrap().emitted, 1);
        let again = collector.run(&cfg, &out).await.unwrap();
        assert_eq!(again, CollectOutcome { emitted: 0, skipped: 1, failed: 0 });
    }

    #[tokio::test]
    async fn failed_search_does_not_stop_other_topics() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("query", "broken"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        mount_search(&server, "rust", &["1"]).await;
        mount_story_fixture(&server).await;

        let (ctx, out) = test_context().await;
        let collector = HackerNewsCollector::new(ctx);
        let cfg = config(NAME, &settings_toml(&server, r#"["broken", "rust"]"#));

        let outcome = collector.run(&cfg, &out).await.unwrap();
        assert_eq!(outcome.emitted, 1);
    }

    #[tokio::test]
    async fn failing_story_is_counted_and_others_continue() {
        let server = MockServer::start().await;
        mount_search(&server, "rust", &["7", "1"]).await;
        Mock::given(method("GET"))
            .and(path("/item/7.json"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        mount_story_fixture(&server).await;

        let (ctx, out) = test_context().await;
        let collector = HackerNewsCollector::new(ctx.clone());
        let cfg = config(NAME, &settings_toml(&server, r#"["rust"]"#));

        let outcome = collector.run(&cfg, &out).await.unwrap();
        assert_eq!(outcome, CollectOutcome { emitted: 1, skipped: 0, failed: 1 });
        assert!(!ctx.store.exists(SOURCE_KEY, "7").await);
    }

    #[tokio::test]
    async fn unknown_option_is_a_config_error() {
        let (ctx, out) = test_context().await;
        let collector = HackerNewsCollector::new(ctx);
        let cfg = config(NAME, "search_topic = [\"typo\"]");

        let err = collector.run(&cfg, &out).await.unwrap_err();
        assert!(err.to_string().contains("[collectors.hackernews]"));
    }
}
