//! Reddit: top posts per subreddit with their nested comment listings.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use digest_shared::{CollectorConfig, DigestError, DiscussionNode, Result};

use crate::collector::{CollectOutcome, Collector, CollectorContext};
use crate::document::{Document, Frontmatter, format_discussion};
use crate::http::get_json;
use crate::registry::CollectorEntry;

pub const NAME: &str = "reddit";
pub const SOURCE_KEY: &str = "reddit";

pub(crate) const ENTRY: CollectorEntry = CollectorEntry { name: NAME, build };

fn build(ctx: &CollectorContext) -> Result<Arc<dyn Collector>> {
    Ok(Arc::new(RedditCollector::new(ctx.clone())))
}

const REMOVED_BODIES: [&str; 2] = ["[deleted]", "[removed]"];

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// `[collectors.reddit]` options.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedditSettings {
    #[serde(default)]
    pub subreddits: Vec<SubredditSettings>,
    /// Listing window: hour, day, week, month, year, all.
    #[serde(default = "default_time_filter")]
    pub time_filter: String,
    #[serde(default = "default_limit")]
    pub post_limit: u32,
    #[serde(default = "default_limit")]
    pub comment_limit: u32,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubredditSettings {
    pub name: String,
    #[serde(default = "default_min_upvotes")]
    pub min_upvotes: i64,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_time_filter() -> String {
    "week".into()
}
fn default_limit() -> u32 {
    50
}
fn default_max_depth() -> u32 {
    3
}
fn default_request_delay_ms() -> u64 {
    1000
}
fn default_api_base() -> String {
    "https://www.reddit.com".into()
}
fn default_min_upvotes() -> i64 {
    50
}

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Listing<T> {
    data: ListingData<T>,
}

#[derive(Debug, Deserialize)]
struct ListingData<T> {
    #[serde(default = "Vec::new")]
    children: Vec<Thing<T>>,
}

#[derive(Debug, Deserialize)]
struct Thing<T> {
    data: T,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RedditPost {
    id: String,
    title: String,
    subreddit: String,
    author: String,
    score: i64,
    num_comments: u64,
    created_utc: f64,
    permalink: String,
    selftext: String,
}

/// Build the comment forest from a listing's `children`, dropping removed
/// comments with their replies and anything at or past `max_depth`.
fn comment_tree(children: &[Value], depth: u32, max_depth: u32) -> Vec<DiscussionNode> {
    if depth >= max_depth {
        return Vec::new();
    }
    children
        .iter()
        .filter(|child| child.get("kind").and_then(Value::as_str) == Some("t1"))
        .filter_map(|child| child.get("data"))
        .filter_map(|data| {
            let body = data.get("body").and_then(Value::as_str).unwrap_or_default();
            if REMOVED_BODIES.contains(&body) {
                return None;
            }
            let replies = data
                .pointer("/replies/data/children")
                .and_then(Value::as_array)
                .map(|replies| comment_tree(replies, depth + 1, max_depth))
                .unwrap_or_default();
            Some(DiscussionNode {
                id: str_field(data, "id"),
                author: data
                    .get("author")
                    .and_then(Value::as_str)
                    .unwrap_or("[deleted]")
                    .to_string(),
                text: body.to_string(),
                score: data.get("score").and_then(Value::as_i64).unwrap_or(0),
                depth,
                children: replies,
            })
        })
        .collect()
}

fn str_field(data: &Value, key: &str) -> String {
    data.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

/// Collects top posts from configured subreddits.
pub struct RedditCollector {
    ctx: CollectorContext,
}

impl RedditCollector {
    pub fn new(ctx: CollectorContext) -> Self {
        Self { ctx }
    }

    async fn top_posts(&self, settings: &RedditSettings, subreddit: &str) -> Result<Vec<RedditPost>> {
        let url = format!("{}/r/{subreddit}/top.json", settings.api_base.trim_end_matches('/'));
        let query = [
            ("limit", settings.post_limit.to_string()),
            ("t", settings.time_filter.clone()),
        ];
        let listing: Listing<RedditPost> = get_json(&self.ctx.client, &url, &query).await?;
        Ok(listing.data.children.into_iter().map(|t| t.data).collect())
    }

    async fn comments(
        &self,
        settings: &RedditSettings,
        subreddit: &str,
        post_id: &str,
    ) -> Result<Vec<DiscussionNode>> {
        let url = format!(
            "{}/r/{subreddit}/comments/{post_id}.json",
            settings.api_base.trim_end_matches('/')
        );
        let query = [
            ("limit", settings.comment_limit.to_string()),
            ("depth", settings.max_depth.to_string()),
        ];
        let listings: Vec<Value> = get_json(&self.ctx.client, &url, &query).await?;
        let children = listings
            .get(1)
            .and_then(|listing| listing.pointer("/data/children"))
            .and_then(Value::as_array)
            .ok_or_else(|| DigestError::parse(format!("{url}: no comment listing")))?;
        Ok(comment_tree(children, 0, settings.max_depth))
    }

    async fn collect_subreddit(
        &self,
        settings: &RedditSettings,
        sub: &SubredditSettings,
        dir: &Path,
        outcome: &mut CollectOutcome,
    ) -> Result<()> {
        info!(subreddit = %sub.name, min_upvotes = sub.min_upvotes, "fetching subreddit");
        let posts = self.top_posts(settings, &sub.name).await?;

        for post in posts {
            if post.id.is_empty() || post.score < sub.min_upvotes {
                outcome.skipped += 1;
                continue;
            }
            if self.ctx.seen(SOURCE_KEY, &post.id).await {
                outcome.skipped += 1;
                continue;
            }

            let comments = match self.comments(settings, &sub.name, &post.id).await {
                Ok(comments) => comments,
                Err(e) => {
                    warn!(post_id = %post.id, error = %e, "failed to fetch comments");
                    outcome.failed += 1;
                    continue;
                }
            };

            let doc = Document::new(
                SOURCE_KEY,
                post.id.clone(),
                post.title.clone(),
                format_post(&post, &comments, &sub.tags),
            );
            match self.ctx.emit(dir, &doc).await {
                Ok(_) => {
                    outcome.emitted += 1;
                    super::pause(settings.request_delay_ms).await;
                }
                Err(e) => {
                    warn!(post_id = %post.id, error = %e, "failed to write post");
                    outcome.failed += 1;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Collector for RedditCollector {
    fn name(&self) -> &str {
        NAME
    }

    fn source_key(&self) -> &str {
        SOURCE_KEY
    }

    #[instrument(skip_all, fields(collector = NAME))]
    async fn run(&self, config: &CollectorConfig, output_dir: &Path) -> Result<CollectOutcome> {
        let settings: RedditSettings = config.decode()?;
        let dir = output_dir.join(NAME);
        let mut outcome = CollectOutcome::default();

        for sub in settings.subreddits.iter().filter(|s| !s.name.trim().is_empty()) {
            if let Err(e) = self.collect_subreddit(&settings, sub, &dir, &mut outcome).await {
                warn!(subreddit = %sub.name, error = %e, "failed to process subreddit");
            }
        }
        Ok(outcome)
    }
}

fn format_post(post: &RedditPost, comments: &[DiscussionNode], tags: &[String]) -> String {
    let title: &str = if post.title.is_empty() { "Untitled" } else { &post.title };
    let author: &str = if post.author.is_empty() { "[deleted]" } else { &post.author };
    let permalink = format!("https://www.reddit.com{}", post.permalink);
    let date = DateTime::from_timestamp(post.created_utc as i64, 0)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default();

    let mut all_tags = vec!["reddit".to_string(), post.subreddit.clone()];
    all_tags.extend(tags.iter().cloned());

    let mut md = Frontmatter::new("reddit")
        .text("title", title)
        .text("subreddit", &post.subreddit)
        .text("author", author)
        .number("score", post.score)
        .number("comments", post.num_comments as i64)
        .text("date", &date)
        .text("url", &permalink)
        .tags(&all_tags)
        .render();

    md.push_str(&format!("\n# {title}\n\n"));
    md.push_str(&format!("**Subreddit:** r/{}\n", post.subreddit));
    md.push_str(&format!("**Posted by:** u/{author}\n"));
    md.push_str(&format!("**Score:** {} points\n", post.score));
    md.push_str(&format!("**Link:** <{permalink}>\n"));
    if !post.selftext.trim().is_empty() {
        md.push_str(&format!("\n---\n\n{}\n", post.selftext.trim()));
    }
    if !comments.is_empty() {
        md.push_str("\n---\n\n## Comments\n\n");
        md.push_str(&format_discussion(comments));
    }
    md
}
