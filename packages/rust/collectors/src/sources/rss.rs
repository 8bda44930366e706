//! RSS and Atom feeds.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use serde::Deserialize;
use tracing::{info, instrument, warn};
use url::Url;

use digest_shared::{CollectorConfig, DigestError, Result};

use crate::collector::{CollectOutcome, Collector, CollectorContext};
use crate::document::{Document, Frontmatter, clean_html, squash_whitespace};
use crate::http::get_bytes;
use crate::registry::CollectorEntry;
use crate::sources::window_start;

pub const NAME: &str = "rss";
pub const SOURCE_KEY: &str = "rss";

pub(crate) const ENTRY: CollectorEntry = CollectorEntry { name: NAME, build };

fn build(ctx: &CollectorContext) -> Result<Arc<dyn Collector>> {
    Ok(Arc::new(RssCollector::new(ctx.clone())))
}

/// `[collectors.rss]` options.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RssSettings {
    #[serde(default)]
    pub feeds: Vec<FeedSettings>,
    #[serde(default = "default_days_back")]
    pub days_back: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedSettings {
    pub url: String,
    /// Display name; defaults to the feed's own title.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_days_back() -> i64 {
    7
}

/// Collects recent entries from configured feeds.
pub struct RssCollector {
    ctx: CollectorContext,
}

impl RssCollector {
    pub fn new(ctx: CollectorContext) -> Self {
        Self { ctx }
    }

    async fn collect_feed(
        &self,
        feed: &FeedSettings,
        cutoff: DateTime<Utc>,
        dir: &Path,
        outcome: &mut CollectOutcome,
    ) -> Result<()> {
        let base = Url::parse(&feed.url)
            .map_err(|e| DigestError::validation(format!("invalid feed url {}: {e}", feed.url)))?;
        let bytes = get_bytes(&self.ctx.client, base.as_str(), &[]).await?;
        let parsed = feed_rs::parser::parse(&bytes[..])
            .map_err(|e| DigestError::parse(format!("{}: {e}", feed.url)))?;

        let feed_title = feed
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| parsed.title.as_ref().map(|t| squash_whitespace(&t.content)))
            .unwrap_or_else(|| "Unknown Feed".into());

        let recent: Vec<&Entry> = parsed
            .entries
            .iter()
            .filter(|entry| entry.published.or(entry.updated).is_none_or(|date| date >= cutoff))
            .collect();
        info!(feed = %feed_title, entries = parsed.entries.len(), recent = recent.len(), "feed parsed");

        for entry in recent {
            let Some(link) = entry_link(entry, &base) else {
                outcome.skipped += 1;
                continue;
            };
            if self.ctx.seen(SOURCE_KEY, &link).await {
                outcome.skipped += 1;
                continue;
            }

            let title = entry
                .title
                .as_ref()
                .map(|t| squash_whitespace(&t.content))
                .unwrap_or_default();
            let doc = Document::new(
                SOURCE_KEY,
                link.clone(),
                title,
                format_entry(entry, &link, &feed_title, &feed.tags),
            );
            match self.ctx.emit(dir, &doc).await {
                Ok(_) => outcome.emitted += 1,
                Err(e) => {
                    warn!(link = %link, error = %e, "failed to write entry");
                    outcome.failed += 1;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Collector for RssCollector {
    fn name(&self) -> &str {
        NAME
    }

    fn source_key(&self) -> &str {
        SOURCE_KEY
    }

    #[instrument(skip_all, fields(collector = NAME))]
    async fn run(&self, config: &CollectorConfig, output_dir: &Path) -> Result<CollectOutcome> {
        let settings: RssSettings = config.decode()?;
        let cutoff = window_start(NAME, settings.days_back, Utc::now())?;
        let dir = output_dir.join(NAME);
        let mut outcome = CollectOutcome::default();

        for feed in settings.feeds.iter().filter(|f| !f.url.trim().is_empty()) {
            if let Err(e) = self.collect_feed(feed, cutoff, &dir, &mut outcome).await {
                warn!(url = %feed.url, error = %e, "failed to process feed");
            }
        }
        Ok(outcome)
    }
}

/// First entry link, resolved against the feed URL.
fn entry_link(entry: &Entry, base: &Url) -> Option<String> {
    let href = entry.links.first()?.href.trim();
    if href.is_empty() {
        return None;
    }
    base.join(href).ok().map(String::from)
}

fn format_entry(entry: &Entry, link: &str, feed_title: &str, tags: &[String]) -> String {
    let title = entry
        .title
        .as_ref()
        .map(|t| squash_whitespace(&t.content))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".into());
    let author = entry
        .authors
        .first()
        .map(|p| p.name.clone())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| feed_title.to_string());
    let published = entry
        .published
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "Unknown".into());
    let body = entry
        .content
        .as_ref()
        .and_then(|c| c.body.clone())
        .or_else(|| entry.summary.as_ref().map(|s| s.content.clone()))
        .map(|html| clean_html(&html))
        .unwrap_or_default();

    let mut all_tags = vec!["rss".to_string()];
    all_tags.extend(tags.iter().cloned());

    let mut md = Frontmatter::new("rss")
        .text("title", &title)
        .text("author", &author)
        .text("source", feed_title)
        .text("published", &published)
        .text("url", link)
        .tags(&all_tags)
        .render();

    md.push_str(&format!("\n# {title}\n\n"));
    md.push_str(&format!("**Source:** {feed_title}\n"));
    md.push_str(&format!("**Published:** {published}\n"));
    md.push_str(&format!("**Link:** <{link}>\n"));
    if !body.is_empty() {
        md.push_str(&format!("\n---\n\n{body}\n"));
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::testing::{config, markdown_files, test_context};
    use chrono::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rss_fixture() -> String {
        let recent = (Utc::now() - Duration::days(1)).to_rfc2822();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Systems Weekly</title>
    <link>https://blog.example.com</link>
    <description>Notes</description>
    <item>
      <title>Fresh post about schedulers</title>
      <link>https://blog.example.com/posts/schedulers</link>
      <description>&lt;p&gt;Work stealing explained&lt;/p&gt;</description>
      <pubDate>{recent}</pubDate>
    </item>
    <item>
      <title>Ancient post</title>
      <link>https://blog.example.com/posts/ancient</link>
      <pubDate>Mon, 03 Jan 2000 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Undated but relative</title>
      <link>/posts/undated</link>
    </item>
    <item>
      <title>No link at all</title>
    </item>
  </channel>
</rss>"#
        )
    }

    async fn mount_feed(server: &MockServer, route: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(route.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn keeps_recent_and_undated_entries() {
        let server = MockServer::start().await;
        mount_feed(&server, "/feed.xml", rss_fixture()).await;

        let (ctx, out) = test_context().await;
        let collector = RssCollector::new(ctx.clone());
        let cfg = config(
            NAME,
            &format!("feeds = [{{ url = \"{}/feed.xml\", tags = [\"systems\"] }}]", server.uri()),
        );

        let outcome = collector.run(&cfg, &out).await.unwrap();

        assert_eq!(outcome.emitted, 2);
        assert_eq!(markdown_files(&out.join(NAME)).len(), 2);
        assert!(ctx.store.exists(SOURCE_KEY, "https://blog.example.com/posts/schedulers").await);
        assert!(!ctx.store.exists(SOURCE_KEY, "https://blog.example.com/posts/ancient").await);
        assert!(ctx.store.exists(SOURCE_KEY, &format!("{}/posts/undated", server.uri())).await);

        let fresh = markdown_files(&out.join(NAME))
            .into_iter()
            .find(|p| p.to_string_lossy().contains("schedulers"))
            .unwrap();
        let body = std::fs::read_to_string(fresh).unwrap();
        assert!(body.contains("source: \"Systems Weekly\""));
        assert!(body.contains("Work stealing explained"));
        assert!(body.contains("tags: [\"rss\", \"systems\"]"));
    }

    #[tokio::test]
    async fn oversized_window_is_a_config_error() {
        let (ctx, out) = test_context().await;
        let collector = RssCollector::new(ctx);
        let cfg = config(
            NAME,
            "days_back = 9223372036854775807\nfeeds = [{ url = \"https://blog.example.com/feed.xml\" }]",
        );

        let err = collector.run(&cfg, &out).await.unwrap_err();
        assert!(matches!(err, DigestError::Config { .. }));
        assert!(!out.join(NAME).exists());
    }

    #[tokio::test]
    async fn rerun_emits_nothing_new() {
        let server = MockServer::start().await;
        mount_feed(&server, "/feed.xml", rss_fixture()).await;

        let (ctx, out) = test_context().await;
        let collector = RssCollector::new(ctx);
        let cfg = config(NAME, &format!("feeds = [{{ url = \"{}/feed.xml\" }}]", server.uri()));

        assert_eq!(collector.run(&cfg, &out).await.unwrap().emitted, 2);
        let again = collector.run(&cfg, &out).await.unwrap();
        assert_eq!(again.emitted, 0);
        assert_eq!(markdown_files(&out.join(NAME)).len(), 2);
    }

    #[tokio::test]
    async fn broken_feed_does_not_stop_the_next() {
        let server = MockServer::start().await;
        mount_feed(&server, "/broken.xml", "this is not xml <<<".into()).await;
        mount_feed(&server, "/feed.xml", rss_fixture()).await;

        let (ctx, out) = test_context().await;
        let collector = RssCollector::new(ctx);
        let cfg = config(
            NAME,
            &format!(
                "feeds = [{{ url = \"{uri}/broken.xml\" }}, {{ url = \"not a url\" }}, {{ url = \"{uri}/feed.xml\" }}]",
                uri = server.uri()
            ),
        );

        let outcome = collector.run(&cfg, &out).await.unwrap();
        assert_eq!(outcome.emitted, 2);
    }

    #[tokio::test]
    async fn atom_feeds_parse_too() {
        let server = MockServer::start().await;
        let updated = (Utc::now() - Duration::hours(3)).to_rfc3339();
        let atom = format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Notes</title>
  <id>urn:uuid:60a76c80-d399-11d9-b93C-0003939e0af6</id>
  <updated>{updated}</updated>
  <entry>
    <title>Consensus, again</title>
    <link href="https://notes.example.org/consensus"/>
    <id>urn:uuid:1225c695-cfb8-4ebb-aaaa-80da344efa6a</id>
    <updated>{updated}</updated>
    <author><name>Leslie</name></author>
    <summary>Paxos made simpler.</summary>
  </entry>
</feed>"#
        );
        mount_feed(&server, "/atom.xml", atom).await;

        let (ctx, out) = test_context().await;
        let collector = RssCollector::new(ctx);
        let cfg = config(NAME, &format!("feeds = [{{ url = \"{}/atom.xml\", name = \"Notes\" }}]", server.uri()));

        assert_eq!(collector.run(&cfg, &out).await.unwrap().emitted, 1);
        let files = markdown_files(&out.join(NAME));
        let body = std::fs::read_to_string(&files[0]).unwrap();
        assert!(body.contains("author: \"Leslie\""));
        assert!(body.contains("source: \"Notes\""));
        assert!(body.contains("Paxos made simpler."));
    }
}
