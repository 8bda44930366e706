//! Normalized markdown documents: frontmatter, HTML cleanup, comment trees.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use digest_shared::{DigestError, DiscussionNode, Result};

static TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static BLANK_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// One rendered document, ready to be written under a collector directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Dedup namespace; also the filename prefix.
    pub source_key: String,
    pub unique_id: String,
    pub title: String,
    /// Full markdown text, frontmatter included.
    pub content: String,
}

impl Document {
    pub fn new(
        source_key: impl Into<String>,
        unique_id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            source_key: source_key.into(),
            unique_id: unique_id.into(),
            title: title.into(),
            content: content.into(),
        }
    }
}

/// Write `content` to `path`, creating parent directories.
pub fn write_document(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| DigestError::io(parent, e))?;
    }
    std::fs::write(path, content).map_err(|e| DigestError::io(path, e))
}

// ---------------------------------------------------------------------------
// Frontmatter
// ---------------------------------------------------------------------------

/// YAML frontmatter builder. Fields render in insertion order.
#[derive(Debug, Clone)]
pub struct Frontmatter {
    lines: Vec<String>,
}

impl Frontmatter {
    /// Start a block with the document `type` field.
    pub fn new(doc_type: &str) -> Self {
        Self {
            lines: vec![format!("type: {doc_type}")],
        }
    }

    /// Add a quoted string field.
    pub fn text(mut self, key: &str, value: &str) -> Self {
        self.lines
            .push(format!("{key}: \"{}\"", escape_yaml_string(value)));
        self
    }

    pub fn number(mut self, key: &str, value: i64) -> Self {
        self.lines.push(format!("{key}: {value}"));
        self
    }

    /// Add a flow sequence of tags.
    pub fn tags(mut self, tags: &[String]) -> Self {
        let quoted: Vec<String> = tags
            .iter()
            .map(|t| format!("\"{}\"", escape_yaml_string(t)))
            .collect();
        self.lines.push(format!("tags: [{}]", quoted.join(", ")));
        self
    }

    pub fn render(&self) -> String {
        let mut out = String::from("---\n");
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("---\n");
        out
    }
}

fn escape_yaml_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', " ")
}

// ---------------------------------------------------------------------------
// Body helpers
// ---------------------------------------------------------------------------

/// Convert an HTML fragment (comment text, feed summary) into markdown.
///
/// Falls back to tag stripping if the converter rejects the input.
pub fn clean_html(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }
    let markdown = htmd::convert(html).unwrap_or_else(|_| TAGS.replace_all(html, "").into_owned());
    BLANK_RUNS
        .replace_all(markdown.trim(), "\n\n")
        .into_owned()
}

/// Collapse internal whitespace (arXiv titles wrap across lines).
pub fn squash_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Render a comment forest as indented, quoted markdown.
///
/// Each level indents two spaces. Nodes with empty text are dropped along
/// with their replies.
pub fn format_discussion(nodes: &[DiscussionNode]) -> String {
    let mut out = String::new();
    for node in nodes {
        push_node(&mut out, node);
    }
    out
}

fn push_node(out: &mut String, node: &DiscussionNode) {
    let text = node.text.trim();
    if text.is_empty() {
        return;
    }
    let indent = "  ".repeat(node.depth as usize);
    if node.score != 0 {
        let _ = writeln!(out, "{indent}- **{}** ({} points)", node.author, node.score);
    } else {
        let _ = writeln!(out, "{indent}- **{}**", node.author);
    }
    for line in text.lines() {
        let _ = writeln!(out, "{indent}  > {line}");
    }
    out.push('\n');
    for child in &node.children {
        push_node(out, child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, author: &str, text: &str, depth: u32, children: Vec<DiscussionNode>) -> DiscussionNode {
        DiscussionNode {
            id: id.into(),
            author: author.into(),
            text: text.into(),
            score: 0,
            depth,
            children,
        }
    }

    #[test]
    fn frontmatter_quotes_and_escapes() {
        let fm = Frontmatter::new("hackernews_story")
            .text("title", "Say \"hi\"")
            .number("score", 120)
            .tags(&["rust".to_string(), "async".to_string()])
            .render();
        assert_eq!(
            fm,
            "---\ntype: hackernews_story\ntitle: \"Say \\\"hi\\\"\"\nscore: 120\ntags: [\"rust\", \"async\"]\n---\n"
        );
    }

    #[test]
    fn clean_html_strips_markup() {
        let md = clean_html("<p>Hello <b>world</b></p><p>Second   paragraph</p>");
        assert!(md.contains("Hello"));
        assert!(md.contains("world"));
        assert!(md.contains("Second"));
        assert!(!md.contains('<'));
        assert!(!md.contains("\n\n\n"));
    }

    #[test]
    fn clean_html_empty() {
        assert_eq!(clean_html("   "), "");
    }

    #[test]
    fn squash_wrapped_title() {
        assert_eq!(
            squash_whitespace("Consensus in\n  the   Wild"),
            "Consensus in the Wild"
        );
    }

    #[test]
    fn discussion_indents_by_depth() {
        let tree = vec![node(
            "1",
            "alice",
            "top level",
            0,
            vec![node("2", "bob", "reply\nsecond line", 1, vec![])],
        )];
        let md = format_discussion(&tree);
        assert!(md.contains("- **alice**\n  > top level\n"));
        assert!(md.contains("  - **bob**\n    > reply\n    > second line\n"));
    }

    #[test]
    fn empty_nodes_drop_their_replies() {
        let tree = vec![
            node("1", "ghost", "  ", 0, vec![node("2", "bob", "hidden", 1, vec![])]),
            node("3", "carol", "shown", 0, vec![]),
        ];
        let md = format_discussion(&tree);
        assert!(!md.contains("hidden"));
        assert!(md.contains("shown"));
    }
}
