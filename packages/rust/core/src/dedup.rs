//! Same-run content dedup.
//!
//! Independent from the cross-run ledger: this pass keys documents by the
//! URL and title found in their text, so it catches one story reaching the
//! run through two sources (an article that is both a feed entry and a
//! discussion link). Documents are visited in sorted path order; a later
//! document whose URL or title hash was already seen is deleted. Files that
//! existed before the run started are neither candidates nor keys.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::scan::markdown_files;

static URL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(?m)^url:\s*"?(https?://[^\s"]+)"?"#,
        r"\*\*Link:\*\*\s*<?(https?://[^\s>]+)>?",
        r"\*\*HN Discussion:\*\*\s*<?(https?://[^\s>]+)>?",
        r#"(?m)^hn_url:\s*"?(https?://[^\s"]+)"?"#,
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static TITLE_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)^title:\s*"?(.+?)"?\s*$"#).unwrap());

/// Lines searched for a `# ` heading.
const HEADING_SCAN_LINES: usize = 20;

/// What a dedup pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupOutcome {
    pub scanned: usize,
    pub removed: Vec<PathBuf>,
}

/// The first document URL in `content`, frontmatter first.
pub fn extract_url(content: &str) -> Option<String> {
    URL_PATTERNS
        .iter()
        .find_map(|re| re.captures(content))
        .map(|caps| caps[1].to_string())
}

/// The first `# ` heading in the opening lines, else the `title:` field.
pub fn extract_title(content: &str) -> Option<String> {
    content
        .lines()
        .take(HEADING_SCAN_LINES)
        .find_map(|line| line.strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .or_else(|| {
            TITLE_FIELD
                .captures(content)
                .map(|caps| caps[1].trim().to_string())
        })
        .filter(|t| !t.is_empty())
}

/// Hash of a title, case and whitespace insensitive. Placeholder titles
/// do not identify a document and hash to `None`.
pub fn title_hash(title: &str) -> Option<String> {
    let normalized = title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    if normalized.is_empty() || normalized == "untitled" {
        return None;
    }
    let digest = Sha256::digest(normalized.as_bytes());
    Some(format!("{digest:x}"))
}

/// Remove same-run duplicates among the markdown documents under `dir`,
/// ignoring every path in `preexisting`.
#[instrument(skip_all, fields(dir = %dir.display(), preexisting = preexisting.len()))]
pub fn dedupe_documents(dir: &Path, preexisting: &BTreeSet<PathBuf>) -> DedupOutcome {
    let mut seen_urls: HashSet<String> = HashSet::new();
    let mut seen_titles: HashSet<String> = HashSet::new();
    let mut outcome = DedupOutcome::default();

    for path in markdown_files(dir)
        .into_iter()
        .filter(|p| !preexisting.contains(p))
    {
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read document, leaving it");
                continue;
            }
        };
        outcome.scanned += 1;

        let url = extract_url(&content);
        let hash = extract_title(&content).and_then(|t| title_hash(&t));

        let duplicate = url.as_ref().is_some_and(|u| seen_urls.contains(u))
            || hash.as_ref().is_some_and(|h| seen_titles.contains(h));

        if duplicate {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "removed duplicate document");
                    outcome.removed.push(path);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove duplicate"),
            }
            continue;
        }

        seen_urls.extend(url);
        seen_titles.extend(hash);
    }

    info!(scanned = outcome.scanned, removed = outcome.removed.len(), "content dedup finished");
    outcome
}
