//! Stable, filesystem-safe document names.

use std::sync::LazyLock;

use regex::Regex;

static TITLE_STRIP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s-]").unwrap());
static TITLE_COLLAPSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[-\s]+").unwrap());
static ID_STRIP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w-]").unwrap());

const MAX_PART_CHARS: usize = 50;

/// Build `<source>_<id>_<title>.md` from a title and unique id.
///
/// Deterministic for the same inputs. The id keeps its last 50 characters
/// (URL ids differ at the tail), the title its first 50.
pub fn generate_filename(source: &str, title: &str, unique_id: &str) -> String {
    let title = if title.trim().is_empty() {
        "untitled"
    } else {
        title
    };
    let sane_title = TITLE_STRIP.replace_all(title, "");
    let sane_title = TITLE_COLLAPSE.replace_all(&sane_title, "_");
    let sane_title: String = sane_title.chars().take(MAX_PART_CHARS).collect();
    let sane_title = sane_title.trim_matches('_').to_lowercase();

    let sane_id = ID_STRIP.replace_all(unique_id, "");
    let skip = sane_id.chars().count().saturating_sub(MAX_PART_CHARS);
    let sane_id: String = sane_id.chars().skip(skip).collect();
    let sane_id = sane_id.trim_matches('_');

    format!("{source}_{sane_id}_{sane_title}.md")
}
