//! Run report (`REPORT.md`).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::info;

use digest_shared::{DigestError, Result};

use crate::pipeline::PipelineRun;
use crate::scan::markdown_files;

/// Report file name inside the output root.
pub const REPORT_FILE: &str = "REPORT.md";

/// Count documents under `dir` per source key, by `<key>_` filename prefix.
/// Paths in `preexisting` belong to earlier runs and are not counted.
pub fn count_by_prefix(
    dir: &Path,
    source_keys: &[String],
    preexisting: &BTreeSet<PathBuf>,
) -> BTreeMap<String, usize> {
    let mut counts: BTreeMap<String, usize> =
        source_keys.iter().map(|k| (k.clone(), 0)).collect();

    for path in markdown_files(dir)
        .into_iter()
        .filter(|p| !preexisting.contains(p))
    {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(key) = source_keys
            .iter()
            .find(|key| name.starts_with(&format!("{key}_")))
        {
            *counts.entry(key.clone()).or_default() += 1;
        }
    }
    counts
}

/// Render the report text.
pub fn render_report(
    run: &PipelineRun,
    file_counts: &BTreeMap<String, usize>,
    generated_at: DateTime<Local>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Research Digest Report\n");
    let _ = writeln!(out, "**Date:** {}", generated_at.format("%Y-%m-%d %H:%M"));
    let _ = writeln!(out, "**Run:** {}", run.run_id);
    let _ = writeln!(out, "**Output:** {}", run.output_root.display());
    let _ = writeln!(out, "**Content:** {}\n", run.content_dir.display());

    let _ = writeln!(out, "## New Items by Collector\n");
    if run.counts.is_empty() {
        let _ = writeln!(out, "No collectors produced documents.");
    }
    for (name, count) in &run.counts {
        let _ = writeln!(out, "- **{name}:** {count}");
    }
    let _ = writeln!(out, "\n**Total New Items:** {}\n", run.total_emitted());

    let _ = writeln!(out, "## Documents on Disk\n");
    for (key, count) in file_counts {
        let _ = writeln!(out, "- `{key}_*`: {count}");
    }
    let _ = writeln!(
        out,
        "\n**Duplicates removed this run:** {}\n",
        run.duplicates_removed
    );

    if !run.failures.is_empty() {
        let _ = writeln!(out, "## Failed Collectors\n");
        for (name, error) in &run.failures {
            let _ = writeln!(out, "- **{name}:** {error}");
        }
        out.push('\n');
    }

    if !run.steps.is_empty() {
        let _ = writeln!(out, "## Processing Steps\n");
        for (stage, outcome) in &run.steps {
            let status = if outcome.success {
                "ok"
            } else if outcome.timed_out {
                "timed out"
            } else {
                "failed"
            };
            let _ = writeln!(out, "- {}: {status}", stage.label());
        }
        out.push('\n');
    }

    out.push_str("---\nGenerated by research-digest\n");
    out
}

/// Count this run's documents in its content directory and write
/// `REPORT.md` into the output root.
pub fn write_report(run: &PipelineRun, source_keys: &[String]) -> Result<PathBuf> {
    let file_counts = count_by_prefix(&run.content_dir, source_keys, &run.preexisting);
    let report = render_report(run, &file_counts, Local::now());
    let path = run.output_root.join(REPORT_FILE);
    std::fs::write(&path, report).map_err(|e| DigestError::io(&path, e))?;
    info!(path = %path.display(), "report written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::StepOutcome;
    use crate::pipeline::Stage;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn counts_files_by_source_prefix() {
        let dir = std::env::temp_dir().join(format!("digest_report_{}", Uuid::now_v7()));
        for rel in [
            "hackernews/hn_1_a.md",
            "hackernews/hn_2_b.md",
            "rss/rss_x_c.md",
            "rss/notes.txt",
            "misc/unrelated.md",
        ] {
            let path = dir.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, "x").unwrap();
        }

        let counts = count_by_prefix(&dir, &keys(&["arxiv", "hn", "rss"]), &BTreeSet::new());

        assert_eq!(counts.get("hn"), Some(&2));
        assert_eq!(counts.get("rss"), Some(&1));
        assert_eq!(counts.get("arxiv"), Some(&0));

        let earlier: BTreeSet<PathBuf> = [dir.join("hackernews/hn_1_a.md")].into();
        let counts = count_by_prefix(&dir, &keys(&["hn"]), &earlier);
        assert_eq!(counts.get("hn"), Some(&1));
    }

    #[test]
    fn report_lists_counts_failures_and_steps() {
        let mut run = PipelineRun::new(Uuid::now_v7(), PathBuf::from("/out/2026-01-02"));
        run.counts.insert("hackernews".into(), 3);
        run.counts.insert("rss".into(), 2);
        run.failures.push(("reddit".into(), "network error: HTTP 503".into()));
        run.duplicates_removed = 1;
        run.steps.push((
            Stage::Format,
            StepOutcome {
                success: true,
                ..StepOutcome::default()
            },
        ));
        run.steps.push((
            Stage::Split,
            StepOutcome {
                timed_out: true,
                ..StepOutcome::default()
            },
        ));
        let mut files = BTreeMap::new();
        files.insert("hn".to_string(), 3);

        let at = Local.with_ymd_and_hms(2026, 1, 2, 9, 30, 0).unwrap();
        let text = render_report(&run, &files, at);

        assert!(text.contains("**Date:** 2026-01-02 09:30"));
        assert!(text.contains("- **hackernews:** 3"));
        assert!(text.contains("**Total New Items:** 5"));
        assert!(text.contains("- `hn_*`: 3"));
        assert!(text.contains("**Duplicates removed this run:** 1"));
        assert!(text.contains("- **reddit:** network error: HTTP 503"));
        assert!(text.contains("- format: ok"));
        assert!(text.contains("- split: timed out"));
    }
}
