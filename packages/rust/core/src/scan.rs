use std::path::{Path, PathBuf};

use tracing::warn;

/// Every `*.md` file under `dir`, recursively, in sorted path order.
/// Unreadable directories are logged and skipped.
pub(crate) fn markdown_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let entries = match std::fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(e) => {
                if current != dir || dir.exists() {
                    warn!(dir = %current.display(), error = %e, "cannot read directory");
                }
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "md") {
                files.push(path);
            }
        }
    }

    files.sort();
    files
}
