// src/ops/mod.rs
//
// =============================================================================
// SAXSFLOW: BUILT-IN OPERATIONS (v 0.1 )
// =============================================================================
//
// Operations shipped with the engine. Domain operations (integration,
// fitting, ...) live in downstream crates and register themselves with an
// OpManager.

pub mod basic;
pub mod batch;
pub mod realtime;

pub use basic::Identity;
pub use batch::{BatchFromFiles, BatchFromList};
pub use realtime::RealtimeFromFiles;

use anyhow::{Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Files directly inside `dir` whose name matches `pattern`, sorted.
pub(crate) async fn matching_files(dir: &Path, pattern: &Regex) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("Cannot list {}", dir.display()))?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| pattern.is_match(n));
        // metadata() follows symlinks, unlike DirEntry::file_type().
        if matches && fs::metadata(&path).await?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub(crate) fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).with_context(|| format!("Invalid file pattern '{}'", pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_matching_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.dat", "a.dat", "notes.txt"] {
            std::fs::write(dir.path().join(name), "1").unwrap();
        }
        std::fs::create_dir(dir.path().join("c.dat")).unwrap();

        let files = matching_files(dir.path(), &compile(r"\.dat$").unwrap())
            .await
            .unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.dat", "b.dat"]);
    }

    #[tokio::test]
    async fn missing_directories_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = matching_files(&dir.path().join("absent"), &compile(".*").unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Cannot list"));
        assert!(compile("(").is_err());
    }
}
