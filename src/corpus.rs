use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{PipelineError, Result};

/// A corpus file selected for ingestion. Text is extracted later, per file,
/// so one unreadable document cannot abort the scan.
#[derive(Debug, Clone)]
pub struct CorpusFile {
    /// Path relative to the corpus root; stable document identifier.
    pub source_id: String,
    pub path: PathBuf,
    pub title: String,
}

/// Scan the corpus folder for document files matching the configured globs.
/// Returns files in deterministic (source_id) order.
pub fn scan_corpus(config: &Config) -> Result<Vec<CorpusFile>> {
    let corpus = &config.corpus;
    let root = &corpus.root;

    if !root.exists() {
        return Err(PipelineError::config(format!(
            "corpus root does not exist: {}",
            root.display()
        )));
    }

    let include_set = build_globset(&corpus.include_globs)?;

    let mut excludes = vec!["**/.git/**".to_string()];
    excludes.extend(corpus.exclude_globs.clone());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();

    let walker = WalkDir::new(root).follow_links(corpus.follow_symlinks);
    for entry in walker {
        let entry = entry.map_err(|e| {
            PipelineError::config(format!("cannot scan corpus root {}: {}", root.display(), e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        files.push(file_to_corpus_file(path, &rel_str));
    }

    files.sort_by(|a, b| a.source_id.cmp(&b.source_id));

    Ok(files)
}

fn file_to_corpus_file(path: &Path, relative_path: &str) -> CorpusFile {
    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| relative_path.to_string());

    CorpusFile {
        source_id: relative_path.to_string(),
        path: path.to_path_buf(),
        title,
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| PipelineError::config(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| PipelineError::config(format!("invalid glob set: {}", e)))
}
