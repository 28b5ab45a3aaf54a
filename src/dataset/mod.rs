//! QA items and reference documents for an evaluation run.

pub mod client;
pub mod huggingface;
pub mod local;
pub mod types;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use huggingface::HuggingFaceDocDataset;
pub use local::LocalDataset;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaItem {
    pub question: String,
    pub answer: String,
    /// Document the QA pair was written from, when known.
    #[serde(default, alias = "source_doc", skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[cfg(test)]
impl QaItem {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            source: None,
        }
    }
}

#[async_trait]
pub trait Dataset: Send + Sync {
    /// Label recorded in the run manifest.
    fn name(&self) -> String;

    /// Up to `max` QA items whose source matches one of `filter_extensions`.
    /// Items without a source are kept.
    async fn load_qa_items(
        &self,
        max: Option<usize>,
        filter_extensions: &[&str],
    ) -> Result<Vec<QaItem>>;

    /// Materialises up to `max` documents on disk and returns their directory.
    async fn load_documents(
        &self,
        max: Option<usize>,
        filter_extensions: &[&str],
        force_reload: bool,
    ) -> Result<PathBuf>;
}

/// Case-insensitive suffix match; an empty filter accepts everything.
pub fn matches_extension(name: &str, filter_extensions: &[&str]) -> bool {
    if filter_extensions.is_empty() {
        return true;
    }
    let lower = name.to_lowercase();
    filter_extensions
        .iter()
        .any(|ext| lower.ends_with(&ext.to_lowercase()))
}

/// Regular files directly inside `dir` that pass the extension filter,
/// sorted by file name.
pub fn list_document_files(dir: &Path, filter_extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read document directory {}", dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to list {}", dir.display()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if matches_extension(&name, filter_extensions) {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Maps a dataset source path onto a flat file name.
pub fn flatten_source(source: &str) -> String {
    source.trim_start_matches('/').replace('/', "__")
}
