use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use super::{list_document_files, matches_extension, Dataset, QaItem};
use crate::cleanup;

/// QA pairs from a JSON/JSONL file plus a directory of documents on disk.
pub struct LocalDataset {
    qa_file: PathBuf,
    docs_dir: PathBuf,
    staging_root: PathBuf,
}

impl LocalDataset {
    pub fn new(qa_file: impl Into<PathBuf>, docs_dir: impl Into<PathBuf>, data_dir: &Path) -> Self {
        Self {
            qa_file: qa_file.into(),
            docs_dir: docs_dir.into(),
            staging_root: data_dir.join("local_staged"),
        }
    }
}

/// Accepts a JSON array, an object with an `items` array, or JSON lines.
fn parse_qa_items(raw: &str) -> Result<Vec<QaItem>> {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).context("Invalid QA JSON array");
    }
    if trimmed.starts_with('{') {
        if let Ok(wrapper) = serde_json::from_str::<serde_json::Value>(trimmed) {
            if let Some(items) = wrapper.get("items") {
                return serde_json::from_value(items.clone()).context("Invalid QA `items` array");
            }
        }
    }
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid QA item on line {}", i + 1))
        })
        .collect()
}

#[async_trait]
impl Dataset for LocalDataset {
    fn name(&self) -> String {
        format!("local:{}", self.qa_file.display())
    }

    async fn load_qa_items(
        &self,
        max: Option<usize>,
        filter_extensions: &[&str],
    ) -> Result<Vec<QaItem>> {
        let raw = tokio::fs::read_to_string(&self.qa_file)
            .await
            .with_context(|| format!("Failed to read QA file {}", self.qa_file.display()))?;
        let items: Vec<QaItem> = parse_qa_items(&raw)?
            .into_iter()
            .filter(|item| match &item.source {
                Some(source) => matches_extension(source, filter_extensions),
                None => true,
            })
            .take(max.unwrap_or(usize::MAX))
            .collect();
        info!(count = items.len(), file = %self.qa_file.display(), "QA items loaded");
        Ok(items)
    }

    async fn load_documents(
        &self,
        max: Option<usize>,
        filter_extensions: &[&str],
        force_reload: bool,
    ) -> Result<PathBuf> {
        let Some(max) = max else {
            return Ok(self.docs_dir.clone());
        };

        let staged = self.staging_root.join(format!("docs-{max}"));
        if force_reload {
            cleanup::remove_work_dir(&staged).await;
        } else if cleanup::has_files(&staged).await {
            info!(dir = %staged.display(), "Using staged documents");
            return Ok(staged);
        }

        tokio::fs::create_dir_all(&staged)
            .await
            .with_context(|| format!("Failed to create {}", staged.display()))?;
        let files = list_document_files(&self.docs_dir, filter_extensions)?;
        for src in files.iter().take(max) {
            if let Some(name) = src.file_name() {
                tokio::fs::copy(src, staged.join(name))
                    .await
                    .with_context(|| format!("Failed to stage {}", src.display()))?;
            }
        }
        info!(count = files.len().min(max), dir = %staged.display(), "Documents staged");
        Ok(staged)
    }
}
