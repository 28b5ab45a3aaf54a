use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use super::client::HuggingFaceClient;
use super::types::{DatasetConfig, DocRow, QaRow};
use super::{flatten_source, matches_extension, Dataset, QaItem};
use crate::cleanup;

pub const DEFAULT_DOCS_DATASET: &str = "m-ric/huggingface_doc";
pub const DEFAULT_QA_DATASET: &str = "m-ric/huggingface_doc_qa_eval";

/// HuggingFace documentation corpus with its QA evaluation split.
pub struct HuggingFaceDocDataset {
    client: HuggingFaceClient,
    docs: DatasetConfig,
    qa: DatasetConfig,
    cache_root: PathBuf,
}

impl HuggingFaceDocDataset {
    pub fn new(data_dir: &Path) -> Result<Self> {
        Ok(Self::with_client(
            HuggingFaceClient::new(HuggingFaceClient::token_from_env())?,
            data_dir,
        ))
    }

    pub fn with_client(client: HuggingFaceClient, data_dir: &Path) -> Self {
        Self {
            client,
            docs: DatasetConfig::new(DEFAULT_DOCS_DATASET),
            qa: DatasetConfig::new(DEFAULT_QA_DATASET),
            cache_root: data_dir.join("huggingface_doc"),
        }
    }

    /// Cache directories are keyed by the document cap so runs with
    /// different `max_docs` never share files.
    fn docs_dir(&self, max: Option<usize>) -> PathBuf {
        match max {
            Some(n) => self.cache_root.join(format!("docs-{n}")),
            None => self.cache_root.join("docs-all"),
        }
    }
}

#[async_trait]
impl Dataset for HuggingFaceDocDataset {
    fn name(&self) -> String {
        format!("huggingface:{}", self.qa.dataset_id)
    }

    async fn load_qa_items(
        &self,
        max: Option<usize>,
        filter_extensions: &[&str],
    ) -> Result<Vec<QaItem>> {
        let rows: Vec<QaRow> = self
            .client
            .fetch_matching(&self.qa, max, |row: &QaRow| match &row.source_doc {
                Some(source) => matches_extension(source, filter_extensions),
                None => true,
            })
            .await
            .context("Failed to load QA items from HuggingFace")?;

        let items: Vec<QaItem> = rows
            .into_iter()
            .map(|row| QaItem {
                question: row.question,
                answer: row.answer,
                source: row.source_doc,
            })
            .collect();
        info!(count = items.len(), dataset = %self.qa.dataset_id, "QA items loaded");
        Ok(items)
    }

    async fn load_documents(
        &self,
        max: Option<usize>,
        filter_extensions: &[&str],
        force_reload: bool,
    ) -> Result<PathBuf> {
        let dir = self.docs_dir(max);
        if force_reload {
            cleanup::remove_work_dir(&dir).await;
        } else if cleanup::has_files(&dir).await {
            info!(dir = %dir.display(), "Using cached documents");
            return Ok(dir);
        }

        let rows: Vec<DocRow> = self
            .client
            .fetch_matching(&self.docs, max, |row: &DocRow| {
                matches_extension(&row.source, filter_extensions)
            })
            .await
            .context("Failed to load documents from HuggingFace")?;

        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        for row in &rows {
            let path = dir.join(flatten_source(&row.source));
            tokio::fs::write(&path, &row.text)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }

        info!(count = rows.len(), dir = %dir.display(), "Documents written");
        Ok(dir)
    }
}
