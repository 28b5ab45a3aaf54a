use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One split of a dataset served by the HuggingFace dataset viewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub dataset_id: String,
    #[serde(default = "default_config")]
    pub config: String,
    #[serde(default = "default_split")]
    pub split: String,
    /// `None` fetches until the split is exhausted.
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

fn default_config() -> String {
    "default".to_string()
}

fn default_split() -> String {
    "train".to_string()
}

impl DatasetConfig {
    pub fn new(dataset_id: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            config: default_config(),
            split: default_split(),
            limit: None,
            offset: 0,
        }
    }

    pub fn with_split(mut self, split: impl Into<String>) -> Self {
        self.split = split.into();
        self
    }

    pub fn with_config(mut self, config: impl Into<String>) -> Self {
        self.config = config.into();
        self
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }
}

/// A row of the documentation corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocRow {
    pub text: String,
    pub source: String,
}

/// A row of the QA evaluation set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaRow {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub source_doc: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HfRowsResponse {
    pub rows: Vec<HfRowWrapper>,
    #[serde(default)]
    pub num_rows_total: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HfRowWrapper {
    #[serde(default)]
    pub row_idx: Option<usize>,
    pub row: Value,
}
