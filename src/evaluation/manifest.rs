//! Run manifest and the JSON report written at the end of a run.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::queries::EvalMode;
use crate::dataset::QaItem;

/// Configuration captured for reproducibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub timestamp: String,
    pub platform: String,
    pub version: String,
    pub knowledge_base: String,
    pub evaluator: String,
    pub eval_mode: EvalMode,
    pub model_name: String,
    pub eval_model_name: String,
    pub embedding_model: String,
    pub retrieval_k: usize,
    pub max_docs: Option<usize>,
    pub max_qa_items: Option<usize>,
    pub skip_load: bool,
    pub force_reload: bool,
    pub dataset: String,
    pub qa_fingerprint: String,
}

/// SHA-256 over the question/answer pairs in order, hex encoded.
pub fn qa_fingerprint(items: &[QaItem]) -> String {
    let mut hasher = Sha256::new();
    for item in items {
        hasher.update(item.question.as_bytes());
        hasher.update([0x1f]);
        hasher.update(item.answer.as_bytes());
        hasher.update([b'\n']);
    }
    hex::encode(hasher.finalize())
}

pub fn platform_string() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    pub qa_total_seconds: f64,
    pub qa_avg_seconds: f64,
    pub eval_seconds: f64,
    pub total_seconds: f64,
}

impl Timing {
    pub fn rounded(qa_total: f64, qa_avg: f64, eval: f64, total: f64) -> Self {
        Self {
            qa_total_seconds: round2(qa_total),
            qa_avg_seconds: round2(qa_avg),
            eval_seconds: round2(eval),
            total_seconds: round2(total),
        }
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub question: String,
    pub error: String,
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleDebug {
    pub question: String,
    pub retrieval_queries: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub manifest: RunManifest,
    pub timing: Timing,
    pub samples_count: usize,
    pub errors_count: usize,
    pub result: String,
    pub errors: Vec<ErrorEntry>,
    pub sample_debug: Vec<SampleDebug>,
}

impl Report {
    /// Pretty-printed JSON; parent directories are created as needed.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        std::fs::write(path, json).with_context(|| format!("Failed to write report {}", path.display()))
    }
}
