use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::knowledge::preview;

pub const DEFAULT_METRICS: [&str; 4] = [
    "faithfulness",
    "answer_relevancy",
    "context_precision",
    "context_recall",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSample {
    pub question: String,
    pub answer: String,
    pub contexts: Vec<String>,
    pub ground_truth: String,
}

#[derive(Debug, Error)]
pub enum EvaluatorError {
    #[error("evaluation service returned HTTP {status}: {body}")]
    Service { status: u16, body: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("evaluation response had no scores")]
    EmptyResponse,
}

#[async_trait]
pub trait Evaluator: Send + Sync {
    fn name(&self) -> &str;

    /// Scores all samples and returns a human-readable report.
    async fn evaluate(&self, samples: &[EvaluationSample]) -> Result<String, EvaluatorError>;
}

#[derive(Debug, Clone)]
pub struct RagasConfig {
    pub service_url: String,
    pub metrics: Vec<String>,
    pub llm_model: String,
    pub embedding_model: String,
    pub max_workers: usize,
    pub timeout_secs: Option<u64>,
}

impl RagasConfig {
    pub fn new(service_url: impl Into<String>, llm_model: impl Into<String>, embedding_model: impl Into<String>) -> Self {
        Self {
            service_url: service_url.into().trim_end_matches('/').to_string(),
            metrics: DEFAULT_METRICS.iter().map(|m| m.to_string()).collect(),
            llm_model: llm_model.into(),
            embedding_model: embedding_model.into(),
            max_workers: 10,
            timeout_secs: None,
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout_secs: Option<u64>) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

#[derive(Serialize)]
struct EvaluateRequest<'a> {
    samples: &'a [EvaluationSample],
    metrics: &'a [String],
    llm_model: &'a str,
    embedding_model: &'a str,
    max_workers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct EvaluateResponse {
    #[serde(default)]
    scores: Option<BTreeMap<String, Option<f64>>>,
    #[serde(default)]
    per_sample: Option<Vec<BTreeMap<String, Option<f64>>>>,
}

/// Delegates RAGAS scoring to an external evaluation service.
pub struct RagasEvaluator {
    client: reqwest::Client,
    config: RagasConfig,
}

impl RagasEvaluator {
    pub fn new(config: RagasConfig, http_timeout_secs: u64) -> Result<Self, EvaluatorError> {
        let timeout = config
            .timeout_secs
            .map(|t| t + 30)
            .unwrap_or(http_timeout_secs)
            .max(http_timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Evaluator for RagasEvaluator {
    fn name(&self) -> &str {
        "ragas"
    }

    async fn evaluate(&self, samples: &[EvaluationSample]) -> Result<String, EvaluatorError> {
        info!(
            samples = samples.len(),
            metrics = ?self.config.metrics,
            workers = self.config.max_workers,
            "running RAGAS evaluation"
        );

        let response = self
            .client
            .post(format!("{}/evaluate", self.config.service_url))
            .json(&EvaluateRequest {
                samples,
                metrics: &self.config.metrics,
                llm_model: &self.config.llm_model,
                embedding_model: &self.config.embedding_model,
                max_workers: self.config.max_workers,
                timeout_secs: self.config.timeout_secs,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "evaluation service error");
            return Err(EvaluatorError::Service {
                status: status.as_u16(),
                body: preview(&body, 500),
            });
        }

        let parsed: EvaluateResponse = response.json().await?;
        let scores = aggregate_scores(parsed)?;
        Ok(format_report(&self.config.metrics, &scores, samples.len()))
    }
}

fn aggregate_scores(response: EvaluateResponse) -> Result<BTreeMap<String, Option<f64>>, EvaluatorError> {
    if let Some(scores) = response.scores {
        return Ok(scores);
    }
    let rows = response.per_sample.ok_or(EvaluatorError::EmptyResponse)?;
    Ok(mean_scores(&rows))
}

/// Per-metric means over samples, skipping null and NaN values.
fn mean_scores(rows: &[BTreeMap<String, Option<f64>>]) -> BTreeMap<String, Option<f64>> {
    let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for row in rows {
        for (metric, value) in row {
            let entry = sums.entry(metric.clone()).or_insert((0.0, 0));
            if let Some(v) = value.filter(|v| v.is_finite()) {
                entry.0 += v;
                entry.1 += 1;
            }
        }
    }
    sums.into_iter()
        .map(|(metric, (sum, n))| (metric, (n > 0).then(|| sum / n as f64)))
        .collect()
}

fn format_report(metrics: &[String], scores: &BTreeMap<String, Option<f64>>, sample_count: usize) -> String {
    let mut lines = vec![format!("RAGAS evaluation ({sample_count} samples)")];
    for metric in metrics {
        let value = scores
            .get(metric)
            .copied()
            .flatten()
            .filter(|v| v.is_finite())
            .map(|v| format!("{v:.4}"))
            .unwrap_or_else(|| "N/A".to_string());
        lines.push(format!("{metric}: {value}"));
    }
    lines.join("\n")
}
