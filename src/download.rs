//! `download` subcommand: dump a HuggingFace split to JSON, optionally with
//! the attachment files its rows reference.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::dataset::client::HuggingFaceClient;
use crate::dataset::types::DatasetConfig;

pub const DEFAULT_DATASET: &str = "gaia-benchmark/GAIA";
pub const DEFAULT_CONFIG: &str = "2023_level1";
pub const DEFAULT_SPLIT: &str = "validation";
const HF_HUB_BASE: &str = "https://huggingface.co";

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub dataset: String,
    pub config: String,
    pub split: String,
    pub limit: Option<usize>,
    pub out_dir: PathBuf,
    /// Defaults to `<out_dir>/<dataset>_<config>_<split>.json`.
    pub output: Option<PathBuf>,
    pub with_files: bool,
    pub force: bool,
}

impl DownloadOptions {
    pub fn output_path(&self) -> PathBuf {
        match &self.output {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => self.out_dir.join(path),
            None => {
                let name = self.dataset.rsplit('/').next().unwrap_or(&self.dataset);
                self.out_dir.join(format!(
                    "{}_{}_{}.json",
                    name.to_lowercase(),
                    self.config,
                    self.split
                ))
            }
        }
    }
}

/// One task record as written to the output JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    #[serde(rename = "Question")]
    pub question: String,
    #[serde(rename = "Level")]
    pub level: String,
    #[serde(rename = "Final answer")]
    pub final_answer: String,
    pub file_name: String,
    pub file_path: String,
}

#[derive(Debug, Deserialize)]
struct HubDatasetInfo {
    #[serde(default)]
    sha: Option<String>,
}

pub struct Downloader {
    client: HuggingFaceClient,
    hub_base: String,
}

impl Downloader {
    pub fn new(token: String) -> Result<Self> {
        Ok(Self {
            client: HuggingFaceClient::new(Some(token))?,
            hub_base: HF_HUB_BASE.to_string(),
        })
    }

    /// Reads the token from the usual HuggingFace environment variables.
    pub fn from_env() -> Result<Self> {
        let token = HuggingFaceClient::token_from_env().context(
            "Missing Hugging Face token. Set HF_TOKEN (or HUGGINGFACE_TOKEN / HUGGINGFACE_HUB_TOKEN)",
        )?;
        Self::new(token)
    }

    #[cfg(test)]
    pub fn with_endpoints(mut self, viewer_base: &str, hub_base: &str) -> Self {
        self.client = self.client.with_base_url(viewer_base);
        self.hub_base = hub_base.trim_end_matches('/').to_string();
        self
    }

    /// Returns the path of the written JSON file.
    pub async fn run(&self, opts: &DownloadOptions) -> Result<PathBuf> {
        let config = DatasetConfig::new(&opts.dataset)
            .with_config(&opts.config)
            .with_split(&opts.split)
            .with_limit(opts.limit);
        let rows = self.client.fetch_rows(&config).await?;
        if rows.is_empty() {
            anyhow::bail!(
                "No rows returned for {}. Ensure your token has access and you accepted the gating terms",
                opts.dataset
            );
        }

        let (tasks, file_paths) = build_tasks(&rows);
        if tasks.is_empty() {
            anyhow::bail!("Failed to build tasks from dataset rows");
        }

        let output = opts.output_path();
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&tasks)? + "\n";
        tokio::fs::write(&output, json)
            .await
            .with_context(|| format!("Failed to write {}", output.display()))?;
        info!(tasks = tasks.len(), path = %output.display(), "Wrote dataset JSON");

        if opts.with_files && !file_paths.is_empty() {
            let sha = self.dataset_sha(&opts.dataset).await?;
            info!(files = file_paths.len(), "Downloading attachment files");
            for (i, file_path) in file_paths.iter().enumerate() {
                self.download_file(&opts.dataset, &sha, file_path, &opts.out_dir, opts.force)
                    .await?;
                info!("[{}/{}] {}", i + 1, file_paths.len(), file_path);
            }
        }

        Ok(output)
    }

    async fn dataset_sha(&self, dataset: &str) -> Result<String> {
        let url = format!("{}/api/datasets/{}", self.hub_base, dataset);
        let bytes = self.client.download_bytes(&url).await?;
        let info: HubDatasetInfo =
            serde_json::from_slice(&bytes).context("Failed to parse dataset info")?;
        info.sha
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .context("Failed to read dataset sha from HF API")
    }

    async fn download_file(
        &self,
        dataset: &str,
        sha: &str,
        file_path: &str,
        out_dir: &Path,
        force: bool,
    ) -> Result<()> {
        let relative = safe_relative_path(file_path)
            .with_context(|| format!("Refusing to write outside output dir: {file_path}"))?;
        let dst = out_dir.join(relative);
        if !force {
            if let Ok(meta) = tokio::fs::metadata(&dst).await {
                if meta.len() > 0 {
                    return Ok(());
                }
            }
        }
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let url = format!(
            "{}/datasets/{}/resolve/{}/{}",
            self.hub_base, dataset, sha, file_path
        );
        let bytes = self.client.download_bytes(&url).await?;
        tokio::fs::write(&dst, bytes)
            .await
            .with_context(|| format!("Failed to write {}", dst.display()))
    }
}

fn safe_relative_path(path: &str) -> Option<PathBuf> {
    let candidate = Path::new(path);
    let safe = candidate
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    (safe && !path.is_empty()).then(|| candidate.to_path_buf())
}

/// Normalises raw rows into task records and collects the sorted, unique
/// attachment paths they reference.
pub fn build_tasks(rows: &[Value]) -> (Vec<TaskRecord>, Vec<String>) {
    let mut tasks = Vec::new();
    let mut files = BTreeSet::new();

    for row in rows {
        let Some(obj) = row.as_object() else {
            continue;
        };
        let field = |keys: &[&str]| -> String {
            keys.iter()
                .filter_map(|k| obj.get(*k))
                .find(|v| !v.is_null())
                .map(as_string)
                .unwrap_or_default()
        };

        let file_path = ["file_path", "file", "attachment"]
            .iter()
            .filter_map(|k| obj.get(*k))
            .find(|v| !v.is_null())
            .map(as_paths)
            .and_then(|paths| paths.into_iter().next())
            .unwrap_or_default();
        let mut file_name = field(&["file_name", "filename"]);
        if file_name.is_empty() && !file_path.is_empty() {
            file_name = Path::new(&file_path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        if !file_path.is_empty() {
            files.insert(file_path.clone());
        }

        tasks.push(TaskRecord {
            task_id: field(&["task_id", "id", "taskID"]),
            question: field(&["Question", "question"]),
            level: field(&["Level", "level"]),
            final_answer: field(&["Final answer", "final_answer", "final answer", "answer"]),
            file_name,
            file_path,
        });
    }

    (tasks, files.into_iter().collect())
}

fn as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn as_paths(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
        Value::Array(items) => items.iter().flat_map(as_paths).collect(),
        Value::Object(map) => ["file_path", "path", "rfilename", "name", "file_name"]
            .iter()
            .filter_map(|k| map.get(*k))
            .find(|v| !v.is_null() && v.as_str() != Some(""))
            .map(as_paths)
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}
