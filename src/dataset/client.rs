use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::types::{DatasetConfig, HfRowsResponse};
use crate::knowledge::preview;

const HF_DATASET_VIEWER_BASE: &str = "https://datasets-server.huggingface.co";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_PAGE_SIZE: usize = 100;

/// Client for the HuggingFace dataset-viewer rows API.
pub struct HuggingFaceClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HuggingFaceClient {
    pub fn new(token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client for HuggingFace")?;
        Ok(Self {
            client,
            base_url: HF_DATASET_VIEWER_BASE.to_string(),
            token,
        })
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// First token found in `HF_TOKEN`, `HUGGINGFACE_TOKEN`, `HUGGINGFACE_HUB_TOKEN`.
    pub fn token_from_env() -> Option<String> {
        ["HF_TOKEN", "HUGGINGFACE_TOKEN", "HUGGINGFACE_HUB_TOKEN"]
            .iter()
            .filter_map(|key| std::env::var(key).ok())
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty())
    }

    /// Fetches raw rows, honouring `config.limit` and `config.offset`.
    pub async fn fetch_rows(&self, config: &DatasetConfig) -> Result<Vec<Value>> {
        self.fetch_matching(config, config.limit, |_: &Value| true)
            .await
    }

    /// Pages through the split, decoding each row as `T` and keeping those
    /// accepted by `keep`, until `max` rows are kept or the split ends.
    /// Rows that fail to decode are skipped.
    pub async fn fetch_matching<T, F>(
        &self,
        config: &DatasetConfig,
        max: Option<usize>,
        mut keep: F,
    ) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        F: FnMut(&T) -> bool,
    {
        info!(
            "Fetching HuggingFace dataset: {} (config={}, split={}, offset={}, max={:?})",
            config.dataset_id, config.config, config.split, config.offset, max
        );

        let wanted = max.unwrap_or(usize::MAX);
        let mut kept = Vec::new();
        let mut offset = config.offset;
        let mut total_count = None;
        let mut skipped = 0usize;

        while kept.len() < wanted {
            let response = self.fetch_page(config, offset, MAX_PAGE_SIZE).await?;
            if let Some(total) = response.num_rows_total {
                total_count = Some(total);
            }

            let row_count = response.rows.len();
            if row_count == 0 {
                break;
            }

            for wrapper in response.rows {
                match serde_json::from_value::<T>(wrapper.row) {
                    Ok(row) if keep(&row) => {
                        kept.push(row);
                        if kept.len() >= wanted {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        skipped += 1;
                        debug!(row_idx = ?wrapper.row_idx, error = %e, "skipping undecodable row");
                    }
                }
            }

            offset += row_count;
            if row_count < MAX_PAGE_SIZE || total_count.is_some_and(|t| offset >= t) {
                break;
            }
        }

        if skipped > 0 {
            warn!(skipped, dataset = %config.dataset_id, "rows skipped while decoding");
        }
        info!(
            "Fetched {} rows from {} (total available: {:?})",
            kept.len(),
            config.dataset_id,
            total_count
        );
        Ok(kept)
    }

    async fn fetch_page(
        &self,
        config: &DatasetConfig,
        offset: usize,
        length: usize,
    ) -> Result<HfRowsResponse> {
        let url = format!("{}/rows", self.base_url);
        let offset = offset.to_string();
        let length = length.to_string();
        let query = [
            ("dataset", config.dataset_id.as_str()),
            ("config", config.config.as_str()),
            ("split", config.split.as_str()),
            ("offset", offset.as_str()),
            ("length", length.as_str()),
        ];

        debug!("Requesting HuggingFace API: {} {:?}", url, query);

        let mut request = self.client.get(&url).query(&query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let resp = request
            .send()
            .await
            .context("Failed to send request to HuggingFace dataset viewer")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!(
                "HuggingFace API returned HTTP {}: {}",
                status.as_u16(),
                preview(&body, 500)
            );
        }

        resp.json()
            .await
            .context("Failed to parse HuggingFace API response")
    }

    /// Downloads an arbitrary file with the client's credentials.
    pub async fn download_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let resp = request
            .send()
            .await
            .with_context(|| format!("Failed to download {url}"))?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("Download of {} returned HTTP {}", url, status.as_u16());
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::{extract::Query, routing::get, Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    /// Serves `/rows` from a fixed list of rows, paging like the real viewer.
    pub(crate) async fn spawn_rows_server(rows: Vec<Value>) -> String {
        let rows = std::sync::Arc::new(rows);
        let app = Router::new().route(
            "/rows",
            get(move |Query(q): Query<HashMap<String, String>>| {
                let rows = rows.clone();
                async move {
                    let offset: usize = q.get("offset").and_then(|v| v.parse().ok()).unwrap_or(0);
                    let length: usize = q.get("length").and_then(|v| v.parse().ok()).unwrap_or(100);
                    let page: Vec<Value> = rows
                        .iter()
                        .enumerate()
                        .skip(offset)
                        .take(length)
                        .map(|(i, r)| json!({ "row_idx": i, "row": r }))
                        .collect();
                    Json(json!({ "rows": page, "num_rows_total": rows.len() }))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn test_client_creation() {
        let client = HuggingFaceClient::new(None);
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_rows_pages_until_limit() {
        let rows: Vec<Value> = (0..250).map(|i| json!({ "n": i })).collect();
        let url = spawn_rows_server(rows).await;
        let client = HuggingFaceClient::new(None).unwrap().with_base_url(url);

        let all = client.fetch_rows(&DatasetConfig::new("a/b")).await.unwrap();
        assert_eq!(all.len(), 250);
        assert_eq!(all[249]["n"], 249);

        let some = client
            .fetch_rows(&DatasetConfig::new("a/b").with_limit(Some(120)))
            .await
            .unwrap();
        assert_eq!(some.len(), 120);
    }

    #[tokio::test]
    async fn test_fetch_matching_filters_across_pages() {
        let rows: Vec<Value> = (0..150).map(|i| json!({ "n": i })).collect();
        let url = spawn_rows_server(rows).await;
        let client = HuggingFaceClient::new(None).unwrap().with_base_url(url);

        let odd: Vec<Value> = client
            .fetch_matching(&DatasetConfig::new("a/b"), Some(60), |v: &Value| {
                v["n"].as_u64().is_some_and(|n| n % 2 == 1)
            })
            .await
            .unwrap();
        assert_eq!(odd.len(), 60);
        assert_eq!(odd[59]["n"], 119);
    }
}
