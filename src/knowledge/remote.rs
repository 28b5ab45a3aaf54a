//! HTTP client for a knowledge-base service, plus the wire types the
//! in-repo service (`handlers`) speaks.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{preview, AgentTrace, Answer, KnowledgeBase, KnowledgeError, Result, SearchResult};

const ERROR_BODY_LIMIT: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadRequest {
    pub file_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_k")]
    pub k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub question: String,
    #[serde(default = "default_k")]
    pub k: usize,
}

fn default_k() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentPayload {
    pub text: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl From<SearchResult> for DocumentPayload {
    fn from(r: SearchResult) -> Self {
        Self {
            text: r.content,
            score: r.score,
            metadata: r.metadata,
        }
    }
}

impl From<DocumentPayload> for SearchResult {
    fn from(d: DocumentPayload) -> Self {
        Self {
            content: d.text,
            score: d.score,
            metadata: d.metadata,
            trace: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub documents: Vec<DocumentPayload>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnswerResponse {
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub documents: Vec<DocumentPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<AgentTrace>,
}

pub struct RemoteKnowledgeBase {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
    last_trace: RwLock<Option<AgentTrace>>,
}

impl RemoteKnowledgeBase {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: None,
            last_trace: RwLock::new(None),
        })
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        let body: Value = decode(response).await?;
        match body.get("status").and_then(Value::as_str) {
            Some("ok") => Ok(()),
            other => Err(KnowledgeError::Service {
                status: 200,
                body: format!("unexpected health status: {other:?}"),
            }),
        }
    }

    /// Polls `/health` with exponential backoff (1s, 2s, 4s, ...).
    pub async fn wait_until_healthy(&self, attempts: u32) -> Result<()> {
        let mut last_err = None;
        for attempt in 0..attempts.max(1) {
            if attempt > 0 {
                let delay = Duration::from_secs(2u64.pow(attempt - 1));
                tokio::time::sleep(delay).await;
            }
            match self.health().await {
                Ok(()) => {
                    info!(url = %self.base_url, "knowledge service healthy");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "knowledge service not ready");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| KnowledgeError::Agent("health check never ran".into())))
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let mut request = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(body);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(KnowledgeError::Service {
            status: status.as_u16(),
            body: preview(&body, ERROR_BODY_LIMIT),
        });
    }
    Ok(response.json().await?)
}

#[async_trait]
impl KnowledgeBase for RemoteKnowledgeBase {
    fn name(&self) -> &str {
        "remote"
    }

    async fn load(&self, paths: &[PathBuf]) -> Result<()> {
        let request = LoadRequest {
            file_paths: paths.iter().map(|p| p.display().to_string()).collect(),
        };
        let _: Value = self.post("/load", &request).await?;
        info!(files = paths.len(), url = %self.base_url, "remote knowledge base loaded");
        Ok(())
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        let response: SearchResponse = self
            .post(
                "/search",
                &SearchRequest {
                    query: query.to_string(),
                    k,
                },
            )
            .await?;
        debug!(results = response.documents.len(), "remote search");
        Ok(response.documents.into_iter().map(SearchResult::from).collect())
    }

    async fn answer(&self, question: &str, k: usize) -> Result<Answer> {
        *self.last_trace.write() = None;
        let response: AnswerResponse = self
            .post(
                "/answer",
                &AnswerRequest {
                    question: question.to_string(),
                    k,
                },
            )
            .await?;

        let trace = response.trace;
        let results = response
            .documents
            .into_iter()
            .map(|d| SearchResult {
                trace: trace.clone(),
                ..SearchResult::from(d)
            })
            .collect();
        *self.last_trace.write() = trace.clone();

        Ok(Answer {
            text: response.answer,
            results,
            trace,
        })
    }

    fn last_trace(&self) -> Option<AgentTrace> {
        self.last_trace.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::handlers::{router, AppState};
    use crate::knowledge::local::tests::test_kb;

    async fn spawn_service(auth_token: Option<&str>) -> String {
        let state = AppState::new(Arc::new(test_kb("Rust is a systems language.")), auth_token.map(str::to_string));
        let app = router(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn write_doc(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("rust.md");
        std::fs::write(&path, "Rust is a systems language.").unwrap();
        path
    }

    #[tokio::test]
    async fn test_remote_roundtrip_against_service() {
        let url = spawn_service(None).await;
        let kb = RemoteKnowledgeBase::new(&url, 5).unwrap();
        kb.wait_until_healthy(3).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        kb.load(&[write_doc(dir.path())]).await.unwrap();

        let results = kb.search("rust", 2).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metadata["source"], "rust.md");

        let answer = kb.answer("rust?", 2).await.unwrap();
        assert_eq!(answer.text, "Rust is a systems language.");
        assert!(answer.results.iter().all(|r| r.trace.is_some()));
        assert_eq!(kb.last_trace().unwrap().tool_queries, vec!["rust?"]);
    }

    #[tokio::test]
    async fn test_remote_auth_rejected() {
        let url = spawn_service(Some("secret")).await;
        let kb = RemoteKnowledgeBase::new(&url, 5).unwrap();
        let err = kb.search("rust", 2).await.unwrap_err();
        assert!(matches!(err, KnowledgeError::Service { status: 401, .. }));

        let kb = kb.with_auth_token(Some("secret".into()));
        assert!(kb.search("rust", 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remote_validation_error_maps_to_service_error() {
        let url = spawn_service(None).await;
        let kb = RemoteKnowledgeBase::new(&url, 5).unwrap();
        let err = kb.search("   ", 2).await.unwrap_err();
        match err {
            KnowledgeError::Service { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("query"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_wait_until_healthy_gives_up() {
        let kb = RemoteKnowledgeBase::new("http://127.0.0.1:9", 1).unwrap();
        assert!(kb.wait_until_healthy(1).await.is_err());
    }

    #[test]
    fn test_answer_response_without_trace() {
        let parsed: AnswerResponse =
            serde_json::from_str(r#"{"answer":"a","documents":[{"text":"t"}]}"#).unwrap();
        assert!(parsed.trace.is_none());
        assert_eq!(parsed.documents[0].score, 0.0);
    }
}
