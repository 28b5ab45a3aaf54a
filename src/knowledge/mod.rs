//! Knowledge bases behind a common load/search/answer contract.
//!
//! The evaluation driver only talks to [`KnowledgeBase`]; the local
//! in-process variant and the HTTP service client are interchangeable.

pub mod agent;
pub mod chunking;
pub mod embedding;
pub mod local;
pub mod remote;
pub mod store;

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use local::LocalKnowledgeBase;
pub use remote::RemoteKnowledgeBase;

/// Errors raised by knowledge-base backends.
#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("agent error: {0}")]
    Agent(String),

    #[error("knowledge service returned HTTP {status}: {body}")]
    Service { status: u16, body: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, KnowledgeError>;

/// A single retrieved context.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub content: String,
    /// Relevance in `[0, 1]`, higher is better.
    pub score: f64,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<AgentTrace>,
}

impl SearchResult {
    #[cfg(test)]
    pub fn new(content: impl Into<String>, score: f64) -> Self {
        Self {
            content: content.into(),
            score,
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Intermediate tool interactions recorded while an agent answered.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentTrace {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_queries: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallTrace>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_responses: Vec<ToolResponseTrace>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasoning: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolCallTrace {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments as emitted by the model.
    pub arguments: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolResponseTrace {
    pub tool_id: String,
    pub content: String,
}

/// Generated answer plus whatever the backend retrieved while producing it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub results: Vec<SearchResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<AgentTrace>,
}

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Backend label used in logs and the run manifest.
    fn name(&self) -> &str;

    /// Replace the indexed corpus with the given files.
    async fn load(&self, paths: &[PathBuf]) -> Result<()>;

    /// Deterministic single-pass retrieval.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>>;

    /// Answer with a fresh session; results are the contexts the backend used.
    async fn answer(&self, question: &str, k: usize) -> Result<Answer>;

    /// Trace of the most recent `answer` call, if the backend records one.
    fn last_trace(&self) -> Option<AgentTrace> {
        None
    }
}

/// Render results the way the search tool hands them back to the model.
pub fn format_tool_output(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "No relevant documents found.".to_string();
    }
    results
        .iter()
        .map(|r| format!("[Score: {:.3}]\n{}", r.score, r.content))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// Truncate to `max_chars` characters, appending `...` when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_tool_output_empty() {
        assert_eq!(format_tool_output(&[]), "No relevant documents found.");
    }

    #[test]
    fn test_format_tool_output_joins_blocks() {
        let results = vec![SearchResult::new("alpha", 0.91234), SearchResult::new("beta", 0.5)];
        let out = format_tool_output(&results);
        assert_eq!(out, "[Score: 0.912]\nalpha\n\n---\n\n[Score: 0.500]\nbeta");
    }

    #[test]
    fn test_preview_multibyte() {
        assert_eq!(preview("héllo wörld", 5), "héllo...");
        assert_eq!(preview("short", 10), "short");
    }

    #[test]
    fn test_search_result_deserialize_defaults() {
        let r: SearchResult = serde_json::from_str(r#"{"content":"x","score":0.4}"#).unwrap();
        assert!(r.metadata.is_empty());
        assert!(r.trace.is_none());
    }

    #[test]
    fn test_trace_skips_empty_fields() {
        let trace = AgentTrace {
            tool_queries: vec!["q".to_string()],
            ..Default::default()
        };
        let json = serde_json::to_value(&trace).unwrap();
        assert_eq!(json, serde_json::json!({"tool_queries": ["q"]}));
    }
}
