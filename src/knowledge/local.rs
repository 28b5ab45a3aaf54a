//! In-process knowledge base: chunk, embed, store and answer via the agent.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info};

use super::agent::{ChatModel, OpenAiChat, SearchAgent};
use super::chunking::FixedSizeChunker;
use super::embedding::{EmbeddingProvider, OpenAiEmbeddings};
use super::store::{InMemoryVectorStore, StoredChunk};
use super::{AgentTrace, Answer, KnowledgeBase, KnowledgeError, Result, SearchResult};
use crate::config::Config;

const EMBED_BATCH_SIZE: usize = 50;

pub struct LocalKnowledgeBase {
    embedder: Arc<dyn EmbeddingProvider>,
    chat: Arc<dyn ChatModel>,
    chunker: FixedSizeChunker,
    store: InMemoryVectorStore,
    last_trace: RwLock<Option<AgentTrace>>,
}

impl LocalKnowledgeBase {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        chat: Arc<dyn ChatModel>,
        chunker: FixedSizeChunker,
    ) -> Self {
        Self {
            embedder,
            chat,
            chunker,
            store: InMemoryVectorStore::new(),
            last_trace: RwLock::new(None),
        }
    }

    /// Wires the OpenAI-compatible embedding and chat clients from config.
    pub fn from_config(config: &Config) -> Result<Self> {
        let embedder = OpenAiEmbeddings::new(
            config.base_url.clone(),
            config.api_key.clone(),
            config.embedding_model.clone(),
            config.http_timeout_secs,
        )?;
        let chat = OpenAiChat::new(
            config.base_url.clone(),
            config.api_key.clone(),
            config.model_name.clone(),
            config.http_timeout_secs,
        )?;
        Ok(Self::new(
            Arc::new(embedder),
            Arc::new(chat),
            FixedSizeChunker::new(config.chunk_size, config.chunk_overlap),
        ))
    }

    pub async fn chunk_count(&self) -> usize {
        self.store.count().await
    }
}

#[async_trait]
impl KnowledgeBase for LocalKnowledgeBase {
    fn name(&self) -> &str {
        "local"
    }

    /// Reads, chunks and embeds every file before touching the store, so a
    /// failed load keeps the previous collection searchable.
    async fn load(&self, paths: &[PathBuf]) -> Result<()> {
        let mut pending: Vec<(String, String, HashMap<String, Value>)> = Vec::new();
        for (file_index, path) in paths.iter().enumerate() {
            let text = tokio::fs::read_to_string(path)
                .await
                .map_err(|source| KnowledgeError::Io {
                    path: path.clone(),
                    source,
                })?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());

            for (chunk_index, chunk) in self.chunker.split(&text).into_iter().enumerate() {
                let mut metadata = HashMap::new();
                metadata.insert("source".to_string(), Value::from(file_name.clone()));
                metadata.insert("chunk_index".to_string(), Value::from(chunk_index));
                pending.push((
                    format!("{file_name}-{file_index}-{chunk_index}"),
                    chunk,
                    metadata,
                ));
            }
        }

        let total = pending.len();
        let mut stored: Vec<StoredChunk> = Vec::with_capacity(total);
        for batch in pending.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<&str> = batch.iter().map(|(_, text, _)| text.as_str()).collect();
            let embeddings = self.embedder.embed_batch(&texts).await?;
            if embeddings.len() != batch.len() {
                return Err(KnowledgeError::Embedding(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    embeddings.len()
                )));
            }
            stored.extend(batch.iter().zip(embeddings).map(
                |((id, text, metadata), embedding)| StoredChunk {
                    id: id.clone(),
                    text: text.clone(),
                    embedding,
                    metadata: metadata.clone(),
                },
            ));
            debug!(batch = batch.len(), "embedded chunk batch");
        }

        self.store.replace(stored).await;

        info!(files = paths.len(), chunks = total, "knowledge base loaded");
        Ok(())
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        if self.chunk_count().await == 0 {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed(query).await?;
        Ok(self.store.search(&embedding, k).await)
    }

    async fn answer(&self, question: &str, k: usize) -> Result<Answer> {
        *self.last_trace.write() = None;
        let answer = SearchAgent::new(self.chat.as_ref())
            .run(question, k, self)
            .await?;
        *self.last_trace.write() = answer.trace.clone();
        Ok(answer)
    }

    fn last_trace(&self) -> Option<AgentTrace> {
        self.last_trace.read().clone()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use parking_lot::Mutex;
    use serde_json::Value;

    use super::*;
    use crate::knowledge::agent::{ChatMessage, FunctionCall, ToolCall, SEARCH_TOOL_NAME};

    /// Two-dimensional embedding: counts of "rust" and "python".
    pub(crate) struct KeywordEmbedder;

    #[async_trait]
    impl EmbeddingProvider for KeywordEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let lower = text.to_lowercase();
            Ok(vec![
                lower.matches("rust").count() as f32,
                lower.matches("python").count() as f32,
            ])
        }
    }

    /// Searches once for the question text, then answers with a fixed reply.
    pub(crate) struct SearchOnceChat {
        pub(crate) reply: String,
        calls: Mutex<usize>,
    }

    impl SearchOnceChat {
        pub(crate) fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl ChatModel for SearchOnceChat {
        fn name(&self) -> &str {
            "search-once"
        }

        async fn complete(&self, messages: &[ChatMessage], _tools: &[Value]) -> Result<ChatMessage> {
            *self.calls.lock() += 1;
            if messages.iter().any(|m| m.role == "tool") {
                return Ok(ChatMessage::assistant(self.reply.clone()));
            }
            let question = messages
                .iter()
                .find(|m| m.role == "user")
                .and_then(|m| m.content.clone())
                .unwrap_or_default();
            Ok(ChatMessage {
                role: "assistant".to_string(),
                content: None,
                tool_calls: vec![ToolCall {
                    id: "call-0".to_string(),
                    kind: "function".to_string(),
                    function: FunctionCall {
                        name: SEARCH_TOOL_NAME.to_string(),
                        arguments: serde_json::json!({ "query": question }).to_string(),
                    },
                }],
                tool_call_id: None,
            })
        }
    }

    pub(crate) fn test_kb(reply: &str) -> LocalKnowledgeBase {
        LocalKnowledgeBase::new(
            Arc::new(KeywordEmbedder),
            Arc::new(SearchOnceChat::new(reply)),
            FixedSizeChunker::new(40, 5),
        )
    }

    fn write_docs(dir: &std::path::Path) -> Vec<PathBuf> {
        let a = dir.join("rust.md");
        let b = dir.join("python.md");
        std::fs::write(&a, "Rust is a systems language. Rust has ownership.").unwrap();
        std::fs::write(&b, "Python is a scripting language.").unwrap();
        vec![a, b]
    }

    #[tokio::test]
    async fn test_search_empty_store() {
        let kb = test_kb("x");
        assert!(kb.search("rust", 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_chunks_with_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_docs(dir.path());
        let kb = test_kb("x");
        kb.load(&paths).await.unwrap();

        assert_eq!(kb.chunk_count().await, 3);
        let results = kb.search("rust", 1).await.unwrap();
        assert_eq!(results[0].metadata["source"], "rust.md");
        assert_eq!(results[0].metadata["chunk_index"], 0);
        assert!(results[0].score > 0.9 && results[0].score <= 1.0);
    }

    #[tokio::test]
    async fn test_reload_replaces_collection() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_docs(dir.path());
        let kb = test_kb("x");
        kb.load(&paths).await.unwrap();
        kb.load(&paths[1..]).await.unwrap();
        assert_eq!(kb.chunk_count().await, 1);
    }

    #[tokio::test]
    async fn test_load_missing_file_fails() {
        let kb = test_kb("x");
        let err = kb.load(&[PathBuf::from("/nonexistent/doc.md")]).await.unwrap_err();
        assert!(matches!(err, KnowledgeError::Io { .. }));
    }

    #[tokio::test]
    async fn test_failed_read_keeps_previous_collection() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = write_docs(dir.path());
        let kb = test_kb("x");
        kb.load(&paths).await.unwrap();

        paths.push(dir.path().join("missing.md"));
        assert!(kb.load(&paths).await.is_err());
        assert_eq!(kb.chunk_count().await, 3);
        assert_eq!(kb.search("rust", 1).await.unwrap()[0].metadata["source"], "rust.md");
    }

    /// Rejects any text mentioning "boom".
    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.contains("boom") {
                return Err(KnowledgeError::Embedding("rate limited".into()));
            }
            KeywordEmbedder.embed(text).await
        }
    }

    #[tokio::test]
    async fn test_failed_embedding_keeps_previous_collection() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_docs(dir.path());
        let bad = dir.path().join("bad.md");
        std::fs::write(&bad, "boom").unwrap();

        let kb = LocalKnowledgeBase::new(
            Arc::new(FailingEmbedder),
            Arc::new(SearchOnceChat::new("x")),
            FixedSizeChunker::new(40, 5),
        );
        kb.load(&paths).await.unwrap();

        let err = kb.load(&[paths[1].clone(), bad]).await.unwrap_err();
        assert!(matches!(err, KnowledgeError::Embedding(_)));
        assert_eq!(kb.chunk_count().await, 3);
    }

    #[tokio::test]
    async fn test_answer_records_trace_and_tool_query() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_docs(dir.path());
        let kb = test_kb("Rust is a systems language.");
        kb.load(&paths).await.unwrap();

        assert!(kb.last_trace().is_none());
        let answer = kb.answer("python?", 2).await.unwrap();
        assert_eq!(answer.text, "Rust is a systems language.");
        assert_eq!(answer.results.len(), 2);
        assert_eq!(answer.results[0].metadata["source"], "python.md");
        assert_eq!(answer.results[0].metadata["tool_query"], "python?");

        let trace = kb.last_trace().unwrap();
        assert_eq!(trace.tool_queries, vec!["python?"]);
    }
}
