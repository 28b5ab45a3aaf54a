//! Tool-calling answer loop over an OpenAI-compatible chat API.
//!
//! Each answer starts a fresh conversation with a single
//! `search_knowledge_base` tool. Every tool call, its arguments, the query it
//! ran and the response it produced are recorded in an [`AgentTrace`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{
    format_tool_output, preview, AgentTrace, Answer, KnowledgeBase, KnowledgeError, Result,
    SearchResult, ToolCallTrace, ToolResponseTrace,
};

pub const SEARCH_TOOL_NAME: &str = "search_knowledge_base";

const SEARCH_TOOL_DESCRIPTION: &str = "this is a search tool that help search information you need. It's your knowledgebase, you search information by the tool to answer user's question.";

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions using a knowledge base search tool.

CRITICAL RULES(IMPORTANT !!!):
1. You MUST call the search tool AT LEAST ONCE before answering. NEVER answer without searching first.
2. Answer ONLY using information retrieved from the search tool.
3. Do NOT add external knowledge, explanations, or context not found in the retrieved documents.
4. Do NOT provide additional details, synonyms, or interpretations beyond what is explicitly stated in the search results.
5. Use the search tool at most 3 times. If you haven't found the answer after 3 searches, provide the best answer from what you found.
6. Be concise and stick strictly to the facts from the retrieved information.
7. Give only the direct answer.";

const DEFAULT_MAX_TURNS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn with_role(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role("user", content)
    }

    #[cfg(test)]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role("assistant", content)
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::with_role("tool", content)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_tool_type")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

fn default_tool_type() -> String {
    "function".to_string()
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn name(&self) -> &str;

    /// One non-streaming completion turn.
    async fn complete(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<ChatMessage>;
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiChat {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
}

impl OpenAiChat {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            temperature: 0.0,
        })
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "<[Value]>::is_empty")]
    tools: &'a [Value],
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: ChatMessage,
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<ChatMessage> {
        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&CompletionRequest {
                model: &self.model,
                messages,
                tools,
                temperature: self.temperature,
            });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(KnowledgeError::Model(format!(
                "chat API returned {status}: {}",
                preview(&body, 500)
            )));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| KnowledgeError::Model(format!("failed to parse completion: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| KnowledgeError::Model("completion had no choices".into()))
    }
}

pub fn search_tool_spec() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": SEARCH_TOOL_NAME,
            "description": SEARCH_TOOL_DESCRIPTION,
            "parameters": {
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query" }
                },
                "required": ["query"]
            }
        }
    })
}

/// Pulls a trimmed, non-empty `query` out of raw tool-call arguments.
pub fn query_from_arguments(arguments: &str) -> Option<String> {
    let trimmed = arguments.trim();
    if trimmed.is_empty() {
        return None;
    }
    let payload: Value = serde_json::from_str(trimmed).ok()?;
    query_from_value(&payload)
}

pub fn query_from_value(payload: &Value) -> Option<String> {
    match payload {
        Value::Object(map) => map
            .get("query")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_string),
        Value::String(s) => query_from_arguments(s),
        _ => None,
    }
}

/// Runs the search-then-answer loop against a knowledge base's `search`.
pub struct SearchAgent<'a> {
    model: &'a dyn ChatModel,
    max_turns: usize,
}

impl<'a> SearchAgent<'a> {
    pub fn new(model: &'a dyn ChatModel) -> Self {
        Self {
            model,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    pub async fn run(&self, question: &str, k: usize, kb: &dyn KnowledgeBase) -> Result<Answer> {
        let tools = [search_tool_spec()];
        let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(question)];
        let mut trace = AgentTrace::default();
        let mut results: Vec<SearchResult> = Vec::new();

        info!(model = %self.model.name(), question = %preview(question, 80), "agent started");

        for turn in 0..self.max_turns {
            let reply = self.model.complete(&messages, &tools).await?;

            if reply.tool_calls.is_empty() {
                let text = reply.content.unwrap_or_default().trim().to_string();
                info!(
                    turn,
                    tool_calls = trace.tool_calls.len(),
                    contexts = results.len(),
                    answer = %preview(&text, 200),
                    "agent finished"
                );
                for result in &mut results {
                    result.trace = Some(trace.clone());
                }
                return Ok(Answer {
                    text,
                    results,
                    trace: Some(trace),
                });
            }

            if let Some(reasoning) = reply
                .content
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
            {
                trace.reasoning.push(reasoning.to_string());
            }

            let calls = reply.tool_calls.clone();
            messages.push(reply);

            for call in calls {
                debug!(id = %call.id, name = %call.function.name, args = %preview(&call.function.arguments, 200), "tool call");
                trace.tool_calls.push(ToolCallTrace {
                    id: call.id.clone(),
                    name: call.function.name.clone(),
                    arguments: call.function.arguments.clone(),
                });

                let output = if call.function.name != SEARCH_TOOL_NAME {
                    warn!(name = %call.function.name, "model requested unknown tool");
                    format!("Unknown tool: {}", call.function.name)
                } else {
                    match query_from_arguments(&call.function.arguments) {
                        Some(query) => {
                            trace.tool_queries.push(query.clone());
                            let found = kb.search(&query, k).await?;
                            let output = format_tool_output(&found);
                            results.extend(
                                found
                                    .into_iter()
                                    .map(|r| r.with_metadata("tool_query", query.clone())),
                            );
                            output
                        }
                        None => "Invalid arguments: expected {\"query\": string}".to_string(),
                    }
                };

                trace.tool_responses.push(ToolResponseTrace {
                    tool_id: call.id.clone(),
                    content: output.clone(),
                });
                messages.push(ChatMessage::tool(call.id, output));
            }
        }

        Err(KnowledgeError::Agent(format!(
            "no final answer after {} turns",
            self.max_turns
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use parking_lot::Mutex;

    use super::*;

    struct ScriptedModel {
        replies: Mutex<Vec<ChatMessage>>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedModel {
        fn new(mut replies: Vec<ChatMessage>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, messages: &[ChatMessage], _tools: &[Value]) -> Result<ChatMessage> {
            self.seen.lock().push(messages.to_vec());
            self.replies
                .lock()
                .pop()
                .ok_or_else(|| KnowledgeError::Model("script exhausted".into()))
        }
    }

    struct FixedKb;

    #[async_trait]
    impl KnowledgeBase for FixedKb {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn load(&self, _paths: &[PathBuf]) -> Result<()> {
            Ok(())
        }

        async fn search(&self, query: &str, _k: usize) -> Result<Vec<SearchResult>> {
            Ok(vec![SearchResult::new(format!("doc about {query}"), 0.8)])
        }

        async fn answer(&self, _question: &str, _k: usize) -> Result<Answer> {
            unreachable!()
        }
    }

    fn tool_reply(id: &str, args: &str) -> ChatMessage {
        ChatMessage {
            role: "assistant".to_string(),
            content: None,
            tool_calls: vec![ToolCall {
                id: id.to_string(),
                kind: "function".to_string(),
                function: FunctionCall {
                    name: SEARCH_TOOL_NAME.to_string(),
                    arguments: args.to_string(),
                },
            }],
            tool_call_id: None,
        }
    }

    #[test]
    fn test_query_from_arguments() {
        assert_eq!(query_from_arguments(r#"{"query":"  rust  "}"#).as_deref(), Some("rust"));
        assert_eq!(query_from_arguments(r#"{"query":""}"#), None);
        assert_eq!(query_from_arguments("not json"), None);
        assert_eq!(query_from_arguments(""), None);
        assert_eq!(query_from_arguments(r#"["query"]"#), None);
    }

    #[tokio::test]
    async fn test_agent_searches_then_answers() {
        let model = ScriptedModel::new(vec![
            tool_reply("call-1", r#"{"query":"tokenizers"}"#),
            ChatMessage::assistant("  Tokenizers split text.  "),
        ]);
        let answer = SearchAgent::new(&model).run("What are tokenizers?", 4, &FixedKb).await.unwrap();

        assert_eq!(answer.text, "Tokenizers split text.");
        assert_eq!(answer.results.len(), 1);
        assert_eq!(answer.results[0].metadata["tool_query"], "tokenizers");
        let trace = answer.trace.unwrap();
        assert_eq!(trace.tool_queries, vec!["tokenizers"]);
        assert_eq!(trace.tool_calls[0].id, "call-1");
        assert_eq!(trace.tool_responses[0].content, "[Score: 0.800]\ndoc about tokenizers");
        assert!(answer.results[0].trace.is_some());

        let seen = model.seen.lock();
        let second_turn = &seen[1];
        let tool_msg = second_turn.last().unwrap();
        assert_eq!(tool_msg.role, "tool");
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call-1"));
    }

    #[tokio::test]
    async fn test_agent_turn_budget_exhausted() {
        let model = ScriptedModel::new(vec![
            tool_reply("a", r#"{"query":"x"}"#),
            tool_reply("b", r#"{"query":"y"}"#),
        ]);
        let mut agent = SearchAgent::new(&model);
        agent.max_turns = 2;
        let err = agent
            .run("q", 4, &FixedKb)
            .await
            .unwrap_err();
        assert!(matches!(err, KnowledgeError::Agent(_)));
    }

    #[tokio::test]
    async fn test_agent_invalid_arguments_not_searched() {
        let model = ScriptedModel::new(vec![
            tool_reply("a", "garbage"),
            ChatMessage::assistant("done"),
        ]);
        let answer = SearchAgent::new(&model).run("q", 4, &FixedKb).await.unwrap();
        assert!(answer.results.is_empty());
        let trace = answer.trace.unwrap();
        assert!(trace.tool_queries.is_empty());
        assert_eq!(trace.tool_calls.len(), 1);
    }

    #[test]
    fn test_completion_response_parses_tool_calls() {
        let json = r#"{"choices":[{"message":{"role":"assistant","content":null,
            "tool_calls":[{"id":"c1","type":"function","function":{"name":"search_knowledge_base","arguments":"{\"query\":\"q\"}"}}]}}]}"#;
        let parsed: CompletionResponse = serde_json::from_str(json).unwrap();
        let msg = &parsed.choices[0].message;
        assert!(msg.content.is_none());
        assert_eq!(msg.tool_calls[0].function.name, SEARCH_TOOL_NAME);
    }

    #[test]
    fn test_tool_message_serialization() {
        let msg = ChatMessage::tool("c1", "out");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "tool");
        assert_eq!(value["tool_call_id"], "c1");
        assert!(value.get("tool_calls").is_none());
    }
}
