//! Recovers the retrieval queries a knowledge base actually issued.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::knowledge::agent::query_from_arguments;
use crate::knowledge::{AgentTrace, SearchResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EvalMode {
    /// One deterministic `search(question)` for contexts plus a separate `answer`.
    Strict,
    /// Contexts are whatever the backend retrieved while answering.
    #[default]
    Native,
}

impl EvalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvalMode::Strict => "strict",
            EvalMode::Native => "native",
        }
    }
}

impl std::fmt::Display for EvalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn extract_retrieval_queries(
    question: &str,
    mode: EvalMode,
    results: &[SearchResult],
    fallback_trace: Option<&AgentTrace>,
) -> Vec<String> {
    if mode == EvalMode::Strict {
        return vec![question.to_string()];
    }

    let mut queries: Vec<String> = results
        .iter()
        .filter_map(|r| r.metadata.get("tool_query").and_then(Value::as_str))
        .filter_map(normalize)
        .collect();

    let trace = results
        .iter()
        .find_map(|r| r.trace.as_ref())
        .or(fallback_trace);

    if let Some(trace) = trace {
        queries.extend(trace.tool_queries.iter().filter_map(|q| normalize(q)));
        queries.extend(
            trace
                .tool_calls
                .iter()
                .filter_map(|call| query_from_arguments(&call.arguments)),
        );
    }

    dedupe(queries)
}

fn normalize(query: &str) -> Option<String> {
    let trimmed = query.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn dedupe(queries: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    queries
        .into_iter()
        .filter(|q| seen.insert(q.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::ToolCallTrace;

    fn call(arguments: &str) -> ToolCallTrace {
        ToolCallTrace {
            id: "c".into(),
            name: "search_knowledge_base".into(),
            arguments: arguments.into(),
        }
    }

    #[test]
    fn test_strict_returns_question() {
        let results = vec![SearchResult::new("x", 0.5).with_metadata("tool_query", "other")];
        assert_eq!(
            extract_retrieval_queries("What is X?", EvalMode::Strict, &results, None),
            vec!["What is X?"]
        );
    }

    #[test]
    fn test_native_metadata_then_trace_in_order_deduped() {
        let trace = AgentTrace {
            tool_queries: vec!["  beta ".into(), "gamma".into()],
            tool_calls: vec![call(r#"{"query":"alpha"}"#), call(r#"{"query":"delta"}"#), call("bad")],
            ..Default::default()
        };
        let mut with_trace = SearchResult::new("y", 0.4).with_metadata("tool_query", "beta");
        with_trace.trace = Some(trace);
        let results = vec![
            SearchResult::new("x", 0.5).with_metadata("tool_query", " alpha "),
            with_trace,
            SearchResult::new("z", 0.3).with_metadata("tool_query", ""),
        ];

        let queries = extract_retrieval_queries("q", EvalMode::Native, &results, None);
        assert_eq!(queries, vec!["alpha", "beta", "gamma", "delta"]);
    }

    #[test]
    fn test_native_uses_fallback_trace_only_when_results_have_none() {
        let fallback = AgentTrace {
            tool_queries: vec!["from-fallback".into()],
            ..Default::default()
        };
        let queries = extract_retrieval_queries("q", EvalMode::Native, &[], Some(&fallback));
        assert_eq!(queries, vec!["from-fallback"]);

        let mut result = SearchResult::new("x", 0.5);
        result.trace = Some(AgentTrace {
            tool_queries: vec!["from-result".into()],
            ..Default::default()
        });
        let queries = extract_retrieval_queries("q", EvalMode::Native, &[result], Some(&fallback));
        assert_eq!(queries, vec!["from-result"]);
    }

    #[test]
    fn test_native_without_any_signal_is_empty() {
        let results = vec![SearchResult::new("x", 0.5)];
        assert!(extract_retrieval_queries("q", EvalMode::Native, &results, None).is_empty());
    }
}
