use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::auth;
use crate::knowledge::remote::{
    AnswerRequest, AnswerResponse, DocumentPayload, LoadRequest, SearchRequest, SearchResponse,
};
use crate::knowledge::KnowledgeBase;
use crate::metrics::{Metrics, Operation};

const MAX_K: usize = 100;

pub struct AppState {
    pub kb: Arc<dyn KnowledgeBase>,
    pub auth_token: Option<String>,
    pub metrics: Arc<Metrics>,
    pub started_at: chrono::DateTime<Utc>,
}

impl AppState {
    pub fn new(kb: Arc<dyn KnowledgeBase>, auth_token: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            kb,
            auth_token,
            metrics: Metrics::new(),
            started_at: Utc::now(),
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .route("/load", post(load))
        .route("/search", post(search))
        .route("/answer", post(answer))
        .with_state(state)
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

fn require_auth(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    if auth::authorize(headers, state.auth_token.as_deref()) {
        Ok(())
    } else {
        Err(api_error(StatusCode::UNAUTHORIZED, "Invalid token"))
    }
}

fn validate_k(k: usize) -> Result<(), ApiError> {
    if k == 0 || k > MAX_K {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("k must be between 1 and {MAX_K}"),
        ));
    }
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    knowledge_base: String,
    uptime_secs: i64,
    loads: u64,
    documents_loaded: u64,
    searches: u64,
    answers: u64,
    failed: u64,
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let uptime = (Utc::now() - state.started_at).num_seconds();
    let m = &state.metrics;
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        knowledge_base: state.kb.name().to_string(),
        uptime_secs: uptime,
        loads: m.loads_total.load(Ordering::Relaxed),
        documents_loaded: m.documents_loaded.load(Ordering::Relaxed),
        searches: m.searches_total.load(Ordering::Relaxed),
        answers: m.answers_total.load(Ordering::Relaxed),
        failed: m.requests_failed.load(Ordering::Relaxed),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let body = state.metrics.render_prometheus();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

async fn load(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<LoadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_auth(&state, &headers)?;
    if payload.file_paths.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "file_paths is required"));
    }

    let paths: Vec<PathBuf> = payload.file_paths.iter().map(PathBuf::from).collect();
    let started = Instant::now();
    let result = state.kb.load(&paths).await;
    let elapsed = started.elapsed().as_millis() as u64;
    state.metrics.record(Operation::Load, result.is_ok(), elapsed);

    match result {
        Ok(()) => {
            state.metrics.add_documents(paths.len() as u64);
            info!(files = paths.len(), elapsed_ms = elapsed, "load complete");
            Ok(Json(json!({ "status": "ok", "loaded": paths.len() })))
        }
        Err(e) => {
            warn!(error = %e, "load failed");
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

async fn search(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    require_auth(&state, &headers)?;
    let query = payload.query.trim();
    if query.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "query is required"));
    }
    validate_k(payload.k)?;

    let started = Instant::now();
    let result = state.kb.search(query, payload.k).await;
    state
        .metrics
        .record(Operation::Search, result.is_ok(), started.elapsed().as_millis() as u64);

    match result {
        Ok(results) => Ok(Json(SearchResponse {
            documents: results.into_iter().map(DocumentPayload::from).collect(),
        })),
        Err(e) => {
            warn!(error = %e, "search failed");
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

async fn answer(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<AnswerRequest>,
) -> Result<Json<AnswerResponse>, ApiError> {
    require_auth(&state, &headers)?;
    let question = payload.question.trim();
    if question.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "question is required"));
    }
    validate_k(payload.k)?;

    let started = Instant::now();
    let result = state.kb.answer(question, payload.k).await;
    let elapsed = started.elapsed().as_millis() as u64;
    state.metrics.record(Operation::Answer, result.is_ok(), elapsed);

    match result {
        Ok(answer) => {
            info!(contexts = answer.results.len(), elapsed_ms = elapsed, "answer complete");
            Ok(Json(AnswerResponse {
                answer: answer.text,
                documents: answer.results.into_iter().map(DocumentPayload::from).collect(),
                trace: answer.trace,
            }))
        }
        Err(e) => {
            warn!(error = %e, "answer failed");
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::local::tests::test_kb;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn app(auth_token: Option<&str>) -> Router {
        router(AppState::new(
            Arc::new(test_kb("answer")),
            auth_token.map(str::to_string),
        ))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app(None)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_search_validation() {
        let cases = [
            json!({ "query": "", "k": 4 }),
            json!({ "query": "rust", "k": 0 }),
            json!({ "query": "rust", "k": 101 }),
        ];
        for case in cases {
            let response = app(None).oneshot(post_json("/search", case)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn test_answer_requires_question() {
        let response = app(None)
            .oneshot(post_json("/answer", json!({ "question": "  " })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "question is required");
    }

    #[tokio::test]
    async fn test_load_requires_paths() {
        let response = app(None)
            .oneshot(post_json("/load", json!({ "file_paths": [] })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_load_missing_file_is_server_error() {
        let response = app(None)
            .oneshot(post_json("/load", json!({ "file_paths": ["/nonexistent/a.md"] })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_json(response).await["error"].as_str().unwrap().contains("a.md"));
    }

    #[tokio::test]
    async fn test_auth_required_when_configured() {
        let response = app(Some("secret"))
            .oneshot(post_json("/search", json!({ "query": "rust" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let mut request = post_json("/search", json!({ "query": "rust" }));
        request
            .headers_mut()
            .insert("authorization", "Bearer secret".parse().unwrap());
        let response = app(Some("secret")).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["documents"], json!([]));
    }

    #[tokio::test]
    async fn test_metrics_and_status() {
        let state = AppState::new(Arc::new(test_kb("answer")), None);
        let app = router(state.clone());
        app.clone()
            .oneshot(post_json("/search", json!({ "query": "rust", "k": 2 })))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("rag_eval_searches_total 1"));

        let response = app
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = body_json(response).await;
        assert_eq!(status["knowledge_base"], "local");
        assert_eq!(status["searches"], 1);
    }
}
