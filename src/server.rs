//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Status, version, index and model readiness |
//! | `POST`   | `/embed-codebase` | Ingest a directory |
//! | `POST`   | `/ask` | Answer a question about the indexed code |
//! | `POST`   | `/search` | Raw similarity search |
//! | `GET`    | `/system-info` | Model settings, index stats, history length |
//! | `GET`    | `/conversation-history` | Turns of one session |
//! | `DELETE` | `/conversation-history` | Clear one session |
//! | `DELETE` | `/vector-store` | Clear the index |
//!
//! Session-scoped routes take an optional `session_id` (query string or
//! body); it defaults to [`DEFAULT_SESSION`].
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "k must be at least 1" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `rate_limited` (429),
//! `internal` (500). Internal errors carry only a short category, never the
//! underlying provider or database message.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::app::{App, Health, IngestReport, SystemInfo, DEFAULT_SESSION};
use crate::config::Config;
use crate::error::CoreError;
use crate::models::{AnswerResponse, ConversationTurn, SearchHit};

#[derive(Clone)]
struct AppState {
    app: Arc<App>,
    /// Cancelled on shutdown so in-flight ingests stop between files.
    shutdown: CancellationToken,
}

/// Build the router around an already constructed [`App`].
pub fn router(app: Arc<App>, shutdown: CancellationToken) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/embed-codebase", post(handle_embed_codebase))
        .route("/ask", post(handle_ask))
        .route("/search", post(handle_search))
        .route("/system-info", get(handle_system_info))
        .route(
            "/conversation-history",
            get(handle_get_history).delete(handle_clear_history),
        )
        .route("/vector-store", axum::routing::delete(handle_clear_index))
        .layer(cors)
        .with_state(AppState { app, shutdown })
}

/// Build the [`App`] from configuration and serve until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let app = Arc::new(App::from_config(config).await?);
    let shutdown = CancellationToken::new();
    let routes = router(app, shutdown.clone());

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "server listening");
    println!("Listening on http://{}", config.server.bind);

    axum::serve(listener, routes)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound(msg) => AppError {
                status: StatusCode::NOT_FOUND,
                code: "not_found",
                message: msg,
            },
            CoreError::InvalidArgument(msg) | CoreError::Encoding(msg) => AppError {
                status: StatusCode::BAD_REQUEST,
                code: "bad_request",
                message: msg,
            },
            CoreError::RateLimited(count) => AppError {
                status: StatusCode::TOO_MANY_REQUESTS,
                code: "rate_limited",
                message: format!("rate limit exceeded ({} requests in the last minute)", count),
            },
            other => {
                error!(error = %other, "request failed");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal",
                    message: other.category().to_string(),
                }
            }
        }
    }
}

#[derive(Deserialize)]
struct SessionQuery {
    session_id: Option<String>,
}

impl SessionQuery {
    fn id(&self) -> &str {
        self.session_id.as_deref().unwrap_or(DEFAULT_SESSION)
    }
}

// ============ Handlers ============

async fn handle_health(State(state): State<AppState>) -> Json<Health> {
    Json(state.app.health_check().await)
}

#[derive(Deserialize)]
struct EmbedRequest {
    directory_path: PathBuf,
    #[serde(default = "default_recursive")]
    recursive: bool,
}

fn default_recursive() -> bool {
    true
}

async fn handle_embed_codebase(
    State(state): State<AppState>,
    Json(req): Json<EmbedRequest>,
) -> Result<Json<IngestReport>, AppError> {
    let report = state
        .app
        .ingest(&req.directory_path, req.recursive, &state.shutdown)
        .await?;
    Ok(Json(report))
}

#[derive(Deserialize)]
struct AskRequest {
    question: String,
    session_id: Option<String>,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AnswerResponse>, AppError> {
    let session = req.session_id.as_deref().unwrap_or(DEFAULT_SESSION);
    Ok(Json(state.app.ask(&req.question, session).await?))
}

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    k: Option<usize>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let results = state.app.search(&req.query, req.k.unwrap_or(5)).await?;
    Ok(Json(SearchResponse { results }))
}

async fn handle_system_info(
    State(state): State<AppState>,
    Query(q): Query<SessionQuery>,
) -> Result<Json<SystemInfo>, AppError> {
    Ok(Json(state.app.system_info(q.id()).await?))
}

#[derive(Serialize)]
struct HistoryResponse {
    messages: Vec<ConversationTurn>,
}

async fn handle_get_history(
    State(state): State<AppState>,
    Query(q): Query<SessionQuery>,
) -> Json<HistoryResponse> {
    Json(HistoryResponse {
        messages: state.app.get_history(q.id()),
    })
}

#[derive(Serialize)]
struct ClearResponse {
    success: bool,
    message: String,
}

async fn handle_clear_history(
    State(state): State<AppState>,
    Query(q): Query<SessionQuery>,
) -> Json<ClearResponse> {
    let success = state.app.clear_history(q.id());
    Json(ClearResponse {
        success,
        message: "Conversation history cleared successfully".to_string(),
    })
}

async fn handle_clear_index(
    State(state): State<AppState>,
) -> Result<Json<ClearResponse>, AppError> {
    let success = state.app.clear_index().await?;
    Ok(Json(ClearResponse {
        success,
        message: "Vector store cleared successfully".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::llm::DisabledModel;
    use crate::store::IndexStore;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn test_router(tmp: &TempDir) -> Router {
        let mut config = Config::default();
        config.security.allowed_base_dirs.push(std::env::temp_dir());
        let store = IndexStore::open(
            &tmp.path().join("index.sqlite"),
            "test",
            Arc::new(HashEmbedder::new(64)),
            16,
            &config.chunking,
        )
        .await
        .unwrap();
        let app = App::new(
            &config,
            Arc::new(store),
            Arc::new(DisabledModel::new(&config.llm)),
        );
        router(Arc::new(app), CancellationToken::new())
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_empty_index() {
        let tmp = TempDir::new().unwrap();
        let resp = test_router(&tmp)
            .await
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["index_ready"], false);
        assert_eq!(json["model_configured"], false);
    }

    #[tokio::test]
    async fn test_ask_on_empty_index() {
        let tmp = TempDir::new().unwrap();
        let resp = test_router(&tmp)
            .await
            .oneshot(json_request(
                "POST",
                "/ask",
                serde_json::json!({"question": "what functions exist?"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(
            json["answer"],
            "No codebase has been embedded yet. Please embed your codebase first."
        );
        assert!(json["error"].is_null());
    }

    #[tokio::test]
    async fn test_embed_missing_directory_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("does-not-exist");
        let resp = test_router(&tmp)
            .await
            .oneshot(json_request(
                "POST",
                "/embed-codebase",
                serde_json::json!({"directory_path": missing}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let json = body_json(resp).await;
        assert_eq!(json["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn test_search_zero_k_is_bad_request() {
        let tmp = TempDir::new().unwrap();
        let resp = test_router(&tmp)
            .await
            .oneshot(json_request(
                "POST",
                "/search",
                serde_json::json!({"query": "parser", "k": 0}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_history_routes() {
        let tmp = TempDir::new().unwrap();
        let router = test_router(&tmp).await;

        let resp = router
            .clone()
            .oneshot(
                Request::get("/conversation-history?session_id=abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["messages"], serde_json::json!([]));

        let resp = router
            .oneshot(
                Request::delete("/conversation-history?session_id=abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["success"], true);
    }

    #[tokio::test]
    async fn test_rate_limited_ask_returns_429() {
        let tmp = TempDir::new().unwrap();
        let router = test_router(&tmp).await;
        for _ in 0..60 {
            let resp = router
                .clone()
                .oneshot(json_request(
                    "POST",
                    "/ask",
                    serde_json::json!({"question": "hi", "session_id": "busy"}),
                ))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }
        let resp = router
            .oneshot(json_request(
                "POST",
                "/ask",
                serde_json::json!({"question": "hi", "session_id": "busy"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_json(resp).await["error"]["code"], "rate_limited");
    }
}
