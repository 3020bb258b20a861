//! Read-only HTTP API for the presentation side.
//!
//! Every handler runs its store work on the blocking pool against one shared
//! [`Session`]; store access is serialised by the session lock. Metrics and
//! layouts are computed after the graph is loaded and the lock released.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::{Config, GraphConfig};
use crate::db::Session;
use crate::error::{CitegraphError, Result};
use crate::graph::{
    compute_layout, compute_metrics, parse_metric_list, CitationGraph, EdgeResolution, LayoutKind, Metric,
};
use crate::tables::{fetch_listing, Listing};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    session: Arc<Mutex<Session>>,
    default_metrics: Vec<Metric>,
    default_layout: String,
    layout_iterations: usize,
    max_layout_iterations: usize,
    layout_seed: u64,
}

impl AppState {
    pub fn new(session: Session, graph: &GraphConfig) -> Result<Self> {
        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            default_metrics: graph.metrics()?,
            default_layout: graph.layout.clone(),
            layout_iterations: graph.layout_iterations,
            max_layout_iterations: graph.max_layout_iterations,
            layout_seed: graph.layout_seed,
        })
    }

    /// Run `f` against the session on the blocking pool.
    async fn with_session<T, F>(&self, f: F) -> std::result::Result<T, ApiError>
    where
        F: FnOnce(&mut Session) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let session = Arc::clone(&self.session);
        let joined = tokio::task::spawn_blocking(move || {
            let mut guard = session
                .lock()
                .map_err(|_| CitegraphError::Connectivity("session lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| CitegraphError::operation("join request task", e))?;
        Ok(joined?)
    }

    /// Load a graph under the session lock; the lock is released on return.
    async fn load_graph(&self, resolution: EdgeResolution) -> std::result::Result<CitationGraph, ApiError> {
        self.with_session(move |session| CitationGraph::load(session, resolution))
            .await
    }
}

/// Run CPU-bound graph work on the blocking pool without holding the session.
async fn detached<T, F>(f: F) -> std::result::Result<T, ApiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError(CitegraphError::operation("join graph task", e)))
}

/// Error response: `{"error": ..., "class": ...}` with a status by class.
#[derive(Debug)]
pub struct ApiError(CitegraphError);

impl From<CitegraphError> for ApiError {
    fn from(err: CitegraphError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            CitegraphError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            log::error!("request failed: {}", self.0);
        }
        (
            status,
            Json(serde_json::json!({
                "error": self.0.to_string(),
                "class": self.0.class(),
            })),
        )
            .into_response()
    }
}

type ApiResult = std::result::Result<Response, ApiError>;

#[derive(Debug, Default, Deserialize)]
struct MetricsQuery {
    metrics: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LayoutQuery {
    kind: Option<String>,
    iterations: Option<usize>,
    seed: Option<u64>,
}

/// Create the axum router
pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    let cors = if allowed_origins.is_empty() {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = allowed_origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .route("/health", get(handle_health))
        .route("/tables/:listing", get(handle_table))
        .route("/graphs/:resolution", get(handle_graph))
        .route("/graphs/:resolution/metrics", get(handle_metrics))
        .route("/graphs/:resolution/layout", get(handle_layout))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(state)
}

/// Run the HTTP server until it fails.
pub async fn serve(config: &Config, session: Session) -> Result<()> {
    let state = AppState::new(session, &config.graph)?;
    let app = router(state, &config.http_server.allowed_origins);

    let addr = format!("127.0.0.1:{}", config.http_server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| CitegraphError::Config(format!("bind {}: {}", addr, e)))?;
    log::info!("citegraph API listening on http://{}", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| CitegraphError::operation("http server", e))
}

async fn handle_health() -> Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "service": "citegraph",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
        .into_response()
}

async fn handle_table(State(state): State<AppState>, Path(listing): Path<String>) -> ApiResult {
    let listing: Listing = listing.parse()?;
    let table = state
        .with_session(move |session| fetch_listing(&session.executor(), listing))
        .await?;
    Ok(Json(table).into_response())
}

async fn handle_graph(State(state): State<AppState>, Path(resolution): Path<String>) -> ApiResult {
    let resolution: EdgeResolution = resolution.parse()?;
    let export = state
        .with_session(move |session| Ok(CitationGraph::load(session, resolution)?.export()))
        .await?;
    Ok(Json(export).into_response())
}

async fn handle_metrics(
    State(state): State<AppState>,
    Path(resolution): Path<String>,
    Query(query): Query<MetricsQuery>,
) -> ApiResult {
    let resolution: EdgeResolution = resolution.parse()?;
    let metrics = match query.metrics.as_deref() {
        Some(list) => parse_metric_list(list)?,
        None => state.default_metrics.clone(),
    };
    let graph = state.load_graph(resolution).await?;
    let result = detached(move || compute_metrics(&graph, &metrics)).await?;
    Ok(Json(result).into_response())
}

async fn handle_layout(
    State(state): State<AppState>,
    Path(resolution): Path<String>,
    Query(query): Query<LayoutQuery>,
) -> ApiResult {
    let resolution: EdgeResolution = resolution.parse()?;
    let iterations = query.iterations.unwrap_or(state.layout_iterations);
    if iterations > state.max_layout_iterations {
        return Err(CitegraphError::InvalidInput(format!(
            "iterations={} exceeds the limit of {}",
            iterations, state.max_layout_iterations
        ))
        .into());
    }
    let kind = LayoutKind::parse(
        query.kind.as_deref().unwrap_or(&state.default_layout),
        iterations,
        query.seed.unwrap_or(state.layout_seed),
    )?;
    let graph = state.load_graph(resolution).await?;
    let layout = detached(move || compute_layout(&graph, kind)).await?;
    Ok(Json(layout).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::open_test_session;
    use crate::normalize::{import_batch, NormalizeOptions};
    use crate::records::{RawBatch, RawRecord};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn app() -> (Router, TempDir) {
        let (mut session, temp) = open_test_session();
        let paper = |title: &str, author: &str, id: &str, refs: &[&str]| RawRecord {
            title: Some(title.to_string()),
            authors: vec![author.to_string()],
            external_id: Some(id.to_string()),
            referenced_works: Some(refs.iter().map(|r| r.to_string()).collect()),
            ..Default::default()
        };
        let batch = RawBatch::new(
            "http",
            vec![
                paper("P1", "Alice", "E1", &["E2"]),
                paper("P2", "Bob", "E2", &["E3"]),
                paper("P3", "Carol", "E3", &[]),
            ],
        );
        import_batch(&mut session, &batch, &NormalizeOptions::default()).unwrap();
        let state = AppState::new(session, &GraphConfig::default()).unwrap();
        (router(state, &[]), temp)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _temp) = app();
        let (status, body) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_table_listing() {
        let (app, _temp) = app();
        let (status, body) = get_json(app, "/tables/citations-by-title").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["columns"], serde_json::json!(["source", "target"]));
        assert_eq!(body["rows"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_graph_export_and_metrics() {
        let (app, _temp) = app();
        let (status, body) = get_json(app.clone(), "/graphs/author").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["nodes"], serde_json::json!(["Alice", "Bob", "Carol"]));

        let (status, body) = get_json(app, "/graphs/author/metrics?metrics=in_degree,betweenness").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["nodes"]["Bob"]["in_degree"], 1);
        assert_eq!(body["nodes"]["Bob"]["betweenness"], 0.5);
        assert!(body["nodes"]["Bob"].get("closeness").is_none());
    }

    #[tokio::test]
    async fn test_layout_follows_node_order() {
        let (app, _temp) = app();
        let (status, body) = get_json(app, "/graphs/paper-title/layout?kind=circular").await;
        assert_eq!(status, StatusCode::OK);
        let keys: Vec<&String> = body["positions"].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["P1", "P2", "P3"]);
    }

    #[tokio::test]
    async fn test_bad_input_is_400() {
        let (app, _temp) = app();
        for uri in [
            "/tables/everything",
            "/graphs/venue",
            "/graphs/author/metrics?metrics=pagerank",
            "/graphs/author/layout?kind=planar",
            "/graphs/author/layout?kind=spring&iterations=100000",
        ] {
            let (status, body) = get_json(app.clone(), uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(body["class"], "InvalidInput");
        }
    }

    #[tokio::test]
    async fn test_graph_work_runs_without_session_lock() {
        let (session, _temp) = open_test_session();
        let state = AppState::new(session, &GraphConfig::default()).unwrap();

        let graph = state.load_graph(EdgeResolution::PaperTitle).await.unwrap();
        assert_eq!(graph.node_count(), 0);

        let shared = Arc::clone(&state.session);
        let free = detached(move || shared.try_lock().is_ok()).await.unwrap();
        assert!(free);
    }
}
