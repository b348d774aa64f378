//! HTTP surface
//!
//! Session endpoints plus health, readiness and Prometheus metrics.

use crate::error::SessiaError;
use crate::metrics::SessiaMetrics;
use crate::session::SessionRouter;
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Largest accepted session payload
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Save response
#[derive(Debug, Serialize, Deserialize)]
pub struct SaveResponse {
    pub id: String,
}

/// Query request body
#[derive(Debug, Serialize, Deserialize)]
pub struct QueryRequest {
    pub id: String,
}

/// Query response
#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub data: String,
}

/// Error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Readiness check response
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub shards_known: usize,
    pub snapshot_version: u64,
    pub sessions_saved: u64,
}

/// Application state for handlers
#[derive(Clone)]
pub struct AppState {
    pub router: SessionRouter,
    pub metrics: Arc<SessiaMetrics>,
}

/// Request-path error mapped to a status code
#[derive(Debug)]
pub struct ApiError(pub SessiaError);

impl From<SessiaError> for ApiError {
    fn from(err: SessiaError) -> Self {
        Self(err)
    }
}

/// Status code for a domain error
pub fn status_for(err: &SessiaError) -> StatusCode {
    match err {
        SessiaError::NoShardsAvailable => StatusCode::SERVICE_UNAVAILABLE,
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        SessiaError::ShardUnavailable { .. } | SessiaError::ShardProtocol { .. } => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            warn!(error = %self.0, error_type = self.0.error_type_label(), "Request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// Create the HTTP router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/save", post(save_handler))
        .route("/query", post(query_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .layer(axum::extract::DefaultBodyLimit::max(MAX_PAYLOAD_BYTES))
        .with_state(state)
}

/// Store the raw request body as a session record
async fn save_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SaveResponse>, ApiError> {
    let id = state.router.save(&body).await?;
    Ok(Json(SaveResponse { id }))
}

/// Look up a session record by identifier
async fn query_handler(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Response {
    let Json(query) = match payload {
        Ok(query) => query,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: rejection.body_text(),
                }),
            )
                .into_response();
        }
    };

    match state.router.query(&query.id).await {
        Ok(data) => Json(QueryResponse {
            data: String::from_utf8_lossy(&data).into_owned(),
        })
        .into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

/// Health endpoint - always returns 200 if process is running
async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness endpoint - returns 200 if at least one shard is known
async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.router.registry().current();

    let response = ReadyResponse {
        ready: !snapshot.is_empty(),
        shards_known: snapshot.len(),
        snapshot_version: snapshot.version(),
        sessions_saved: state.router.usage().total_saves(),
    };

    if response.ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Metrics endpoint - returns Prometheus format metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::RandomSelection;
    use crate::shard::{MemoryShard, Registry, ShardClient, ShardInstance};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::collections::HashMap;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(with_shard: bool) -> Router {
        let registry = Registry::new();
        if with_shard {
            let shard: Arc<dyn ShardClient> = Arc::new(MemoryShard::new("mem:1"));
            registry.publish(
                vec![ShardInstance {
                    identity: "9c1a2b3d4e5f".to_string(),
                    address: "mem:1".to_string(),
                    memory_used: 0,
                }],
                HashMap::from([("9c1a2b3d4e5f".to_string(), shard)]),
            );
        }
        let metrics = Arc::new(SessiaMetrics::detached());
        let router = SessionRouter::new(
            registry,
            Arc::new(RandomSelection),
            Duration::from_secs(60),
            Arc::clone(&metrics),
        );
        super::router(AppState { router, metrics })
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn query_request(body: &str) -> Request<Body> {
        Request::post("/query")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&SessiaError::NoShardsAvailable), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status_for(&SessiaError::RecordNotFound { token: "t".into() }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&SessiaError::MalformedIdentifier { id: "x".into() }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&SessiaError::Config("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_save_and_query_round_trip() {
        let app = app(true);

        let response = app
            .clone()
            .oneshot(Request::post("/save").body(Body::from("hello")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let saved: SaveResponse = body_json(response).await;
        assert!(saved.id.ends_with("-9c1a2b3d4e5f"));

        let response = app
            .oneshot(query_request(&serde_json::json!({ "id": saved.id }).to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let queried: QueryResponse = body_json(response).await;
        assert_eq!(queried.data, "hello");
    }

    #[tokio::test]
    async fn test_save_without_shards_is_503() {
        let response = app(false)
            .oneshot(Request::post("/save").body(Body::from("x")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_query_unknown_is_404() {
        let response = app(true)
            .oneshot(query_request(r#"{"id":"abc-unknownid"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_query_bad_json_is_400() {
        let response = app(true).oneshot(query_request("{not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_ready_reflects_registry() {
        let response = app(false)
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = app(true)
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "healthy",
            version: "0.2.0",
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("healthy"));
    }
}
