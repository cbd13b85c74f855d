//! HTTP routes over the query surface.
//!
//! Batches block on network write locks, so inference runs on tokio's blocking
//! pool and never stalls the async workers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use crate::api::{ApiError, ApiRoute, BatchResponse, InferRequest, NetworkView, NodeView, QueryService};

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Build the router for `service`, rooted at its prefix, with permissive CORS.
pub fn router(service: QueryService) -> Router {
    let root = service.prefix().to_string();
    let base = root.trim_end_matches('/').to_string();
    Router::new()
        .route(&root, get(routes))
        .route(&format!("{base}/nets"), get(list_networks))
        .route(&format!("{base}/nets/{{netid}}"), get(describe_network))
        .route(&format!("{base}/nets/{{netid}}/nodes"), get(list_nodes))
        .route(
            &format!("{base}/nets/{{netid}}/nodes/{{nodeid}}"),
            get(describe_node).post(infer),
        )
        .layer(CorsLayer::permissive())
        .with_state(service)
}

async fn routes(State(service): State<QueryService>) -> Json<Vec<ApiRoute>> {
    Json(service.routes())
}

async fn list_networks(State(service): State<QueryService>) -> Json<Vec<NetworkView>> {
    Json(service.list_networks())
}

async fn describe_network(
    State(service): State<QueryService>,
    Path(net_id): Path<String>,
) -> Result<Json<NetworkView>, ApiError> {
    blocking(move || service.describe_network(&net_id)).await.map(Json)
}

async fn list_nodes(
    State(service): State<QueryService>,
    Path(net_id): Path<String>,
) -> Result<Json<Vec<NodeView>>, ApiError> {
    blocking(move || service.list_nodes(&net_id)).await.map(Json)
}

async fn describe_node(
    State(service): State<QueryService>,
    Path((net_id, node_id)): Path<(String, String)>,
) -> Result<Json<NodeView>, ApiError> {
    blocking(move || service.describe_node(&net_id, &node_id))
        .await
        .map(Json)
}

async fn infer(
    State(service): State<QueryService>,
    Path((net_id, node_id)): Path<(String, String)>,
    body: axum::body::Bytes,
) -> Result<Json<BatchResponse>, ApiError> {
    let request: InferRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid inference payload: {e}")))?;
    blocking(move || service.infer(&net_id, &node_id, request))
        .await
        .map(Json)
}

/// Run a lock-taking request on the blocking pool.
async fn blocking<T: Send + 'static>(
    f: impl FnOnce() -> Result<T, ApiError> + Send + 'static,
) -> Result<T, ApiError> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("request task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::enumerate::EnumerationBackend;
    use crate::engine::EngineHandle;
    use crate::registry::NetworkRegistry;

    async fn spawn_server(prefix: &str) -> std::net::SocketAddr {
        let engine = EngineHandle::initialize(Arc::new(EnumerationBackend::new()), None).unwrap();
        let registry = Arc::new(NetworkRegistry::new(engine));
        registry
            .load(crate::network::testing::SPRINKLER.as_bytes(), "sprinkler.toml")
            .unwrap();
        let app = router(QueryService::new(registry, prefix));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    /// Send one request with ureq on the blocking pool; returns status and body.
    async fn request(addr: std::net::SocketAddr, method: &str, path: &str, body: &str) -> (u16, String) {
        let url = format!("http://{addr}{path}");
        let method = method.to_string();
        let body = body.to_string();
        tokio::task::spawn_blocking(move || {
            let req = ureq::request(&method, &url);
            let result = if body.is_empty() {
                req.call()
            } else {
                req.set("Content-Type", "application/json").send_string(&body)
            };
            match result {
                Ok(resp) => (resp.status(), resp.into_string().unwrap()),
                Err(ureq::Error::Status(code, resp)) => (code, resp.into_string().unwrap()),
                Err(e) => panic!("{method} {url} failed: {e}"),
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn serves_listing_under_prefix() {
        let addr = spawn_server("/api").await;
        let (status, body) = request(addr, "GET", "/api", "").await;
        assert_eq!(status, 200);
        assert!(body.contains("/api/nets"));

        let (status, body) = request(addr, "GET", "/api/nets", "").await;
        assert_eq!(status, 200);
        assert!(body.contains("\"Sprinkler\""));

        let (status, _) = request(addr, "GET", "/api/nets/Nope", "").await;
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn posts_batches() {
        let addr = spawn_server("/").await;
        let (status, body) = request(
            addr,
            "POST",
            "/nets/0/nodes/Wet",
            r#"{"id":"x","cases":[{"Rain":"yes"}]}"#,
        )
        .await;
        assert_eq!(status, 200);
        let response: BatchResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(response.id, "x");
        assert_eq!(response.results[0].value, "yes");

        let (status, _) = request(addr, "POST", "/nets/0/nodes/Wet", "{not json").await;
        assert_eq!(status, 400);
    }
}
