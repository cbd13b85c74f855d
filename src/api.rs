//! Query surface: JSON view types and the requests the server answers.
//!
//! Nothing here knows about HTTP. [`QueryService`] resolves identifiers
//! against the registry, takes the right lock for each request and returns
//! serializable views; the `server` module only maps them onto routes.

use std::sync::Arc;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::batch::{self, CaseOutcome};
use crate::engine::EngineResult;
use crate::error::{EngineError, LookupError};
use crate::evidence::Case;
use crate::network::Network;
use crate::node::Node;
use crate::registry::NetworkRegistry;

/// Errors surfaced to API clients.
#[derive(Debug, Error, Diagnostic)]
pub enum ApiError {
    #[error("{0}")]
    #[diagnostic(code(bnserve::api::not_found))]
    NotFound(String),

    #[error("{0}")]
    #[diagnostic(code(bnserve::api::bad_request))]
    BadRequest(String),

    #[error("{0}")]
    #[diagnostic(code(bnserve::api::internal))]
    Internal(String),
}

impl From<LookupError> for ApiError {
    fn from(e: LookupError) -> Self {
        match e {
            LookupError::Engine(e) => e.into(),
            other => Self::NotFound(other.to_string()),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NetworkClosed { .. } => Self::NotFound(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// One entry of the route listing served at the API root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRoute {
    pub path: String,
    pub method: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkView {
    pub index: usize,
    pub name: String,
    pub title: String,
    pub comment: String,
    /// Present only when a single network is described.
    pub nodes: Option<Vec<NodeView>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeView {
    pub index: usize,
    pub name: String,
    pub title: String,
    pub comment: String,
    pub states: Vec<String>,
    /// `null` for nodes without levels.
    pub levels: Option<Vec<f64>>,
}

/// Inference payload: a client-chosen id and the cases to run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub cases: Vec<Case>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub id: String,
    pub results: Vec<CaseOutcome>,
}

/// Answers API requests against one registry.
#[derive(Debug, Clone)]
pub struct QueryService {
    registry: Arc<NetworkRegistry>,
    prefix: String,
}

impl QueryService {
    /// `prefix` is the normalized route prefix, as from [`crate::config::api_prefix`].
    pub fn new(registry: Arc<NetworkRegistry>, prefix: impl Into<String>) -> Self {
        Self {
            registry,
            prefix: prefix.into(),
        }
    }

    pub fn registry(&self) -> &Arc<NetworkRegistry> {
        &self.registry
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Routes served under the prefix.
    pub fn routes(&self) -> Vec<ApiRoute> {
        let base = self.prefix.trim_end_matches('/');
        [
            ("/nets", "GET", "List all loaded networks."),
            ("/nets/{netid}", "GET", "Describe {netid} and list its nodes."),
            ("/nets/{netid}/nodes", "GET", "List all nodes of {netid}."),
            ("/nets/{netid}/nodes/{nodeid}", "GET", "Describe {nodeid} in {netid}."),
            (
                "/nets/{netid}/nodes/{nodeid}",
                "POST",
                "Run inference on {netid} with {nodeid} as target and the JSON payload as cases.",
            ),
        ]
        .into_iter()
        .map(|(path, method, description)| ApiRoute {
            path: format!("{base}{path}"),
            method: method.to_string(),
            description: description.to_string(),
        })
        .collect()
    }

    pub fn list_networks(&self) -> Vec<NetworkView> {
        self.registry
            .list_sorted_by_name()
            .iter()
            .map(|n| summary(n))
            .collect()
    }

    pub fn describe_network(&self, net_id: &str) -> Result<NetworkView, ApiError> {
        let network = self.registry.resolve(net_id)?;
        let nodes = node_views(&network)?;
        Ok(NetworkView {
            nodes: Some(nodes),
            ..summary(&network)
        })
    }

    pub fn list_nodes(&self, net_id: &str) -> Result<Vec<NodeView>, ApiError> {
        let network = self.registry.resolve(net_id)?;
        Ok(node_views(&network)?)
    }

    pub fn describe_node(&self, net_id: &str, node_id: &str) -> Result<NodeView, ApiError> {
        let network = self.registry.resolve(net_id)?;
        let view = network.read();
        let node = view.node(node_id)?;
        Ok(node_view(&node)?)
    }

    /// Run a batch. Blocks on the network's write lock once per case.
    pub fn infer(
        &self,
        net_id: &str,
        node_id: &str,
        request: InferRequest,
    ) -> Result<BatchResponse, ApiError> {
        let network = self.registry.resolve(net_id)?;
        let results = batch::run_batch(&network, node_id, &request.cases)?;
        for failed in results.iter().filter(|r| !r.is_ok()) {
            tracing::warn!(
                network = network.name(),
                target = node_id,
                request = %request.id,
                case = failed.index,
                error = %failed.error,
                "case failed"
            );
        }
        Ok(BatchResponse {
            id: request.id,
            results,
        })
    }
}

fn summary(network: &Network) -> NetworkView {
    NetworkView {
        index: network.index(),
        name: network.name().to_string(),
        title: network.title().to_string(),
        comment: network.comment().to_string(),
        nodes: None,
    }
}

fn node_views(network: &Network) -> EngineResult<Vec<NodeView>> {
    let view = network.read();
    view.nodes()?.iter().map(node_view).collect()
}

fn node_view(node: &Node<'_>) -> EngineResult<NodeView> {
    Ok(NodeView {
        index: node.index(),
        name: node.name().to_string(),
        title: node.title()?,
        comment: node.comment()?,
        states: node.states()?,
        levels: Some(node.levels()?).filter(|levels| !levels.is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::enumerate::EnumerationBackend;
    use crate::engine::EngineHandle;

    fn service() -> QueryService {
        let engine = EngineHandle::initialize(Arc::new(EnumerationBackend::new()), None).unwrap();
        let registry = Arc::new(NetworkRegistry::new(engine));
        registry
            .load(crate::network::testing::SPRINKLER.as_bytes(), "sprinkler.toml")
            .unwrap();
        QueryService::new(registry, "/api")
    }

    #[test]
    fn routes_carry_the_prefix() {
        let routes = service().routes();
        assert_eq!(routes.len(), 5);
        assert_eq!(routes[0].path, "/api/nets");
        assert_eq!(routes[4].method, "POST");

        let root = QueryService::new(service().registry().clone(), "/");
        assert_eq!(root.routes()[0].path, "/nets");
    }

    #[test]
    fn listing_omits_nodes() {
        let nets = service().list_networks();
        assert_eq!(nets.len(), 1);
        assert_eq!(nets[0].name, "Sprinkler");
        assert!(nets[0].nodes.is_none());
        let json = serde_json::to_value(&nets[0]).unwrap();
        assert!(json["nodes"].is_null());
    }

    #[test]
    fn network_and_node_resolve_by_name_or_index() {
        let api = service();
        let by_name = api.describe_network("Sprinkler").unwrap();
        let by_index = api.describe_network("0").unwrap();
        assert_eq!(by_name, by_index);
        let nodes = by_name.nodes.unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[1].name, "Rain");

        let rain = api.describe_node("0", "1").unwrap();
        assert_eq!(rain, nodes[1]);
        assert_eq!(rain.states, ["yes", "no"]);
        assert_eq!(rain.levels, None);
        assert_eq!(serde_json::to_value(&rain).unwrap()["levels"], serde_json::Value::Null);

        let depth = api.describe_node("Sprinkler", "Depth").unwrap();
        assert_eq!(depth.levels, Some(vec![0.0, 1.0, 3.0]));
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let api = service();
        assert!(matches!(api.describe_network("Nope"), Err(ApiError::NotFound(_))));
        assert!(matches!(api.list_nodes("9"), Err(ApiError::NotFound(_))));
        assert!(matches!(
            api.describe_node("Sprinkler", "Sun"),
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            api.infer("Sprinkler", "Sun", InferRequest::default()),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn infer_echoes_id_and_aligns_results() {
        let api = service();
        let request: InferRequest = serde_json::from_str(
            r#"{"id": "req-1", "cases": [{"Rain": "yes"}, {"Rain": "sideways"}, {}]}"#,
        )
        .unwrap();
        let response = api.infer("Sprinkler", "Wet", request).unwrap();
        assert_eq!(response.id, "req-1");
        let values: Vec<&str> = response.results.iter().map(|r| r.value.as_str()).collect();
        assert_eq!(values, ["yes", "", "no"]);
        assert!(response.results[1].error.contains("sideways"));
    }
}
