//! The inference engine seen as an opaque capability.
//!
//! bnserve never computes probabilities itself. Everything it knows about a
//! network comes through [`InferenceBackend`], a narrow C-style interface:
//! calls return plain values and report failures into a diagnostics channel
//! that the caller drains afterwards (see [`crate::engine::EngineHandle`]).
//! Any concrete engine can sit behind it; [`enumerate::EnumerationBackend`]
//! is the reference implementation shipped with the crate.

pub mod enumerate;
pub mod model;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Engine-side identity of a loaded network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetId(pub u64);

/// Engine-side identity of a node within its network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Domain type of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Discrete,
    Continuous,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discrete => write!(f, "discrete"),
            Self::Continuous => write!(f, "continuous"),
        }
    }
}

/// A finding currently entered on a node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Finding {
    /// A specific state is known.
    State(usize),
    /// A real value is known.
    Value(f64),
}

/// One error report from the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineDiagnostic {
    pub code: i32,
    pub message: String,
}

impl EngineDiagnostic {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for EngineDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.code, self.message)
    }
}

/// Narrow interface to an inference engine.
///
/// Apart from [`start`](Self::start) and [`stop`](Self::stop), methods never
/// fail directly: problems are queued as [`EngineDiagnostic`]s and collected by
/// [`drain_errors`](Self::drain_errors). Return values of a call that queued a
/// diagnostic are unspecified.
pub trait InferenceBackend: Send + Sync {
    /// Bring the engine up. May block for a long time on rejected licenses.
    fn start(&self, license: Option<&str>) -> Result<String, EngineDiagnostic>;

    /// Tear the engine down, releasing every network.
    fn stop(&self) -> Result<(), EngineDiagnostic>;

    /// Return and clear every diagnostic queued since the previous drain.
    fn drain_errors(&self) -> Vec<EngineDiagnostic>;

    /// Parse a network definition streamed in as raw bytes.
    fn read_net(&self, stream_name: &str, bytes: &[u8]) -> Option<NetId>;
    fn compile_net(&self, net: NetId);
    fn delete_net(&self, net: NetId);
    /// Enable or disable recomputation of beliefs on every finding change.
    fn set_auto_update(&self, net: NetId, enabled: bool);
    fn retract_net_findings(&self, net: NetId);

    fn net_name(&self, net: NetId) -> String;
    fn net_title(&self, net: NetId) -> String;
    fn net_comment(&self, net: NetId) -> String;
    /// Nodes of the network in definition order.
    fn net_nodes(&self, net: NetId) -> Vec<NodeId>;
    fn node_named(&self, net: NetId, name: &str) -> Option<NodeId>;

    fn node_name(&self, net: NetId, node: NodeId) -> String;
    fn node_title(&self, net: NetId, node: NodeId) -> String;
    fn node_comment(&self, net: NetId, node: NodeId) -> String;
    fn node_kind(&self, net: NetId, node: NodeId) -> NodeKind;
    fn state_count(&self, net: NetId, node: NodeId) -> usize;
    /// Name of a state; empty when the state is unnamed.
    fn state_name(&self, net: NetId, node: NodeId, state: usize) -> String;
    fn state_named(&self, net: NetId, node: NodeId, name: &str) -> Option<usize>;
    /// Numeric levels of the node, `None` when none are defined.
    fn node_levels(&self, net: NetId, node: NodeId) -> Option<Vec<f64>>;

    fn enter_finding(&self, net: NetId, node: NodeId, state: usize);
    fn enter_value(&self, net: NetId, node: NodeId, value: f64);
    fn retract_node_findings(&self, net: NetId, node: NodeId);
    fn node_finding(&self, net: NetId, node: NodeId) -> Option<Finding>;

    /// Posterior distribution over the node's states given current findings.
    fn beliefs(&self, net: NetId, node: NodeId) -> Vec<f64>;
    /// Expected value and standard deviation, `None` when undefined.
    fn expected_value(&self, net: NetId, node: NodeId) -> Option<(f64, f64)>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_display_matches_report_format() {
        let d = EngineDiagnostic::new(4, "state index out of range");
        assert_eq!(d.to_string(), "4 - state index out of range");
    }

    #[test]
    fn node_kind_serializes_lowercase() {
        let json = serde_json::to_string(&NodeKind::Continuous).unwrap();
        assert_eq!(json, "\"continuous\"");
    }
}
