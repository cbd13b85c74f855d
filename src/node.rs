//! Node accessors.
//!
//! [`Node`] answers metadata and belief queries; [`NodeMut`] adds the
//! operations that enter or retract findings. Both borrow a network view, so
//! the lock that protects the network's findings is held for as long as the
//! accessor lives.

use std::ops::Deref;

use crate::backend::{Finding, NodeId, NodeKind};
use crate::engine::EngineResult;
use crate::error::{EvidenceError, InferError};
use crate::evidence::STATE_INDEX_MARKER;
use crate::network::{Network, NodeEntry};

/// Read-only handle to one node of a locked network.
#[derive(Clone)]
pub struct Node<'a> {
    network: &'a Network,
    index: usize,
    name: &'a str,
    id: NodeId,
}

impl<'a> Node<'a> {
    pub(crate) fn new(network: &'a Network, index: usize, entry: &'a NodeEntry) -> Self {
        Self {
            network,
            index,
            name: &entry.name,
            id: entry.id,
        }
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    /// Ordinal of the node in its network's name-sorted node list.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn network(&self) -> &'a Network {
        self.network
    }

    pub fn title(&self) -> EngineResult<String> {
        let id = self.id;
        self.network.call("node title", |b, net| b.node_title(net, id))
    }

    pub fn comment(&self) -> EngineResult<String> {
        let id = self.id;
        self.network.call("node comment", |b, net| b.node_comment(net, id))
    }

    pub fn kind(&self) -> EngineResult<NodeKind> {
        let id = self.id;
        self.network.call("node kind", |b, net| b.node_kind(net, id))
    }

    pub fn state_count(&self) -> EngineResult<usize> {
        let id = self.id;
        self.network.call("state count", |b, net| b.state_count(net, id))
    }

    /// State names in state order. Unnamed states appear as empty strings.
    pub fn states(&self) -> EngineResult<Vec<String>> {
        let id = self.id;
        self.network.call("node states", |b, net| {
            (0..b.state_count(net, id))
                .map(|s| b.state_name(net, id, s))
                .collect()
        })
    }

    /// Numeric levels; empty when the node defines none.
    pub fn levels(&self) -> EngineResult<Vec<f64>> {
        let id = self.id;
        self.network
            .call("node levels", |b, net| b.node_levels(net, id).unwrap_or_default())
    }

    /// Index of the state called `state`.
    pub fn state_index(&self, state: &str) -> Result<usize, EvidenceError> {
        let id = self.id;
        self.network
            .call("state lookup", |b, net| b.state_named(net, id, state))?
            .ok_or_else(|| EvidenceError::UnknownState {
                node: self.name.to_string(),
                state: state.to_string(),
            })
    }

    /// The finding currently entered on this node, if any.
    pub fn finding(&self) -> EngineResult<Option<Finding>> {
        let id = self.id;
        self.network.call("node finding", |b, net| b.node_finding(net, id))
    }

    /// Posterior probability of each state given the current findings.
    pub fn beliefs(&self) -> EngineResult<Vec<f64>> {
        let id = self.id;
        self.network.call("node beliefs", |b, net| b.beliefs(net, id))
    }

    /// Index of the most probable state; ties go to the lowest index.
    pub fn most_likely_state(&self) -> Result<usize, InferError> {
        let beliefs = self.beliefs()?;
        most_likely(&beliefs).ok_or_else(|| InferError::NoStates {
            node: self.name.to_string(),
        })
    }

    /// Expected value and standard deviation under the current findings.
    pub fn expected_value(&self) -> Result<(f64, f64), InferError> {
        let id = self.id;
        self.network
            .call("expected value", |b, net| b.expected_value(net, id))?
            .ok_or_else(|| InferError::UndefinedValue {
                node: self.name.to_string(),
            })
    }

    /// Point prediction for this node as a string.
    ///
    /// The expected value when one is defined, otherwise the name of the most
    /// likely state, or `#<index>` when that state is unnamed.
    pub fn infer(&self) -> Result<String, InferError> {
        match self.expected_value() {
            Ok((value, _)) => return Ok(format_value(value)),
            Err(InferError::UndefinedValue { .. }) => {}
            Err(e) => return Err(e),
        }
        let state = self.most_likely_state()?;
        let id = self.id;
        let name = self
            .network
            .call("state name", |b, net| b.state_name(net, id, state))?;
        if name.is_empty() {
            Ok(format!("{STATE_INDEX_MARKER}{state}"))
        } else {
            Ok(name)
        }
    }
}

/// Shortest exact exponent form with a signed, two-digit exponent: `2.4E+01`.
pub fn format_value(value: f64) -> String {
    let rendered = format!("{value:E}");
    let Some((mantissa, exponent)) = rendered.split_once('E') else {
        return rendered;
    };
    let Ok(exponent) = exponent.parse::<i32>() else {
        return rendered;
    };
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{mantissa}E{sign}{:02}", exponent.unsigned_abs())
}

impl std::fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("network", &self.network.name())
            .field("index", &self.index)
            .field("name", &self.name)
            .finish()
    }
}

/// First index holding the maximum belief, `None` for an empty slice.
pub fn most_likely(beliefs: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &p) in beliefs.iter().enumerate() {
        match best {
            Some((_, q)) if p <= q => {}
            _ => best = Some((i, p)),
        }
    }
    best.map(|(i, _)| i)
}

/// Node handle obtained through a write view; may change findings.
#[derive(Debug, Clone)]
pub struct NodeMut<'a> {
    node: Node<'a>,
}

impl<'a> NodeMut<'a> {
    pub(crate) fn new(node: Node<'a>) -> Self {
        Self { node }
    }

    /// Enter a state finding. On failure the node's findings are retracted.
    pub fn enter_state(&self, state: usize) -> Result<(), EvidenceError> {
        let count = self.state_count()?;
        if state >= count {
            self.roll_back();
            return Err(EvidenceError::StateOutOfRange {
                node: self.name().to_string(),
                index: state,
                count,
            });
        }
        let id = self.id;
        self.network
            .call("enter finding", |b, net| b.enter_finding(net, id, state))
            .map_err(|e| {
                self.roll_back();
                e.into()
            })
    }

    /// Enter a real-valued finding. On failure the node's findings are retracted.
    pub fn enter_value(&self, value: f64) -> Result<(), EvidenceError> {
        let id = self.id;
        self.network
            .call("enter value", |b, net| b.enter_value(net, id, value))
            .map_err(|e| {
                self.roll_back();
                e.into()
            })
    }

    /// Retract every finding on this node.
    pub fn clear_findings(&self) -> EngineResult<()> {
        let id = self.id;
        self.network
            .call("retract node findings", |b, net| b.retract_node_findings(net, id))
    }

    fn roll_back(&self) {
        if let Err(e) = self.clear_findings() {
            tracing::warn!(node = self.name(), error = %e, "failed to retract findings after a rejected entry");
        }
    }
}

impl<'a> Deref for NodeMut<'a> {
    type Target = Node<'a>;

    fn deref(&self) -> &Node<'a> {
        &self.node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::testing::{SPRINKLER, open};

    #[test]
    fn most_likely_takes_first_maximum() {
        assert_eq!(most_likely(&[0.2, 0.5, 0.3]), Some(1));
        assert_eq!(most_likely(&[0.4, 0.2, 0.4]), Some(0));
        assert_eq!(most_likely(&[]), None);
    }

    #[test]
    fn values_render_with_signed_two_digit_exponent() {
        assert_eq!(format_value(0.5), "5E-01");
        assert_eq!(format_value(24.0), "2.4E+01");
        assert_eq!(format_value(42.7), "4.27E+01");
        assert_eq!(format_value(1.0), "1E+00");
        assert_eq!(format_value(-3.25e-7), "-3.25E-07");
        assert_eq!(format_value(1e100), "1E+100");
    }

    #[test]
    fn metadata_and_domain() {
        let network = open(SPRINKLER);
        let view = network.read();
        let rain = view.node("Rain").unwrap();
        assert_eq!(rain.title().unwrap(), "It rained");
        assert_eq!(rain.kind().unwrap(), NodeKind::Discrete);
        assert_eq!(rain.states().unwrap(), ["yes", "no"]);
        assert!(rain.levels().unwrap().is_empty());

        let depth = view.node("Depth").unwrap();
        assert_eq!(depth.kind().unwrap(), NodeKind::Continuous);
        assert_eq!(depth.states().unwrap(), ["", ""]);
        assert_eq!(depth.levels().unwrap(), [0.0, 1.0, 3.0]);
    }

    #[test]
    fn beliefs_follow_findings() {
        let network = open(SPRINKLER);
        let view = network.write();
        let prior = view.node("Wet").unwrap().beliefs().unwrap();
        assert!((prior[0] - 0.26).abs() < 1e-9);

        view.node("Rain").unwrap().enter_state(0).unwrap();
        let wet = view.node("Wet").unwrap();
        assert!((wet.beliefs().unwrap()[0] - 0.9).abs() < 1e-9);
        assert_eq!(wet.most_likely_state().unwrap(), 0);
    }

    #[test]
    fn infer_falls_back_to_state_name() {
        let network = open(SPRINKLER);
        let view = network.read();
        let rain = view.node("Rain").unwrap();
        assert!(matches!(
            rain.expected_value(),
            Err(InferError::UndefinedValue { .. })
        ));
        assert_eq!(rain.infer().unwrap(), "no");
    }

    #[test]
    fn infer_renders_expected_value() {
        let network = open(SPRINKLER);
        let view = network.write();
        view.node("Rain").unwrap().enter_state(1).unwrap();
        // Depth is certainly in [0, 1): mean 0.5.
        assert_eq!(view.node("Depth").unwrap().infer().unwrap(), "5E-01");
    }

    #[test]
    fn state_out_of_range_rolls_back_the_node() {
        let network = open(SPRINKLER);
        let view = network.write();
        let rain = view.node("Rain").unwrap();
        rain.enter_state(0).unwrap();
        let err = rain.enter_state(5).unwrap_err();
        assert!(matches!(
            err,
            EvidenceError::StateOutOfRange { index: 5, count: 2, .. }
        ));
        assert_eq!(rain.finding().unwrap(), None);
    }

    #[test]
    fn rejected_value_rolls_back_the_node() {
        let network = open(SPRINKLER);
        let view = network.write();
        let depth = view.node("Depth").unwrap();
        depth.enter_value(2.0).unwrap();
        assert_eq!(depth.finding().unwrap(), Some(Finding::Value(2.0)));
        assert!(depth.enter_value(50.0).is_err());
        assert_eq!(depth.finding().unwrap(), None);
    }

    #[test]
    fn unknown_state_name() {
        let network = open(SPRINKLER);
        let view = network.read();
        let err = view.node("Rain").unwrap().state_index("maybe").unwrap_err();
        assert_eq!(
            err.to_string(),
            "state \"maybe\" not defined for node \"Rain\""
        );
    }
}
