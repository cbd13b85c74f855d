//! Network definitions for the reference backend.
//!
//! A definition is a TOML document:
//!
//! ```toml
//! name = "Weather"
//! title = "Toy weather model"
//!
//! [[node]]
//! name = "Cloudy"
//! states = ["yes", "no"]
//! probs = [[0.4, 0.6]]
//!
//! [[node]]
//! name = "Rainfall"
//! kind = "continuous"
//! levels = [0.0, 5.0, 20.0]
//! parents = ["Cloudy"]
//! probs = [[0.3, 0.7], [0.9, 0.1]]
//! ```
//!
//! Continuous nodes are discretized by their `levels`: `n + 1` ascending
//! boundaries give `n` interval states. `probs` holds one row per parent
//! configuration, with the last parent varying fastest.

use std::collections::{HashMap, HashSet};

use petgraph::graphmap::DiGraphMap;
use serde::Deserialize;

use super::NodeKind;

/// Upper bound on the joint state space the enumeration engine accepts.
pub const MAX_JOINT_STATES: usize = 1 << 20;

/// Parsed but not yet compiled network definition.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkDef {
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default, rename = "node")]
    pub nodes: Vec<NodeDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeDef {
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default = "default_kind")]
    pub kind: NodeKind,
    #[serde(default)]
    pub states: Vec<String>,
    #[serde(default)]
    pub levels: Option<Vec<f64>>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub probs: Vec<Vec<f64>>,
}

fn default_kind() -> NodeKind {
    NodeKind::Discrete
}

impl NodeDef {
    /// Number of states, counting the intervals of a continuous node.
    pub fn state_count(&self) -> usize {
        match self.kind {
            NodeKind::Discrete => self.states.len(),
            NodeKind::Continuous => match &self.levels {
                Some(levels) if levels.len() > 1 => levels.len() - 1,
                _ => 0,
            },
        }
    }

    /// Name of state `index`, empty for unnamed interval states.
    pub fn state_name(&self, index: usize) -> String {
        self.states.get(index).cloned().unwrap_or_default()
    }

    /// Map a real value onto the state it selects, if any.
    pub fn state_for_value(&self, value: f64) -> Option<usize> {
        let levels = self.levels.as_ref()?;
        if !value.is_finite() {
            return None;
        }
        match self.kind {
            NodeKind::Discrete => levels.iter().position(|&l| l == value),
            NodeKind::Continuous => {
                let last = levels.len().checked_sub(1)?;
                if value < levels[0] || value > levels[last] {
                    return None;
                }
                if value == levels[last] {
                    return last.checked_sub(1);
                }
                levels.windows(2).position(|w| w[0] <= value && value < w[1])
            }
        }
    }

    /// Belief-weighted mean and standard deviation.
    ///
    /// `None` without levels, or when an interval is unbounded.
    pub fn expectation(&self, beliefs: &[f64]) -> Option<(f64, f64)> {
        let levels = self.levels.as_ref()?;
        let (points, widths): (Vec<f64>, Vec<f64>) = match self.kind {
            NodeKind::Discrete => (levels.clone(), vec![0.0; levels.len()]),
            NodeKind::Continuous => levels
                .windows(2)
                .map(|w| ((w[0] + w[1]) / 2.0, w[1] - w[0]))
                .unzip(),
        };
        if points.len() != beliefs.len() || points.is_empty() {
            return None;
        }
        let mean: f64 = beliefs.iter().zip(&points).map(|(b, x)| b * x).sum();
        let variance: f64 = beliefs
            .iter()
            .zip(points.iter().zip(&widths))
            .map(|(b, (x, w))| b * ((x - mean).powi(2) + w * w / 12.0))
            .sum();
        // An unbounded interval leaves the estimate undefined.
        if !mean.is_finite() || !variance.is_finite() {
            return None;
        }
        Some((mean, variance.max(0.0).sqrt()))
    }
}

/// Parse raw bytes into a definition. Only syntax and node-local shape are
/// checked here; structure is checked by [`compile`].
pub fn parse(bytes: &[u8]) -> Result<NetworkDef, String> {
    let text = std::str::from_utf8(bytes).map_err(|e| format!("not valid UTF-8: {e}"))?;
    let def: NetworkDef = toml::from_str(text).map_err(|e| e.message().to_string())?;

    if def.name.trim().is_empty() {
        return Err("network name cannot be empty".into());
    }
    let mut seen = HashSet::new();
    for node in &def.nodes {
        if node.name.trim().is_empty() {
            return Err("node name cannot be empty".into());
        }
        if !seen.insert(node.name.as_str()) {
            return Err(format!("node {} defined twice", node.name));
        }
        let mut names = HashSet::new();
        for state in node.states.iter().filter(|s| !s.is_empty()) {
            if !names.insert(state.as_str()) {
                return Err(format!("state {state} defined twice for node {}", node.name));
            }
        }
    }
    Ok(def)
}

/// A node ready for enumeration.
#[derive(Debug, Clone)]
pub struct CompiledNode {
    pub cardinality: usize,
    pub parents: Vec<usize>,
    /// Normalized conditional probability rows.
    pub table: Vec<Vec<f64>>,
}

impl CompiledNode {
    /// Index of the table row selected by the parents' states in `assignment`.
    fn row(&self, assignment: &[usize], cards: &[usize]) -> usize {
        self.parents
            .iter()
            .fold(0, |acc, &p| acc * cards[p] + assignment[p])
    }
}

/// A compiled network: every node has a valid table and the graph is acyclic.
#[derive(Debug, Clone)]
pub struct CompiledNet {
    pub nodes: Vec<CompiledNode>,
}

/// Check structure and normalize tables.
pub fn compile(def: &NetworkDef) -> Result<CompiledNet, String> {
    let index: HashMap<&str, usize> = def
        .nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.name.as_str(), i))
        .collect();

    let mut nodes = Vec::with_capacity(def.nodes.len());
    let mut joint: usize = 1;
    for node in &def.nodes {
        check_domain(node)?;
        let cardinality = node.state_count();
        joint = joint
            .checked_mul(cardinality)
            .filter(|&j| j <= MAX_JOINT_STATES)
            .ok_or_else(|| {
                format!("joint state space exceeds {MAX_JOINT_STATES} configurations")
            })?;

        let mut parents = Vec::with_capacity(node.parents.len());
        for parent in &node.parents {
            let &p = index
                .get(parent.as_str())
                .ok_or_else(|| format!("node {} has undefined parent {parent}", node.name))?;
            if parents.contains(&p) {
                return Err(format!("node {} lists parent {parent} twice", node.name));
            }
            parents.push(p);
        }
        nodes.push(CompiledNode {
            cardinality,
            parents,
            table: Vec::new(),
        });
    }

    check_acyclic(def, &nodes)?;

    let cards: Vec<usize> = nodes.iter().map(|n| n.cardinality).collect();
    for (i, node) in def.nodes.iter().enumerate() {
        let rows: usize = nodes[i].parents.iter().map(|&p| cards[p]).product();
        if node.probs.len() != rows {
            return Err(format!(
                "node {} needs {rows} probability rows, found {}",
                node.name,
                node.probs.len()
            ));
        }
        let mut table = Vec::with_capacity(rows);
        for (r, row) in node.probs.iter().enumerate() {
            if row.len() != cards[i] {
                return Err(format!(
                    "node {} row {r} has {} entries, expected {}",
                    node.name,
                    row.len(),
                    cards[i]
                ));
            }
            if row.iter().any(|p| !p.is_finite() || *p < 0.0) {
                return Err(format!("node {} row {r} has an invalid probability", node.name));
            }
            let sum: f64 = row.iter().sum();
            if sum <= 0.0 {
                return Err(format!("node {} row {r} sums to zero", node.name));
            }
            table.push(row.iter().map(|p| p / sum).collect());
        }
        nodes[i].table = table;
    }

    Ok(CompiledNet { nodes })
}

fn check_domain(node: &NodeDef) -> Result<(), String> {
    match node.kind {
        NodeKind::Discrete => {
            if node.states.is_empty() {
                return Err(format!("discrete node {} has no states", node.name));
            }
            if let Some(levels) = &node.levels {
                if levels.len() != node.states.len() {
                    return Err(format!(
                        "discrete node {} has {} levels for {} states",
                        node.name,
                        levels.len(),
                        node.states.len()
                    ));
                }
                if levels.iter().any(|l| !l.is_finite()) {
                    return Err(format!("node {} has a non-finite level", node.name));
                }
            }
        }
        NodeKind::Continuous => {
            let Some(levels) = node.levels.as_ref().filter(|l| l.len() > 1) else {
                return Err(format!("continuous node {} is not discretized", node.name));
            };
            // Strictly ascending, so only the outer bounds can be infinite.
            if levels.iter().any(|l| l.is_nan()) || levels.windows(2).any(|w| w[0] >= w[1]) {
                return Err(format!(
                    "continuous node {} levels must be strictly ascending",
                    node.name
                ));
            }
            if !node.states.is_empty() && node.states.len() != levels.len() - 1 {
                return Err(format!(
                    "continuous node {} names {} states for {} intervals",
                    node.name,
                    node.states.len(),
                    levels.len() - 1
                ));
            }
        }
    }
    Ok(())
}

fn check_acyclic(def: &NetworkDef, nodes: &[CompiledNode]) -> Result<(), String> {
    let mut graph: DiGraphMap<usize, ()> = DiGraphMap::with_capacity(nodes.len(), 0);
    for i in 0..nodes.len() {
        graph.add_node(i);
    }
    for (i, node) in nodes.iter().enumerate() {
        for &p in &node.parents {
            graph.add_edge(p, i, ());
        }
    }
    petgraph::algo::toposort(&graph, None)
        .map(|_| ())
        .map_err(|cycle| format!("directed cycle through node {}", def.nodes[cycle.node_id()].name))
}

impl CompiledNet {
    /// Posterior marginals of every node given per-node state evidence.
    ///
    /// Returns `None` when the evidence has zero probability.
    pub fn posterior(&self, evidence: &[Option<usize>]) -> Option<Vec<Vec<f64>>> {
        let cards: Vec<usize> = self.nodes.iter().map(|n| n.cardinality).collect();
        let mut marginals: Vec<Vec<f64>> = cards.iter().map(|&c| vec![0.0; c]).collect();
        if cards.iter().any(|&c| c == 0) {
            return None;
        }

        let mut assignment: Vec<usize> = evidence.iter().map(|e| e.unwrap_or(0)).collect();
        let mut total = 0.0;
        loop {
            let weight: f64 = self
                .nodes
                .iter()
                .enumerate()
                .map(|(i, n)| n.table[n.row(&assignment, &cards)][assignment[i]])
                .product();
            if weight > 0.0 {
                total += weight;
                for (i, &s) in assignment.iter().enumerate() {
                    marginals[i][s] += weight;
                }
            }
            if !advance(&mut assignment, &cards, evidence) {
                break;
            }
        }

        if total <= 0.0 {
            return None;
        }
        for row in &mut marginals {
            for p in row.iter_mut() {
                *p /= total;
            }
        }
        Some(marginals)
    }
}

/// Step an odometer over the free (unobserved) positions.
fn advance(assignment: &mut [usize], cards: &[usize], evidence: &[Option<usize>]) -> bool {
    for i in (0..assignment.len()).rev() {
        if evidence[i].is_some() {
            continue;
        }
        assignment[i] += 1;
        if assignment[i] < cards[i] {
            return true;
        }
        assignment[i] = 0;
    }
    false
}
