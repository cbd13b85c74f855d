//! Evidence tokens and case entry.
//!
//! Callers submit evidence as free-form strings. A token is read, in order,
//! as a real value, as an explicit state ordinal (`#2`), or as a state name
//! resolved against the node it is entered on. Numeric parsing always wins,
//! so a state literally named `"42"` can only be selected with `#<index>`.

use std::collections::HashMap;

use crate::error::{CaseError, EvidenceError};
use crate::network::NetworkWrite;
use crate::node::NodeMut;

/// Prefix marking a token as an explicit state ordinal.
pub const STATE_INDEX_MARKER: char = '#';

/// One set of findings, keyed by node name, submitted together.
pub type Case = HashMap<String, String>;

/// A parsed evidence token.
#[derive(Debug, Clone, PartialEq)]
pub enum Evidence {
    Value(f64),
    StateIndex(usize),
    StateName(String),
}

impl Evidence {
    pub fn parse(token: &str) -> Self {
        if let Ok(value) = token.parse::<f64>() {
            return Self::Value(value);
        }
        if let Some(index) = token
            .strip_prefix(STATE_INDEX_MARKER)
            .and_then(|rest| rest.parse::<usize>().ok())
        {
            return Self::StateIndex(index);
        }
        Self::StateName(token.to_string())
    }

    /// Enter this evidence on `node`. A failure leaves the node without findings.
    pub fn apply(&self, node: &NodeMut<'_>) -> Result<(), EvidenceError> {
        match self {
            Self::Value(value) => node.enter_value(*value),
            Self::StateIndex(index) => node.enter_state(*index),
            Self::StateName(name) => {
                let index = node.state_index(name).inspect_err(|_| {
                    if let Err(e) = node.clear_findings() {
                        tracing::warn!(node = node.name(), error = %e, "failed to retract findings");
                    }
                })?;
                node.enter_state(index)
            }
        }
    }
}

impl std::fmt::Display for Evidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{v}"),
            Self::StateIndex(i) => write!(f, "{STATE_INDEX_MARKER}{i}"),
            Self::StateName(name) => f.write_str(name),
        }
    }
}

impl NetworkWrite<'_> {
    /// Enter every piece of evidence in `case` whose key names a node.
    ///
    /// On the first failure all findings on the network are retracted, not
    /// only those of the failing node. Keys that match no node are ignored.
    pub fn enter_case(&self, case: &Case) -> Result<(), CaseError> {
        let mut matched = 0;
        for node in self.nodes()? {
            let Some(token) = case.get(node.name()) else {
                continue;
            };
            matched += 1;
            if let Err(source) = Evidence::parse(token).apply(&node) {
                if let Err(e) = self.clear_findings() {
                    tracing::warn!(network = self.network().name(), error = %e, "failed to retract case findings");
                }
                return Err(CaseError::Evidence {
                    node: node.name().to_string(),
                    token: token.clone(),
                    source,
                });
            }
        }
        if matched < case.len() {
            tracing::debug!(
                network = self.network().name(),
                ignored = case.len() - matched,
                "case names nodes the network does not define"
            );
        }
        Ok(())
    }
}
