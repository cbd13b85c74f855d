//! Loaded networks and their locking discipline.
//!
//! A [`Network`] is the registry's record for one compiled model. It owns the
//! reader/writer lock that guards the engine-side findings of that model:
//!
//! - [`Network::read`] gives a [`NetworkRead`] view for belief, state and
//!   level queries; any number may be held at once.
//! - [`Network::write`] gives an exclusive [`NetworkWrite`] view, the only
//!   place where findings can be entered or retracted.
//!
//! Node handles borrow from a view, so they cannot outlive the lock that makes
//! them safe to use.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::backend::{Finding, InferenceBackend, NetId, NodeId};
use crate::engine::{EngineHandle, EngineResult};
use crate::error::{EngineError, LookupError};
use crate::node::{Node, NodeMut};

/// Name and engine identity of one node, kept in name order.
#[derive(Debug, Clone)]
pub(crate) struct NodeEntry {
    pub(crate) name: String,
    pub(crate) id: NodeId,
}

/// One loaded, compiled network.
pub struct Network {
    index: usize,
    name: String,
    title: String,
    comment: String,
    source_name: String,
    net: NetId,
    /// Nodes sorted by name; a node's ordinal is its position here.
    directory: Vec<NodeEntry>,
    engine: Arc<EngineHandle>,
    lock: RwLock<()>,
    closed: AtomicBool,
}

impl Network {
    /// Build the record for a network the engine has already compiled.
    ///
    /// The index stays 0 until the registry assigns a slot.
    pub(crate) fn open(engine: Arc<EngineHandle>, net: NetId, source_name: &str) -> EngineResult<Self> {
        let (name, title, comment, mut directory) = engine.call("describe network", |b| {
            let directory: Vec<NodeEntry> = b
                .net_nodes(net)
                .into_iter()
                .map(|id| NodeEntry {
                    name: b.node_name(net, id),
                    id,
                })
                .collect();
            (b.net_name(net), b.net_title(net), b.net_comment(net), directory)
        })?;
        directory.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(Self {
            index: 0,
            name,
            title,
            comment,
            source_name: source_name.to_string(),
            net,
            directory,
            engine,
            lock: RwLock::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Stable 0-based ordinal assigned at load.
    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// Display name of the source the network was loaded from.
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn node_count(&self) -> usize {
        self.directory.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Shared view for queries that do not touch findings.
    pub fn read(&self) -> NetworkRead<'_> {
        NetworkRead {
            network: self,
            _guard: self.lock.read().expect("network lock poisoned"),
        }
    }

    /// Exclusive view for entering and retracting findings.
    pub fn write(&self) -> NetworkWrite<'_> {
        NetworkWrite {
            network: self,
            _guard: self.lock.write().expect("network lock poisoned"),
        }
    }

    /// Release the engine-side network. Waits for every view to be dropped.
    pub(crate) fn close(&self) -> EngineResult<()> {
        let _guard = self.lock.write().expect("network lock poisoned");
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(self.closed_error());
        }
        let net = self.net;
        self.engine.call("delete network", |b| b.delete_net(net))
    }

    /// Invoke the engine on this network, refusing once it has been closed.
    pub(crate) fn call<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&dyn InferenceBackend, NetId) -> T,
    ) -> EngineResult<T> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        let net = self.net;
        self.engine.call(operation, |b| f(b, net))
    }

    fn closed_error(&self) -> EngineError {
        EngineError::NetworkClosed {
            name: self.name.clone(),
        }
    }

    /// Resolve a node by name, or by its ordinal in the name-sorted list.
    fn entry(&self, id: &str) -> Result<(usize, &NodeEntry), LookupError> {
        if self.is_closed() {
            return Err(self.closed_error().into());
        }
        if let Ok(pos) = self.directory.binary_search_by(|e| e.name.as_str().cmp(id)) {
            return Ok((pos, &self.directory[pos]));
        }
        id.parse::<usize>()
            .ok()
            .and_then(|pos| self.directory.get(pos).map(|e| (pos, e)))
            .ok_or_else(|| LookupError::NodeNotFound {
                network: self.name.clone(),
                id: id.to_string(),
            })
    }

    fn node(&self, id: &str) -> Result<Node<'_>, LookupError> {
        let (pos, entry) = self.entry(id)?;
        Ok(Node::new(self, pos, entry))
    }

    fn nodes(&self) -> EngineResult<Vec<Node<'_>>> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        Ok(self
            .directory
            .iter()
            .enumerate()
            .map(|(pos, entry)| Node::new(self, pos, entry))
            .collect())
    }

    /// Current findings keyed by node name, in name order.
    fn findings(&self) -> EngineResult<Vec<(String, Finding)>> {
        self.call("list findings", |b, net| {
            self.directory
                .iter()
                .filter_map(|e| b.node_finding(net, e.id).map(|f| (e.name.clone(), f)))
                .collect()
        })
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("nodes", &self.directory.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Shared, read-only view of a network.
pub struct NetworkRead<'a> {
    network: &'a Network,
    _guard: RwLockReadGuard<'a, ()>,
}

impl NetworkRead<'_> {
    pub fn network(&self) -> &Network {
        self.network
    }

    /// Look up a node by name or ordinal.
    pub fn node(&self, id: &str) -> Result<Node<'_>, LookupError> {
        self.network.node(id)
    }

    /// All nodes, sorted by name.
    pub fn nodes(&self) -> EngineResult<Vec<Node<'_>>> {
        self.network.nodes()
    }

    pub fn findings(&self) -> EngineResult<Vec<(String, Finding)>> {
        self.network.findings()
    }
}

/// Exclusive view of a network; the only way to mutate findings.
pub struct NetworkWrite<'a> {
    network: &'a Network,
    _guard: RwLockWriteGuard<'a, ()>,
}

impl NetworkWrite<'_> {
    pub fn network(&self) -> &Network {
        self.network
    }

    pub fn node(&self, id: &str) -> Result<NodeMut<'_>, LookupError> {
        self.network.node(id).map(NodeMut::new)
    }

    pub fn nodes(&self) -> EngineResult<Vec<NodeMut<'_>>> {
        Ok(self.network.nodes()?.into_iter().map(NodeMut::new).collect())
    }

    pub fn findings(&self) -> EngineResult<Vec<(String, Finding)>> {
        self.network.findings()
    }

    /// Retract every finding in the network.
    pub fn clear_findings(&self) -> EngineResult<()> {
        self.network
            .call("retract network findings", |b, net| b.retract_net_findings(net))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::backend::enumerate::EnumerationBackend;

    /// Load and compile `source` on a fresh engine, outside any registry.
    pub(crate) fn open(source: &str) -> Network {
        let engine = EngineHandle::initialize(Arc::new(EnumerationBackend::new()), None).unwrap();
        let net = engine
            .call("load", |b| {
                let net = b.read_net("test", source.as_bytes())?;
                b.compile_net(net);
                b.set_auto_update(net, false);
                Some(net)
            })
            .unwrap()
            .unwrap();
        Network::open(engine, net, "test").unwrap()
    }

    pub(crate) const SPRINKLER: &str = r#"
name = "Sprinkler"
title = "Lawn"
comment = "Why is the grass wet?"

[[node]]
name = "Rain"
title = "It rained"
states = ["yes", "no"]
probs = [[0.2, 0.8]]

[[node]]
name = "Wet"
states = ["yes", "no"]
parents = ["Rain"]
probs = [[0.9, 0.1], [0.1, 0.9]]

[[node]]
name = "Depth"
kind = "continuous"
levels = [0.0, 1.0, 3.0]
parents = ["Rain"]
probs = [[0.5, 0.5], [1.0, 0.0]]
"#;
}
