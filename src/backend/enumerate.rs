//! Reference inference backend: exact inference by joint enumeration.
//!
//! Suitable for the small and medium networks a serving deployment usually
//! hosts. Networks live in a `DashMap` keyed by [`NetId`], so calls on
//! different networks do not contend; every failure is queued on the shared
//! diagnostics channel and picked up by the engine handle's drain.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;

use super::model::{self, CompiledNet, NetworkDef, NodeDef};
use super::{EngineDiagnostic, Finding, InferenceBackend, NetId, NodeId, NodeKind};

pub const ERR_NOT_STARTED: i32 = 1;
pub const ERR_NO_SUCH_NET: i32 = 2;
pub const ERR_PARSE: i32 = 3;
pub const ERR_COMPILE: i32 = 4;
pub const ERR_NO_SUCH_NODE: i32 = 5;
pub const ERR_STATE_RANGE: i32 = 6;
pub const ERR_BAD_VALUE: i32 = 7;
pub const ERR_INCONSISTENT: i32 = 8;
pub const ERR_NOT_COMPILED: i32 = 9;

/// Per-network engine state.
struct NetState {
    def: NetworkDef,
    compiled: Option<CompiledNet>,
    findings: Vec<Option<(usize, Finding)>>,
    auto_update: bool,
    /// Cached marginals for the current findings; `Some(None)` marks
    /// inconsistent evidence.
    posterior: Option<Option<Vec<Vec<f64>>>>,
}

impl NetState {
    fn node(&self, node: NodeId) -> Result<&NodeDef, EngineDiagnostic> {
        self.def.nodes.get(node.0 as usize).ok_or_else(|| {
            EngineDiagnostic::new(
                ERR_NO_SUCH_NODE,
                format!("node {} does not exist in network {}", node.0, self.def.name),
            )
        })
    }

    fn set_finding(&mut self, node: NodeId, entry: Option<(usize, Finding)>) {
        self.findings[node.0 as usize] = entry;
        self.posterior = None;
    }

    /// Compute (or reuse) marginals for the current findings.
    fn refresh(&mut self) -> Result<&[Vec<f64>], EngineDiagnostic> {
        if self.posterior.is_none() {
            let compiled = self.compiled.as_ref().ok_or_else(|| {
                EngineDiagnostic::new(
                    ERR_NOT_COMPILED,
                    format!("network {} has not been compiled", self.def.name),
                )
            })?;
            let evidence: Vec<Option<usize>> =
                self.findings.iter().map(|f| f.map(|(s, _)| s)).collect();
            self.posterior = Some(compiled.posterior(&evidence));
        }
        match &self.posterior {
            Some(Some(marginals)) => Ok(marginals.as_slice()),
            _ => Err(EngineDiagnostic::new(
                ERR_INCONSISTENT,
                format!("findings in network {} are inconsistent", self.def.name),
            )),
        }
    }

    fn after_finding_change(&mut self) -> Result<(), EngineDiagnostic> {
        if self.auto_update && self.compiled.is_some() {
            self.refresh()?;
        }
        Ok(())
    }
}

/// Exact enumeration engine.
pub struct EnumerationBackend {
    started: AtomicBool,
    next_id: AtomicU64,
    nets: DashMap<NetId, NetState>,
    errors: Mutex<Vec<EngineDiagnostic>>,
}

impl EnumerationBackend {
    pub fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            nets: DashMap::new(),
            errors: Mutex::new(Vec::new()),
        }
    }

    /// Number of networks currently held by the engine.
    pub fn net_count(&self) -> usize {
        self.nets.len()
    }

    fn report(&self, diagnostic: EngineDiagnostic) {
        self.errors
            .lock()
            .expect("diagnostics lock poisoned")
            .push(diagnostic);
    }

    fn ensure_started(&self) -> Result<(), EngineDiagnostic> {
        if self.started.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(EngineDiagnostic::new(
                ERR_NOT_STARTED,
                "engine has not been started",
            ))
        }
    }

    fn missing_net(net: NetId) -> EngineDiagnostic {
        EngineDiagnostic::new(ERR_NO_SUCH_NET, format!("network {} does not exist", net.0))
    }

    /// Run `f` against a network, queueing any error and returning `fallback`.
    fn with_net<T>(
        &self,
        net: NetId,
        fallback: T,
        f: impl FnOnce(&NetState) -> Result<T, EngineDiagnostic>,
    ) -> T {
        let result = self.ensure_started().and_then(|()| {
            let state = self.nets.get(&net).ok_or_else(|| Self::missing_net(net))?;
            f(state.value())
        });
        result.unwrap_or_else(|d| {
            self.report(d);
            fallback
        })
    }

    fn with_net_mut<T>(
        &self,
        net: NetId,
        fallback: T,
        f: impl FnOnce(&mut NetState) -> Result<T, EngineDiagnostic>,
    ) -> T {
        let result = self.ensure_started().and_then(|()| {
            let mut state = self.nets.get_mut(&net).ok_or_else(|| Self::missing_net(net))?;
            f(state.value_mut())
        });
        result.unwrap_or_else(|d| {
            self.report(d);
            fallback
        })
    }
}

impl Default for EnumerationBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EnumerationBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnumerationBackend")
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("nets", &self.nets.len())
            .finish()
    }
}

impl InferenceBackend for EnumerationBackend {
    fn start(&self, license: Option<&str>) -> Result<String, EngineDiagnostic> {
        if license.is_some() {
            tracing::debug!("enumeration backend ignores license strings");
        }
        self.started.store(true, Ordering::Release);
        Ok(format!(
            "enumeration backend {} (exact, up to {} joint states)",
            env!("CARGO_PKG_VERSION"),
            model::MAX_JOINT_STATES
        ))
    }

    fn stop(&self) -> Result<(), EngineDiagnostic> {
        if !self.started.swap(false, Ordering::AcqRel) {
            return Err(EngineDiagnostic::new(
                ERR_NOT_STARTED,
                "engine has not been started",
            ));
        }
        self.nets.clear();
        Ok(())
    }

    fn drain_errors(&self) -> Vec<EngineDiagnostic> {
        std::mem::take(&mut *self.errors.lock().expect("diagnostics lock poisoned"))
    }

    fn read_net(&self, stream_name: &str, bytes: &[u8]) -> Option<NetId> {
        if let Err(d) = self.ensure_started() {
            self.report(d);
            return None;
        }
        match model::parse(bytes) {
            Ok(def) => {
                let id = NetId(self.next_id.fetch_add(1, Ordering::Relaxed));
                let findings = vec![None; def.nodes.len()];
                self.nets.insert(
                    id,
                    NetState {
                        def,
                        compiled: None,
                        findings,
                        auto_update: true,
                        posterior: None,
                    },
                );
                Some(id)
            }
            Err(message) => {
                self.report(EngineDiagnostic::new(
                    ERR_PARSE,
                    format!("reading {stream_name}: {message}"),
                ));
                None
            }
        }
    }

    fn compile_net(&self, net: NetId) {
        self.with_net_mut(net, (), |state| {
            let compiled = model::compile(&state.def).map_err(|message| {
                EngineDiagnostic::new(
                    ERR_COMPILE,
                    format!("compiling {}: {message}", state.def.name),
                )
            })?;
            state.compiled = Some(compiled);
            state.posterior = None;
            Ok(())
        });
    }

    fn delete_net(&self, net: NetId) {
        if self.nets.remove(&net).is_none() {
            self.report(Self::missing_net(net));
        }
    }

    fn set_auto_update(&self, net: NetId, enabled: bool) {
        self.with_net_mut(net, (), |state| {
            state.auto_update = enabled;
            Ok(())
        });
    }

    fn retract_net_findings(&self, net: NetId) {
        self.with_net_mut(net, (), |state| {
            state.findings.iter_mut().for_each(|f| *f = None);
            state.posterior = None;
            Ok(())
        });
    }

    fn net_name(&self, net: NetId) -> String {
        self.with_net(net, String::new(), |s| Ok(s.def.name.clone()))
    }

    fn net_title(&self, net: NetId) -> String {
        self.with_net(net, String::new(), |s| Ok(s.def.title.clone()))
    }

    fn net_comment(&self, net: NetId) -> String {
        self.with_net(net, String::new(), |s| Ok(s.def.comment.clone()))
    }

    fn net_nodes(&self, net: NetId) -> Vec<NodeId> {
        self.with_net(net, Vec::new(), |s| {
            Ok((0..s.def.nodes.len() as u32).map(NodeId).collect())
        })
    }

    fn node_named(&self, net: NetId, name: &str) -> Option<NodeId> {
        self.with_net(net, None, |s| {
            Ok(s.def
                .nodes
                .iter()
                .position(|n| n.name == name)
                .map(|i| NodeId(i as u32)))
        })
    }

    fn node_name(&self, net: NetId, node: NodeId) -> String {
        self.with_net(net, String::new(), |s| Ok(s.node(node)?.name.clone()))
    }

    fn node_title(&self, net: NetId, node: NodeId) -> String {
        self.with_net(net, String::new(), |s| Ok(s.node(node)?.title.clone()))
    }

    fn node_comment(&self, net: NetId, node: NodeId) -> String {
        self.with_net(net, String::new(), |s| Ok(s.node(node)?.comment.clone()))
    }

    fn node_kind(&self, net: NetId, node: NodeId) -> NodeKind {
        self.with_net(net, NodeKind::Discrete, |s| Ok(s.node(node)?.kind))
    }

    fn state_count(&self, net: NetId, node: NodeId) -> usize {
        self.with_net(net, 0, |s| Ok(s.node(node)?.state_count()))
    }

    fn state_name(&self, net: NetId, node: NodeId, state: usize) -> String {
        self.with_net(net, String::new(), |s| {
            let def = s.node(node)?;
            if state >= def.state_count() {
                return Err(EngineDiagnostic::new(
                    ERR_STATE_RANGE,
                    format!("state {state} out of range for node {}", def.name),
                ));
            }
            Ok(def.state_name(state))
        })
    }

    fn state_named(&self, net: NetId, node: NodeId, name: &str) -> Option<usize> {
        self.with_net(net, None, |s| {
            Ok(s.node(node)?.states.iter().position(|st| st == name))
        })
    }

    fn node_levels(&self, net: NetId, node: NodeId) -> Option<Vec<f64>> {
        self.with_net(net, None, |s| Ok(s.node(node)?.levels.clone()))
    }

    fn enter_finding(&self, net: NetId, node: NodeId, state: usize) {
        self.with_net_mut(net, (), |s| {
            let def = s.node(node)?;
            if state >= def.state_count() {
                return Err(EngineDiagnostic::new(
                    ERR_STATE_RANGE,
                    format!(
                        "state {state} out of range for node {} ({} states)",
                        def.name,
                        def.state_count()
                    ),
                ));
            }
            s.set_finding(node, Some((state, Finding::State(state))));
            s.after_finding_change()
        });
    }

    fn enter_value(&self, net: NetId, node: NodeId, value: f64) {
        self.with_net_mut(net, (), |s| {
            let def = s.node(node)?;
            let Some(state) = def.state_for_value(value) else {
                let reason = if def.levels.is_none() {
                    "node has no levels"
                } else {
                    "value outside its levels"
                };
                return Err(EngineDiagnostic::new(
                    ERR_BAD_VALUE,
                    format!("cannot enter value {value} for node {}: {reason}", def.name),
                ));
            };
            s.set_finding(node, Some((state, Finding::Value(value))));
            s.after_finding_change()
        });
    }

    fn retract_node_findings(&self, net: NetId, node: NodeId) {
        self.with_net_mut(net, (), |s| {
            s.node(node)?;
            s.set_finding(node, None);
            Ok(())
        });
    }

    fn node_finding(&self, net: NetId, node: NodeId) -> Option<Finding> {
        self.with_net(net, None, |s| {
            s.node(node)?;
            Ok(s.findings[node.0 as usize].map(|(_, f)| f))
        })
    }

    fn beliefs(&self, net: NetId, node: NodeId) -> Vec<f64> {
        self.with_net_mut(net, Vec::new(), |s| {
            s.node(node)?;
            let marginals = s.refresh()?;
            Ok(marginals[node.0 as usize].clone())
        })
    }

    fn expected_value(&self, net: NetId, node: NodeId) -> Option<(f64, f64)> {
        self.with_net_mut(net, None, |s| {
            let index = node.0 as usize;
            if s.node(node)?.levels.is_none() {
                return Ok(None);
            }
            let beliefs = s.refresh()?[index].clone();
            Ok(s.def.nodes[index].expectation(&beliefs))
        })
    }
}
