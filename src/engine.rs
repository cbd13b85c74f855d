//! Engine handle: the one live connection to the inference backend.
//!
//! The handle is constructed explicitly at process start, shared by `Arc`
//! with the registry and every network, and shut down once at process exit.
//! All backend traffic goes through [`EngineHandle::call`], which invokes the
//! backend and drains its diagnostics channel as one step, so an error is
//! always attributed to the call that caused it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::backend::{EngineDiagnostic, InferenceBackend};
use crate::error::EngineError;

/// Result type for engine calls.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// An initialized inference engine.
pub struct EngineHandle {
    backend: Arc<dyn InferenceBackend>,
    /// Serializes invoke-then-drain so diagnostics are never misattributed.
    gate: Mutex<()>,
    banner: String,
    live: AtomicBool,
}

impl EngineHandle {
    /// Start the backend, optionally with a license string.
    ///
    /// Some engines never return when given a rejected license; callers that
    /// care should run this under an external timeout.
    pub fn initialize(
        backend: Arc<dyn InferenceBackend>,
        license: Option<&str>,
    ) -> EngineResult<Arc<Self>> {
        let banner = backend
            .start(license)
            .map_err(|d| EngineError::InitFailed {
                code: d.code,
                message: d.message,
            })?;
        // Anything left over from start-up belongs to nobody.
        let stale = backend.drain_errors();
        if !stale.is_empty() {
            tracing::warn!(count = stale.len(), "discarding diagnostics queued during start-up");
        }
        tracing::info!(%banner, "inference engine initialized");
        Ok(Arc::new(Self {
            backend,
            gate: Mutex::new(()),
            banner,
            live: AtomicBool::new(true),
        }))
    }

    /// Backend banner returned at start-up.
    pub fn banner(&self) -> &str {
        &self.banner
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Shut the backend down. Only the first call does anything.
    pub fn shutdown(&self) -> EngineResult<()> {
        let _gate = self.gate.lock().expect("engine gate poisoned");
        if !self.live.swap(false, Ordering::AcqRel) {
            return Err(EngineError::ShutDown);
        }
        self.backend
            .stop()
            .map_err(|d| EngineError::ShutdownFailed {
                message: d.to_string(),
            })?;
        tracing::info!("inference engine shut down");
        Ok(())
    }

    /// Return and clear every diagnostic queued since the previous drain.
    pub fn drain_errors(&self) -> Vec<EngineDiagnostic> {
        let _gate = self.gate.lock().expect("engine gate poisoned");
        self.backend.drain_errors()
    }

    /// Invoke the backend and fail if it reported anything.
    pub fn call<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&dyn InferenceBackend) -> T,
    ) -> EngineResult<T> {
        let _gate = self.gate.lock().expect("engine gate poisoned");
        if !self.is_live() {
            return Err(EngineError::ShutDown);
        }
        let value = f(self.backend.as_ref());
        let errors = self.backend.drain_errors();
        if errors.is_empty() {
            Ok(value)
        } else {
            Err(EngineError::Reported {
                operation,
                messages: join_diagnostics(&errors),
            })
        }
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("banner", &self.banner)
            .field("live", &self.is_live())
            .finish()
    }
}

fn join_diagnostics(errors: &[EngineDiagnostic]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NetId;
    use crate::backend::enumerate::EnumerationBackend;

    fn handle() -> Arc<EngineHandle> {
        EngineHandle::initialize(Arc::new(EnumerationBackend::new()), None).unwrap()
    }

    #[test]
    fn call_returns_value_when_clean() {
        let engine = handle();
        let id = engine
            .call("read", |b| b.read_net("n", b"name = \"N\""))
            .unwrap();
        assert!(id.is_some());
    }

    #[test]
    fn call_fails_when_backend_reports() {
        let engine = handle();
        let err = engine
            .call("compile", |b| b.compile_net(NetId(404)))
            .unwrap_err();
        match err {
            EngineError::Reported { operation, messages } => {
                assert_eq!(operation, "compile");
                assert!(messages.contains("does not exist"));
            }
            other => panic!("unexpected error: {other}"),
        }
        // The failure was drained with the call.
        assert!(engine.drain_errors().is_empty());
    }

    #[test]
    fn shutdown_happens_once() {
        let engine = handle();
        engine.shutdown().unwrap();
        assert!(!engine.is_live());
        assert!(matches!(engine.shutdown(), Err(EngineError::ShutDown)));
        assert!(matches!(
            engine.call("name", |b| b.net_name(NetId(1))),
            Err(EngineError::ShutDown)
        ));
    }
}
