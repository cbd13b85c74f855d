//! Network registry: every loaded network, addressable by name or index.
//!
//! Networks live in an arena of slots. A network's index is its slot, assigned
//! at load and never reused, so an index handed out to a client keeps naming
//! the same network until that network is closed. The name map and the slots
//! are updated together under one lock and always agree.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::backend::enumerate::EnumerationBackend;
use crate::config::ServeConfig;
use crate::engine::{EngineHandle, EngineResult};
use crate::error::{EngineError, LoadError, LookupError, ServeResult};
use crate::network::Network;

#[derive(Default)]
struct Slots {
    networks: Vec<Option<Arc<Network>>>,
    by_name: HashMap<String, usize>,
}

/// All networks served by one engine.
pub struct NetworkRegistry {
    engine: Arc<EngineHandle>,
    inner: RwLock<Slots>,
}

impl NetworkRegistry {
    pub fn new(engine: Arc<EngineHandle>) -> Self {
        Self {
            engine,
            inner: RwLock::new(Slots::default()),
        }
    }

    /// Start the enumeration engine with the configured license and load the
    /// configured network directory.
    pub fn from_config(config: &ServeConfig) -> ServeResult<Arc<Self>> {
        let engine = EngineHandle::initialize(
            Arc::new(EnumerationBackend::new()),
            config.license.as_deref(),
        )?;
        let registry = Arc::new(Self::new(engine));
        registry.load_dir(&config.dir, &config.extensions)?;
        Ok(registry)
    }

    pub fn engine(&self) -> &Arc<EngineHandle> {
        &self.engine
    }

    /// Stream a network definition into the engine and register it.
    ///
    /// The network is compiled, its findings retracted and automatic belief
    /// updating turned off. A network whose name is already registered is
    /// deleted again and rejected.
    pub fn load(&self, bytes: &[u8], display_name: &str) -> Result<Arc<Network>, LoadError> {
        let rejected = |e: EngineError| LoadError::Rejected {
            source_name: display_name.to_string(),
            reason: e.to_string(),
        };

        let net = self
            .engine
            .call("read network", |b| b.read_net(display_name, bytes))
            .map_err(rejected)?
            .ok_or_else(|| LoadError::Rejected {
                source_name: display_name.to_string(),
                reason: "engine produced no network".into(),
            })?;

        let prepared = self.engine.call("compile network", |b| {
            b.compile_net(net);
            b.retract_net_findings(net);
            b.set_auto_update(net, false);
        });
        if let Err(e) = prepared {
            self.discard(net);
            return Err(rejected(e));
        }

        let mut network = match Network::open(Arc::clone(&self.engine), net, display_name) {
            Ok(network) => network,
            Err(e) => {
                self.discard(net);
                return Err(e.into());
            }
        };
        if self.by_name(network.name()).is_some() {
            return Err(self.reject_duplicate(network, display_name));
        }

        let registered = {
            let mut inner = self.inner.write().expect("registry lock poisoned");
            if inner.by_name.contains_key(network.name()) {
                Err(network)
            } else {
                let index = inner.networks.len();
                network.set_index(index);
                let network = Arc::new(network);
                inner.by_name.insert(network.name().to_string(), index);
                inner.networks.push(Some(Arc::clone(&network)));
                Ok(network)
            }
        };
        // A concurrent load may have registered the name since the check above.
        let network = match registered {
            Ok(network) => network,
            Err(network) => return Err(self.reject_duplicate(network, display_name)),
        };
        tracing::info!(name = network.name(), index = network.index(), source = display_name, "network loaded");
        Ok(network)
    }

    /// Read a file and [`load`](Self::load) it under its file name.
    pub fn load_file(&self, path: &Path) -> Result<Arc<Network>, LoadError> {
        let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.load(&bytes, &display_name)
    }

    /// Load every file under `dir` whose extension is in `extensions`.
    ///
    /// Files are visited in path order. A file that fails to load is logged
    /// and skipped; only an unreadable `dir` fails the whole pass.
    pub fn load_dir(&self, dir: &Path, extensions: &[String]) -> Result<Vec<Arc<Network>>, LoadError> {
        std::fs::read_dir(dir).map_err(|source| LoadError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let mut files = Vec::new();
        collect_files(dir, extensions, &mut files);
        files.sort();

        let mut loaded = Vec::with_capacity(files.len());
        for path in &files {
            match self.load_file(path) {
                Ok(network) => loaded.push(network),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping network"),
            }
        }
        tracing::info!(
            dir = %dir.display(),
            loaded = loaded.len(),
            skipped = files.len() - loaded.len(),
            "network directory loaded"
        );
        Ok(loaded)
    }

    /// Remove a network from the registry and release it in the engine.
    pub fn close(&self, network: &Network) -> EngineResult<()> {
        {
            let mut inner = self.inner.write().expect("registry lock poisoned");
            let registered = inner
                .networks
                .get(network.index())
                .and_then(Option::as_ref)
                .is_some_and(|n| std::ptr::eq(n.as_ref(), network));
            if registered {
                inner.networks[network.index()] = None;
                inner.by_name.remove(network.name());
            }
        }
        network.close()?;
        tracing::info!(name = network.name(), index = network.index(), "network closed");
        Ok(())
    }

    /// Close every registered network. Failures are logged and counted.
    pub fn close_all(&self) -> usize {
        let networks: Vec<Arc<Network>> = {
            let mut inner = self.inner.write().expect("registry lock poisoned");
            inner.by_name.clear();
            inner.networks.iter_mut().filter_map(Option::take).collect()
        };
        let mut failed = 0;
        for network in networks {
            if let Err(e) = network.close() {
                tracing::warn!(name = network.name(), error = %e, "failed to close network");
                failed += 1;
            }
        }
        failed
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<Network>> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let &index = inner.by_name.get(name)?;
        inner.networks[index].clone()
    }

    pub fn by_index(&self, index: usize) -> Option<Arc<Network>> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.networks.get(index).cloned().flatten()
    }

    /// Resolve a client identifier: a registered name first, then an index.
    pub fn resolve(&self, id: &str) -> Result<Arc<Network>, LookupError> {
        self.by_name(id)
            .or_else(|| id.parse().ok().and_then(|i| self.by_index(i)))
            .ok_or_else(|| LookupError::NetworkNotFound { id: id.to_string() })
    }

    /// Open networks in lexicographic name order.
    pub fn list_sorted_by_name(&self) -> Vec<Arc<Network>> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let mut networks: Vec<Arc<Network>> = inner.networks.iter().flatten().cloned().collect();
        networks.sort_by(|a, b| a.name().cmp(b.name()));
        networks
    }

    /// Number of open networks.
    pub fn len(&self) -> usize {
        self.inner.read().expect("registry lock poisoned").by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close a freshly opened network whose name is already registered.
    fn reject_duplicate(&self, network: Network, display_name: &str) -> LoadError {
        let name = network.name().to_string();
        tracing::warn!(%name, source = display_name, "duplicate network name, closing new copy");
        if let Err(e) = network.close() {
            tracing::warn!(%name, error = %e, "failed to close duplicate network");
        }
        LoadError::DuplicateName {
            name,
            source_name: display_name.to_string(),
        }
    }

    fn discard(&self, net: crate::backend::NetId) {
        if let Err(e) = self.engine.call("delete network", |b| b.delete_net(net)) {
            tracing::warn!(error = %e, "failed to delete rejected network");
        }
    }
}

impl std::fmt::Debug for NetworkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkRegistry")
            .field("count", &self.len())
            .finish()
    }
}

fn collect_files(dir: &Path, extensions: &[String], out: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "cannot read directory");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, extensions, out);
        } else if path.is_file() && has_extension(&path, extensions) {
            out.push(path);
        }
    }
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy())
        .is_some_and(|e| extensions.iter().any(|x| x.trim_start_matches('.').eq_ignore_ascii_case(&e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::enumerate::EnumerationBackend;

    fn registry() -> NetworkRegistry {
        let engine = EngineHandle::initialize(Arc::new(EnumerationBackend::new()), None).unwrap();
        NetworkRegistry::new(engine)
    }

    fn source(name: &str) -> String {
        format!(
            "name = \"{name}\"\n[[node]]\nname = \"A\"\nstates = [\"t\", \"f\"]\nprobs = [[0.5, 0.5]]\n"
        )
    }

    #[test]
    fn load_and_lookup() {
        let reg = registry();
        let net = reg.load(source("Alarm").as_bytes(), "alarm.toml").unwrap();
        assert_eq!(net.index(), 0);
        assert_eq!(net.source_name(), "alarm.toml");
        assert_eq!(reg.by_name("Alarm").unwrap().index(), 0);
        assert_eq!(reg.by_index(0).unwrap().name(), "Alarm");
        assert_eq!(reg.resolve("0").unwrap().name(), "Alarm");
        assert!(matches!(
            reg.resolve("1"),
            Err(LookupError::NetworkNotFound { .. })
        ));
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let reg = registry();
        reg.load(source("Alarm").as_bytes(), "a.toml").unwrap();
        let err = reg.load(source("Alarm").as_bytes(), "b.toml").unwrap_err();
        assert!(matches!(err, LoadError::DuplicateName { .. }));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.by_name("Alarm").unwrap().source_name(), "a.toml");
    }

    #[test]
    fn malformed_source_is_rejected() {
        let reg = registry();
        let err = reg.load(b"name = ", "bad.toml").unwrap_err();
        assert!(matches!(err, LoadError::Rejected { .. }));
        let err = reg
            .load(
                b"name = \"C\"\n[[node]]\nname = \"A\"\nstates = [\"x\"]\nparents = [\"Z\"]\nprobs = [[1.0]]\n",
                "orphan.toml",
            )
            .unwrap_err();
        assert!(err.to_string().contains("undefined parent"));
        assert!(reg.is_empty());
    }

    #[test]
    fn listing_is_sorted_by_name() {
        let reg = registry();
        for name in ["Zeta", "Alpha", "Mid"] {
            reg.load(source(name).as_bytes(), name).unwrap();
        }
        let names: Vec<String> = reg
            .list_sorted_by_name()
            .iter()
            .map(|n| n.name().to_string())
            .collect();
        assert_eq!(names, ["Alpha", "Mid", "Zeta"]);
        // Indices follow load order.
        assert_eq!(reg.by_name("Zeta").unwrap().index(), 0);
    }

    #[test]
    fn close_frees_name_but_not_index() {
        let reg = registry();
        let first = reg.load(source("A").as_bytes(), "a").unwrap();
        reg.load(source("B").as_bytes(), "b").unwrap();
        reg.close(&first).unwrap();
        assert!(first.is_closed());
        assert!(reg.by_name("A").is_none());
        assert!(reg.by_index(0).is_none());
        assert_eq!(reg.by_index(1).unwrap().name(), "B");

        let again = reg.load(source("A").as_bytes(), "a").unwrap();
        assert_eq!(again.index(), 2);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn load_dir_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("one.toml"), source("One")).unwrap();
        std::fs::write(dir.path().join("broken.toml"), "name = [").unwrap();
        std::fs::write(dir.path().join("notes.txt"), source("Ignored")).unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/two.TOML"), source("Two")).unwrap();

        let reg = registry();
        let loaded = reg.load_dir(dir.path(), &["toml".to_string()]).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(reg.by_name("One").is_some());
        assert!(reg.by_name("Two").is_some());
        assert!(reg.by_name("Ignored").is_none());
    }

    #[test]
    fn load_dir_fails_on_missing_root() {
        let reg = registry();
        let err = reg
            .load_dir(Path::new("/definitely/not/here"), &["toml".to_string()])
            .unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn racing_loads_of_one_name_register_once() {
        let reg = registry();
        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let reg = &reg;
                    s.spawn(move || reg.load(source("Alarm").as_bytes(), &format!("{i}.toml")))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, LoadError::DuplicateName { .. })));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.by_name("Alarm").unwrap().index(), 0);

        // Rejected copies never took a slot.
        let next = reg.load(source("Siren").as_bytes(), "siren.toml").unwrap();
        assert_eq!(next.index(), 1);
    }

    #[test]
    fn from_config_loads_the_configured_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("alarm.toml"), source("Alarm")).unwrap();
        let config = ServeConfig {
            dir: dir.path().to_path_buf(),
            ..ServeConfig::default()
        };
        let reg = NetworkRegistry::from_config(&config).unwrap();
        assert_eq!(reg.len(), 1);
        assert!(reg.engine().banner().starts_with("enumeration backend"));
    }
}
