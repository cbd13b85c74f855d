//! Server configuration.
//!
//! Values are layered: built-in defaults, then a TOML file, then `BNSERVE_*`
//! environment variables, then command-line flags.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Config file picked up from the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = ".bnserve.toml";

/// Prefix of the environment variables read by [`ServeConfig::apply_env`].
pub const ENV_PREFIX: &str = "BNSERVE_";

/// Everything needed to load networks and serve them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    /// Directory scanned recursively for network files.
    pub dir: PathBuf,
    /// File extensions treated as network definitions.
    pub extensions: Vec<String>,
    pub bind: String,
    pub port: u16,
    /// Route prefix of the HTTP API, normalized by [`api_prefix`].
    pub prefix: String,
    /// License string handed to the engine at start-up.
    pub license: Option<String>,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./networks"),
            extensions: vec!["toml".into()],
            bind: "127.0.0.1".into(),
            port: 8080,
            prefix: "api".into(),
            license: None,
        }
    }
}

/// Command-line overrides, the last configuration layer.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct ConfigOverrides {
    /// Config file to read instead of `.bnserve.toml`.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Directory holding network files.
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,
    /// Address to bind the server to.
    #[arg(long, global = true)]
    pub bind: Option<String>,
    /// Port to listen on.
    #[arg(long, global = true)]
    pub port: Option<u16>,
    /// Route prefix for the API.
    #[arg(long, global = true)]
    pub prefix: Option<String>,
    /// Engine license string.
    #[arg(long, global = true)]
    pub license: Option<String>,
}

impl ServeConfig {
    /// Resolve every layer for this process.
    pub fn resolve(overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let mut config = Self::discover(overrides.config.as_deref())?;
        config.apply_env(std::env::vars())?;
        config.apply_overrides(overrides);
        Ok(config)
    }

    /// Read `explicit`, or the default file when it exists, or fall back to defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load_file(path),
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.is_file() {
                    Self::load_file(path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml(&content, path)?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    pub fn from_toml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Apply `BNSERVE_*` variables from `vars`; other variables are ignored.
    pub fn apply_env(
        &mut self,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<(), ConfigError> {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "DIR" => self.dir = PathBuf::from(value),
                "EXTENSIONS" => {
                    self.extensions = value
                        .split(',')
                        .map(str::trim)
                        .filter(|e| !e.is_empty())
                        .map(String::from)
                        .collect();
                }
                "BIND" => self.bind = value,
                "PORT" => {
                    self.port = value.parse().map_err(|_| ConfigError::Invalid {
                        key: key.clone(),
                        value: value.clone(),
                    })?;
                }
                "PREFIX" => self.prefix = value,
                "LICENSE" => self.license = Some(value),
                _ => {}
            }
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(dir) = &overrides.dir {
            self.dir = dir.clone();
        }
        if let Some(bind) = &overrides.bind {
            self.bind = bind.clone();
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(prefix) = &overrides.prefix {
            self.prefix = prefix.clone();
        }
        if let Some(license) = &overrides.license {
            self.license = Some(license.clone());
        }
    }

    /// The normalized API route prefix.
    pub fn api_prefix(&self) -> String {
        api_prefix(&self.prefix)
    }

    /// `bind:port`, ready for a listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// Normalize a route prefix: empty becomes `/`, and a leading `/` is added.
pub fn api_prefix(prefix: &str) -> String {
    if prefix.is_empty() {
        "/".to_string()
    } else if prefix.starts_with('/') {
        prefix.to_string()
    } else {
        format!("/{prefix}")
    }
}
