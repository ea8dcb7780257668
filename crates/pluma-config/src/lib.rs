//! Client configuration for Pluma.
//!
//! `config.toml` holds the configured discovery sources, the contexts the user
//! is logged into, the stability tier used for upgrades and the feature flags
//! plugins asked for. Mutations go through [`ConfigStore::update`], which holds
//! an advisory lock for the whole read-modify-write.

mod context;
mod sources;

pub use context::{https_endpoint, Context, ContextType};
pub use sources::source_from_flags;

use directories::ProjectDirs;
use fs4::FileExt;
use pluma_catalog::CATALOG_FILE;
use pluma_discovery::{DiscoverySource, OciDiscovery};
use pluma_types::{DiscoveryType, PluginIdentity, TypesError};
use pluma_version::StabilityTier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const CONFIG_FILE: &str = "config.toml";
pub const CONFIG_ENV: &str = "PLUMA_CONFIG";
pub const PLUGIN_ROOT_ENV: &str = "PLUMA_PLUGIN_ROOT";
pub const CACHE_DIR_ENV: &str = "PLUMA_CACHE_DIR";

/// Image holding the central plugin inventory.
pub const DEFAULT_CENTRAL_REPOSITORY: &str = "registry.pluma.dev/plugins/plugin-inventory:latest";
pub const DEFAULT_SOURCE_NAME: &str = "default";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to lock {}: {source}", .path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("discovery source name cannot be empty")]
    EmptySourceName,
    #[error("discovery source type cannot be empty")]
    EmptySourceType,
    #[error("discovery source type '{0}' is not yet supported")]
    UnsupportedSourceType(String),
    #[error("unknown discovery source type '{0}'")]
    UnknownSourceType(String),
    #[error("discovery source '{0}' already exists")]
    SourceExists(String),
    #[error("discovery source '{0}' not found")]
    SourceNotFound(String),
    #[error("context '{0}' not found")]
    ContextNotFound(String),
    #[error("context '{0}' has no endpoint")]
    MissingEndpoint(String),
    #[error("context '{context}' has an invalid endpoint '{endpoint}'")]
    InvalidEndpoint { context: String, endpoint: String },
    #[error("invalid bootstrap entry: {0}")]
    Selector(#[from] TypesError),
    #[error("Config directory not found")]
    NoConfigDir,
}

/// CLI-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliOptions {
    pub unstable_version_selector: StabilityTier,
    pub default_standalone_discovery_type: DiscoveryType,
    /// `name` or `name:target` selectors installed by `plugin sync --bootstrap`
    pub bootstrap: Vec<String>,
    pub edition: String,
    pub discovery_sources: Vec<DiscoverySource>,
}

impl Default for CliOptions {
    fn default() -> Self {
        Self {
            unstable_version_selector: StabilityTier::None,
            default_standalone_discovery_type: DiscoveryType::Oci,
            bootstrap: Vec::new(),
            edition: String::new(),
            discovery_sources: Vec::new(),
        }
    }
}

/// Active context per context type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurrentContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub k8s: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tmc: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub cli: CliOptions,
    pub contexts: Vec<Context>,
    pub current_context: CurrentContext,
    /// Plugin name to flag name to value
    pub features: BTreeMap<String, BTreeMap<String, bool>>,
}

impl ClientConfig {
    /// Load the config; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        fs::write(path, content).map_err(write_err)
    }

    /// Configured standalone sources, or the central inventory when none are.
    pub fn standalone_sources(&self) -> Vec<DiscoverySource> {
        if self.cli.discovery_sources.is_empty() {
            vec![DiscoverySource::Oci(OciDiscovery::new(
                DEFAULT_SOURCE_NAME,
                DEFAULT_CENTRAL_REPOSITORY,
            ))]
        } else {
            self.cli.discovery_sources.clone()
        }
    }

    pub fn find_context(&self, name: &str) -> Option<&Context> {
        self.contexts.iter().find(|c| c.name == name)
    }

    /// The contexts plugins are discovered for.
    ///
    /// An explicit name selects that context alone; otherwise the current
    /// context of each type is active.
    pub fn active_contexts(&self, name: Option<&str>) -> Result<Vec<&Context>, ConfigError> {
        if let Some(name) = name {
            return self
                .find_context(name)
                .map(|c| vec![c])
                .ok_or_else(|| ConfigError::ContextNotFound(name.to_string()));
        }

        let mut active = Vec::new();
        for current in [&self.current_context.k8s, &self.current_context.tmc]
            .into_iter()
            .flatten()
        {
            match self.find_context(current) {
                Some(context) => active.push(context),
                None => debug!("Current context '{}' is not configured", current),
            }
        }
        Ok(active)
    }

    /// Parsed bootstrap selectors.
    pub fn bootstrap_plugins(&self) -> Result<Vec<PluginIdentity>, ConfigError> {
        self.cli
            .bootstrap
            .iter()
            .map(|s| PluginIdentity::parse_selector(s).map_err(ConfigError::from))
            .collect()
    }

    /// Record a plugin's default feature flags, keeping values already set.
    ///
    /// Returns whether anything changed.
    pub fn apply_default_features(&mut self, plugin: &str, flags: &BTreeMap<String, bool>) -> bool {
        if flags.is_empty() {
            return false;
        }
        let entry = self.features.entry(plugin.to_string()).or_default();
        let mut changed = false;
        for (flag, value) in flags {
            if !entry.contains_key(flag) {
                entry.insert(flag.clone(), *value);
                changed = true;
            }
        }
        changed
    }
}

/// Locked read-modify-write access to `config.toml`.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<ClientConfig, ConfigError> {
        ClientConfig::load(&self.path)
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| CONFIG_FILE.into());
        name.push(".lock");
        self.path.with_file_name(name)
    }

    /// Apply `f` under the config lock and save the result.
    pub fn update<T, F>(&self, f: F) -> Result<T, ConfigError>
    where
        F: FnOnce(&mut ClientConfig) -> Result<T, ConfigError>,
    {
        let lock_path = self.lock_path();
        let lock_err = |source| ConfigError::Lock {
            path: lock_path.clone(),
            source,
        };
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).map_err(lock_err)?;
        }
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(lock_err)?;
        lock.lock_exclusive().map_err(lock_err)?;

        let result = self.load().and_then(|mut config| {
            let value = f(&mut config)?;
            config.save(&self.path)?;
            Ok(value)
        });

        if let Err(e) = lock.unlock() {
            debug!("Failed to release {}: {}", lock_path.display(), e);
        }
        result
    }
}

/// Where configuration, plugins and the catalog live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    pub config_file: PathBuf,
    pub plugin_root: PathBuf,
    pub catalog_file: PathBuf,
}

impl ConfigPaths {
    /// Resolve paths from an explicit config file, the environment and the
    /// platform directories, in that order.
    pub fn resolve(config_override: Option<PathBuf>) -> Result<Self, ConfigError> {
        let dirs = ProjectDirs::from("dev", "pluma", "pluma");
        let env_path = |name: &str| std::env::var_os(name).filter(|v| !v.is_empty()).map(PathBuf::from);

        let config_file = match config_override.or_else(|| env_path(CONFIG_ENV)) {
            Some(path) => path,
            None => dirs
                .as_ref()
                .map(|d| d.config_dir().join(CONFIG_FILE))
                .ok_or(ConfigError::NoConfigDir)?,
        };
        let plugin_root = match env_path(PLUGIN_ROOT_ENV) {
            Some(path) => path,
            None => dirs
                .as_ref()
                .map(|d| d.data_dir().join("plugins"))
                .ok_or(ConfigError::NoConfigDir)?,
        };
        let cache_dir = match env_path(CACHE_DIR_ENV) {
            Some(path) => path,
            None => dirs
                .as_ref()
                .map(|d| d.cache_dir().to_path_buf())
                .ok_or(ConfigError::NoConfigDir)?,
        };

        Ok(Self {
            config_file,
            plugin_root,
            catalog_file: cache_dir.join(CATALOG_FILE),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pluma_discovery::LocalDiscovery;
    use pluma_types::Target;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
[cli]
unstable_version_selector = "alpha"
default_standalone_discovery_type = "local"
bootstrap = ["login", "cluster:k8s"]

[[cli.discovery_sources]]
type = "local"
name = "dev"
path = "/opt/pluma/plugins"

[[cli.discovery_sources]]
type = "oci"
name = "central"
image = "registry.pluma.dev/plugins/plugin-inventory:latest"

[[contexts]]
name = "prod"
type = "k8s"
path = "/home/me/.kube/config"
context = "prod-admin"

[[contexts]]
name = "saas"
type = "tmc"
endpoint = "tmc.example.com:443"

[current_context]
k8s = "prod"

[features.cluster]
sync-enabled = true
"#;

    #[test]
    fn test_parse_sample() {
        let config: ClientConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.cli.unstable_version_selector, StabilityTier::Alpha);
        assert_eq!(config.cli.default_standalone_discovery_type, DiscoveryType::Local);
        assert_eq!(config.cli.discovery_sources.len(), 2);
        assert_eq!(config.contexts[1].context_type, ContextType::Tmc);
        assert!(config.features["cluster"]["sync-enabled"]);

        let active = config.active_contexts(None).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "prod");
        assert_eq!(config.active_contexts(Some("saas")).unwrap()[0].name, "saas");
        assert!(config.active_contexts(Some("gone")).is_err());

        let bootstrap = config.bootstrap_plugins().unwrap();
        assert_eq!(bootstrap[1].target, Target::K8s);
    }

    #[test]
    fn test_missing_file_and_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pluma").join(CONFIG_FILE);
        let mut config = ClientConfig::load(&path).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.standalone_sources().len(), 1);

        config.contexts = toml::from_str::<ClientConfig>(SAMPLE).unwrap().contexts;
        config.save(&path).unwrap();
        assert_eq!(ClientConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_apply_default_features_keeps_existing() {
        let mut config: ClientConfig = toml::from_str(SAMPLE).unwrap();
        let mut flags = BTreeMap::new();
        flags.insert("sync-enabled".to_string(), false);
        flags.insert("dry-run".to_string(), true);

        assert!(config.apply_default_features("cluster", &flags));
        assert!(config.features["cluster"]["sync-enabled"]);
        assert!(config.features["cluster"]["dry-run"]);
        assert!(!config.apply_default_features("cluster", &flags));
    }

    #[test]
    fn test_store_update_is_persisted() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join(CONFIG_FILE));
        store
            .update(|config| {
                config.add_source(DiscoverySource::Local(LocalDiscovery::new("dev", "/opt/plugins")))
            })
            .unwrap();

        let err = store
            .update(|config| config.add_source(DiscoverySource::Local(LocalDiscovery::new("dev", "/x"))))
            .unwrap_err();
        assert!(matches!(err, ConfigError::SourceExists(_)));

        let config = store.load().unwrap();
        assert_eq!(config.cli.discovery_sources.len(), 1);
        assert!(dir.path().join("config.toml.lock").exists());
    }

    #[test]
    fn test_invalid_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[cli]\nunstable_version_selector = \"nightly\"\n").unwrap();
        assert!(matches!(
            ClientConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
