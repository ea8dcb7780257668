//! Plugin lifecycle for Pluma.
//!
//! [`PluginManager`] ties discovery, the catalog and artifact distribution
//! together: it resolves which plugins are available in which state, and
//! installs, upgrades, deletes and syncs them.

mod availability;
mod group;
mod install;
mod runner;
mod sync;
mod validate;

pub use availability::{find_plugin, resolve_availability};
pub use group::{default_limit, BoundedGroup, GroupResult};
pub use install::{InstallOutcome, ALL_PLUGINS, LATEST};
pub use runner::{
    describe_binary, post_install, PluginRunner, ProcessRunner, RunOutput, DESCRIBE_COMMAND,
    POST_INSTALL_COMMAND,
};
pub use sync::SyncSummary;
pub use validate::validate_descriptor;

use pluma_catalog::{Catalog, CatalogError, CatalogScope};
use pluma_config::{ClientConfig, ConfigError, ConfigPaths};
use pluma_discovery::{
    DiscoveredPlugin, Discoverer, DiscoveryClients, DiscoveryError, DiscoveryPolicy, DiscoveryReport,
    DiscoverySource, Origin,
};
use pluma_distribution::{ArtifactFetcher, DistributionError, ImagePuller};
use pluma_platform::PlatformInfo;
use pluma_trust::{TrustConfig, TrustError};
use pluma_types::{DiscoveryType, PluginDescriptor, Target};
use pluma_version::StabilityTier;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("unable to find plugin '{name}'")]
    NotFound { name: String },

    #[error("unable to uniquely identify plugin '{name}'. Please specify correct Target(kubernetes[k8s]/mission-control[tmc]) of the plugin with `--target` flag")]
    Ambiguous { name: String },

    #[error("could not get plugin path for plugin {name:?}")]
    NotInstalled { name: String },

    #[error("unable to fetch the plugin metadata for plugin {name:?} and version {version:?}")]
    VersionNotFound { name: String, version: String },

    #[error("unable to install plugin '{plugin}:{version}': {source}")]
    Untrusted {
        plugin: String,
        version: String,
        #[source]
        source: TrustError,
    },

    #[error("unable to install plugin '{plugin}:{version}': {source}")]
    Corrupted {
        plugin: String,
        version: String,
        #[source]
        source: TrustError,
    },

    #[error("could not describe plugin '{plugin}': {message}")]
    Describe { plugin: String, message: String },

    #[error("could not parse the description of plugin '{plugin}': {source}")]
    MalformedDescriptor {
        plugin: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{}", .problems.join("\n"))]
    InvalidDescriptor { problems: Vec<String> },

    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Distribution(#[from] DistributionError),

    #[error("{}", format_aggregate(.0))]
    Aggregate(Vec<ManagerError>),
}

fn format_aggregate(errors: &[ManagerError]) -> String {
    match errors {
        [single] => single.to_string(),
        _ => format!(
            "[{}]",
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

/// Broad classes of failure, for callers that render or branch on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Ambiguous,
    Untrusted,
    Corrupted,
    Unsupported,
    Io,
    Malformed,
    Other,
}

impl ManagerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Fold a list of failures into one error; `None` when empty.
    pub fn aggregate(mut errors: Vec<ManagerError>) -> Option<ManagerError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(ManagerError::Aggregate(errors)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ManagerError::NotFound { .. }
            | ManagerError::NotInstalled { .. }
            | ManagerError::VersionNotFound { .. } => ErrorKind::NotFound,
            ManagerError::Ambiguous { .. } => ErrorKind::Ambiguous,
            ManagerError::Untrusted { .. } => ErrorKind::Untrusted,
            ManagerError::Corrupted { .. } => ErrorKind::Corrupted,
            ManagerError::MalformedDescriptor { .. } | ManagerError::InvalidDescriptor { .. } => {
                ErrorKind::Malformed
            }
            ManagerError::Io { .. } | ManagerError::Catalog(_) => ErrorKind::Io,
            ManagerError::Discovery(err) => discovery_kind(err),
            ManagerError::Distribution(DistributionError::ArtifactNotFound { .. }) => ErrorKind::NotFound,
            ManagerError::Distribution(DistributionError::Io(_) | DistributionError::Read { .. }) => {
                ErrorKind::Io
            }
            ManagerError::Aggregate(errors) => errors.first().map_or(ErrorKind::Other, |e| e.kind()),
            _ => ErrorKind::Other,
        }
    }
}

fn discovery_kind(err: &DiscoveryError) -> ErrorKind {
    match err {
        DiscoveryError::Unsupported(_) => ErrorKind::Unsupported,
        DiscoveryError::Malformed { .. } | DiscoveryError::MalformedResponse { .. } => ErrorKind::Malformed,
        DiscoveryError::Io { .. } | DiscoveryError::MissingBinary { .. } => ErrorKind::Io,
        DiscoveryError::NotFound { .. } => ErrorKind::NotFound,
        DiscoveryError::Source { source, .. } => discovery_kind(source),
        _ => ErrorKind::Other,
    }
}

/// A context plugins are discovered and installed for.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBinding {
    pub name: String,
    pub target: Target,
    pub sources: Vec<DiscoverySource>,
}

/// Everything the manager needs, passed in explicitly.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub plugin_root: PathBuf,
    pub catalog_path: PathBuf,
    pub tier: StabilityTier,
    pub default_standalone_discovery_type: DiscoveryType,
    pub policy: DiscoveryPolicy,
    pub trust: TrustConfig,
    pub platform: PlatformInfo,
    pub standalone_sources: Vec<DiscoverySource>,
    pub contexts: Vec<ContextBinding>,
}

impl ManagerConfig {
    pub fn new(plugin_root: impl Into<PathBuf>, catalog_path: impl Into<PathBuf>) -> Self {
        Self {
            plugin_root: plugin_root.into(),
            catalog_path: catalog_path.into(),
            tier: StabilityTier::None,
            default_standalone_discovery_type: DiscoveryType::Oci,
            policy: DiscoveryPolicy::BestEffort,
            trust: TrustConfig::default(),
            platform: PlatformInfo::detect(),
            standalone_sources: Vec::new(),
            contexts: Vec::new(),
        }
    }

    /// Build from the client configuration for the active contexts.
    pub fn from_client_config(
        config: &ClientConfig,
        paths: &ConfigPaths,
        context: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let contexts = config
            .active_contexts(context)?
            .into_iter()
            .map(|ctx| {
                Ok(ContextBinding {
                    name: ctx.name.clone(),
                    target: ctx.target(),
                    sources: ctx.discovery_sources_with_default()?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            tier: config.cli.unstable_version_selector,
            default_standalone_discovery_type: config.cli.default_standalone_discovery_type,
            trust: TrustConfig::from_env(),
            standalone_sources: config.standalone_sources(),
            contexts,
            ..Self::new(&paths.plugin_root, &paths.catalog_file)
        })
    }
}

/// Installs and tracks plugins.
#[derive(Clone)]
pub struct PluginManager {
    config: ManagerConfig,
    discoverer: Discoverer,
    fetcher: ArtifactFetcher,
    runner: Arc<dyn PluginRunner>,
}

impl PluginManager {
    pub fn new(config: ManagerConfig) -> Self {
        let fetcher = ArtifactFetcher::new();
        let clients = DiscoveryClients::new(&fetcher, config.platform.clone());
        Self {
            discoverer: Discoverer::new(clients, config.policy),
            fetcher,
            runner: Arc::new(ProcessRunner),
            config,
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn PluginRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_discoverer(mut self, discoverer: Discoverer) -> Self {
        self.discoverer = discoverer;
        self
    }

    /// Pull images for both discovery and installation through `puller`.
    pub fn with_puller(mut self, puller: Arc<dyn ImagePuller>) -> Self {
        self.fetcher = self.fetcher.with_puller(Arc::clone(&puller));
        let clients = self.discoverer.clients().clone().with_puller(puller);
        self.discoverer = Discoverer::new(clients, self.discoverer.policy());
        self
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn catalog(&self, scope: CatalogScope) -> Catalog {
        Catalog::new(&self.config.catalog_path, scope)
    }

    fn catalog_for(&self, plugin: &DiscoveredPlugin) -> Catalog {
        self.catalog(CatalogScope::for_context(
            plugin.context_name.as_deref().unwrap_or_default(),
        ))
    }

    /// Every plugin installed in the standalone scope or an active context.
    pub fn installed(&self) -> Result<Vec<PluginDescriptor>, ManagerError> {
        let mut plugins = Vec::new();
        for context in &self.config.contexts {
            plugins.extend(self.catalog(CatalogScope::Context(context.name.clone())).list()?);
        }
        plugins.extend(self.catalog(CatalogScope::Standalone).list()?);
        Ok(plugins)
    }

    /// Discover every configured source and annotate the result with what is
    /// installed.
    pub async fn available(&self) -> Result<DiscoveryReport, ManagerError> {
        let mut context_report = DiscoveryReport::default();
        let mut installed_context = Vec::new();
        for context in &self.config.contexts {
            let origin = Origin::Context {
                name: context.name.clone(),
                target: context.target,
            };
            context_report.merge(self.discoverer.discover(&context.sources, &origin).await?);
            installed_context.extend(self.catalog(CatalogScope::Context(context.name.clone())).list()?);
        }

        let standalone = self
            .discoverer
            .discover(&self.config.standalone_sources, &Origin::Standalone)
            .await?;
        let installed_standalone = self.catalog(CatalogScope::Standalone).list()?;

        let plugins = resolve_availability(
            context_report.plugins,
            standalone.plugins,
            &installed_context,
            &installed_standalone,
            self.config.default_standalone_discovery_type,
        );
        debug!("{} plugins available", plugins.len());

        let mut warnings = context_report.warnings;
        warnings.extend(standalone.warnings);
        Ok(DiscoveryReport { plugins, warnings })
    }

    /// Plugins of a local plugin tree, annotated with what is installed.
    pub async fn available_local(&self, path: &Path) -> Result<Vec<DiscoveredPlugin>, ManagerError> {
        let discovered = self.discoverer.discover_local(path).await?;
        let installed = self.catalog(CatalogScope::Standalone).list()?;
        Ok(resolve_availability(
            Vec::new(),
            discovered,
            &[],
            &installed,
            DiscoveryType::Local,
        ))
    }

    /// Find the installed plugin `name`, context scopes first.
    fn locate_installed(
        &self,
        name: &str,
        target: Option<Target>,
    ) -> Result<(Catalog, PluginDescriptor), ManagerError> {
        let mut scopes: Vec<CatalogScope> = self
            .config
            .contexts
            .iter()
            .map(|c| CatalogScope::Context(c.name.clone()))
            .collect();
        scopes.push(CatalogScope::Standalone);

        for scope in scopes {
            let catalog = self.catalog(scope);
            let mut matches: Vec<PluginDescriptor> = catalog
                .list()?
                .into_iter()
                .filter(|d| d.name == name && target.map_or(true, |t| d.target == t))
                .collect();
            match matches.len() {
                0 => continue,
                1 => {
                    let descriptor = matches.remove(0);
                    return Ok((catalog, descriptor));
                }
                _ => {
                    return Err(ManagerError::Ambiguous {
                        name: name.to_string(),
                    })
                }
            }
        }

        Err(ManagerError::NotInstalled {
            name: name.to_string(),
        })
    }

    /// Descriptor of an installed plugin.
    pub fn describe(&self, name: &str, target: Option<Target>) -> Result<PluginDescriptor, ManagerError> {
        Ok(self.locate_installed(name, target)?.1)
    }

    /// Forget an installed plugin. The binary stays on disk.
    pub fn delete(&self, name: &str, target: Option<Target>) -> Result<PluginDescriptor, ManagerError> {
        let (catalog, descriptor) = self.locate_installed(name, target)?;
        catalog.delete(&descriptor.identity())?;
        info!("Deleted plugin '{}' from {} catalog", descriptor.identity(), catalog.scope());
        Ok(descriptor)
    }

    /// Remove the catalog and every installed binary.
    pub fn clean(&self) -> Result<(), ManagerError> {
        pluma_catalog::clean(&self.config.catalog_path)?;
        match std::fs::remove_dir_all(&self.config.plugin_root) {
            Ok(()) => {
                info!("Removed {}", self.config.plugin_root.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ManagerError::io(&self.config.plugin_root, e)),
        }
    }

    /// The newest version a source offers for an installed plugin, when it is
    /// newer than the installed one under the configured tier.
    pub async fn check_update(
        &self,
        name: &str,
        target: Option<Target>,
    ) -> Result<Option<String>, ManagerError> {
        let (_, descriptor) = self.locate_installed(name, target)?;
        let report = self.available().await?;
        let Some(plugin) = report
            .plugins
            .iter()
            .find(|p| p.identity() == descriptor.identity())
        else {
            return Ok(None);
        };

        let candidates = &plugin.supported_versions;
        if !pluma_version::has_update(&descriptor.version, candidates, self.config.tier) {
            return Ok(None);
        }
        Ok(Some(pluma_version::find_version(candidates, self.config.tier)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate() {
        assert!(ManagerError::aggregate(Vec::new()).is_none());

        let single = ManagerError::aggregate(vec![ManagerError::NotFound {
            name: "a".to_string(),
        }])
        .unwrap();
        assert_eq!(single.to_string(), "unable to find plugin 'a'");

        let many = ManagerError::aggregate(vec![
            ManagerError::NotFound {
                name: "a".to_string(),
            },
            ManagerError::NotInstalled {
                name: "b".to_string(),
            },
        ])
        .unwrap();
        assert_eq!(
            many.to_string(),
            "[unable to find plugin 'a', could not get plugin path for plugin \"b\"]"
        );
        assert_eq!(many.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_error_kinds() {
        let unsupported = ManagerError::Discovery(DiscoveryError::Unsupported("gcp".to_string()));
        assert_eq!(unsupported.kind(), ErrorKind::Unsupported);

        let corrupted = ManagerError::Corrupted {
            plugin: "login".to_string(),
            version: "v1.0.0".to_string(),
            source: TrustError::Corrupted {
                plugin: "login".to_string(),
                expected: "aaa".to_string(),
                actual: "bbb".to_string(),
            },
        };
        assert_eq!(corrupted.kind(), ErrorKind::Corrupted);
        assert!(corrupted.to_string().contains("login:v1.0.0"));
        assert!(corrupted.to_string().contains("aaa"));
    }

    #[test]
    fn test_manager_config_from_client_config() {
        let config: ClientConfig = toml_config();
        let paths = ConfigPaths {
            config_file: PathBuf::from("/cfg/config.toml"),
            plugin_root: PathBuf::from("/data/plugins"),
            catalog_file: PathBuf::from("/cache/catalog.yaml"),
        };

        let manager = ManagerConfig::from_client_config(&config, &paths, None).unwrap();
        assert_eq!(manager.plugin_root, PathBuf::from("/data/plugins"));
        assert_eq!(manager.tier, StabilityTier::Experimental);
        assert_eq!(manager.contexts.len(), 1);
        assert_eq!(manager.contexts[0].target, Target::Tmc);
        assert_eq!(manager.contexts[0].sources[0].name(), "default-saas");
        assert_eq!(manager.standalone_sources.len(), 1);
    }

    fn toml_config() -> ClientConfig {
        use pluma_config::{Context, ContextType, CurrentContext};
        let mut config = ClientConfig::default();
        config.cli.unstable_version_selector = StabilityTier::Experimental;
        config.contexts.push(Context {
            name: "saas".to_string(),
            context_type: ContextType::Tmc,
            path: None,
            context: None,
            endpoint: Some("tmc.example.com:443".to_string()),
            discovery_sources: Vec::new(),
        });
        config.current_context = CurrentContext {
            k8s: None,
            tmc: Some("saas".to_string()),
        };
        config
    }
}
