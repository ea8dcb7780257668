//! Plugin discovery.
//!
//! A [`DiscoverySource`] is one configured origin of plugin metadata. Every
//! variant yields the same [`DiscoveredPlugin`] shape, so callers never care
//! whether a plugin came from a directory, an image, a REST endpoint or a
//! cluster. [`Discoverer`] runs a set of sources and either skips failing
//! ones, reporting them as warnings, or fails the whole pass.

mod kubernetes;
mod local;
mod oci;
mod resource;
mod rest;

pub use kubernetes::{ClusterClient, KubectlClient, KubernetesDiscovery, CLI_PLUGIN_CRD};
pub use local::{LocalDiscovery, DISCOVERY_DIR, MANIFEST_FILE, PLUGIN_FILE};
pub use oci::OciDiscovery;
pub use resource::{load_resources, CliPlugin, CliPluginSpec, ObjectMeta, CLI_PLUGIN_KIND};
pub use rest::{RestDiscovery, DEFAULT_REST_BASE_PATH};

use pluma_distribution::{ArtifactFetcher, Distribution, DistributionError, ImagePuller};
use pluma_platform::PlatformInfo;
use pluma_types::{DiscoveryType, PluginDescriptor, PluginIdentity, PluginStatus, Scope, Target};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse {}: {source}", .path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid response from {origin}: {source}")]
    MalformedResponse {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("discovery source type '{0}' is not yet supported")]
    Unsupported(String),

    #[error("unable to find plugin binary for {plugin:?} at {}", .path.display())]
    MissingBinary { plugin: String, path: PathBuf },

    #[error("plugin '{plugin}' not found in discovery '{source_name}'")]
    NotFound { plugin: String, source_name: String },

    #[error("request to {url} failed with status {status}")]
    Http { url: String, status: u16 },

    #[error("cluster query failed: {0}")]
    Cluster(String),

    #[error("unable to list plugins from discovery '{name}': {source}")]
    Source {
        name: String,
        #[source]
        source: Box<DiscoveryError>,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error(transparent)]
    Distribution(#[from] DistributionError),
}

impl DiscoveryError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// A plugin as reported by a discovery source.
///
/// Recomputed on every discovery pass; never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveredPlugin {
    pub name: String,
    pub target: Target,
    pub scope: Scope,
    /// Set iff `scope` is [`Scope::Context`]
    pub context_name: Option<String>,
    pub description: String,
    pub recommended_version: String,
    pub supported_versions: Vec<String>,
    /// Source variant; unknown for entries synthesized from the catalog
    pub discovery_type: Option<DiscoveryType>,
    /// Configured name of the source
    pub source_name: String,
    pub distribution: Distribution,
    pub status: PluginStatus,
    pub installed_version: Option<String>,
}

impl DiscoveredPlugin {
    pub fn identity(&self) -> PluginIdentity {
        PluginIdentity::new(self.name.clone(), self.target)
    }

    /// Entry for an installed plugin no source reports anymore.
    pub fn from_descriptor(descriptor: &PluginDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            target: descriptor.target,
            scope: Scope::Standalone,
            description: descriptor.description.clone(),
            recommended_version: descriptor.version.clone(),
            supported_versions: vec![descriptor.version.clone()],
            source_name: descriptor.discovery.clone(),
            status: PluginStatus::Installed,
            installed_version: Some(descriptor.version.clone()),
            ..Default::default()
        }
    }
}

/// A configured origin of plugin metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DiscoverySource {
    Local(LocalDiscovery),
    Oci(OciDiscovery),
    Rest(RestDiscovery),
    Kubernetes(KubernetesDiscovery),
    /// Deprecated bucket source, accepted in configuration only
    Gcp(GcpDiscovery),
}

/// Deprecated bucket-backed source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcpDiscovery {
    pub name: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub manifest_path: String,
}

impl DiscoverySource {
    pub fn name(&self) -> &str {
        match self {
            DiscoverySource::Local(s) => &s.name,
            DiscoverySource::Oci(s) => &s.name,
            DiscoverySource::Rest(s) => &s.name,
            DiscoverySource::Kubernetes(s) => &s.name,
            DiscoverySource::Gcp(s) => &s.name,
        }
    }

    pub fn discovery_type(&self) -> DiscoveryType {
        match self {
            DiscoverySource::Local(_) => DiscoveryType::Local,
            DiscoverySource::Oci(_) => DiscoveryType::Oci,
            DiscoverySource::Rest(_) => DiscoveryType::Rest,
            DiscoverySource::Kubernetes(_) => DiscoveryType::Kubernetes,
            DiscoverySource::Gcp(_) => DiscoveryType::Gcp,
        }
    }

    /// Human-readable location of the source.
    pub fn location(&self) -> String {
        match self {
            DiscoverySource::Local(s) => s.path.display().to_string(),
            DiscoverySource::Oci(s) => s.image.clone(),
            DiscoverySource::Rest(s) => format!("{}/{}", s.endpoint, s.base_path),
            DiscoverySource::Kubernetes(s) => match (&s.path, &s.context) {
                (Some(path), Some(context)) => format!("{}:{}", path.display(), context),
                (Some(path), None) => path.display().to_string(),
                (None, Some(context)) => context.clone(),
                (None, None) => "in-cluster".to_string(),
            },
            DiscoverySource::Gcp(s) => format!("{}/{}", s.bucket, s.manifest_path),
        }
    }

    /// List every plugin this source offers.
    pub async fn list(&self, clients: &DiscoveryClients) -> Result<Vec<DiscoveredPlugin>, DiscoveryError> {
        match self {
            DiscoverySource::Local(s) => s.list(&clients.platform),
            DiscoverySource::Oci(s) => s.list(clients.puller.as_ref()).await,
            DiscoverySource::Rest(s) => s.list(&clients.http).await,
            DiscoverySource::Kubernetes(s) => s.list(clients.cluster.as_ref()).await,
            DiscoverySource::Gcp(_) => Err(DiscoveryError::Unsupported("gcp".to_string())),
        }
    }

    /// Look up one plugin by name.
    pub async fn describe(
        &self,
        clients: &DiscoveryClients,
        name: &str,
    ) -> Result<DiscoveredPlugin, DiscoveryError> {
        if let DiscoverySource::Rest(s) = self {
            return s.describe(&clients.http, name).await;
        }
        self.list(clients)
            .await?
            .into_iter()
            .find(|p| p.name == name)
            .ok_or_else(|| DiscoveryError::NotFound {
                plugin: name.to_string(),
                source_name: self.name().to_string(),
            })
    }
}

/// External collaborators the sources talk through.
#[derive(Clone)]
pub struct DiscoveryClients {
    pub http: reqwest::Client,
    pub puller: Arc<dyn ImagePuller>,
    pub cluster: Arc<dyn ClusterClient>,
    pub platform: PlatformInfo,
}

impl DiscoveryClients {
    /// Share the fetcher's HTTP client and image puller.
    pub fn new(fetcher: &ArtifactFetcher, platform: PlatformInfo) -> Self {
        Self {
            http: fetcher.client().clone(),
            puller: fetcher.puller(),
            cluster: Arc::new(KubectlClient::new()),
            platform,
        }
    }

    pub fn with_cluster(mut self, cluster: Arc<dyn ClusterClient>) -> Self {
        self.cluster = cluster;
        self
    }

    pub fn with_puller(mut self, puller: Arc<dyn ImagePuller>) -> Self {
        self.puller = puller;
        self
    }
}

/// How a discovery pass treats a failing source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryPolicy {
    /// Skip the source and report a warning
    #[default]
    BestEffort,
    /// Fail the whole pass
    Strict,
}

/// Which scope a discovery pass runs for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Standalone,
    Context { name: String, target: Target },
}

impl Origin {
    fn stamp(&self, mut plugin: DiscoveredPlugin) -> DiscoveredPlugin {
        plugin.status = PluginStatus::NotInstalled;
        plugin.installed_version = None;
        match self {
            Origin::Standalone => {
                plugin.scope = Scope::Standalone;
                plugin.context_name = None;
            }
            Origin::Context { name, target } => {
                plugin.scope = Scope::Context;
                plugin.context_name = Some(name.clone());
                if plugin.target.is_none() {
                    plugin.target = *target;
                }
            }
        }
        plugin
    }
}

/// A source that was skipped during a best-effort pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceWarning {
    pub source: String,
    pub message: String,
}

impl std::fmt::Display for SourceWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unable to list plugin from discovery '{}': {}",
            self.source, self.message
        )
    }
}

/// Result of a discovery pass.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    pub plugins: Vec<DiscoveredPlugin>,
    pub warnings: Vec<SourceWarning>,
}

impl DiscoveryReport {
    pub fn merge(&mut self, other: DiscoveryReport) {
        self.plugins.extend(other.plugins);
        self.warnings.extend(other.warnings);
    }
}

/// Runs discovery sources under a failure policy.
#[derive(Clone)]
pub struct Discoverer {
    clients: DiscoveryClients,
    policy: DiscoveryPolicy,
}

impl Discoverer {
    pub fn new(clients: DiscoveryClients, policy: DiscoveryPolicy) -> Self {
        Self { clients, policy }
    }

    pub fn clients(&self) -> &DiscoveryClients {
        &self.clients
    }

    pub fn policy(&self) -> DiscoveryPolicy {
        self.policy
    }

    /// List all sources and stamp the results with `origin`'s scope.
    pub async fn discover(
        &self,
        sources: &[DiscoverySource],
        origin: &Origin,
    ) -> Result<DiscoveryReport, DiscoveryError> {
        let mut report = DiscoveryReport::default();

        for source in sources {
            match source.list(&self.clients).await {
                Ok(plugins) => {
                    debug!("Discovery '{}' returned {} plugins", source.name(), plugins.len());
                    report
                        .plugins
                        .extend(plugins.into_iter().map(|p| origin.stamp(p)));
                }
                Err(err) => match self.policy {
                    DiscoveryPolicy::Strict => {
                        return Err(DiscoveryError::Source {
                            name: source.name().to_string(),
                            source: Box::new(err),
                        })
                    }
                    DiscoveryPolicy::BestEffort => {
                        debug!("Skipping discovery '{}': {}", source.name(), err);
                        report.warnings.push(SourceWarning {
                            source: source.name().to_string(),
                            message: err.to_string(),
                        });
                    }
                },
            }
        }

        Ok(report)
    }

    /// Discover the plugins of a local plugin tree as standalone plugins.
    pub async fn discover_local(
        &self,
        path: impl Into<PathBuf>,
    ) -> Result<Vec<DiscoveredPlugin>, DiscoveryError> {
        let source = LocalDiscovery::new("", path);
        let plugins = source.list(&self.clients.platform)?;
        Ok(plugins
            .into_iter()
            .map(|p| Origin::Standalone.stamp(p))
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;

    /// Puller that copies a prepared directory.
    pub struct DirPuller(pub PathBuf);

    #[async_trait]
    impl ImagePuller for DirPuller {
        async fn pull(&self, _image: &str, dest: &Path) -> Result<(), DistributionError> {
            for entry in std::fs::read_dir(&self.0)? {
                let entry = entry?;
                std::fs::copy(entry.path(), dest.join(entry.file_name()))?;
            }
            Ok(())
        }
    }

    pub fn clients(puller: Arc<dyn ImagePuller>) -> DiscoveryClients {
        DiscoveryClients::new(&ArtifactFetcher::new(), PlatformInfo::new("linux", "amd64"))
            .with_puller(puller)
    }

    pub fn resource(name: &str, target: &str, version: &str) -> String {
        let target = if target.is_empty() {
            String::new()
        } else {
            format!("\n  target: {}", target)
        };
        format!(
            r#"apiVersion: cli.pluma.dev/v1alpha1
kind: CLIPlugin
metadata:
  name: {name}
spec:
  description: The {name} plugin
  recommendedVersion: {version}{target}
  artifacts:
    {version}:
      - type: oci
        image: registry.pluma.dev/plugins/{name}:{version}
        os: linux
        arch: amd64
"#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn local_source(name: &str, dir: &TempDir) -> DiscoverySource {
        DiscoverySource::Local(LocalDiscovery::new(name, dir.path()))
    }

    #[test]
    fn test_source_config_roundtrip() {
        let toml_like = serde_json::json!({
            "type": "rest",
            "name": "default-prod",
            "endpoint": "https://prod.example.com",
            "base_path": "v1alpha1/system/binaries/plugins"
        });
        let source: DiscoverySource = serde_json::from_value(toml_like).unwrap();
        assert_eq!(source.discovery_type(), DiscoveryType::Rest);
        assert_eq!(source.name(), "default-prod");

        let gcp: DiscoverySource = serde_json::from_value(serde_json::json!({
            "type": "gcp",
            "name": "legacy"
        }))
        .unwrap();
        assert_eq!(gcp.discovery_type(), DiscoveryType::Gcp);
    }

    #[tokio::test]
    async fn test_best_effort_skips_failing_source() {
        let good = TempDir::new().unwrap();
        fs::write(good.path().join("login.yaml"), resource("login", "", "v1.0.0")).unwrap();

        let sources = vec![
            DiscoverySource::Gcp(GcpDiscovery {
                name: "legacy".to_string(),
                bucket: String::new(),
                manifest_path: String::new(),
            }),
            local_source("dev", &good),
        ];

        let clients = clients(Arc::new(DirPuller(good.path().to_path_buf())));
        let discoverer = Discoverer::new(clients.clone(), DiscoveryPolicy::BestEffort);
        let report = discoverer.discover(&sources, &Origin::Standalone).await.unwrap();
        assert_eq!(report.plugins.len(), 1);
        assert_eq!(report.plugins[0].scope, Scope::Standalone);
        assert_eq!(report.plugins[0].source_name, "dev");
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].source, "legacy");
        assert!(report.warnings[0].message.contains("not yet supported"));

        let strict = Discoverer::new(clients, DiscoveryPolicy::Strict);
        let err = strict.discover(&sources, &Origin::Standalone).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Source { ref name, .. } if name == "legacy"));
    }

    #[tokio::test]
    async fn test_context_origin_inherits_target() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.yaml"), resource("cluster", "", "v1.0.0")).unwrap();
        fs::write(dir.path().join("b.yaml"), resource("apply", "tmc", "v1.0.0")).unwrap();

        let discoverer = Discoverer::new(
            clients(Arc::new(DirPuller(dir.path().to_path_buf()))),
            DiscoveryPolicy::BestEffort,
        );
        let origin = Origin::Context {
            name: "prod".to_string(),
            target: Target::K8s,
        };
        let report = discoverer
            .discover(&[local_source("ctx", &dir)], &origin)
            .await
            .unwrap();

        let cluster = report.plugins.iter().find(|p| p.name == "cluster").unwrap();
        assert_eq!(cluster.target, Target::K8s);
        assert_eq!(cluster.scope, Scope::Context);
        assert_eq!(cluster.context_name.as_deref(), Some("prod"));

        let apply = report.plugins.iter().find(|p| p.name == "apply").unwrap();
        assert_eq!(apply.target, Target::Tmc);
    }

    #[tokio::test]
    async fn test_describe_by_name() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("login.yaml"), resource("login", "", "v1.0.0")).unwrap();
        let source = local_source("dev", &dir);
        let clients = clients(Arc::new(DirPuller(dir.path().to_path_buf())));

        let plugin = source.describe(&clients, "login").await.unwrap();
        assert_eq!(plugin.recommended_version, "v1.0.0");
        assert!(matches!(
            source.describe(&clients, "missing").await,
            Err(DiscoveryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_from_descriptor() {
        let descriptor = PluginDescriptor {
            name: "login".to_string(),
            version: "v0.9.0".to_string(),
            discovery: "old-source".to_string(),
            ..Default::default()
        };
        let plugin = DiscoveredPlugin::from_descriptor(&descriptor);
        assert_eq!(plugin.status, PluginStatus::Installed);
        assert_eq!(plugin.supported_versions, vec!["v0.9.0"]);
        assert_eq!(plugin.source_name, "old-source");
        assert!(plugin.discovery_type.is_none());
    }
}
