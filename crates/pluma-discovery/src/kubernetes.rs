//! Discovery of `CLIPlugin` resources installed in a Kubernetes cluster.

use crate::resource::CliPlugin;
use crate::{DiscoveredPlugin, DiscoveryError};
use async_trait::async_trait;
use pluma_platform::locate_program;
use pluma_types::DiscoveryType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

/// Custom resource definition that publishes plugins in a cluster.
pub const CLI_PLUGIN_CRD: &str = "cliplugins.cli.pluma.dev";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubernetesDiscovery {
    pub name: String,
    /// Kubeconfig file; the ambient configuration when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Kubeconfig context; the current context when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Read access to the plugin resources of a cluster.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn has_cli_plugin_crd(&self, source: &KubernetesDiscovery) -> Result<bool, DiscoveryError>;

    async fn list_cli_plugins(&self, source: &KubernetesDiscovery) -> Result<Vec<CliPlugin>, DiscoveryError>;
}

impl KubernetesDiscovery {
    pub fn new(name: impl Into<String>, path: Option<PathBuf>, context: Option<String>) -> Self {
        Self {
            name: name.into(),
            path,
            context,
        }
    }

    pub(crate) async fn list(&self, client: &dyn ClusterClient) -> Result<Vec<DiscoveredPlugin>, DiscoveryError> {
        // A cluster without the CRD simply offers no plugins
        match client.has_cli_plugin_crd(self).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Cluster for '{}' does not serve {}", self.name, CLI_PLUGIN_CRD);
                return Ok(Vec::new());
            }
            Err(err) => {
                debug!("Could not check for {} in '{}': {}", CLI_PLUGIN_CRD, self.name, err);
                return Ok(Vec::new());
            }
        }

        Ok(client
            .list_cli_plugins(self)
            .await?
            .into_iter()
            .map(|resource| resource.into_discovered(&self.name, DiscoveryType::Kubernetes))
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct ResourceList {
    #[serde(default)]
    items: Vec<CliPlugin>,
}

/// [`ClusterClient`] backed by the `kubectl` binary.
#[derive(Debug, Clone)]
pub struct KubectlClient {
    program: String,
}

impl Default for KubectlClient {
    fn default() -> Self {
        Self::new()
    }
}

impl KubectlClient {
    pub fn new() -> Self {
        Self::with_program("kubectl")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, source: &KubernetesDiscovery, args: &[&str]) -> Result<String, DiscoveryError> {
        let program = locate_program(&self.program).map_err(|e| DiscoveryError::Cluster(e.to_string()))?;

        let mut full_args: Vec<String> = Vec::new();
        if let Some(path) = &source.path {
            full_args.push(format!("--kubeconfig={}", path.display()));
        }
        if let Some(context) = &source.context {
            full_args.push(format!("--context={}", context));
        }
        full_args.extend(args.iter().map(|a| a.to_string()));
        debug!("Running {} {}", program.display(), full_args.join(" "));

        let output = tokio::task::spawn_blocking(move || Command::new(&program).args(&full_args).output())
            .await
            .map_err(|e| DiscoveryError::Cluster(format!("Task join error: {}", e)))?
            .map_err(|e| DiscoveryError::Cluster(format!("Failed to run kubectl: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DiscoveryError::Cluster(stderr.trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ClusterClient for KubectlClient {
    async fn has_cli_plugin_crd(&self, source: &KubernetesDiscovery) -> Result<bool, DiscoveryError> {
        let stdout = self
            .run(source, &["get", "crd", CLI_PLUGIN_CRD, "--ignore-not-found", "-o", "name"])
            .await?;
        Ok(!stdout.trim().is_empty())
    }

    async fn list_cli_plugins(&self, source: &KubernetesDiscovery) -> Result<Vec<CliPlugin>, DiscoveryError> {
        let stdout = self.run(source, &["get", CLI_PLUGIN_CRD, "-o", "json"]).await?;
        let list: ResourceList =
            serde_json::from_str(&stdout).map_err(|source_err| DiscoveryError::MalformedResponse {
                origin: format!("kubernetes discovery '{}'", source.name),
                source: source_err,
            })?;
        Ok(list.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::CliPluginSpec;
    use pluma_types::Target;

    struct FakeCluster {
        crd: Result<bool, ()>,
        plugins: Result<Vec<CliPlugin>, ()>,
    }

    #[async_trait]
    impl ClusterClient for FakeCluster {
        async fn has_cli_plugin_crd(&self, _source: &KubernetesDiscovery) -> Result<bool, DiscoveryError> {
            self.crd
                .map_err(|_| DiscoveryError::Cluster("connection refused".to_string()))
        }

        async fn list_cli_plugins(&self, _source: &KubernetesDiscovery) -> Result<Vec<CliPlugin>, DiscoveryError> {
            self.plugins
                .clone()
                .map_err(|_| DiscoveryError::Cluster("forbidden".to_string()))
        }
    }

    fn cluster_plugin() -> CliPlugin {
        CliPlugin::new(
            "cluster",
            CliPluginSpec {
                recommended_version: "v1.0.0".to_string(),
                target: Target::K8s,
                ..Default::default()
            },
        )
    }

    fn source() -> KubernetesDiscovery {
        KubernetesDiscovery::new("prod-cluster", None, Some("prod".to_string()))
    }

    #[tokio::test]
    async fn test_list_cluster_plugins() {
        let cluster = FakeCluster {
            crd: Ok(true),
            plugins: Ok(vec![cluster_plugin()]),
        };
        let plugins = source().list(&cluster).await.unwrap();
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].source_name, "prod-cluster");
        assert_eq!(plugins[0].discovery_type, Some(DiscoveryType::Kubernetes));
    }

    #[tokio::test]
    async fn test_missing_or_unreachable_crd_yields_nothing() {
        for crd in [Ok(false), Err(())] {
            let cluster = FakeCluster {
                crd,
                plugins: Ok(vec![cluster_plugin()]),
            };
            assert!(source().list(&cluster).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_list_failure_is_error() {
        let cluster = FakeCluster {
            crd: Ok(true),
            plugins: Err(()),
        };
        assert!(matches!(
            source().list(&cluster).await,
            Err(DiscoveryError::Cluster(_))
        ));
    }

    #[test]
    fn test_parse_kubectl_list() {
        let json = r#"{"apiVersion":"v1","kind":"List","items":[
            {"apiVersion":"cli.pluma.dev/v1alpha1","kind":"CLIPlugin",
             "metadata":{"name":"cluster","uid":"abc"},
             "spec":{"recommendedVersion":"v1.0.0","target":"kubernetes","artifacts":{}}}
        ]}"#;
        let list: ResourceList = serde_json::from_str(json).unwrap();
        assert_eq!(list.items[0].metadata.name, "cluster");
        assert_eq!(list.items[0].spec.target, Target::K8s);
    }
}
