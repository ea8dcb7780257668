//! Declarative `CLIPlugin` resources.

use crate::{DiscoveredPlugin, DiscoveryError};
use pluma_distribution::Distribution;
use pluma_types::{Artifact, DiscoveryType, Target};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

pub const CLI_PLUGIN_KIND: &str = "CLIPlugin";

/// One plugin as published by a discovery source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CliPlugin {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: CliPluginSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CliPluginSpec {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub recommended_version: String,
    #[serde(default)]
    pub target: Target,
    /// Version to the artifacts built for it
    #[serde(default)]
    pub artifacts: BTreeMap<String, Vec<Artifact>>,
}

impl CliPlugin {
    pub fn new(name: impl Into<String>, spec: CliPluginSpec) -> Self {
        Self {
            api_version: String::new(),
            kind: CLI_PLUGIN_KIND.to_string(),
            metadata: ObjectMeta { name: name.into() },
            spec,
        }
    }

    pub fn into_discovered(self, source_name: &str, discovery_type: DiscoveryType) -> DiscoveredPlugin {
        let distribution = Distribution::new(self.spec.artifacts);
        DiscoveredPlugin {
            name: self.metadata.name,
            target: self.spec.target,
            description: self.spec.description,
            recommended_version: self.spec.recommended_version,
            supported_versions: distribution.versions(),
            discovery_type: Some(discovery_type),
            source_name: source_name.to_string(),
            distribution,
            ..Default::default()
        }
    }
}

/// Load every `CLIPlugin` document from the YAML files below `dir`.
///
/// Documents of other kinds are skipped; files that fail to parse are errors.
pub fn load_resources(dir: &Path) -> Result<Vec<CliPlugin>, DiscoveryError> {
    let mut plugins = Vec::new();

    for entry in walkdir::WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| DiscoveryError::io(dir, e.into()))?;
        let path = entry.path();
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        if !entry.file_type().is_file() || !is_yaml {
            continue;
        }

        let content = std::fs::read_to_string(path).map_err(|e| DiscoveryError::io(path, e))?;
        let malformed = |source| DiscoveryError::Malformed {
            path: path.to_path_buf(),
            source,
        };

        for document in serde_yaml::Deserializer::from_str(&content) {
            let value = serde_yaml::Value::deserialize(document).map_err(malformed)?;
            if value.is_null() {
                continue;
            }
            let kind = value
                .get("kind")
                .and_then(|k| k.as_str())
                .unwrap_or(CLI_PLUGIN_KIND);
            if kind != CLI_PLUGIN_KIND {
                debug!("Skipping {} resource in {}", kind, path.display());
                continue;
            }
            plugins.push(serde_yaml::from_value(value).map_err(malformed)?);
        }
    }

    Ok(plugins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::resource;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_resources() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("login.yaml"), resource("login", "", "v1.0.0")).unwrap();
        fs::write(
            dir.path().join("multi.yml"),
            format!(
                "{}---\nkind: Namespace\nmetadata:\n  name: ignored\n",
                resource("cluster", "k8s", "v0.3.0")
            ),
        )
        .unwrap();
        fs::write(dir.path().join("README.md"), "not yaml").unwrap();

        let plugins = load_resources(dir.path()).unwrap();
        assert_eq!(plugins.len(), 2);
        assert_eq!(plugins[0].metadata.name, "login");
        assert_eq!(plugins[1].spec.target, Target::K8s);
    }

    #[test]
    fn test_malformed_resource() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("bad.yaml"), "kind: CLIPlugin\nspec: [1, 2\n").unwrap();
        assert!(matches!(
            load_resources(dir.path()),
            Err(DiscoveryError::Malformed { .. })
        ));
    }

    #[test]
    fn test_into_discovered() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("login.yaml"), resource("login", "tmc", "v1.2.0")).unwrap();
        let plugin = load_resources(dir.path())
            .unwrap()
            .remove(0)
            .into_discovered("central", DiscoveryType::Oci);

        assert_eq!(plugin.name, "login");
        assert_eq!(plugin.target, Target::Tmc);
        assert_eq!(plugin.recommended_version, "v1.2.0");
        assert_eq!(plugin.supported_versions, vec!["v1.2.0"]);
        assert_eq!(plugin.discovery_type, Some(DiscoveryType::Oci));
        let artifact = plugin
            .distribution
            .describe_artifact("v1.2.0", "linux", "amd64")
            .unwrap();
        assert_eq!(artifact.image, "registry.pluma.dev/plugins/login:v1.2.0");
    }
}
