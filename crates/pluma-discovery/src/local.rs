//! Discovery from a local directory.
//!
//! Three layouts are understood:
//! - a legacy tree with a root `manifest.yaml`, one `plugin.yaml` per plugin
//!   and prebuilt binaries under `<name>/<version>/`;
//! - a tree with a `discovery/` directory whose subdirectories hold
//!   `CLIPlugin` resources;
//! - a plain directory of `CLIPlugin` resources.

use crate::resource::{load_resources, CliPlugin, CliPluginSpec};
use crate::{DiscoveredPlugin, DiscoveryError};
use pluma_platform::PlatformInfo;
use pluma_types::{Artifact, ArtifactLocation, DiscoveryType, PluginDescriptor};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "manifest.yaml";
pub const PLUGIN_FILE: &str = "plugin.yaml";
pub const DISCOVERY_DIR: &str = "discovery";

const CORE_PLUGIN: &str = "core";

/// A directory of plugin definitions on this machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalDiscovery {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct LegacyManifest {
    #[serde(default)]
    plugins: Vec<LegacyManifestEntry>,
}

#[derive(Debug, Deserialize)]
struct LegacyManifestEntry {
    name: String,
}

impl LocalDiscovery {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    pub fn is_legacy(&self) -> bool {
        self.path.join(MANIFEST_FILE).is_file()
    }

    pub(crate) fn list(&self, platform: &PlatformInfo) -> Result<Vec<DiscoveredPlugin>, DiscoveryError> {
        if self.is_legacy() {
            return self.list_legacy(platform);
        }

        let discovery_dir = self.path.join(DISCOVERY_DIR);
        if !discovery_dir.is_dir() {
            return self.list_resources(&self.path);
        }

        let mut subdirs: Vec<PathBuf> = std::fs::read_dir(&discovery_dir)
            .map_err(|e| DiscoveryError::io(&discovery_dir, e))?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        subdirs.sort();

        let mut plugins = Vec::new();
        for dir in subdirs {
            plugins.extend(self.list_resources(&dir)?);
        }
        Ok(plugins)
    }

    fn list_resources(&self, dir: &Path) -> Result<Vec<DiscoveredPlugin>, DiscoveryError> {
        if !dir.is_dir() {
            return Err(DiscoveryError::io(
                dir,
                std::io::Error::new(std::io::ErrorKind::NotFound, "directory does not exist"),
            ));
        }

        Ok(load_resources(dir)?
            .into_iter()
            .map(|resource| {
                let mut plugin = resource.into_discovered(&self.name, DiscoveryType::Local);
                // Relative artifact paths are relative to the tree root
                for artifact in plugin.distribution.artifacts_mut() {
                    if let ArtifactLocation::Local(path) = artifact.location() {
                        if path.is_relative() {
                            artifact.uri = self.path.join(path).display().to_string();
                        }
                    }
                }
                plugin
            })
            .collect())
    }

    fn list_legacy(&self, platform: &PlatformInfo) -> Result<Vec<DiscoveredPlugin>, DiscoveryError> {
        let root = std::fs::canonicalize(&self.path).map_err(|e| DiscoveryError::io(&self.path, e))?;
        let manifest: LegacyManifest = read_yaml(&root.join(MANIFEST_FILE))?;

        let mut plugins = Vec::new();
        for entry in manifest.plugins {
            if entry.name == CORE_PLUGIN {
                continue;
            }

            let descriptor: PluginDescriptor = read_yaml(&root.join(&entry.name).join(PLUGIN_FILE))?;
            let binary = root
                .join(&entry.name)
                .join(&descriptor.version)
                .join(platform.legacy_binary_name(&entry.name));
            if !binary.is_file() {
                return Err(DiscoveryError::MissingBinary {
                    plugin: entry.name,
                    path: binary,
                });
            }

            let mut artifact = Artifact::uri(binary.display().to_string(), &platform.os, &platform.arch);
            artifact.kind = "local".to_string();
            let mut artifacts = BTreeMap::new();
            artifacts.insert(descriptor.version.clone(), vec![artifact]);

            let spec = CliPluginSpec {
                description: descriptor.description,
                recommended_version: descriptor.version,
                target: descriptor.target,
                artifacts,
            };
            plugins.push(CliPlugin::new(entry.name, spec).into_discovered(&self.name, DiscoveryType::Local));
        }
        Ok(plugins)
    }
}

fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, DiscoveryError> {
    let content = std::fs::read_to_string(path).map_err(|e| DiscoveryError::io(path, e))?;
    serde_yaml::from_str(&content).map_err(|source| DiscoveryError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::resource;
    use pluma_types::Target;
    use std::fs;
    use tempfile::TempDir;

    fn linux() -> PlatformInfo {
        PlatformInfo::new("linux", "amd64")
    }

    fn write_legacy_plugin(root: &Path, name: &str, version: &str) {
        let dir = root.join(name);
        fs::create_dir_all(dir.join(version)).unwrap();
        fs::write(
            dir.join(PLUGIN_FILE),
            format!("name: {name}\ndescription: legacy {name}\nversion: {version}\ngroup: System\n"),
        )
        .unwrap();
        fs::write(
            dir.join(version).join(linux().legacy_binary_name(name)),
            b"binary",
        )
        .unwrap();
    }

    #[test]
    fn test_legacy_layout() {
        let root = TempDir::new().unwrap();
        fs::write(
            root.path().join(MANIFEST_FILE),
            "plugins:\n  - name: core\n  - name: login\n  - name: cluster\n",
        )
        .unwrap();
        write_legacy_plugin(root.path(), "login", "v0.14.0");
        write_legacy_plugin(root.path(), "cluster", "v0.2.0");

        let source = LocalDiscovery::new("", root.path());
        assert!(source.is_legacy());
        let plugins = source.list(&linux()).unwrap();
        assert_eq!(plugins.len(), 2);

        let login = &plugins[0];
        assert_eq!(login.name, "login");
        assert_eq!(login.recommended_version, "v0.14.0");
        assert_eq!(login.discovery_type, Some(DiscoveryType::Local));
        let artifact = login
            .distribution
            .describe_artifact("v0.14.0", "linux", "amd64")
            .unwrap();
        assert!(artifact.uri.ends_with("login/v0.14.0/tanzu-login-linux_amd64"));
    }

    #[test]
    fn test_legacy_layout_missing_binary() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join(MANIFEST_FILE), "plugins:\n  - name: login\n").unwrap();
        write_legacy_plugin(root.path(), "login", "v0.14.0");

        let err = LocalDiscovery::new("", root.path())
            .list(&PlatformInfo::new("darwin", "arm64"))
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::MissingBinary { .. }));
    }

    #[test]
    fn test_discovery_subdirectories() {
        let root = TempDir::new().unwrap();
        let standalone = root.path().join(DISCOVERY_DIR).join("standalone");
        let context = root.path().join(DISCOVERY_DIR).join("context");
        fs::create_dir_all(&standalone).unwrap();
        fs::create_dir_all(&context).unwrap();
        fs::write(standalone.join("login.yaml"), resource("login", "", "v1.0.0")).unwrap();
        fs::write(context.join("cluster.yaml"), resource("cluster", "k8s", "v1.0.0")).unwrap();

        let plugins = LocalDiscovery::new("dev", root.path()).list(&linux()).unwrap();
        let names: Vec<_> = plugins.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["cluster", "login"]);
        assert_eq!(plugins[0].target, Target::K8s);
    }

    #[test]
    fn test_relative_artifact_uri_resolves_against_root() {
        let root = TempDir::new().unwrap();
        fs::write(
            root.path().join("login.yaml"),
            "kind: CLIPlugin\nmetadata:\n  name: login\nspec:\n  recommendedVersion: v1.0.0\n  artifacts:\n    v1.0.0:\n      - uri: v1.0.0/pluma-login\n        os: linux\n        arch: amd64\n",
        )
        .unwrap();

        let plugins = LocalDiscovery::new("dev", root.path()).list(&linux()).unwrap();
        let artifact = plugins[0]
            .distribution
            .describe_artifact("v1.0.0", "linux", "amd64")
            .unwrap();
        assert_eq!(
            PathBuf::from(&artifact.uri),
            root.path().join("v1.0.0/pluma-login")
        );
    }

    #[test]
    fn test_missing_directory_is_error() {
        let source = LocalDiscovery::new("gone", "/nonexistent/pluma/discovery");
        assert!(matches!(source.list(&linux()), Err(DiscoveryError::Io { .. })));
    }
}
