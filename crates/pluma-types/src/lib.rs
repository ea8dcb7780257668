//! Core types for the Pluma plugin manager.
//!
//! This crate defines the data model shared by discovery, installation and
//! the catalog: plugin identities, installed descriptors and artifact
//! references.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypesError {
    #[error("unknown target '{0}', expected one of: kubernetes[k8s], mission-control[tmc]")]
    UnknownTarget(String),
    #[error("unknown discovery type '{0}'")]
    UnknownDiscoveryType(String),
    #[error("invalid plugin selector '{0}'")]
    InvalidSelector(String),
}

/// The audience a plugin is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Target {
    /// Target-less plugin
    #[default]
    None,
    /// Kubernetes
    K8s,
    /// Mission control
    Tmc,
}

impl Target {
    pub fn as_str(&self) -> &'static str {
        match self {
            Target::None => "none",
            Target::K8s => "k8s",
            Target::Tmc => "tmc",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Target::None)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Target::None),
            "k8s" | "kubernetes" => Ok(Target::K8s),
            "tmc" | "mission-control" => Ok(Target::Tmc),
            other => Err(TypesError::UnknownTarget(other.to_string())),
        }
    }
}

impl TryFrom<String> for Target {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Target> for String {
    fn from(target: Target) -> Self {
        target.as_str().to_string()
    }
}

/// Whether an installation belongs to no particular context or to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    Standalone,
    Context,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Standalone => write!(f, "standalone"),
            Scope::Context => write!(f, "context"),
        }
    }
}

/// The kind of discovery source a plugin was found through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryType {
    Local,
    #[default]
    Oci,
    Rest,
    Kubernetes,
    Gcp,
}

impl DiscoveryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryType::Local => "local",
            DiscoveryType::Oci => "oci",
            DiscoveryType::Rest => "rest",
            DiscoveryType::Kubernetes => "kubernetes",
            DiscoveryType::Gcp => "gcp",
        }
    }
}

impl fmt::Display for DiscoveryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscoveryType {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(DiscoveryType::Local),
            "oci" => Ok(DiscoveryType::Oci),
            "rest" => Ok(DiscoveryType::Rest),
            "kubernetes" | "k8s" => Ok(DiscoveryType::Kubernetes),
            "gcp" => Ok(DiscoveryType::Gcp),
            other => Err(TypesError::UnknownDiscoveryType(other.to_string())),
        }
    }
}

/// Installation status of an available plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PluginStatus {
    #[serde(rename = "installed")]
    Installed,
    #[default]
    #[serde(rename = "not installed")]
    NotInstalled,
    #[serde(rename = "update available")]
    UpdateAvailable,
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginStatus::Installed => write!(f, "installed"),
            PluginStatus::NotInstalled => write!(f, "not installed"),
            PluginStatus::UpdateAvailable => write!(f, "update available"),
        }
    }
}

/// Identifies a plugin family: the same name may exist under several targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginIdentity {
    pub name: String,
    pub target: Target,
}

impl PluginIdentity {
    pub fn new(name: impl Into<String>, target: Target) -> Self {
        Self {
            name: name.into(),
            target,
        }
    }

    /// Key under which the catalog indexes this identity.
    ///
    /// Target-less plugins keep the bare name so catalogs written before
    /// targets existed stay readable.
    pub fn catalog_key(&self) -> String {
        if self.target.is_none() {
            self.name.clone()
        } else {
            format!("{}:{}", self.name, self.target)
        }
    }

    /// Parse a `name` or `name:target` selector.
    pub fn parse_selector(selector: &str) -> Result<Self, TypesError> {
        let (name, target) = match selector.split_once(':') {
            Some((name, target)) => (name.trim(), target.parse()?),
            None => (selector.trim(), Target::None),
        };
        if name.is_empty() {
            return Err(TypesError::InvalidSelector(selector.to_string()));
        }
        Ok(Self::new(name, target))
    }
}

impl fmt::Display for PluginIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.catalog_key())
    }
}

/// How a plugin provides shell completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionType {
    #[default]
    None,
    Native,
    Static,
    Dynamic,
}

/// Descriptor of an installed plugin.
///
/// Plugin binaries print this document when invoked with their hidden
/// self-describe subcommand; the installer stamps the install-time fields
/// before the catalog persists it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginDescriptor {
    /// Plugin name
    pub name: String,
    /// Short description
    pub description: String,
    /// Installed version
    pub version: String,
    /// Commit the binary was built from
    #[serde(rename = "buildSHA")]
    pub build_sha: String,
    /// SHA-256 of the installed binary
    pub digest: String,
    /// Command group the plugin is listed under
    pub group: String,
    /// Documentation link
    #[serde(rename = "docURL")]
    pub doc_url: String,
    /// Hidden from help output
    pub hidden: bool,
    /// Alternative command names
    pub aliases: Vec<String>,
    pub target: Target,
    pub scope: Scope,
    /// Path of the installed binary
    pub installation_path: PathBuf,
    /// Name of the discovery source the plugin was installed from
    pub discovery: String,
    /// Recommended version advertised at install time
    pub discovered_recommended_version: String,
    pub completion_type: CompletionType,
    /// Feature flags the plugin wants enabled by default
    pub default_feature_flags: BTreeMap<String, bool>,
}

impl PluginDescriptor {
    pub fn identity(&self) -> PluginIdentity {
        PluginIdentity::new(self.name.clone(), self.target)
    }
}

/// A downloadable plugin binary for one version, OS and architecture.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Artifact {
    /// Distribution kind as declared by the source (informational)
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// OCI image reference
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image: String,
    /// Plain URI: a local path, file:// or http(s)://
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uri: String,
    /// Hex SHA-256 of the binary
    #[serde(skip_serializing_if = "String::is_empty")]
    pub digest: String,
    pub os: String,
    pub arch: String,
}

/// Where an artifact's bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactLocation {
    /// Registry image reference
    Image(String),
    /// File on the local filesystem
    Local(PathBuf),
    /// Any other URI
    Remote(String),
    /// Neither image nor URI declared
    Unspecified,
}

impl Artifact {
    pub fn image(image: impl Into<String>, os: &str, arch: &str) -> Self {
        Self {
            kind: "oci".to_string(),
            image: image.into(),
            os: os.to_string(),
            arch: arch.to_string(),
            ..Default::default()
        }
    }

    pub fn uri(uri: impl Into<String>, os: &str, arch: &str) -> Self {
        Self {
            uri: uri.into(),
            os: os.to_string(),
            arch: arch.to_string(),
            ..Default::default()
        }
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = digest.into();
        self
    }

    /// Check whether this artifact is built for the given platform.
    pub fn matches(&self, os: &str, arch: &str) -> bool {
        self.os == os && self.arch == arch
    }

    /// Classify the declared reference; an image takes precedence over a URI.
    pub fn location(&self) -> ArtifactLocation {
        if !self.image.is_empty() {
            return ArtifactLocation::Image(self.image.clone());
        }
        if self.uri.is_empty() {
            return ArtifactLocation::Unspecified;
        }
        classify_uri(&self.uri)
    }
}

fn classify_uri(uri: &str) -> ArtifactLocation {
    match Url::parse(uri) {
        Ok(url) if url.scheme() == "file" => ArtifactLocation::Local(
            url.to_file_path()
                .unwrap_or_else(|_| PathBuf::from(url.path())),
        ),
        // Windows drive letters parse as one-letter schemes
        Ok(url) if url.scheme().len() == 1 => ArtifactLocation::Local(PathBuf::from(uri)),
        Ok(_) => ArtifactLocation::Remote(uri.to_string()),
        Err(_) => ArtifactLocation::Local(PathBuf::from(uri)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_parsing() {
        assert_eq!("".parse::<Target>().unwrap(), Target::None);
        assert_eq!("kubernetes".parse::<Target>().unwrap(), Target::K8s);
        assert_eq!("K8S".parse::<Target>().unwrap(), Target::K8s);
        assert_eq!("mission-control".parse::<Target>().unwrap(), Target::Tmc);
        assert!("cloud".parse::<Target>().is_err());
    }

    #[test]
    fn test_catalog_key() {
        assert_eq!(PluginIdentity::new("login", Target::None).catalog_key(), "login");
        assert_eq!(
            PluginIdentity::new("cluster", Target::K8s).catalog_key(),
            "cluster:k8s"
        );
    }

    #[test]
    fn test_parse_selector() {
        let id = PluginIdentity::parse_selector("cluster:tmc").unwrap();
        assert_eq!(id, PluginIdentity::new("cluster", Target::Tmc));

        let id = PluginIdentity::parse_selector("login").unwrap();
        assert_eq!(id.target, Target::None);

        assert!(PluginIdentity::parse_selector(":k8s").is_err());
        assert!(PluginIdentity::parse_selector("login:desktop").is_err());
    }

    #[test]
    fn test_descriptor_from_self_describe_output() {
        let json = r#"{
            "name": "cluster",
            "description": "Manage clusters",
            "version": "v0.2.0",
            "buildSHA": "abc123",
            "group": "Run",
            "target": "kubernetes",
            "aliases": ["cl"],
            "defaultFeatureFlags": {"features.cluster.dual-stack": false}
        }"#;
        let desc: PluginDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(desc.identity(), PluginIdentity::new("cluster", Target::K8s));
        assert_eq!(desc.build_sha, "abc123");
        assert_eq!(desc.scope, Scope::Standalone);
        assert_eq!(desc.default_feature_flags.len(), 1);
    }

    #[test]
    fn test_descriptor_yaml_keys() {
        let desc = PluginDescriptor {
            name: "login".to_string(),
            discovered_recommended_version: "v1.0.0".to_string(),
            ..Default::default()
        };
        let yaml = serde_yaml::to_string(&desc).unwrap();
        assert!(yaml.contains("discoveredRecommendedVersion: v1.0.0"));
        assert!(yaml.contains("target: none"));
    }

    #[test]
    fn test_artifact_location() {
        let art = Artifact::image("registry.example.com/login:v1", "linux", "amd64")
            .with_digest("ff");
        assert_eq!(
            art.location(),
            ArtifactLocation::Image("registry.example.com/login:v1".to_string())
        );

        let art = Artifact::uri("https://example.com/login", "linux", "amd64");
        assert!(matches!(art.location(), ArtifactLocation::Remote(_)));

        let art = Artifact::uri("v1.0.0/pluma-login", "linux", "amd64");
        assert_eq!(
            art.location(),
            ArtifactLocation::Local(PathBuf::from("v1.0.0/pluma-login"))
        );

        let art = Artifact::uri("file:///opt/plugins/login", "linux", "amd64");
        assert!(matches!(art.location(), ArtifactLocation::Local(_)));

        assert_eq!(Artifact::default().location(), ArtifactLocation::Unspecified);
    }
}
