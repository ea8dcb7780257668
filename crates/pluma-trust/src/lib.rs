//! Trust and integrity checks for plugin artifacts.
//!
//! Before download, an artifact's declared location must be allow-listed:
//! registry images by a trusted registry prefix, remote URIs by a trusted
//! location prefix. Local files are trusted implicitly. After download, the
//! bytes are checked against the digest the source declared, if any.

use pluma_types::{Artifact, ArtifactLocation};
use sha2::{Digest as _, Sha256};
use thiserror::Error;
use tracing::debug;

/// Registries trusted by this build.
pub const DEFAULT_TRUSTED_REGISTRIES: &str = match option_env!("PLUMA_DEFAULT_PLUGIN_REGISTRIES") {
    Some(list) => list,
    None => "registry.pluma.dev/plugins",
};

/// Environment variable naming a custom image repository to trust.
pub const CUSTOM_IMAGE_REPOSITORY_ENV: &str = "PLUMA_CUSTOM_IMAGE_REPOSITORY";

/// Environment variable holding a comma-separated list of extra trusted registries.
pub const ALLOWED_REGISTRY_ENV: &str = "PLUMA_ALLOWED_REGISTRY";

/// Non-registry locations artifacts may be downloaded from.
pub const TRUSTED_ARTIFACT_LOCATIONS: &[&str] = &[
    "https://storage.googleapis.com/pluma-cli-plugins/",
    "https://downloads.pluma.dev/plugins/artifacts",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrustError {
    #[error("untrusted registry detected with image {image:?}. Allowed registries are {}", format_list(.allowed))]
    UntrustedRegistry { image: String, allowed: Vec<String> },

    #[error("untrusted artifact location detected with URI {uri:?}. Allowed locations are {}", format_list(.allowed))]
    UntrustedLocation { uri: String, allowed: Vec<String> },

    #[error("no download information available for artifact \"{plugin}:{version}:{os}:{arch}\"")]
    NoDownloadInformation {
        plugin: String,
        version: String,
        os: String,
        arch: String,
    },

    #[error("plugin {plugin:?} has been corrupted during download. source digest: {expected}, actual digest: {actual}")]
    Corrupted {
        plugin: String,
        expected: String,
        actual: String,
    },
}

fn format_list(items: &[String]) -> String {
    format!("[{}]", items.join(" "))
}

/// The allow-lists artifacts are checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustConfig {
    registries: Vec<String>,
    locations: Vec<String>,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self::from_parts(DEFAULT_TRUSTED_REGISTRIES, None, None)
    }
}

impl TrustConfig {
    /// Explicit allow-lists.
    pub fn new(registries: Vec<String>, locations: Vec<String>) -> Self {
        Self {
            registries,
            locations,
        }
    }

    /// Build the registry list from the build-time default, a custom repository
    /// and an allow-list, each possibly comma-separated.
    pub fn from_parts(defaults: &str, custom_repository: Option<&str>, allowed: Option<&str>) -> Self {
        let joined = [Some(defaults), custom_repository, allowed]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(",");

        let registries = joined
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect();

        Self {
            registries,
            locations: TRUSTED_ARTIFACT_LOCATIONS.iter().map(|l| l.to_string()).collect(),
        }
    }

    /// Read the custom repository and allow-list from the environment.
    pub fn from_env() -> Self {
        let custom = std::env::var(CUSTOM_IMAGE_REPOSITORY_ENV).ok();
        let allowed = std::env::var(ALLOWED_REGISTRY_ENV).ok();
        Self::from_parts(DEFAULT_TRUSTED_REGISTRIES, custom.as_deref(), allowed.as_deref())
    }

    pub fn registries(&self) -> &[String] {
        &self.registries
    }

    pub fn locations(&self) -> &[String] {
        &self.locations
    }

    /// Require `image` to start with a trusted registry.
    pub fn verify_registry(&self, image: &str) -> Result<(), TrustError> {
        if self
            .registries
            .iter()
            .any(|registry| !registry.is_empty() && image.starts_with(registry.as_str()))
        {
            return Ok(());
        }
        Err(TrustError::UntrustedRegistry {
            image: image.to_string(),
            allowed: self.registries.clone(),
        })
    }

    /// Require a remote `uri` to start with a trusted location. Local paths pass.
    pub fn verify_artifact_location(&self, uri: &str) -> Result<(), TrustError> {
        let probe = Artifact {
            uri: uri.to_string(),
            ..Default::default()
        };
        if let ArtifactLocation::Local(_) = probe.location() {
            return Ok(());
        }
        if self
            .locations
            .iter()
            .any(|location| !location.is_empty() && uri.starts_with(location.as_str()))
        {
            return Ok(());
        }
        Err(TrustError::UntrustedLocation {
            uri: uri.to_string(),
            allowed: self.locations.clone(),
        })
    }

    /// Check the artifact `plugin@version` would be downloaded from.
    pub fn verify_pre_download(
        &self,
        plugin: &str,
        version: &str,
        artifact: &Artifact,
    ) -> Result<(), TrustError> {
        debug!("Verifying download location of {} {}", plugin, version);
        match artifact.location() {
            ArtifactLocation::Image(image) => self.verify_registry(&image),
            ArtifactLocation::Local(_) => Ok(()),
            ArtifactLocation::Remote(uri) => self.verify_artifact_location(&uri),
            ArtifactLocation::Unspecified => Err(TrustError::NoDownloadInformation {
                plugin: plugin.to_string(),
                version: version.to_string(),
                os: artifact.os.clone(),
                arch: artifact.arch.clone(),
            }),
        }
    }
}

/// Hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Compare downloaded bytes with the digest the source declared.
///
/// An empty declared digest is accepted without checking.
pub fn verify_post_download(plugin: &str, declared: &str, bytes: &[u8]) -> Result<(), TrustError> {
    if declared.is_empty() {
        return Ok(());
    }

    let expected = declared.strip_prefix("sha256:").unwrap_or(declared);
    let actual = sha256_hex(bytes);
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(TrustError::Corrupted {
            plugin: plugin.to_string(),
            expected: declared.to_string(),
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registries(list: &str) -> TrustConfig {
        TrustConfig::new(vec![list.to_string()], Vec::new())
    }

    #[test]
    fn test_verify_registry_requires_literal_prefix() {
        let image = "fake.repo.com/image:v1.0.0";
        assert!(registries("fake.repo.com.private.com").verify_registry(image).is_err());
        assert!(registries("private.fake.repo.com").verify_registry(image).is_err());
        assert!(registries("fake.repo.com").verify_registry(image).is_ok());
    }

    #[test]
    fn test_untrusted_registry_message() {
        let err = registries("trusted.io")
            .verify_registry("evil.io/login:v1")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "untrusted registry detected with image \"evil.io/login:v1\". Allowed registries are [trusted.io]"
        );
    }

    #[test]
    fn test_from_parts_joins_and_trims() {
        let config = TrustConfig::from_parts(
            "default.io/plugins",
            Some(" custom.io/repo "),
            Some("a.io, b.io,,"),
        );
        assert_eq!(
            config.registries(),
            &["default.io/plugins", "custom.io/repo", "a.io", "b.io"]
        );
        assert_eq!(config.locations().len(), TRUSTED_ARTIFACT_LOCATIONS.len());
    }

    #[test]
    fn test_verify_artifact_location() {
        let config = TrustConfig::default();
        assert!(config
            .verify_artifact_location("https://storage.googleapis.com/pluma-cli-plugins/login")
            .is_ok());
        assert!(config.verify_artifact_location("/tmp/plugins/login").is_ok());
        assert!(config.verify_artifact_location("file:///tmp/plugins/login").is_ok());

        let err = config
            .verify_artifact_location("https://evil.example.com/login")
            .unwrap_err();
        assert!(matches!(err, TrustError::UntrustedLocation { .. }));
    }

    #[test]
    fn test_verify_pre_download() {
        let config = TrustConfig::from_parts("registry.pluma.dev/plugins", None, None);

        let trusted = Artifact::image("registry.pluma.dev/plugins/login:v1.0.0", "linux", "amd64");
        assert!(config.verify_pre_download("login", "v1.0.0", &trusted).is_ok());

        let untrusted = Artifact::image("docker.io/login:v1.0.0", "linux", "amd64");
        assert!(config.verify_pre_download("login", "v1.0.0", &untrusted).is_err());

        let empty = Artifact {
            os: "linux".to_string(),
            arch: "amd64".to_string(),
            ..Default::default()
        };
        let err = config.verify_pre_download("login", "v1.0.0", &empty).unwrap_err();
        assert_eq!(
            err.to_string(),
            "no download information available for artifact \"login:v1.0.0:linux:amd64\""
        );
    }

    #[test]
    fn test_verify_post_download() {
        let bytes = b"plugin binary";
        let digest = sha256_hex(bytes);
        assert!(verify_post_download("login", &digest, bytes).is_ok());
        assert!(verify_post_download("login", "", b"anything at all").is_ok());

        let err = verify_post_download("login", "deadbeef", bytes).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("deadbeef"));
        assert!(message.contains(&digest));
    }
}
