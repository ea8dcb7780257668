//! Plugin artifact distribution.
//!
//! A [`Distribution`] maps each published version of a plugin to the
//! artifacts built for it. [`ArtifactFetcher`] turns one artifact into bytes,
//! reading local files, downloading over HTTP, or pulling OCI images.

mod oci;

pub use oci::{ImagePuller, ImageReference, RegistryImagePuller};

use pluma_types::{Artifact, ArtifactLocation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum DistributionError {
    #[error("could not find the artifact for version:{version}, os:{os}, arch:{arch}")]
    ArtifactNotFound {
        version: String,
        os: String,
        arch: String,
    },
    #[error("artifact declares neither an image nor a URI")]
    NoLocation,
    #[error("unsupported artifact URI scheme: {0}")]
    UnsupportedScheme(String),
    #[error("failed to read artifact {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("download of {url} failed with status {status}")]
    Http { url: String, status: u16 },
    #[error("invalid image reference '{0}'")]
    InvalidReference(String),
    #[error("registry error: {0}")]
    Registry(String),
    #[error("image {0} contains no files")]
    EmptyImage(String),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The artifacts published for each version of one plugin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Distribution {
    artifacts: BTreeMap<String, Vec<Artifact>>,
}

impl Distribution {
    pub fn new(artifacts: BTreeMap<String, Vec<Artifact>>) -> Self {
        Self { artifacts }
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Versions with at least one artifact.
    pub fn versions(&self) -> Vec<String> {
        self.artifacts.keys().cloned().collect()
    }

    pub fn artifacts(&self) -> &BTreeMap<String, Vec<Artifact>> {
        &self.artifacts
    }

    pub fn artifacts_mut(&mut self) -> impl Iterator<Item = &mut Artifact> {
        self.artifacts.values_mut().flatten()
    }

    /// Find the artifact for a version and platform.
    pub fn describe_artifact(
        &self,
        version: &str,
        os: &str,
        arch: &str,
    ) -> Result<&Artifact, DistributionError> {
        self.artifacts
            .get(version)
            .and_then(|list| list.iter().find(|a| a.matches(os, arch)))
            .ok_or_else(|| DistributionError::ArtifactNotFound {
                version: version.to_string(),
                os: os.to_string(),
                arch: arch.to_string(),
            })
    }

    /// Digest declared for an artifact; empty when the source declared none.
    pub fn digest(&self, version: &str, os: &str, arch: &str) -> Result<String, DistributionError> {
        Ok(self.describe_artifact(version, os, arch)?.digest.clone())
    }

    /// Download the artifact for a version and platform.
    pub async fn fetch(
        &self,
        fetcher: &ArtifactFetcher,
        version: &str,
        os: &str,
        arch: &str,
    ) -> Result<Vec<u8>, DistributionError> {
        let artifact = self.describe_artifact(version, os, arch)?;
        fetcher.fetch(artifact).await
    }
}

/// Downloads artifact bytes from wherever they live.
#[derive(Clone)]
pub struct ArtifactFetcher {
    client: reqwest::Client,
    puller: Arc<dyn ImagePuller>,
}

impl Default for ArtifactFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactFetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::new();
        Self {
            puller: Arc::new(RegistryImagePuller::with_client(client.clone())),
            client,
        }
    }

    pub fn with_puller(mut self, puller: Arc<dyn ImagePuller>) -> Self {
        self.puller = puller;
        self
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn puller(&self) -> Arc<dyn ImagePuller> {
        Arc::clone(&self.puller)
    }

    /// Fetch the bytes of one artifact.
    pub async fn fetch(&self, artifact: &Artifact) -> Result<Vec<u8>, DistributionError> {
        match artifact.location() {
            ArtifactLocation::Image(image) => self.fetch_image(&image).await,
            ArtifactLocation::Local(path) => read_local(&path).await,
            ArtifactLocation::Remote(uri) => self.fetch_http(&uri).await,
            ArtifactLocation::Unspecified => Err(DistributionError::NoLocation),
        }
    }

    async fn fetch_http(&self, uri: &str) -> Result<Vec<u8>, DistributionError> {
        if !(uri.starts_with("https://") || uri.starts_with("http://")) {
            return Err(DistributionError::UnsupportedScheme(uri.to_string()));
        }

        info!("Downloading {}", uri);
        let resp = self.client.get(uri).send().await?;
        if !resp.status().is_success() {
            return Err(DistributionError::Http {
                url: uri.to_string(),
                status: resp.status().as_u16(),
            });
        }
        Ok(resp.bytes().await?.to_vec())
    }

    async fn fetch_image(&self, image: &str) -> Result<Vec<u8>, DistributionError> {
        let staging = tempfile::tempdir()?;
        self.puller.pull(image, staging.path()).await?;

        let binary = first_file(staging.path())
            .ok_or_else(|| DistributionError::EmptyImage(image.to_string()))?;
        debug!("Image {} provided {}", image, binary.display());
        read_local(&binary).await
    }
}

async fn read_local(path: &Path) -> Result<Vec<u8>, DistributionError> {
    tokio::fs::read(path)
        .await
        .map_err(|source| DistributionError::Read {
            path: path.to_path_buf(),
            source,
        })
}

/// First regular file below `dir`, in name order.
fn first_file(dir: &Path) -> Option<PathBuf> {
    walkdir::WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .find(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::fs;
    use tempfile::TempDir;

    fn distribution(uri: &str) -> Distribution {
        let mut artifacts = BTreeMap::new();
        artifacts.insert(
            "v1.0.0".to_string(),
            vec![
                Artifact::uri(uri, "linux", "amd64").with_digest("abc"),
                Artifact::uri("https://example.com/darwin", "darwin", "arm64"),
            ],
        );
        Distribution::new(artifacts)
    }

    #[test]
    fn test_describe_artifact() {
        let dist = distribution("/tmp/login");
        let artifact = dist.describe_artifact("v1.0.0", "darwin", "arm64").unwrap();
        assert_eq!(artifact.uri, "https://example.com/darwin");
        assert_eq!(dist.digest("v1.0.0", "linux", "amd64").unwrap(), "abc");
        assert_eq!(dist.digest("v1.0.0", "darwin", "arm64").unwrap(), "");

        let err = dist.describe_artifact("v2.0.0", "linux", "amd64").unwrap_err();
        assert!(matches!(err, DistributionError::ArtifactNotFound { .. }));
        assert!(dist.describe_artifact("v1.0.0", "windows", "amd64").is_err());
    }

    #[tokio::test]
    async fn test_fetch_local_artifact() {
        let dir = TempDir::new().unwrap();
        let binary = dir.path().join("login");
        fs::write(&binary, b"#!/bin/sh\n").unwrap();

        let dist = distribution(binary.to_str().unwrap());
        let bytes = dist
            .fetch(&ArtifactFetcher::new(), "v1.0.0", "linux", "amd64")
            .await
            .unwrap();
        assert_eq!(bytes, b"#!/bin/sh\n");
    }

    #[tokio::test]
    async fn test_fetch_rejects_unknown_scheme() {
        let artifact = Artifact::uri("ftp://example.com/login", "linux", "amd64");
        let err = ArtifactFetcher::new().fetch(&artifact).await.unwrap_err();
        assert!(matches!(err, DistributionError::UnsupportedScheme(_)));
    }

    struct StaticPuller;

    #[async_trait]
    impl ImagePuller for StaticPuller {
        async fn pull(&self, _image: &str, dest: &Path) -> Result<(), DistributionError> {
            fs::write(dest.join("pluma-login"), b"image payload")?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_fetch_image_reads_pulled_file() {
        let fetcher = ArtifactFetcher::new().with_puller(Arc::new(StaticPuller));
        let artifact = Artifact::image("registry.pluma.dev/plugins/login:v1", "linux", "amd64");
        let bytes = fetcher.fetch(&artifact).await.unwrap();
        assert_eq!(bytes, b"image payload");
    }

    #[test]
    fn test_distribution_serializes_as_map() {
        let dist = distribution("/tmp/login");
        let json = serde_json::to_value(&dist).unwrap();
        assert!(json.get("v1.0.0").is_some());
        assert_eq!(dist.versions(), vec!["v1.0.0"]);
    }
}
