//! Pulling plugin images from OCI registries.
//!
//! Implements the subset of the distribution API needed to fetch an image:
//! resolve the manifest, download each layer blob, and unpack it. Registries
//! that answer with a bearer challenge get an anonymous token.

use crate::DistributionError;
use async_trait::async_trait;
use flate2::read::GzDecoder;
use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

const MANIFEST_ACCEPT: &str =
    "application/vnd.oci.image.manifest.v1+json, application/vnd.docker.distribution.manifest.v2+json";

const TITLE_ANNOTATION: &str = "org.opencontainers.image.title";

const DEFAULT_REGISTRY: &str = "registry-1.docker.io";

/// Pulls an image's files into a directory.
#[async_trait]
pub trait ImagePuller: Send + Sync {
    async fn pull(&self, image: &str, dest: &Path) -> Result<(), DistributionError>;
}

/// A parsed `registry/repository[:tag|@digest]` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    /// Tag or digest
    pub reference: String,
}

impl ImageReference {
    pub fn parse(image: &str) -> Result<Self, DistributionError> {
        let invalid = || DistributionError::InvalidReference(image.to_string());

        let (name, reference) = match image.split_once('@') {
            Some((name, digest)) => (name, digest),
            None => match image.rsplit_once(':') {
                Some((name, tag)) if !tag.contains('/') => (name, tag),
                _ => (image, "latest"),
            },
        };

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), rest.to_string())
            }
            Some(_) => (DEFAULT_REGISTRY.to_string(), name.to_string()),
            None => (DEFAULT_REGISTRY.to_string(), format!("library/{}", name)),
        };

        if repository.is_empty() || reference.is_empty() || name.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            registry,
            repository,
            reference: reference.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    layers: Vec<LayerDescriptor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayerDescriptor {
    #[serde(default)]
    media_type: String,
    digest: String,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Image puller speaking the registry HTTP API.
pub struct RegistryImagePuller {
    client: Client,
    plain_http: bool,
}

impl Default for RegistryImagePuller {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryImagePuller {
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            plain_http: false,
        }
    }

    /// Talk to the registry over http instead of https.
    pub fn plain_http(mut self, enabled: bool) -> Self {
        self.plain_http = enabled;
        self
    }

    fn repository_url(&self, reference: &ImageReference) -> String {
        let scheme = if self.plain_http { "http" } else { "https" };
        format!(
            "{}://{}/v2/{}",
            scheme, reference.registry, reference.repository
        )
    }

    async fn send(
        &self,
        url: &str,
        accept: Option<&str>,
        token: Option<&str>,
    ) -> Result<Response, DistributionError> {
        let mut req = self.client.get(url);
        if let Some(accept) = accept {
            req = req.header(ACCEPT, accept);
        }
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        Ok(req.send().await?)
    }

    /// GET with one retry after answering a bearer challenge.
    async fn get(
        &self,
        url: &str,
        accept: Option<&str>,
        token: &mut Option<String>,
    ) -> Result<Response, DistributionError> {
        let mut resp = self.send(url, accept, token.as_deref()).await?;

        if resp.status() == StatusCode::UNAUTHORIZED && token.is_none() {
            let challenge = resp
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| {
                    DistributionError::Registry(format!("{} requires authentication", url))
                })?;
            let fresh = self.fetch_token(&challenge).await?;
            resp = self.send(url, accept, Some(&fresh)).await?;
            *token = Some(fresh);
        }

        if !resp.status().is_success() {
            return Err(DistributionError::Http {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }
        Ok(resp)
    }

    async fn fetch_token(&self, challenge: &str) -> Result<String, DistributionError> {
        let params = parse_challenge(challenge);
        let realm = params
            .get("realm")
            .ok_or_else(|| DistributionError::Registry("auth challenge has no realm".to_string()))?;

        let query: Vec<(&str, &str)> = ["service", "scope"]
            .into_iter()
            .filter_map(|key| params.get(key).map(|value| (key, value.as_str())))
            .collect();
        let url = url::Url::parse_with_params(realm, &query)
            .map_err(|e| DistributionError::Registry(format!("invalid auth realm: {}", e)))?;

        debug!("Requesting registry token from {}", url);
        let resp = self.client.get(url.as_str()).send().await?;
        if !resp.status().is_success() {
            return Err(DistributionError::Http {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }

        let body: TokenResponse = resp.json().await?;
        body.token
            .or(body.access_token)
            .ok_or_else(|| DistributionError::Registry("token endpoint returned no token".to_string()))
    }
}

#[async_trait]
impl ImagePuller for RegistryImagePuller {
    async fn pull(&self, image: &str, dest: &Path) -> Result<(), DistributionError> {
        let reference = ImageReference::parse(image)?;
        let base = self.repository_url(&reference);
        let mut token = None;

        info!("Pulling {}", image);
        let manifest: Manifest = self
            .get(
                &format!("{}/manifests/{}", base, reference.reference),
                Some(MANIFEST_ACCEPT),
                &mut token,
            )
            .await?
            .json()
            .await?;

        if manifest.layers.is_empty() {
            return Err(DistributionError::EmptyImage(image.to_string()));
        }

        for layer in &manifest.layers {
            let blob = self
                .get(&format!("{}/blobs/{}", base, layer.digest), None, &mut token)
                .await?
                .bytes()
                .await?;
            verify_blob(&layer.digest, &blob)?;
            unpack_layer(layer, &blob, dest)?;
        }

        info!("Pulled {} to {}", image, dest.display());
        Ok(())
    }
}

/// Parse `Bearer realm="...",service="...",scope="..."` into its parameters.
fn parse_challenge(header: &str) -> HashMap<String, String> {
    let trimmed = header.trim();
    let mut rest = trimmed
        .strip_prefix("Bearer")
        .or_else(|| trimmed.strip_prefix("bearer"))
        .unwrap_or(trimmed)
        .trim_start();

    let mut params = HashMap::new();
    while let Some((key, after)) = rest.split_once('=') {
        let (value, remaining) = match after.strip_prefix('"') {
            Some(quoted) => match quoted.find('"') {
                Some(end) => (&quoted[..end], &quoted[end + 1..]),
                None => (quoted, ""),
            },
            None => match after.find(',') {
                Some(end) => (&after[..end], &after[end..]),
                None => (after, ""),
            },
        };
        params.insert(key.trim().to_string(), value.to_string());
        rest = remaining.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
    }
    params
}

fn verify_blob(digest: &str, blob: &[u8]) -> Result<(), DistributionError> {
    let Some(expected) = digest.strip_prefix("sha256:") else {
        return Ok(());
    };
    if pluma_trust::sha256_hex(blob) != expected {
        return Err(DistributionError::Registry(format!(
            "layer {} failed digest verification",
            digest
        )));
    }
    Ok(())
}

fn unpack_layer(layer: &LayerDescriptor, blob: &[u8], dest: &Path) -> Result<(), DistributionError> {
    let gzipped = layer.media_type.ends_with("gzip") || blob.starts_with(&[0x1f, 0x8b]);

    if gzipped {
        tar::Archive::new(GzDecoder::new(blob)).unpack(dest)?;
    } else if layer.media_type.contains("tar") {
        tar::Archive::new(blob).unpack(dest)?;
    } else {
        // Plain blob: the title annotation names the file
        let title = layer
            .annotations
            .get(TITLE_ANNOTATION)
            .cloned()
            .unwrap_or_else(|| layer.digest.replace(':', "-"));
        let file_name = Path::new(&title)
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "blob".into());
        fs::write(dest.join(file_name), blob)?;
    }
    Ok(())
}
