//! Contexts: the servers a user is logged into.

use crate::ConfigError;
use pluma_discovery::{DiscoverySource, KubernetesDiscovery, RestDiscovery};
use pluma_types::Target;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextType {
    /// Kubernetes cluster reached through a kubeconfig
    K8s,
    /// Mission control server reached over HTTPS
    Tmc,
}

impl ContextType {
    pub fn target(&self) -> Target {
        match self {
            ContextType::K8s => Target::K8s,
            ContextType::Tmc => Target::Tmc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub name: String,
    #[serde(rename = "type")]
    pub context_type: ContextType,
    /// Kubeconfig file of a `k8s` context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Kubeconfig context of a `k8s` context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Server endpoint of a `tmc` context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discovery_sources: Vec<DiscoverySource>,
}

impl Context {
    pub fn target(&self) -> Target {
        self.context_type.target()
    }

    /// Source every context gets without configuring it: the cluster itself
    /// for `k8s`, the server's plugin endpoint for `tmc`.
    pub fn default_discovery_source(&self) -> Result<DiscoverySource, ConfigError> {
        let name = format!("default-{}", self.name);
        match self.context_type {
            ContextType::K8s => Ok(DiscoverySource::Kubernetes(KubernetesDiscovery::new(
                name,
                self.path.clone(),
                self.context.clone(),
            ))),
            ContextType::Tmc => {
                let endpoint = self
                    .endpoint
                    .as_deref()
                    .filter(|e| !e.trim().is_empty())
                    .ok_or_else(|| ConfigError::MissingEndpoint(self.name.clone()))?;
                let base = https_endpoint(endpoint).ok_or_else(|| ConfigError::InvalidEndpoint {
                    context: self.name.clone(),
                    endpoint: endpoint.to_string(),
                })?;
                Ok(DiscoverySource::Rest(RestDiscovery::new(name, base)))
            }
        }
    }

    /// The default source followed by the configured ones.
    pub fn discovery_sources_with_default(&self) -> Result<Vec<DiscoverySource>, ConfigError> {
        let mut sources = vec![self.default_discovery_source()?];
        sources.extend(self.discovery_sources.iter().cloned());
        Ok(sources)
    }
}

/// Reduce an endpoint to `https://<host>`, dropping any scheme, port or path.
///
/// `None` when no host can be parsed out of it.
pub fn https_endpoint(endpoint: &str) -> Option<String> {
    let trimmed = endpoint.trim();
    let parsed = if trimmed.contains("://") {
        Url::parse(trimmed)
    } else {
        Url::parse(&format!("https://{}", trimmed))
    }
    .ok()?;
    // IPv6 hosts come back bracketed
    let host = parsed.host_str().filter(|h| !h.is_empty())?;
    Some(format!("https://{}", host))
}
