//! Discovery sources as configured from the command line.

use crate::{ClientConfig, ConfigError};
use pluma_discovery::{DiscoverySource, LocalDiscovery, OciDiscovery, RestDiscovery};
use pluma_types::DiscoveryType;
use tracing::info;

/// Build a source from `plugin source add` style flags.
///
/// `uri` is a directory for `local`, an image for `oci` and an endpoint
/// for `rest`.
pub fn source_from_flags(name: &str, source_type: &str, uri: &str) -> Result<DiscoverySource, ConfigError> {
    if name.trim().is_empty() {
        return Err(ConfigError::EmptySourceName);
    }
    if source_type.trim().is_empty() {
        return Err(ConfigError::EmptySourceType);
    }

    let discovery_type: DiscoveryType = source_type
        .parse()
        .map_err(|_| ConfigError::UnknownSourceType(source_type.to_string()))?;
    match discovery_type {
        DiscoveryType::Local => Ok(DiscoverySource::Local(LocalDiscovery::new(name, uri))),
        DiscoveryType::Oci => Ok(DiscoverySource::Oci(OciDiscovery::new(name, uri))),
        DiscoveryType::Rest => Ok(DiscoverySource::Rest(RestDiscovery::new(name, uri))),
        DiscoveryType::Kubernetes | DiscoveryType::Gcp => {
            Err(ConfigError::UnsupportedSourceType(source_type.to_string()))
        }
    }
}

impl ClientConfig {
    pub fn find_source(&self, name: &str) -> Option<&DiscoverySource> {
        self.cli.discovery_sources.iter().find(|s| s.name() == name)
    }

    pub fn add_source(&mut self, source: DiscoverySource) -> Result<(), ConfigError> {
        if self.find_source(source.name()).is_some() {
            return Err(ConfigError::SourceExists(source.name().to_string()));
        }
        info!("Adding discovery source '{}'", source.name());
        self.cli.discovery_sources.push(source);
        Ok(())
    }

    /// Replace the source with the same name.
    pub fn update_source(&mut self, source: DiscoverySource) -> Result<(), ConfigError> {
        let slot = self
            .cli
            .discovery_sources
            .iter_mut()
            .find(|s| s.name() == source.name())
            .ok_or_else(|| ConfigError::SourceNotFound(source.name().to_string()))?;
        info!("Updating discovery source '{}'", source.name());
        *slot = source;
        Ok(())
    }

    pub fn delete_source(&mut self, name: &str) -> Result<DiscoverySource, ConfigError> {
        let index = self
            .cli
            .discovery_sources
            .iter()
            .position(|s| s.name() == name)
            .ok_or_else(|| ConfigError::SourceNotFound(name.to_string()))?;
        info!("Deleting discovery source '{}'", name);
        Ok(self.cli.discovery_sources.remove(index))
    }
}
