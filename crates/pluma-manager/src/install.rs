//! The install pipeline: fetch, verify, write, self-describe, record.

use crate::runner::{describe_binary, post_install};
use crate::{find_plugin, validate_descriptor, ManagerError, PluginManager};
use pluma_discovery::DiscoveredPlugin;
use pluma_trust::{sha256_hex, verify_post_download};
use pluma_types::{PluginDescriptor, Target};
use std::path::Path;
use tracing::{info, warn};

/// Version argument meaning "whatever the source recommends".
pub const LATEST: &str = "latest";
/// Plugin name argument selecting every plugin of a local tree.
pub const ALL_PLUGINS: &str = "all";

/// A completed installation and the non-fatal problems met on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallOutcome {
    pub descriptor: PluginDescriptor,
    pub warnings: Vec<String>,
}

impl PluginManager {
    /// Install `name` from the configured sources.
    ///
    /// Without a version, or with `latest`, the recommended version is used.
    pub async fn install(
        &self,
        name: &str,
        version: Option<&str>,
        target: Option<Target>,
    ) -> Result<InstallOutcome, ManagerError> {
        let available = self.available().await?;
        for warning in &available.warnings {
            warn!("{}", warning);
        }
        let plugin = find_plugin(&available.plugins, name, target)?;
        self.install_discovered(plugin, version).await
    }

    /// Move an installed plugin to the newest version its source offers.
    ///
    /// The newest version admitted by the stability tier wins; the recommended
    /// version is used when none is.
    pub async fn upgrade(&self, name: &str, target: Option<Target>) -> Result<InstallOutcome, ManagerError> {
        let available = self.available().await?;
        let plugin = find_plugin(&available.plugins, name, target)?;

        let mut version = pluma_version::find_version(&plugin.supported_versions, self.config.tier);
        if version.is_empty() {
            version = plugin.recommended_version.clone();
        }
        info!("Upgrading plugin '{}' to {}", plugin.identity(), version);
        self.install_discovered(plugin, Some(&version)).await
    }

    /// Install one or all plugins of a local plugin tree into the standalone
    /// scope. Failures of individual plugins are collected.
    pub async fn install_from_local(
        &self,
        path: &Path,
        name: &str,
        version: Option<&str>,
        target: Option<Target>,
    ) -> Result<Vec<InstallOutcome>, ManagerError> {
        let plugins = self.discoverer.discover_local(path).await?;

        let selected: Vec<&DiscoveredPlugin> = if name == ALL_PLUGINS {
            plugins.iter().collect()
        } else {
            plugins
                .iter()
                .filter(|p| p.name == name && target.map_or(true, |t| p.target == t))
                .collect()
        };
        if selected.is_empty() {
            return Err(ManagerError::NotFound {
                name: name.to_string(),
            });
        }

        let mut outcomes = Vec::new();
        let mut errors = Vec::new();
        for plugin in selected {
            match self.install_discovered(plugin, version).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => errors.push(err),
            }
        }
        match ManagerError::aggregate(errors) {
            Some(err) => Err(err),
            None => Ok(outcomes),
        }
    }

    /// Run the full pipeline for one discovered plugin.
    pub async fn install_discovered(
        &self,
        plugin: &DiscoveredPlugin,
        version: Option<&str>,
    ) -> Result<InstallOutcome, ManagerError> {
        let version = match version {
            None | Some("") | Some(LATEST) => plugin.recommended_version.clone(),
            Some(v) => v.to_string(),
        };
        let platform = &self.config.platform;

        let artifact = plugin
            .distribution
            .describe_artifact(&version, &platform.os, &platform.arch)
            .map_err(|_| ManagerError::VersionNotFound {
                name: plugin.name.clone(),
                version: version.clone(),
            })?;

        self.config
            .trust
            .verify_pre_download(&plugin.name, &version, artifact)
            .map_err(|source| ManagerError::Untrusted {
                plugin: plugin.name.clone(),
                version: version.clone(),
                source,
            })?;

        info!(
            "Installing plugin '{}' {} from '{}'",
            plugin.identity(),
            version,
            plugin.source_name
        );
        let bytes = self.fetcher.fetch(artifact).await?;
        verify_post_download(&plugin.name, &artifact.digest, &bytes).map_err(|source| {
            ManagerError::Corrupted {
                plugin: plugin.name.clone(),
                version: version.clone(),
                source,
            }
        })?;

        let binary = platform.install_path(&self.config.plugin_root, &plugin.identity(), &version);
        write_binary(&binary, &bytes).await?;

        let mut descriptor = describe_binary(self.runner.as_ref(), &binary, &plugin.name).await?;
        descriptor.installation_path = binary.clone();
        descriptor.discovery = plugin.source_name.clone();
        descriptor.discovered_recommended_version = plugin.recommended_version.clone();
        descriptor.target = plugin.target;
        descriptor.scope = plugin.scope;
        descriptor.digest = sha256_hex(&bytes);
        validate_descriptor(&descriptor)?;

        self.catalog_for(plugin).upsert(&descriptor)?;

        let mut warnings = Vec::new();
        if let Some(warning) = post_install(self.runner.as_ref(), &binary, &plugin.name).await {
            warn!("{}", warning);
            warnings.push(warning);
        }

        Ok(InstallOutcome {
            descriptor,
            warnings,
        })
    }
}

async fn write_binary(path: &Path, bytes: &[u8]) -> Result<(), ManagerError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ManagerError::io(parent, e))?;
    }
    // Unlink first; a running copy keeps the old inode
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(ManagerError::io(path, e)),
    }
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| ManagerError::io(path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .await
            .map_err(|e| ManagerError::io(path, e))?;
    }
    Ok(())
}
