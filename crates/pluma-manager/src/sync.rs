//! Bulk installation: sync against the sources, bootstrap a fixed set.

use crate::{find_plugin, BoundedGroup, InstallOutcome, ManagerError, PluginManager};
use pluma_discovery::DiscoveredPlugin;
use pluma_types::{PluginIdentity, PluginStatus};
use tracing::{debug, info, warn};

/// What a bulk operation installed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncSummary {
    pub installed: Vec<InstallOutcome>,
    pub warnings: Vec<String>,
}

impl SyncSummary {
    fn record(&mut self, outcome: InstallOutcome) {
        self.warnings.extend(outcome.warnings.iter().cloned());
        self.installed.push(outcome);
    }
}

impl PluginManager {
    /// Install the recommended version of every available plugin that is not
    /// installed, or whose installed version differs from the recommendation.
    ///
    /// Every failure is collected; nothing stops early.
    pub async fn sync(&self) -> Result<SyncSummary, ManagerError> {
        let available = self.available().await?;
        let mut summary = SyncSummary::default();
        for warning in available.warnings {
            warn!("{}", warning);
            summary.warnings.push(warning.to_string());
        }

        let pending: Vec<&DiscoveredPlugin> = available
            .plugins
            .iter()
            .filter(|p| p.status != PluginStatus::Installed)
            .collect();
        if pending.is_empty() {
            info!("All plugins are already installed");
            return Ok(summary);
        }

        let mut errors = Vec::new();
        for plugin in pending {
            debug!("Syncing plugin '{}'", plugin.identity());
            match self.install_discovered(plugin, None).await {
                Ok(outcome) => summary.record(outcome),
                Err(err) => errors.push(err),
            }
        }

        match ManagerError::aggregate(errors) {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }

    /// Install a fixed set of plugins concurrently, skipping those already
    /// installed. At most `group.limit()` installs run at a time.
    pub async fn bootstrap(
        &self,
        plugins: &[PluginIdentity],
        group: BoundedGroup,
    ) -> Result<SyncSummary, ManagerError> {
        let available = self.available().await?;

        let mut errors = Vec::new();
        let mut pending = Vec::new();
        for identity in plugins {
            let target = (!identity.target.is_none()).then_some(identity.target);
            match find_plugin(&available.plugins, &identity.name, target) {
                Ok(plugin) if plugin.status == PluginStatus::Installed => {
                    debug!("Plugin '{}' is already installed", plugin.identity());
                }
                Ok(plugin) => pending.push(plugin),
                Err(err) => errors.push(err),
            }
        }

        info!(
            "Installing {} plugins with up to {} at a time",
            pending.len(),
            group.limit()
        );
        let result = group
            .run(pending, |plugin| self.install_discovered(plugin, None))
            .await;

        let mut summary = SyncSummary::default();
        for outcome in result.completed {
            summary.record(outcome);
        }
        errors.extend(result.failures);

        match ManagerError::aggregate(errors) {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }
}
