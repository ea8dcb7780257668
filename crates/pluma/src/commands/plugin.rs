//! `pluma plugin` handlers.

use super::ui::{self, dim, num, plugin as styled};
use super::{diagnose, print_structured, OutputFormat, Session};
use miette::Result;
use pluma_diagnostics::PlumaError;
use pluma_discovery::DiscoveredPlugin;
use pluma_manager::{BoundedGroup, InstallOutcome, SyncSummary, ALL_PLUGINS};
use pluma_types::{PluginDescriptor, PluginStatus, Target};
use serde::Serialize;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Serialize)]
struct PluginRow {
    name: String,
    description: String,
    target: Target,
    discovery: String,
    version: String,
    status: PluginStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<String>,
}

impl From<&DiscoveredPlugin> for PluginRow {
    fn from(plugin: &DiscoveredPlugin) -> Self {
        Self {
            name: plugin.name.clone(),
            description: plugin.description.clone(),
            target: plugin.target,
            discovery: plugin.source_name.clone(),
            version: plugin
                .installed_version
                .clone()
                .unwrap_or_else(|| plugin.recommended_version.clone()),
            status: plugin.status,
            context: plugin.context_name.clone(),
        }
    }
}

/// List available plugins and their install status.
pub async fn list(session: &Session, format: OutputFormat, local: Option<&Path>) -> Result<()> {
    let manager = session.manager()?;
    let plugins = match local {
        Some(path) => manager.available_local(path).await.map_err(diagnose)?,
        None => {
            let report = manager.available().await.map_err(diagnose)?;
            for warning in &report.warnings {
                ui::warn(warning);
            }
            report.plugins
        }
    };

    let mut rows: Vec<PluginRow> = plugins.iter().map(PluginRow::from).collect();
    rows.sort_by(|a, b| a.name.cmp(&b.name).then(a.target.cmp(&b.target)));

    if format != OutputFormat::Table {
        return print_structured(&rows, format);
    }
    if rows.is_empty() {
        ui::hint("No plugins found. Add a discovery source with `pluma plugin source add`");
        return Ok(());
    }

    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            vec![
                row.name.clone(),
                row.description.clone(),
                row.target.to_string(),
                row.discovery.clone(),
                row.version.clone(),
                row.status.to_string(),
            ]
        })
        .collect();
    ui::table(
        &["NAME", "DESCRIPTION", "TARGET", "DISCOVERY", "VERSION", "STATUS"],
        &cells,
    );
    Ok(())
}

/// Install a plugin from the configured sources or a local plugin tree.
pub async fn install(
    session: &Session,
    name: &str,
    version: Option<&str>,
    target: Option<Target>,
    local: Option<&Path>,
) -> Result<()> {
    let manager = session.manager()?;

    if let Some(path) = local {
        let spinner = ui::spinner(format!("Installing from {}...", path.display()));
        let result = manager.install_from_local(path, name, version, target).await;
        spinner.finish_and_clear();
        for outcome in result.map_err(diagnose)? {
            report_install(session, &outcome, "Installed");
        }
        return Ok(());
    }

    if name == ALL_PLUGINS {
        return Err(PlumaError::Generic(
            "installing all plugins requires --local; use `pluma plugin sync` for the configured sources"
                .to_string(),
        )
        .into());
    }

    let spinner = ui::spinner(format!("Installing plugin '{}'...", name));
    let result = manager.install(name, version, target).await;
    spinner.finish_and_clear();
    let outcome = result.map_err(diagnose)?;
    report_install(session, &outcome, "Installed");
    Ok(())
}

/// Upgrade an installed plugin to the newest version its source offers.
pub async fn upgrade(session: &Session, name: &str, target: Option<Target>) -> Result<()> {
    let manager = session.manager()?;
    let spinner = ui::spinner(format!("Upgrading plugin '{}'...", name));
    let result = manager.upgrade(name, target).await;
    spinner.finish_and_clear();
    let outcome = result.map_err(diagnose)?;
    report_install(session, &outcome, "Upgraded");
    Ok(())
}

/// Forget an installed plugin.
pub fn delete(session: &Session, name: &str, target: Option<Target>, yes: bool) -> Result<()> {
    if !yes {
        return Err(PlumaError::ConfirmationRequired {
            name: name.to_string(),
        }
        .into());
    }

    let descriptor = session.manager()?.delete(name, target).map_err(diagnose)?;
    ui::success(format!(
        "Deleted plugin {} {}",
        styled(descriptor.identity()),
        dim(format!("({})", descriptor.version))
    ));
    Ok(())
}

/// Print the catalog descriptor of an installed plugin.
///
/// With `check_update`, the sources are asked for a newer version; the
/// result goes to stderr so structured output stays parseable.
pub async fn describe(
    session: &Session,
    name: &str,
    target: Option<Target>,
    format: OutputFormat,
    check_update: bool,
) -> Result<()> {
    let manager = session.manager()?;
    let descriptor = manager.describe(name, target).map_err(diagnose)?;
    print_structured(&descriptor, format)?;

    if check_update {
        match manager.check_update(name, target).await.map_err(diagnose)? {
            Some(newer) => ui::warn(format!(
                "Version {} of plugin {} is available; run `pluma plugin upgrade {}`",
                num(&newer),
                styled(descriptor.identity()),
                descriptor.name
            )),
            None => debug!("Plugin '{}' is up to date", descriptor.identity()),
        }
    }
    Ok(())
}

/// Remove every installed plugin and the catalog.
pub fn clean(session: &Session) -> Result<()> {
    session.manager()?.clean().map_err(diagnose)?;
    ui::success("Successfully cleaned up all plugins");
    Ok(())
}

/// Install what the sources recommend, or the configured bootstrap set.
pub async fn sync(session: &Session, bootstrap: bool, jobs: Option<usize>) -> Result<()> {
    let manager = session.manager()?;

    let spinner = ui::spinner("Checking for required plugins...");
    let result = if bootstrap {
        let plugins = match session.config().bootstrap_plugins() {
            Ok(plugins) => plugins,
            Err(err) => {
                spinner.finish_and_clear();
                return Err(PlumaError::Generic(err.to_string()).into());
            }
        };
        let group = jobs.map(BoundedGroup::new).unwrap_or_default();
        debug!("Bootstrapping {} plugins", plugins.len());
        manager.bootstrap(&plugins, group).await
    } else {
        manager.sync().await
    };
    spinner.finish_and_clear();

    let summary: SyncSummary = result.map_err(diagnose)?;
    if summary.installed.is_empty() {
        ui::success("All required plugins are already installed and are up-to-date");
    }
    for outcome in &summary.installed {
        report_install(session, outcome, "Installed");
    }
    Ok(())
}

fn report_install(session: &Session, outcome: &InstallOutcome, verb: &str) {
    let descriptor = &outcome.descriptor;
    ui::success(format!(
        "{} plugin {} {}",
        verb,
        styled(descriptor.identity()),
        num(&descriptor.version)
    ));
    for warning in &outcome.warnings {
        ui::warn(warning);
    }
    apply_default_features(session, descriptor);
}

/// Record the plugin's default feature flags; failures only warn.
fn apply_default_features(session: &Session, descriptor: &PluginDescriptor) {
    if descriptor.default_feature_flags.is_empty() {
        return;
    }
    let result = session
        .store()
        .update(|config| Ok(config.apply_default_features(&descriptor.name, &descriptor.default_feature_flags)));
    match result {
        Ok(true) => debug!("Applied default features of plugin '{}'", descriptor.name),
        Ok(false) => {}
        Err(err) => ui::warn(format!(
            "could not apply default features of plugin '{}': {}",
            descriptor.name, err
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_prefers_installed_version() {
        let plugin = DiscoveredPlugin {
            name: "login".to_string(),
            recommended_version: "v1.1.0".to_string(),
            installed_version: Some("v1.0.0".to_string()),
            status: PluginStatus::UpdateAvailable,
            source_name: "default".to_string(),
            ..Default::default()
        };

        let row = PluginRow::from(&plugin);
        assert_eq!(row.version, "v1.0.0");
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["status"], "update available");
        assert!(json.get("context").is_none());
    }
}
