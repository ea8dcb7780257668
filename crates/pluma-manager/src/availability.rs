//! Reconciling discovered plugins with what is installed.

use crate::ManagerError;
use pluma_discovery::DiscoveredPlugin;
use pluma_types::{DiscoveryType, PluginDescriptor, PluginIdentity, PluginStatus, Scope, Target};
use std::collections::{BTreeSet, HashMap};

/// Merge context and standalone discovery results with installed state.
///
/// Context entries come first. A standalone entry is added when its identity
/// is new, and replaces a context entry only when local sources are the
/// standalone default or the entry itself came from a local source.
pub fn resolve_availability(
    context: Vec<DiscoveredPlugin>,
    standalone: Vec<DiscoveredPlugin>,
    installed_context: &[PluginDescriptor],
    installed_standalone: &[PluginDescriptor],
    default_standalone_type: DiscoveryType,
) -> Vec<DiscoveredPlugin> {
    let mut plugins = context;

    for entry in standalone {
        let existing = plugins.iter().position(|p| p.identity() == entry.identity());
        match existing {
            None => plugins.push(entry),
            Some(index) => {
                let local = default_standalone_type == DiscoveryType::Local
                    || entry.discovery_type == Some(DiscoveryType::Local);
                if local {
                    plugins[index] = entry;
                }
            }
        }
    }

    // Standalone installs take precedence when both scopes hold one
    let mut installed: HashMap<PluginIdentity, &PluginDescriptor> = HashMap::new();
    for descriptor in installed_context.iter().chain(installed_standalone) {
        installed.insert(descriptor.identity(), descriptor);
    }

    for plugin in &mut plugins {
        match installed.get(&plugin.identity()) {
            Some(descriptor) => mark_installed(plugin, descriptor),
            None => {
                plugin.status = PluginStatus::NotInstalled;
                plugin.installed_version = None;
            }
        }
    }

    for descriptor in installed_standalone {
        let identity = descriptor.identity();
        match plugins.iter_mut().find(|p| p.identity() == identity) {
            Some(plugin) => {
                if plugin.status == PluginStatus::NotInstalled {
                    plugin.status = PluginStatus::Installed;
                    plugin.installed_version = Some(descriptor.version.clone());
                }
            }
            None => plugins.push(DiscoveredPlugin::from_descriptor(descriptor)),
        }
    }

    collapse_targetless(&mut plugins, &installed);
    prefer_context(plugins)
}

fn mark_installed(plugin: &mut DiscoveredPlugin, descriptor: &PluginDescriptor) {
    plugin.installed_version = Some(descriptor.version.clone());
    plugin.status = if descriptor.discovered_recommended_version == plugin.recommended_version {
        PluginStatus::Installed
    } else {
        PluginStatus::UpdateAvailable
    };
}

/// Fold a target-less entry into the only targeted entry of the same name.
fn collapse_targetless(
    plugins: &mut Vec<DiscoveredPlugin>,
    installed: &HashMap<PluginIdentity, &PluginDescriptor>,
) {
    // Drift of a carried install is measured against what it saw at install time
    let recommended_at_install = |name: &str| {
        installed
            .get(&PluginIdentity::new(name, Target::None))
            .map(|d| d.discovered_recommended_version.clone())
    };

    let mut targets: HashMap<String, BTreeSet<Target>> = HashMap::new();
    for plugin in plugins.iter() {
        targets
            .entry(plugin.name.clone())
            .or_default()
            .insert(plugin.target);
    }

    let mut collapsed: Vec<DiscoveredPlugin> = Vec::new();
    for plugin in plugins.drain(..) {
        let specific = targets.get(&plugin.name).and_then(|set| {
            let mut others = set.iter().filter(|t| !t.is_none());
            match (set.contains(&Target::None), others.next(), others.next()) {
                (true, Some(target), None) => Some(*target),
                _ => None,
            }
        });

        match specific {
            Some(target) if plugin.target.is_none() => {
                // Carry an old target-less install over to the targeted entry
                let Some(installed) = plugin.installed_version.clone() else {
                    continue;
                };
                let pending = collapsed
                    .iter()
                    .position(|p| p.name == plugin.name && p.target == target);
                match pending {
                    Some(index) => {
                        if collapsed[index].installed_version.is_none() {
                            let baseline = recommended_at_install(&plugin.name);
                            carry_install(&mut collapsed[index], installed, baseline);
                        }
                    }
                    None => {
                        let mut migrated = plugin;
                        migrated.target = target;
                        collapsed.push(migrated);
                    }
                }
            }
            _ => {
                let existing = collapsed
                    .iter()
                    .position(|p| p.name == plugin.name && p.target == plugin.target);
                match existing {
                    // A migrated target-less install is replaced by the real entry
                    Some(index)
                        if collapsed[index].installed_version.is_some()
                            && plugin.installed_version.is_none() =>
                    {
                        let carried = collapsed[index].installed_version.take();
                        let baseline = recommended_at_install(&plugin.name);
                        collapsed[index] = plugin;
                        if let Some(carried) = carried {
                            carry_install(&mut collapsed[index], carried, baseline);
                        }
                    }
                    _ => collapsed.push(plugin),
                }
            }
        }
    }
    *plugins = collapsed;
}

fn carry_install(plugin: &mut DiscoveredPlugin, installed: String, baseline: Option<String>) {
    let baseline = baseline.unwrap_or_else(|| installed.clone());
    plugin.status = if baseline == plugin.recommended_version {
        PluginStatus::Installed
    } else {
        PluginStatus::UpdateAvailable
    };
    plugin.installed_version = Some(installed);
}

/// Keep one entry per identity, preferring the context-scoped one.
fn prefer_context(plugins: Vec<DiscoveredPlugin>) -> Vec<DiscoveredPlugin> {
    let mut result: Vec<DiscoveredPlugin> = Vec::with_capacity(plugins.len());
    for plugin in plugins {
        match result.iter_mut().find(|p| p.identity() == plugin.identity()) {
            Some(existing) => {
                if existing.scope != Scope::Context && plugin.scope == Scope::Context {
                    *existing = plugin;
                }
            }
            None => result.push(plugin),
        }
    }
    result
}

/// Pick the single entry named `name`, narrowed by `target` when given.
pub fn find_plugin<'a>(
    plugins: &'a [DiscoveredPlugin],
    name: &str,
    target: Option<Target>,
) -> Result<&'a DiscoveredPlugin, ManagerError> {
    let matches: Vec<&DiscoveredPlugin> = plugins
        .iter()
        .filter(|p| p.name == name && target.map_or(true, |t| p.target == t))
        .collect();

    match matches.as_slice() {
        [] => Err(ManagerError::NotFound {
            name: name.to_string(),
        }),
        [plugin] => Ok(plugin),
        _ => Err(ManagerError::Ambiguous {
            name: name.to_string(),
        }),
    }
}
