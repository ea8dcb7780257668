//! `pluma plugin source` handlers.

use super::ui::{self, plugin as styled};
use super::{print_structured, OutputFormat, Session};
use miette::{IntoDiagnostic, Result};
use pluma_config::source_from_flags;
use pluma_discovery::DiscoverySource;
use pluma_types::DiscoveryType;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct SourceRow {
    name: String,
    #[serde(rename = "type")]
    source_type: DiscoveryType,
    scope: String,
    location: String,
}

impl SourceRow {
    fn new(source: &DiscoverySource, scope: &str) -> Self {
        Self {
            name: source.name().to_string(),
            source_type: source.discovery_type(),
            scope: scope.to_string(),
            location: source.location(),
        }
    }
}

/// List standalone sources and those of the active contexts.
pub fn list_sources(session: &Session, context: Option<&str>, format: OutputFormat) -> Result<()> {
    let config = session.config();
    let mut rows: Vec<SourceRow> = config
        .standalone_sources()
        .iter()
        .map(|s| SourceRow::new(s, "standalone"))
        .collect();
    for ctx in config.active_contexts(context).into_diagnostic()? {
        for source in ctx.discovery_sources_with_default().into_diagnostic()? {
            rows.push(SourceRow::new(&source, &ctx.name));
        }
    }

    if format != OutputFormat::Table {
        return print_structured(&rows, format);
    }
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            vec![
                row.name.clone(),
                row.source_type.to_string(),
                row.scope.clone(),
                row.location.clone(),
            ]
        })
        .collect();
    ui::table(&["NAME", "TYPE", "SCOPE", "LOCATION"], &cells);
    Ok(())
}

pub fn add_source(session: &Session, name: &str, source_type: &str, uri: &str) -> Result<()> {
    let source = source_from_flags(name, source_type, uri).into_diagnostic()?;
    session
        .store()
        .update(|config| config.add_source(source))
        .into_diagnostic()?;
    ui::success(format!("Added discovery source {}", styled(name)));
    Ok(())
}

pub fn update_source(session: &Session, name: &str, source_type: &str, uri: &str) -> Result<()> {
    let source = source_from_flags(name, source_type, uri).into_diagnostic()?;
    session
        .store()
        .update(|config| config.update_source(source))
        .into_diagnostic()?;
    ui::success(format!("Updated discovery source {}", styled(name)));
    Ok(())
}

pub fn delete_source(session: &Session, name: &str) -> Result<()> {
    let removed = session
        .store()
        .update(|config| config.delete_source(name))
        .into_diagnostic()?;
    ui::success(format!(
        "Deleted discovery source {} {}",
        styled(removed.name()),
        ui::dim(format!("({})", removed.location()))
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pluma_discovery::OciDiscovery;

    #[test]
    fn test_source_row() {
        let source = DiscoverySource::Oci(OciDiscovery::new(
            "default",
            "registry.pluma.dev/plugins/plugin-inventory:latest",
        ));
        let row = SourceRow::new(&source, "standalone");
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["type"], "oci");
        assert_eq!(json["location"], "registry.pluma.dev/plugins/plugin-inventory:latest");
    }
}
