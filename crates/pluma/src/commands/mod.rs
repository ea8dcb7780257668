//! CLI command implementations.
//!
//! Handlers are grouped by the noun they act on: plugins and their discovery
//! sources.

pub mod ui;
mod plugin;
mod source;

pub use plugin::{clean, delete, describe, install, list, sync, upgrade};
pub use source::{add_source, delete_source, list_sources, update_source};

use miette::{IntoDiagnostic, Result};
use pluma_config::{ClientConfig, ConfigPaths, ConfigStore};
use pluma_diagnostics::PlumaError;
use pluma_manager::{ErrorKind, ManagerConfig, ManagerError, PluginManager};
use serde::Serialize;
use std::path::PathBuf;
use tracing::debug;

/// Output format of listing commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

/// Configuration shared by every command of one invocation.
pub struct Session {
    paths: ConfigPaths,
    config: ClientConfig,
    context: Option<String>,
}

impl Session {
    pub fn open(config_file: Option<PathBuf>, context: Option<String>) -> Result<Self> {
        let paths = ConfigPaths::resolve(config_file).into_diagnostic()?;
        debug!("Using configuration {}", paths.config_file.display());
        let config = ClientConfig::load(&paths.config_file).into_diagnostic()?;
        Ok(Self {
            paths,
            config,
            context,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> ConfigStore {
        ConfigStore::new(&self.paths.config_file)
    }

    pub fn manager(&self) -> Result<PluginManager> {
        let config =
            ManagerConfig::from_client_config(&self.config, &self.paths, self.context.as_deref())
                .into_diagnostic()?;
        Ok(PluginManager::new(config))
    }
}

/// Turn a manager failure into a user-facing diagnostic.
pub fn diagnose(err: ManagerError) -> PlumaError {
    let message = err.to_string();
    match err {
        ManagerError::Aggregate(errors) => {
            PlumaError::aggregate(errors.into_iter().map(diagnose).collect())
        }
        ManagerError::Ambiguous { name } => PlumaError::ambiguous(name, message),
        other => match other.kind() {
            ErrorKind::NotFound => PlumaError::not_found(message),
            ErrorKind::Untrusted => PlumaError::untrusted(message),
            ErrorKind::Corrupted => PlumaError::digest_mismatch(message),
            ErrorKind::Unsupported => PlumaError::unsupported_source(message),
            ErrorKind::Malformed => PlumaError::malformed(message),
            ErrorKind::Io => PlumaError::io(message),
            ErrorKind::Ambiguous | ErrorKind::Other => PlumaError::Generic(message),
        },
    }
}

/// Print `value` as JSON or YAML.
fn print_structured<T: Serialize + ?Sized>(value: &T, format: OutputFormat) -> Result<()> {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(value).into_diagnostic()?,
        OutputFormat::Yaml | OutputFormat::Table => serde_yaml::to_string(value).into_diagnostic()?,
    };
    println!("{}", rendered.trim_end());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use miette::Diagnostic;

    #[test]
    fn test_diagnose() {
        let err = diagnose(ManagerError::Ambiguous {
            name: "cluster".to_string(),
        });
        assert!(matches!(err, PlumaError::AmbiguousPlugin { .. }));
        assert!(err.to_string().contains("unable to uniquely identify plugin 'cluster'"));

        let err = diagnose(ManagerError::Aggregate(vec![
            ManagerError::NotFound {
                name: "a".to_string(),
            },
            ManagerError::NotInstalled {
                name: "b".to_string(),
            },
        ]));
        assert_eq!(err.related().map(|r| r.count()), Some(2));
    }
}
