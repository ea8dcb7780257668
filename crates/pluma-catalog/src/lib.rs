//! Persisted index of installed plugins.
//!
//! One YAML document per user holds every installation ever recorded
//! (`indexByPath`, `indexByName`) plus the active installation of each plugin
//! per scope: the standalone scope, or one named context. A [`Catalog`] is
//! bound to a single scope and re-reads the document on every call.
//!
//! The same identity and version installed in two scopes share one binary and
//! one `indexByPath` entry. Readers stamp their own scope onto what they
//! return, and deleting from one scope only drops that scope's association.

use directories::ProjectDirs;
use pluma_types::{PluginDescriptor, PluginIdentity, Scope};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub const API_VERSION: &str = "cli.pluma.dev/v1alpha1";
pub const KIND: &str = "Catalog";
pub const CATALOG_FILE: &str = "catalog.yaml";

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read catalog {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to write catalog {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse catalog {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Failed to serialize catalog: {0}")]
    Serialize(#[source] serde_yaml::Error),
    #[error("Cache directory not found")]
    NoCacheDir,
}

/// The persisted catalog document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogDocument {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    /// Installation path to descriptor, across all scopes
    #[serde(default)]
    pub index_by_path: BTreeMap<String, PluginDescriptor>,
    /// Identity to every installation path ever recorded for it
    #[serde(default)]
    pub index_by_name: BTreeMap<String, Vec<String>>,
    /// Identity to active installation path, standalone scope
    #[serde(default)]
    pub stand_alone_plugins: BTreeMap<String, String>,
    /// Context name to its own identity-to-path map
    #[serde(default)]
    pub server_plugins: BTreeMap<String, BTreeMap<String, String>>,
}

impl Default for CatalogDocument {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            index_by_path: BTreeMap::new(),
            index_by_name: BTreeMap::new(),
            stand_alone_plugins: BTreeMap::new(),
            server_plugins: BTreeMap::new(),
        }
    }
}

impl CatalogDocument {
    /// Load the document; a missing file is an empty catalog.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No catalog at {}, starting empty", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(CatalogError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content).map_err(|source| CatalogError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the document atomically.
    pub fn save(&self, path: &Path) -> Result<(), CatalogError> {
        let write_err = |source| CatalogError::Write {
            path: path.to_path_buf(),
            source,
        };
        let content = serde_yaml::to_string(self).map_err(CatalogError::Serialize)?;

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(write_err)?;
        let mut staged = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        staged.write_all(content.as_bytes()).map_err(write_err)?;
        staged.persist(path).map_err(|e| write_err(e.error))?;
        Ok(())
    }

    fn associations(&self, scope: &CatalogScope) -> Option<&BTreeMap<String, String>> {
        match scope {
            CatalogScope::Standalone => Some(&self.stand_alone_plugins),
            CatalogScope::Context(name) => self.server_plugins.get(name),
        }
    }

    fn associations_mut(&mut self, scope: &CatalogScope) -> &mut BTreeMap<String, String> {
        match scope {
            CatalogScope::Standalone => &mut self.stand_alone_plugins,
            CatalogScope::Context(name) => self.server_plugins.entry(name.clone()).or_default(),
        }
    }
}

/// Which set of active installations a [`Catalog`] reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CatalogScope {
    Standalone,
    Context(String),
}

impl CatalogScope {
    /// Standalone for an empty name.
    pub fn for_context(name: &str) -> Self {
        if name.is_empty() {
            CatalogScope::Standalone
        } else {
            CatalogScope::Context(name.to_string())
        }
    }

    pub fn kind(&self) -> Scope {
        match self {
            CatalogScope::Standalone => Scope::Standalone,
            CatalogScope::Context(_) => Scope::Context,
        }
    }
}

impl std::fmt::Display for CatalogScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogScope::Standalone => write!(f, "standalone"),
            CatalogScope::Context(name) => write!(f, "context '{}'", name),
        }
    }
}

/// The catalog, bound to one scope.
#[derive(Debug, Clone)]
pub struct Catalog {
    path: PathBuf,
    scope: CatalogScope,
}

impl Catalog {
    pub fn new(path: impl Into<PathBuf>, scope: CatalogScope) -> Self {
        Self {
            path: path.into(),
            scope,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn scope(&self) -> &CatalogScope {
        &self.scope
    }

    /// Record `descriptor` as the active installation of its identity.
    pub fn upsert(&self, descriptor: &PluginDescriptor) -> Result<(), CatalogError> {
        let mut doc = CatalogDocument::load(&self.path)?;
        let key = descriptor.identity().catalog_key();
        let install_path = descriptor.installation_path.display().to_string();

        doc.index_by_path
            .insert(install_path.clone(), descriptor.clone());
        let history = doc.index_by_name.entry(key.clone()).or_default();
        if !history.contains(&install_path) {
            history.push(install_path.clone());
        }
        doc.associations_mut(&self.scope).insert(key, install_path);

        doc.save(&self.path)?;
        info!(
            "Recorded {} {} in {} catalog",
            descriptor.name, descriptor.version, self.scope
        );
        Ok(())
    }

    /// The active installation of `identity` in this scope.
    pub fn get(&self, identity: &PluginIdentity) -> Result<Option<PluginDescriptor>, CatalogError> {
        let doc = CatalogDocument::load(&self.path)?;
        Ok(doc
            .associations(&self.scope)
            .and_then(|map| map.get(&identity.catalog_key()))
            .and_then(|path| doc.index_by_path.get(path))
            .map(|descriptor| self.stamp(descriptor)))
    }

    /// Every active installation in this scope.
    pub fn list(&self) -> Result<Vec<PluginDescriptor>, CatalogError> {
        let doc = CatalogDocument::load(&self.path)?;
        Ok(doc
            .associations(&self.scope)
            .into_iter()
            .flat_map(|map| map.values())
            .filter_map(|path| doc.index_by_path.get(path))
            .map(|descriptor| self.stamp(descriptor))
            .collect())
    }

    fn stamp(&self, descriptor: &PluginDescriptor) -> PluginDescriptor {
        let mut descriptor = descriptor.clone();
        descriptor.scope = self.scope.kind();
        descriptor
    }

    /// Drop the active association of `identity`; the history indexes keep it.
    ///
    /// Returns whether an association existed.
    pub fn delete(&self, identity: &PluginIdentity) -> Result<bool, CatalogError> {
        let mut doc = CatalogDocument::load(&self.path)?;
        let removed = doc
            .associations_mut(&self.scope)
            .remove(&identity.catalog_key())
            .is_some();
        if removed {
            doc.save(&self.path)?;
            debug!("Removed {} from {} catalog", identity, self.scope);
        }
        Ok(removed)
    }
}

/// Remove the catalog file; a missing file is fine.
pub fn clean(path: &Path) -> Result<(), CatalogError> {
    match fs::remove_file(path) {
        Ok(()) => {
            info!("Removed catalog {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(CatalogError::Write {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Default catalog location under the user cache directory.
pub fn default_catalog_path() -> Result<PathBuf, CatalogError> {
    ProjectDirs::from("dev", "pluma", "pluma")
        .map(|dirs| dirs.cache_dir().join(CATALOG_FILE))
        .ok_or(CatalogError::NoCacheDir)
}
