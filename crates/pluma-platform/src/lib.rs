//! Host platform detection and on-disk naming conventions for plugins.

use pluma_types::PluginIdentity;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Prefix of binaries in legacy local plugin trees.
pub const LEGACY_BINARY_PREFIX: &str = "tanzu";

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("'{0}' not found in PATH")]
    ProgramNotFound(String),
}

/// Operating system and architecture, named the way plugin artifacts are published.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformInfo {
    /// Operating system (darwin, linux, windows)
    pub os: String,
    /// CPU architecture (amd64, arm64)
    pub arch: String,
}

impl PlatformInfo {
    /// Detect the current platform.
    pub fn detect() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            other => other,
        };
        Self::new(os, arch)
    }

    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    pub fn is_windows(&self) -> bool {
        self.os == "windows"
    }

    /// Suffix executables carry on this platform.
    pub fn exe_suffix(&self) -> &'static str {
        if self.is_windows() {
            ".exe"
        } else {
            ""
        }
    }

    /// Get a cache-friendly identifier for this platform.
    pub fn cache_key(&self) -> String {
        format!("{}_{}", self.os, self.arch)
    }

    /// Binary name inside a legacy local tree: `tanzu-<name>-<os>_<arch>[.exe]`.
    pub fn legacy_binary_name(&self, plugin: &str) -> String {
        format!(
            "{}-{}-{}{}",
            LEGACY_BINARY_PREFIX,
            plugin,
            self.cache_key(),
            self.exe_suffix()
        )
    }

    /// Deterministic install location of a catalog-tracked plugin.
    ///
    /// Target-less plugins live at `<root>/<name>/<version>`; targeted ones get
    /// a target directory so two identities sharing a name never collide.
    pub fn install_path(&self, root: &Path, identity: &PluginIdentity, version: &str) -> PathBuf {
        let mut dir = root.join(&identity.name);
        if !identity.target.is_none() {
            dir = dir.join(identity.target.as_str());
        }
        dir.join(format!("{}{}", version, self.exe_suffix()))
    }
}

/// Locate an executable on `PATH`.
pub fn locate_program(name: &str) -> Result<PathBuf, PlatformError> {
    which::which(name).map_err(|_| PlatformError::ProgramNotFound(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pluma_types::Target;

    #[test]
    fn test_platform_detection() {
        let platform = PlatformInfo::detect();
        assert!(!platform.os.is_empty());
        assert!(!platform.arch.is_empty());
        assert_ne!(platform.os, "macos");
        assert_ne!(platform.arch, "x86_64");
    }

    #[test]
    fn test_legacy_binary_name() {
        let linux = PlatformInfo::new("linux", "amd64");
        assert_eq!(linux.legacy_binary_name("login"), "tanzu-login-linux_amd64");

        let windows = PlatformInfo::new("windows", "amd64");
        assert_eq!(
            windows.legacy_binary_name("login"),
            "tanzu-login-windows_amd64.exe"
        );
    }

    #[test]
    fn test_install_path() {
        let root = Path::new("/plugins");
        let linux = PlatformInfo::new("linux", "arm64");

        let plain = PluginIdentity::new("login", Target::None);
        assert_eq!(
            linux.install_path(root, &plain, "v1.0.0"),
            PathBuf::from("/plugins/login/v1.0.0")
        );

        let targeted = PluginIdentity::new("cluster", Target::K8s);
        assert_eq!(
            linux.install_path(root, &targeted, "v1.0.0"),
            PathBuf::from("/plugins/cluster/k8s/v1.0.0")
        );

        let windows = PlatformInfo::new("windows", "amd64");
        assert_eq!(
            windows.install_path(root, &plain, "v1.0.0"),
            PathBuf::from("/plugins/login/v1.0.0.exe")
        );
    }

    #[test]
    fn test_locate_missing_program() {
        assert!(locate_program("pluma-definitely-not-installed").is_err());
    }
}
