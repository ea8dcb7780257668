//! Invoking installed plugin binaries.

use crate::ManagerError;
use async_trait::async_trait;
use pluma_types::PluginDescriptor;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Hidden subcommand that prints the plugin descriptor as JSON.
pub const DESCRIBE_COMMAND: &str = "info";
/// Optional subcommand run once after install.
pub const POST_INSTALL_COMMAND: &str = "post-install";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Runs a plugin binary to completion.
#[async_trait]
pub trait PluginRunner: Send + Sync {
    async fn run(&self, binary: &Path, args: &[&str]) -> io::Result<RunOutput>;
}

/// [`PluginRunner`] that spawns the binary as a child process.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

#[async_trait]
impl PluginRunner for ProcessRunner {
    async fn run(&self, binary: &Path, args: &[&str]) -> io::Result<RunOutput> {
        let binary: PathBuf = binary.to_path_buf();
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        debug!("Running {} {}", binary.display(), args.join(" "));

        let output = tokio::task::spawn_blocking(move || Command::new(&binary).args(&args).output())
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("Task join error: {}", e)))??;

        Ok(RunOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Ask an installed binary for its descriptor.
pub async fn describe_binary(
    runner: &dyn PluginRunner,
    binary: &Path,
    plugin: &str,
) -> Result<PluginDescriptor, ManagerError> {
    let describe_err = |message: String| ManagerError::Describe {
        plugin: plugin.to_string(),
        message,
    };

    let output = runner
        .run(binary, &[DESCRIBE_COMMAND])
        .await
        .map_err(|e| describe_err(e.to_string()))?;
    if !output.success {
        return Err(describe_err(output.combined().trim().to_string()));
    }

    serde_json::from_str(output.stdout.trim()).map_err(|source| ManagerError::MalformedDescriptor {
        plugin: plugin.to_string(),
        source,
    })
}

/// Run the post-install hook; a failure comes back as a warning.
///
/// Plugins without the hook answer with an "unknown command" error, which is
/// not reported.
pub async fn post_install(runner: &dyn PluginRunner, binary: &Path, plugin: &str) -> Option<String> {
    let failure = match runner.run(binary, &[POST_INSTALL_COMMAND]).await {
        Ok(output) if output.success => return None,
        Ok(output) => {
            let combined = output.combined();
            if combined.contains("unknown command") {
                debug!("Plugin '{}' has no post-install hook", plugin);
                return None;
            }
            combined.trim().to_string()
        }
        Err(e) => e.to_string(),
    };
    Some(format!(
        "post-install configuration for plugin '{}' failed: {}",
        plugin, failure
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedRunner {
        replies: Mutex<Vec<io::Result<RunOutput>>>,
    }

    impl ScriptedRunner {
        fn new(replies: Vec<io::Result<RunOutput>>) -> Self {
            Self {
                replies: Mutex::new(replies),
            }
        }
    }

    #[async_trait]
    impl PluginRunner for ScriptedRunner {
        async fn run(&self, _binary: &Path, _args: &[&str]) -> io::Result<RunOutput> {
            self.replies.lock().unwrap().remove(0)
        }
    }

    fn output(success: bool, stdout: &str, stderr: &str) -> io::Result<RunOutput> {
        Ok(RunOutput {
            success,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        })
    }

    #[tokio::test]
    async fn test_describe_binary() {
        let runner = ScriptedRunner::new(vec![
            output(
                true,
                r#"{"name":"login","version":"v1.0.0","description":"Login","group":"System","buildSHA":"abc123"}"#,
                "",
            ),
            output(false, "", "segmentation fault"),
            output(true, "Usage: login [command]", ""),
        ]);
        let binary = Path::new("/plugins/login/v1.0.0");

        let descriptor = describe_binary(&runner, binary, "login").await.unwrap();
        assert_eq!(descriptor.version, "v1.0.0");
        assert_eq!(descriptor.build_sha, "abc123");

        let err = describe_binary(&runner, binary, "login").await.unwrap_err();
        assert!(err.to_string().contains("segmentation fault"));

        assert!(matches!(
            describe_binary(&runner, binary, "login").await,
            Err(ManagerError::MalformedDescriptor { .. })
        ));
    }

    #[tokio::test]
    async fn test_post_install() {
        let runner = ScriptedRunner::new(vec![
            output(true, "", ""),
            output(false, "", "Error: unknown command \"post-install\" for \"login\""),
            output(false, "", "could not write kubeconfig"),
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "permission denied")),
        ]);
        let binary = Path::new("/plugins/login/v1.0.0");

        assert!(post_install(&runner, binary, "login").await.is_none());
        assert!(post_install(&runner, binary, "login").await.is_none());
        let warning = post_install(&runner, binary, "login").await.unwrap();
        assert!(warning.contains("could not write kubeconfig"));
        let warning = post_install(&runner, binary, "login").await.unwrap();
        assert!(warning.contains("permission denied"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("echo-plugin");
        std::fs::write(&script, "#!/bin/sh\necho \"$1\"\nexit 3\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let output = ProcessRunner.run(&script, &["info"]).await.unwrap();
        assert!(!output.success);
        assert_eq!(output.stdout.trim(), "info");
    }
}
