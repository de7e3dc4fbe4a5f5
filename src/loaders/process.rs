use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{LauncherError, LauncherResult};

/// Captured result of a finished installer process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Both streams joined for error reporting, stderr last so the message
    /// ends with whatever the installer complained about.
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        if stdout.is_empty() {
            stderr.to_string()
        } else if stderr.is_empty() {
            stdout.to_string()
        } else {
            format!("{stdout}\n{stderr}")
        }
    }
}

/// Port for running a vendor installer jar. The production implementation
/// spawns the managed Java runtime; tests substitute a scripted one.
#[async_trait]
pub trait InstallerProcessRunner: Send + Sync {
    async fn run(
        &self,
        java_bin: &Path,
        args: &[String],
        working_dir: &Path,
    ) -> LauncherResult<ProcessOutput>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JavaProcessRunner;

#[async_trait]
impl InstallerProcessRunner for JavaProcessRunner {
    async fn run(
        &self,
        java_bin: &Path,
        args: &[String],
        working_dir: &Path,
    ) -> LauncherResult<ProcessOutput> {
        debug!("Running {} {}", java_bin.display(), args.join(" "));

        let output = tokio::process::Command::new(java_bin)
            .args(args)
            .current_dir(working_dir)
            .output()
            .await
            .map_err(|e| {
                LauncherError::JavaExecution(format!(
                    "failed to spawn {}: {e}",
                    java_bin.display()
                ))
            })?;

        Ok(ProcessOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
