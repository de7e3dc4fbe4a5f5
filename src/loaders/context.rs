use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::downloader::DownloadEngine;
use crate::error::{LauncherError, LauncherResult};
use crate::paths::DataPaths;
use crate::version::VersionResolver;

/// Everything an installer needs, borrowed from the orchestrator for the
/// duration of one install.
#[derive(Clone, Copy)]
pub struct InstallContext<'a> {
    pub minecraft_version: &'a str,
    /// Loader build requested by the caller; `None` means auto-pick.
    pub loader_version: Option<&'a str>,
    /// Where the instance's client archive belongs.
    pub client_jar: &'a Path,
    pub paths: &'a DataPaths,
    pub engine: &'a DownloadEngine,
    pub resolver: &'a VersionResolver,
    pub client: &'a reqwest::Client,
    /// Managed Java binary, present once the runtime phase has run. External
    /// installer fallbacks need it; everything else ignores it.
    pub java_bin: Option<&'a Path>,
    pub cancel: &'a AtomicBool,
}

impl InstallContext<'_> {
    /// Installers poll this between steps; downloads in flight finish, no new
    /// work starts.
    pub fn check_cancelled(&self) -> LauncherResult<()> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(LauncherError::Cancelled);
        }
        Ok(())
    }
}
