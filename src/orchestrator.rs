// ─── Create-Instance Orchestrator ───
// Sequences the provisioning pipeline phase by phase and owns the session
// registry. It is the only writer of download state outcomes, so each run's
// error or cancellation is recorded exactly once.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::assets::AssetSynchronizer;
use crate::downloader::DownloadEngine;
use crate::error::{LauncherError, LauncherResult};
use crate::http::build_http_client;
use crate::instance::{Instance, InstanceState, InstanceStore, LoaderType};
use crate::java::JavaRuntimeManager;
use crate::launch::{self, PlayerIdentity};
use crate::loaders::{InstallContext, Installer};
use crate::paths::DataPaths;
use crate::state::{DownloadState, DownloadStateStore};
use crate::verify;
use crate::version::VersionResolver;

/// Memory ceiling for instances that do not ask for a specific amount.
const DEFAULT_MAX_MEMORY_MB: u32 = 4096;

/// Everything a caller supplies to provision a new instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInstanceRequest {
    pub name: String,
    pub minecraft_version: String,
    pub loader: LoaderType,
    /// Specific loader build; `None` lets the installer pick the newest
    /// compatible one.
    #[serde(default)]
    pub loader_version: Option<String>,
    /// `None` falls back to 4096 MiB.
    #[serde(default)]
    pub max_memory_mb: Option<u32>,
    /// Pin a Java binary for this instance instead of the managed runtime.
    #[serde(default)]
    pub java_path: Option<PathBuf>,
}

impl CreateInstanceRequest {
    pub fn new(
        name: impl Into<String>,
        minecraft_version: impl Into<String>,
        loader: LoaderType,
    ) -> Self {
        Self {
            name: name.into(),
            minecraft_version: minecraft_version.into(),
            loader,
            loader_version: None,
            max_memory_mb: None,
            java_path: None,
        }
    }
}

/// Pipeline phases in execution order. The step strings are persisted in
/// download records, so they are part of the on-disk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallPhase {
    Pending,
    DownloadingJre,
    CreatingStructure,
    DownloadingVersionMetadata,
    DownloadingClient,
    InstallingLoader,
    DownloadingAssets,
    VerifyingIntegrity,
    Completed,
}

impl InstallPhase {
    pub fn step(&self) -> &'static str {
        match self {
            InstallPhase::Pending => "pending",
            InstallPhase::DownloadingJre => "downloading_jre",
            InstallPhase::CreatingStructure => "creating_structure",
            InstallPhase::DownloadingVersionMetadata => "downloading_version_metadata",
            InstallPhase::DownloadingClient => "downloading_client",
            InstallPhase::InstallingLoader => "installing_loader",
            InstallPhase::DownloadingAssets => "downloading_assets",
            InstallPhase::VerifyingIntegrity => "verifying_integrity",
            InstallPhase::Completed => "completed",
        }
    }

    /// Whole-pipeline progress at the moment this phase begins.
    pub fn floor(&self) -> f32 {
        match self {
            InstallPhase::Pending => 0.0,
            InstallPhase::DownloadingJre => 0.05,
            InstallPhase::CreatingStructure => 0.25,
            InstallPhase::DownloadingVersionMetadata => 0.3,
            InstallPhase::DownloadingClient | InstallPhase::InstallingLoader => 0.4,
            InstallPhase::DownloadingAssets => 0.65,
            InstallPhase::VerifyingIntegrity => 0.95,
            InstallPhase::Completed => 1.0,
        }
    }
}

impl std::fmt::Display for InstallPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.step())
    }
}

/// One progress notification delivered to a registered callback.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub instance_id: String,
    pub phase: InstallPhase,
    /// 0.0 to 1.0 across the whole pipeline.
    pub progress: f32,
    pub detail: String,
}

/// Invoked inline from the pipeline; keep it cheap and non-blocking.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Per-instance session state: progress callbacks, cancellation flags for
/// runs in flight, and the running-game guard.
#[derive(Default)]
struct SessionRegistry {
    progress: Mutex<HashMap<String, ProgressCallback>>,
    cancel: Mutex<HashMap<String, Arc<AtomicBool>>>,
    running: Mutex<HashSet<String>>,
}

/// The top-level engine: owns the data layout and every collaborator, and
/// drives instance provisioning end to end.
///
/// All session state lives in this struct, so tests and embedders can run
/// several isolated launchers against separate data roots in one process.
pub struct Launcher {
    paths: DataPaths,
    client: reqwest::Client,
    engine: DownloadEngine,
    resolver: VersionResolver,
    instances: Arc<InstanceStore>,
    downloads: DownloadStateStore,
    java: JavaRuntimeManager,
    assets: AssetSynchronizer,
    sessions: Arc<SessionRegistry>,
}

impl Launcher {
    /// Launcher over the default per-user data root.
    pub async fn new() -> LauncherResult<Self> {
        Self::from_paths(DataPaths::discover()?).await
    }

    /// Launcher over an explicit data root.
    pub async fn with_data_root(root: impl Into<PathBuf>) -> LauncherResult<Self> {
        Self::from_paths(DataPaths::at(root)?).await
    }

    async fn from_paths(paths: DataPaths) -> LauncherResult<Self> {
        paths.ensure_layout()?;
        let client = build_http_client()?;
        let engine = DownloadEngine::new(client.clone());
        let resolver = VersionResolver::new(client.clone(), paths.clone());
        let instances = Arc::new(InstanceStore::new(
            paths.instances_dir(),
            paths.instances_index(),
        ));
        let downloads = DownloadStateStore::open(paths.downloads_state_file()).await;
        let java = JavaRuntimeManager::new(client.clone(), engine.clone(), paths.clone());
        let assets = AssetSynchronizer::new(client.clone(), engine.clone(), paths.assets_dir());

        Ok(Self {
            paths,
            client,
            engine,
            resolver,
            instances,
            downloads,
            java,
            assets,
            sessions: Arc::new(SessionRegistry::default()),
        })
    }

    /// Point the version catalog at a mirror.
    pub fn with_manifest_url(mut self, url: impl Into<String>) -> Self {
        self.resolver = self.resolver.with_manifest_url(url);
        self
    }

    pub fn paths(&self) -> &DataPaths {
        &self.paths
    }

    // ── Provisioning ────────────────────────────────────

    /// Provision a new instance end to end. On success the returned instance
    /// is verified and ready to launch; on failure the durable download
    /// record holds the error and [`resume`](Self::resume) can retry.
    pub async fn create_instance(&self, request: CreateInstanceRequest) -> LauncherResult<Instance> {
        let id = self.instances.unique_id(&request.name);
        info!(
            "Creating instance '{}' ({}): {} {}",
            request.name, id, request.loader, request.minecraft_version
        );

        let mut instance = Instance::new(
            id.clone(),
            request.name,
            request.minecraft_version,
            request.loader,
            request.loader_version,
            request.max_memory_mb.unwrap_or(DEFAULT_MAX_MEMORY_MB),
            self.instances.instances_dir(),
        );
        instance.java_path = request.java_path;

        self.downloads
            .begin(DownloadState::new(
                &id,
                instance.path.clone(),
                &instance.minecraft_version,
                instance.loader,
                instance.loader_version.clone(),
            ))
            .await?;
        self.emit(&id, InstallPhase::Pending, "queued").await;

        let cancel = self.register_session(&id).await;
        let result = self.run_pipeline(&mut instance, &cancel).await;
        self.finish_pipeline(result, instance).await
    }

    /// Re-enter the pipeline for an incomplete download record. Finished
    /// phases are skipped by their own existence checks, so a resume costs
    /// little more than the work that was actually lost.
    pub async fn resume(&self, id: &str) -> LauncherResult<Instance> {
        let record = self.downloads.resume(id).await?;
        info!("Resuming provisioning of {}", id);

        let mut instance = match self.instances.load(id).await {
            Ok(instance) => instance,
            Err(LauncherError::InstanceNotFound(_)) => {
                // Crashed before instance.json was written; rebuild the
                // skeleton from the durable record.
                let mut rebuilt = Instance::new(
                    id.to_string(),
                    id.to_string(),
                    record.minecraft_version.clone(),
                    record.loader,
                    record.loader_version.clone(),
                    DEFAULT_MAX_MEMORY_MB,
                    self.instances.instances_dir(),
                );
                rebuilt.path = record.instance_path.clone();
                rebuilt
            }
            Err(e) => return Err(e),
        };

        self.emit(id, InstallPhase::Pending, "resumed").await;
        let cancel = self.register_session(id).await;
        let result = self.run_pipeline(&mut instance, &cancel).await;
        self.finish_pipeline(result, instance).await
    }

    async fn run_pipeline(
        &self,
        instance: &mut Instance,
        cancel: &Arc<AtomicBool>,
    ) -> LauncherResult<()> {
        let id = instance.id.clone();
        self.downloads.mark_downloading(&id).await?;

        self.enter_phase(&id, InstallPhase::DownloadingJre, "resolving a Java runtime", cancel)
            .await?;
        let java = self
            .java
            .ensure(&instance.minecraft_version, instance.java_path.as_deref())
            .await?;

        self.enter_phase(
            &id,
            InstallPhase::CreatingStructure,
            "creating instance folders",
            cancel,
        )
        .await?;
        self.instances.ensure_structure(instance).await?;
        self.instances
            .set_state(instance, InstanceState::Installing)
            .await?;

        self.enter_phase(
            &id,
            InstallPhase::DownloadingVersionMetadata,
            "resolving version metadata",
            cancel,
        )
        .await?;
        self.resolver
            .version_metadata(&instance.minecraft_version)
            .await?;

        let (install_phase, install_detail) = if instance.loader == LoaderType::Vanilla {
            (InstallPhase::DownloadingClient, "downloading the client archive")
        } else {
            (InstallPhase::InstallingLoader, "installing the mod loader")
        };
        self.enter_phase(&id, install_phase, install_detail, cancel).await?;

        let client_jar = instance.client_jar_path();
        let ctx = InstallContext {
            minecraft_version: &instance.minecraft_version,
            loader_version: instance.loader_version.as_deref(),
            client_jar: &client_jar,
            paths: &self.paths,
            engine: &self.engine,
            resolver: &self.resolver,
            client: &self.client,
            java_bin: Some(&java.path),
            cancel: cancel.as_ref(),
        };
        let outcome = Installer::new(instance.loader, &self.client)
            .install(&ctx)
            .await?;

        instance.loader_version = outcome.loader_version.clone();
        instance.main_class = Some(outcome.descriptor.main_class.clone());
        instance.asset_index = outcome.descriptor.asset_index.as_ref().map(|a| a.id.clone());
        instance.jvm_args = outcome.descriptor.simple_jvm_args();
        instance.game_args = outcome.descriptor.simple_game_args();

        let (still_missing, coords) = outcome
            .descriptor
            .collect_library_downloads(&self.paths.libraries_dir());
        if !still_missing.is_empty() {
            // The installer's closing sweep normally leaves nothing here.
            warn!(
                "{} libraries still missing after installing {}",
                still_missing.len(),
                id
            );
            for (entry, err) in self.engine.download_batch(still_missing).await {
                warn!("Library download failed for {}: {}", entry.url, err);
            }
        }
        instance.libraries = coords;
        self.instances.save(instance).await?;
        self.downloads
            .add_file_counts(
                &id,
                (outcome.libraries.present + outcome.libraries.downloaded) as u64,
                outcome.libraries.failed as u64,
            )
            .await?;

        self.enter_phase(
            &id,
            InstallPhase::DownloadingAssets,
            "synchronizing the asset store",
            cancel,
        )
        .await?;
        match outcome.descriptor.asset_index.as_ref() {
            Some(index) => {
                let report = self.assets.sync(&index.id, &index.url).await?;
                self.downloads
                    .add_file_counts(&id, report.downloaded as u64, report.failed as u64)
                    .await?;
            }
            None => warn!("Descriptor for {} names no asset index, skipping sync", id),
        }

        self.enter_phase(
            &id,
            InstallPhase::VerifyingIntegrity,
            "verifying the install",
            cancel,
        )
        .await?;
        verify::verify_instance(&self.instances, &self.paths, instance).await?;
        Ok(())
    }

    /// Record the run's outcome in the download store. Exactly one terminal
    /// transition happens here per run, never inside a phase.
    async fn finish_pipeline(
        &self,
        result: LauncherResult<()>,
        mut instance: Instance,
    ) -> LauncherResult<Instance> {
        let id = instance.id.clone();
        self.sessions.cancel.lock().await.remove(&id);

        match result {
            Ok(()) => {
                self.downloads.complete(&id).await?;
                self.emit(&id, InstallPhase::Completed, "instance ready").await;
                info!("Instance {} provisioned", id);
                Ok(instance)
            }
            Err(e) if e.is_cancelled() => {
                if let Err(record_err) = self.downloads.cancel(&id).await {
                    warn!("Could not record cancellation of {}: {}", id, record_err);
                }
                info!("Provisioning of {} cancelled", id);
                Err(e)
            }
            Err(e) => {
                let step = self
                    .downloads
                    .get(&id)
                    .await
                    .map(|record| record.step)
                    .unwrap_or_else(|| "install".to_string());
                let message = format!("{} failed: {}", step, e);
                if let Err(record_err) = self.downloads.fail(&id, &message).await {
                    warn!("Could not record failure of {}: {}", id, record_err);
                }
                if instance.config_path().exists() {
                    instance.state = InstanceState::Error;
                    if let Err(save_err) = self.instances.save(&instance).await {
                        warn!("Could not persist error state of {}: {}", id, save_err);
                    }
                }
                warn!("Provisioning of {} failed: {}", id, message);
                Err(e)
            }
        }
    }

    /// Cancellation is checked here, at phase boundaries only; work already
    /// in flight inside a phase finishes or fails on its own.
    async fn enter_phase(
        &self,
        id: &str,
        phase: InstallPhase,
        detail: &str,
        cancel: &Arc<AtomicBool>,
    ) -> LauncherResult<()> {
        if cancel.load(Ordering::Relaxed) {
            return Err(LauncherError::Cancelled);
        }
        debug!("Instance {}: entering {}", id, phase);
        self.downloads
            .update_progress(id, phase.floor(), phase.step())
            .await?;
        self.emit(id, phase, detail).await;
        Ok(())
    }

    async fn emit(&self, id: &str, phase: InstallPhase, detail: &str) {
        let callback = self.sessions.progress.lock().await.get(id).cloned();
        if let Some(callback) = callback {
            callback(ProgressEvent {
                instance_id: id.to_string(),
                phase,
                progress: phase.floor(),
                detail: detail.to_string(),
            });
        }
    }

    async fn register_session(&self, id: &str) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        self.sessions
            .cancel
            .lock()
            .await
            .insert(id.to_string(), flag.clone());
        flag
    }

    // ── Session control ─────────────────────────────────

    /// Register a progress callback for an instance id. One callback per id;
    /// registering again replaces the previous one.
    pub async fn on_progress<F>(&self, id: &str, callback: F)
    where
        F: Fn(ProgressEvent) + Send + Sync + 'static,
    {
        self.sessions
            .progress
            .lock()
            .await
            .insert(id.to_string(), Arc::new(callback));
    }

    /// Request cooperative cancellation of the provisioning run in flight
    /// for `id`. Takes effect at the next phase boundary.
    pub async fn cancel(&self, id: &str) {
        match self.sessions.cancel.lock().await.get(id) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                info!("Cancellation requested for {}", id);
            }
            None => debug!("No provisioning session in flight for {}", id),
        }
    }

    /// Records that can still be acted on: queued, mid-flight (including
    /// orphans from a crash) or failed.
    pub async fn incomplete_downloads(&self) -> Vec<DownloadState> {
        self.downloads.incomplete().await
    }

    // ── Instance access ─────────────────────────────────

    pub async fn list_instances(&self) -> LauncherResult<Vec<Instance>> {
        self.instances.list().await
    }

    pub async fn get_instance(&self, id: &str) -> LauncherResult<Instance> {
        self.instances.load(id).await
    }

    /// Whether the instance exists and has passed integrity verification.
    pub async fn is_ready(&self, id: &str) -> bool {
        match self.instances.load(id).await {
            Ok(instance) => instance.is_ready(),
            Err(_) => false,
        }
    }

    pub async fn delete_instance(&self, id: &str) -> LauncherResult<()> {
        if self.sessions.running.lock().await.contains(id) {
            return Err(LauncherError::Other(format!(
                "Instance {} is running; close it before deleting",
                id
            )));
        }
        self.instances.delete(id).await?;
        self.downloads.remove(id).await?;
        self.sessions.progress.lock().await.remove(id);
        Ok(())
    }

    // ── Launch ──────────────────────────────────────────

    /// Launch a verified instance and return the game's process id. The
    /// child is monitored in the background; instance state returns to ready
    /// (or error, after an abnormal exit) when it closes.
    pub async fn launch(&self, id: &str, identity: &PlayerIdentity) -> LauncherResult<u32> {
        let mut instance = self.instances.load(id).await?;
        if !instance.is_ready() {
            return Err(LauncherError::Integrity(format!(
                "instance {} has not passed verification",
                id
            )));
        }

        // Guard taken before the spawn and released on both failure paths.
        {
            let mut running = self.sessions.running.lock().await;
            if !running.insert(id.to_string()) {
                return Err(LauncherError::Other(format!(
                    "Instance {} is already running",
                    id
                )));
            }
        }

        match self.spawn_game(&instance, identity).await {
            Ok(child) => {
                let pid = child.id().unwrap_or_default();
                instance.state = InstanceState::Running;
                instance.last_played = Some(Utc::now());
                if let Err(e) = self.instances.save(&instance).await {
                    warn!("Could not persist running state of {}: {}", id, e);
                }
                self.monitor_child(instance, child);
                Ok(pid)
            }
            Err(e) => {
                self.sessions.running.lock().await.remove(id);
                Err(e)
            }
        }
    }

    async fn spawn_game(
        &self,
        instance: &Instance,
        identity: &PlayerIdentity,
    ) -> LauncherResult<tokio::process::Child> {
        let java = self
            .java
            .ensure(&instance.minecraft_version, instance.java_path.as_deref())
            .await?;
        let classpath = launch::build_classpath(instance, &self.paths)?;
        launch::extract_natives(instance, &self.paths).await?;
        launch::launch(instance, identity, &classpath, &self.paths, &java.path).await
    }

    fn monitor_child(&self, instance: Instance, mut child: tokio::process::Child) {
        let store = self.instances.clone();
        let sessions = self.sessions.clone();

        tokio::spawn(async move {
            let status = child.wait().await;
            sessions.running.lock().await.remove(&instance.id);
            launch::cleanup_natives(&instance).await;

            let clean_exit = matches!(&status, Ok(s) if s.success());
            match store.load(&instance.id).await {
                Ok(mut latest) => {
                    let next = if clean_exit {
                        InstanceState::Ready
                    } else {
                        InstanceState::Error
                    };
                    if let Err(e) = store.set_state(&mut latest, next).await {
                        warn!("Could not persist exit state of {}: {}", instance.id, e);
                    }
                }
                Err(e) => warn!("Could not reload {} after exit: {}", instance.id, e),
            }

            match status {
                Ok(s) => info!("Instance {} exited: {}", instance.id, s),
                Err(e) => warn!("Waiting on instance {} failed: {}", instance.id, e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DownloadStatus;
    use crate::testutil::refused_url;

    async fn launcher(dir: &tempfile::TempDir) -> Launcher {
        Launcher::with_data_root(dir.path().join("data"))
            .await
            .unwrap()
            .with_manifest_url(refused_url().await)
    }

    #[cfg(unix)]
    fn fake_java(dir: &std::path::Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-java");
        std::fs::write(
            &path,
            "#!/bin/sh\necho 'openjdk version \"17.0.9\" 2023-10-17' >&2\necho '    os.arch = amd64' >&2\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn ready_instance(launcher: &Launcher, id: &str) -> Instance {
        let mut instance = Instance::new(
            id.to_string(),
            id.to_string(),
            "1.20.1".into(),
            LoaderType::Vanilla,
            None,
            2048,
            launcher.instances.instances_dir(),
        );
        instance.state = InstanceState::Ready;
        instance.main_class = Some("net.minecraft.client.main.Main".into());
        instance
    }

    #[test]
    fn phase_floors_are_monotonic_and_steps_stable() {
        let order = [
            InstallPhase::Pending,
            InstallPhase::DownloadingJre,
            InstallPhase::CreatingStructure,
            InstallPhase::DownloadingVersionMetadata,
            InstallPhase::DownloadingClient,
            InstallPhase::DownloadingAssets,
            InstallPhase::VerifyingIntegrity,
            InstallPhase::Completed,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].floor() <= pair[1].floor());
        }
        // Persisted in download records; renaming breaks old state files.
        assert_eq!(InstallPhase::DownloadingVersionMetadata.step(), "downloading_version_metadata");
        assert_eq!(InstallPhase::InstallingLoader.step(), "installing_loader");
        assert_eq!(
            InstallPhase::InstallingLoader.floor(),
            InstallPhase::DownloadingClient.floor()
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_create_records_the_error_and_resume_reenters() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = launcher(&dir).await;

        let mut request = CreateInstanceRequest::new("Test", "1.20.1", LoaderType::Vanilla);
        request.java_path = Some(fake_java(dir.path()));
        let err = launcher.create_instance(request).await.unwrap_err();
        assert!(!err.is_cancelled());

        let record = launcher.downloads.get("test").await.unwrap();
        assert_eq!(record.status, DownloadStatus::Error);
        let message = record.error.unwrap();
        assert!(message.contains("downloading_version_metadata"), "{message}");

        // The instance reached disk during the structure phase and carries
        // the error state now.
        let stored = launcher.get_instance("test").await.unwrap();
        assert_eq!(stored.state, InstanceState::Error);
        assert!(!launcher.is_ready("test").await);

        // Error only exits through resume; the record stays discoverable.
        assert_eq!(launcher.incomplete_downloads().await.len(), 1);
        assert!(launcher.downloads.complete("test").await.is_err());

        let err = launcher.resume("test").await.unwrap_err();
        assert!(!err.is_cancelled());
        assert_eq!(
            launcher.downloads.get("test").await.unwrap().status,
            DownloadStatus::Error
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn progress_callbacks_see_the_phases_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = launcher(&dir).await;

        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = events.clone();
        launcher
            .on_progress("phased", move |event| sink.lock().unwrap().push(event))
            .await;

        let mut request = CreateInstanceRequest::new("Phased", "1.20.1", LoaderType::Vanilla);
        request.java_path = Some(fake_java(dir.path()));
        let _ = launcher.create_instance(request).await;

        let seen = events.lock().unwrap();
        assert_eq!(seen[0].phase, InstallPhase::Pending);
        assert!(seen.iter().any(|e| e.phase == InstallPhase::DownloadingJre));
        assert!(seen
            .iter()
            .any(|e| e.phase == InstallPhase::DownloadingVersionMetadata));
        assert!(seen.windows(2).all(|w| w[0].progress <= w[1].progress));
        assert!(seen.iter().all(|e| e.instance_id == "phased"));
    }

    #[tokio::test]
    async fn phase_entry_honors_the_cancel_flag() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = launcher(&dir).await;

        launcher
            .downloads
            .begin(DownloadState::new(
                "c-test",
                dir.path().join("instances/c-test"),
                "1.20.1",
                LoaderType::Vanilla,
                None,
            ))
            .await
            .unwrap();
        launcher.downloads.mark_downloading("c-test").await.unwrap();

        let cancel = Arc::new(AtomicBool::new(true));
        let err = launcher
            .enter_phase("c-test", InstallPhase::DownloadingAssets, "x", &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        // The record was not advanced into the refused phase.
        assert_eq!(launcher.downloads.get("c-test").await.unwrap().step, "pending");
    }

    #[tokio::test]
    async fn a_cancelled_run_is_recorded_as_cancelled_and_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = launcher(&dir).await;

        let instance = ready_instance(&launcher, "halted");
        launcher
            .downloads
            .begin(DownloadState::new(
                "halted",
                instance.path.clone(),
                "1.20.1",
                LoaderType::Vanilla,
                None,
            ))
            .await
            .unwrap();
        launcher.downloads.mark_downloading("halted").await.unwrap();

        let err = launcher
            .finish_pipeline(Err(LauncherError::Cancelled), instance)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());

        let record = launcher.downloads.get("halted").await.unwrap();
        assert_eq!(record.status, DownloadStatus::Cancelled);
        assert!(launcher.downloads.resume("halted").await.is_err());
        assert!(launcher.incomplete_downloads().await.is_empty());
    }

    #[tokio::test]
    async fn cancel_flips_only_registered_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = launcher(&dir).await;

        let flag = launcher.register_session("abc").await;
        assert!(!flag.load(Ordering::Relaxed));

        launcher.cancel("abc").await;
        assert!(flag.load(Ordering::Relaxed));

        // Unknown ids are a quiet no-op.
        launcher.cancel("never-registered").await;
    }

    #[tokio::test]
    async fn launch_refuses_unverified_instances() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = launcher(&dir).await;

        let mut instance = ready_instance(&launcher, "raw");
        instance.state = InstanceState::Created;
        launcher.instances.ensure_structure(&instance).await.unwrap();
        launcher.instances.save(&instance).await.unwrap();

        let err = launcher
            .launch("raw", &PlayerIdentity::offline("Alex"))
            .await
            .unwrap_err();
        assert!(matches!(err, LauncherError::Integrity(_)));
        // The guard was never taken.
        assert!(launcher.sessions.running.lock().await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn launch_guard_is_released_when_the_spawn_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = launcher(&dir).await;

        let mut instance = ready_instance(&launcher, "ready-one");
        instance.java_path = Some(fake_java(dir.path()));
        launcher.instances.ensure_structure(&instance).await.unwrap();
        launcher.instances.save(&instance).await.unwrap();

        // No client jar on disk, so classpath assembly fails after the
        // guard was taken.
        let err = launcher
            .launch("ready-one", &PlayerIdentity::offline("Alex"))
            .await
            .unwrap_err();
        assert!(matches!(err, LauncherError::MissingArtifact(_)));
        assert!(launcher.sessions.running.lock().await.is_empty());

        // A second attempt hits the same failure, not an already-running
        // refusal.
        let second = launcher
            .launch("ready-one", &PlayerIdentity::offline("Alex"))
            .await
            .unwrap_err();
        assert!(matches!(second, LauncherError::MissingArtifact(_)));
    }

    #[tokio::test]
    async fn delete_clears_the_download_record_and_refuses_running() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = launcher(&dir).await;

        let instance = ready_instance(&launcher, "doomed");
        launcher.instances.ensure_structure(&instance).await.unwrap();
        launcher.instances.save(&instance).await.unwrap();
        launcher
            .downloads
            .begin(DownloadState::new(
                "doomed",
                instance.path.clone(),
                "1.20.1",
                LoaderType::Vanilla,
                None,
            ))
            .await
            .unwrap();

        launcher.sessions.running.lock().await.insert("doomed".into());
        assert!(launcher.delete_instance("doomed").await.is_err());
        launcher.sessions.running.lock().await.remove("doomed");

        launcher.delete_instance("doomed").await.unwrap();
        assert!(launcher.get_instance("doomed").await.is_err());
        assert!(launcher.downloads.get("doomed").await.is_none());
    }

    #[tokio::test]
    async fn is_ready_is_false_for_missing_instances() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = launcher(&dir).await;
        assert!(!launcher.is_ready("ghost").await);
    }
}
