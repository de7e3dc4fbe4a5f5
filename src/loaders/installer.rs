use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::downloader::{Checksum, DownloadEngine, DownloadEntry};
use crate::error::{LauncherError, LauncherResult};
use crate::instance::LoaderType;
use crate::maven::{MavenArtifact, MOJANG_LIBRARIES};
use crate::paths::DataPaths;
use crate::version::VersionDescriptor;

use super::context::InstallContext;
use super::fabric::FabricInstaller;
use super::forge::ForgeInstaller;
use super::neoforge::NeoForgeInstaller;
use super::quilt::QuiltInstaller;
use super::vanilla::VanillaInstaller;

/// Entry point of module-era Forge and NeoForge installs.
pub const BOOTSTRAP_LAUNCHER_MAIN: &str = "cpw.mods.bootstraplauncher.BootstrapLauncher";

/// Main classes some installers write in place of BootstrapLauncher. They
/// are thin discovery shims; launching through them breaks once the
/// classpath is assembled externally, so descriptors get rewritten to the
/// real entry point.
const BRIDGE_MAIN_CLASSES: &[&str] = &["net.minecraftforge.bootstrap.ForgeBootstrap"];

/// What an installer hands back to the orchestrator.
#[derive(Debug)]
pub struct LoaderInstallOutcome {
    /// Id of the canonical descriptor persisted under `versions/`.
    pub version_id: String,
    /// Loader build that was installed, `None` for vanilla.
    pub loader_version: Option<String>,
    /// Fully merged descriptor, self-contained (no `inheritsFrom` left).
    pub descriptor: VersionDescriptor,
    /// Result of the final library sweep.
    pub libraries: LibrarySweepReport,
}

/// Tally of the closing pass over a descriptor's library list. Failures do
/// not abort the install; integrity verification decides what is fatal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LibrarySweepReport {
    pub present: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl LibrarySweepReport {
    pub fn total(&self) -> usize {
        self.present + self.downloaded + self.skipped + self.failed
    }
}

#[async_trait]
pub trait LoaderInstaller: Send + Sync {
    /// Install the loader for `ctx.minecraft_version`, persist a canonical
    /// descriptor, and make sure its libraries are in the shared store.
    /// Safe to call again over a finished install.
    async fn install(&self, ctx: &InstallContext<'_>) -> LauncherResult<LoaderInstallOutcome>;
}

/// Closed dispatch over the supported loaders.
pub enum Installer {
    Vanilla(VanillaInstaller),
    Fabric(FabricInstaller),
    Quilt(QuiltInstaller),
    Forge(ForgeInstaller),
    NeoForge(NeoForgeInstaller),
}

impl Installer {
    pub fn new(loader: LoaderType, client: &reqwest::Client) -> Self {
        match loader {
            LoaderType::Vanilla => Self::Vanilla(VanillaInstaller::new()),
            LoaderType::Fabric => Self::Fabric(FabricInstaller::new(client.clone())),
            LoaderType::Quilt => Self::Quilt(QuiltInstaller::new(client.clone())),
            LoaderType::Forge => Self::Forge(ForgeInstaller::new(client.clone())),
            LoaderType::NeoForge => Self::NeoForge(NeoForgeInstaller::new(client.clone())),
        }
    }

    pub async fn install(&self, ctx: &InstallContext<'_>) -> LauncherResult<LoaderInstallOutcome> {
        match self {
            Installer::Vanilla(i) => i.install(ctx).await,
            Installer::Fabric(i) => i.install(ctx).await,
            Installer::Quilt(i) => i.install(ctx).await,
            Installer::Forge(i) => i.install(ctx).await,
            Installer::NeoForge(i) => i.install(ctx).await,
        }
    }
}

// ─── Shared Install Steps ───

/// Canonical descriptor id for a loader build on a game version.
pub(crate) fn canonical_version_id(
    loader: LoaderType,
    minecraft_version: &str,
    loader_version: &str,
) -> String {
    format!("{minecraft_version}-{loader}-{loader_version}")
}

/// A previously installed descriptor, if it parses and can launch.
/// Anything else is treated as absent so the install rebuilds it.
pub(crate) async fn load_reusable_descriptor(
    paths: &DataPaths,
    version_id: &str,
) -> Option<VersionDescriptor> {
    let path = paths.version_descriptor(version_id);
    if !path.exists() {
        return None;
    }

    match VersionDescriptor::load(&path).await {
        Ok(descriptor) if descriptor.is_launchable() => {
            debug!("Reusing installed descriptor {}", version_id);
            Some(descriptor)
        }
        Ok(_) => {
            warn!("Installed descriptor {} is incomplete, rebuilding", version_id);
            None
        }
        Err(e) => {
            warn!("Installed descriptor {} unreadable ({}), rebuilding", version_id, e);
            None
        }
    }
}

/// Persist a merged descriptor under its canonical id and hand back the
/// typed form.
pub(crate) async fn persist_descriptor_value(
    paths: &DataPaths,
    version_id: &str,
    descriptor: &serde_json::Value,
) -> LauncherResult<VersionDescriptor> {
    let path = paths.version_descriptor(version_id);
    let raw = serde_json::to_string_pretty(descriptor)?;
    VersionDescriptor::persist_raw(&path, &raw).await?;
    info!("Persisted version descriptor {}", version_id);
    Ok(serde_json::from_value(descriptor.clone())?)
}

/// Read a descriptor's raw JSON from the version store, resolving it from
/// the manifest first when it is not on disk yet.
pub(crate) async fn load_descriptor_value(
    ctx: &InstallContext<'_>,
    version_id: &str,
) -> LauncherResult<serde_json::Value> {
    let path = ctx.paths.version_descriptor(version_id);
    if !path.exists() {
        ctx.resolver.version_metadata(version_id).await?;
    }

    let raw = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| LauncherError::Io {
            path: path.clone(),
            source: e,
        })?;
    Ok(serde_json::from_str(&raw)?)
}

/// Collapse an `inheritsFrom` chain into one self-contained descriptor.
/// Chains are one hop in practice (loader over vanilla); the limit guards
/// against a descriptor that points at itself.
pub(crate) async fn resolve_descriptor_inheritance(
    ctx: &InstallContext<'_>,
    mut current: serde_json::Value,
) -> LauncherResult<serde_json::Value> {
    for _ in 0..8 {
        let Some(parent_id) = current.get("inheritsFrom").and_then(|v| v.as_str()) else {
            return Ok(current);
        };
        let parent_id = parent_id.to_string();
        debug!("Merging descriptor over parent {}", parent_id);

        let parent = load_descriptor_value(ctx, &parent_id).await?;
        let parent_inherits = parent.get("inheritsFrom").cloned();

        let mut merged = VersionDescriptor::merge_with_parent_json(&current, &parent);
        if let Some(obj) = merged.as_object_mut() {
            match parent_inherits {
                Some(next) => {
                    obj.insert("inheritsFrom".to_string(), next);
                }
                None => {
                    obj.remove("inheritsFrom");
                }
            }
        }
        current = merged;
    }

    Err(LauncherError::Loader(
        "version inheritance chain exceeded 8 levels".to_string(),
    ))
}

/// Rewrite vendor bridge main-classes to BootstrapLauncher. Returns whether
/// a rewrite happened.
pub(crate) fn normalize_main_class(descriptor: &mut serde_json::Value) -> bool {
    let Some(main) = descriptor.get("mainClass").and_then(|v| v.as_str()) else {
        return false;
    };

    if BRIDGE_MAIN_CLASSES.contains(&main) {
        debug!("Rewriting bridge main class {} to {}", main, BOOTSTRAP_LAUNCHER_MAIN);
        descriptor["mainClass"] = serde_json::Value::String(BOOTSTRAP_LAUNCHER_MAIN.to_string());
        return true;
    }
    false
}

/// Fetch the instance's client archive if it is not already in place.
pub(crate) async fn ensure_client_jar(
    ctx: &InstallContext<'_>,
    base: &VersionDescriptor,
) -> LauncherResult<()> {
    if ctx.client_jar.exists() {
        debug!("Client archive already present at {}", ctx.client_jar.display());
        return Ok(());
    }

    let artifact = base.client_artifact().ok_or_else(|| {
        LauncherError::Loader(format!(
            "version metadata for {} has no client download",
            ctx.minecraft_version
        ))
    })?;

    ctx.engine
        .download_file(
            &artifact.url,
            ctx.client_jar,
            Some(&Checksum::sha1(artifact.sha1.as_str())),
        )
        .await
}

/// Coordinates every module-era Forge-family descriptor needs on top of its
/// own artifacts. Versions track what the vendors currently pin.
pub(crate) const MODULE_BOOTSTRAP_LIBRARIES: &[&str] = &[
    "cpw.mods:bootstraplauncher:1.1.2",
    "cpw.mods:securejarhandler:2.1.10",
    "cpw.mods:modlauncher:10.0.9",
    "org.ow2.asm:asm:9.5",
    "org.ow2.asm:asm-commons:9.5",
    "org.ow2.asm:asm-tree:9.5",
    "org.ow2.asm:asm-util:9.5",
    "org.ow2.asm:asm-analysis:9.5",
];

/// Minimal profile registry some vendor installers insist on finding next to
/// the directory they install into.
pub(crate) async fn ensure_launcher_profiles_stub(paths: &DataPaths) -> LauncherResult<()> {
    let path = paths.root().join("launcher_profiles.json");
    if path.exists() {
        return Ok(());
    }
    tokio::fs::write(&path, br#"{"profiles":{},"selectedProfile":null}"#)
        .await
        .map_err(|e| LauncherError::Io { path, source: e })
}

/// First descriptor id from `candidates` that exists in the version store.
/// Installers have changed their naming over the years, so callers pass
/// every pattern their vendor has used.
pub(crate) fn locate_installed_descriptor(
    paths: &DataPaths,
    candidates: &[String],
) -> Option<(String, std::path::PathBuf)> {
    for id in candidates {
        let path = paths.version_descriptor(id);
        if path.exists() {
            return Some((id.clone(), path));
        }
    }
    None
}

/// One external installer invocation, vendor specifics injected.
pub(crate) struct ExternalInstallerRun<'a> {
    pub vendor: &'a str,
    /// Tried in order; some vendors moved their installer coordinates.
    pub installer_urls: &'a [String],
    pub jar_name: &'a str,
    pub descriptor_candidates: &'a [String],
}

/// Download the vendor installer, run it headless against the shared data
/// root, and hand back the raw descriptor it wrote. The jar is removed
/// afterwards whether or not the caller goes on to succeed.
pub(crate) async fn run_external_installer(
    ctx: &InstallContext<'_>,
    runner: &dyn super::process::InstallerProcessRunner,
    run: ExternalInstallerRun<'_>,
) -> LauncherResult<serde_json::Value> {
    let java_bin = ctx.java_bin.ok_or_else(|| {
        LauncherError::JavaExecution(format!(
            "no managed Java runtime available to run the {} installer",
            run.vendor
        ))
    })?;

    let installer_path = ctx.paths.temp_dir().join(run.jar_name);
    let mut fetched = false;
    let mut last_error = None;
    for url in run.installer_urls {
        match ctx.engine.download_file(url, &installer_path, None).await {
            Ok(()) => {
                fetched = true;
                break;
            }
            Err(e) => {
                debug!("Installer not available at {}: {}", url, e);
                last_error = Some(e);
            }
        }
    }
    if !fetched {
        return Err(last_error.unwrap_or_else(|| {
            LauncherError::Loader(format!("no installer sources configured for {}", run.vendor))
        }));
    }

    ensure_launcher_profiles_stub(ctx.paths).await?;

    let root = ctx.paths.root();
    let args = vec![
        "-jar".to_string(),
        installer_path.to_string_lossy().into_owned(),
        "--installClient".to_string(),
        root.to_string_lossy().into_owned(),
    ];

    info!("Running the {} installer for {}", run.vendor, ctx.minecraft_version);
    let result = runner.run(java_bin, &args, root).await;

    if let Err(e) = tokio::fs::remove_file(&installer_path).await {
        debug!("Could not remove installer jar: {}", e);
    }

    let output = result?;
    if !output.success() {
        return Err(LauncherError::InstallerProcess {
            code: output.code,
            output: output.combined(),
        });
    }

    let Some((installed_id, path)) = locate_installed_descriptor(ctx.paths, run.descriptor_candidates)
    else {
        return Err(LauncherError::Loader(format!(
            "{} installer finished but wrote no descriptor (checked {})",
            run.vendor,
            run.descriptor_candidates.join(", ")
        )));
    };
    debug!("Installer produced descriptor {}", installed_id);

    let raw = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| LauncherError::Io {
            path: path.clone(),
            source: e,
        })?;
    Ok(serde_json::from_str(&raw)?)
}

/// Primary URL for a coordinate-only library, plus the Mojang mirror to
/// retry from when the primary is not Mojang already.
fn coordinate_download_plan(
    lib_url: Option<&str>,
    vendor_repo: Option<&str>,
    artifact: &MavenArtifact,
) -> (String, Option<String>) {
    let primary_repo = lib_url.or(vendor_repo).unwrap_or(MOJANG_LIBRARIES);
    let primary = artifact.url(primary_repo);

    let fallback = if primary_repo.trim_end_matches('/') == MOJANG_LIBRARIES {
        None
    } else {
        Some(artifact.url(MOJANG_LIBRARIES))
    };

    (primary, fallback)
}

/// Closing pass over a descriptor's library list: fetch whatever the earlier
/// steps did not produce, count the rest. Coordinate-only entries try their
/// own repository first and the Mojang mirror second. Failures are reported,
/// not raised.
pub(crate) async fn sweep_descriptor_libraries(
    engine: &DownloadEngine,
    libs_dir: &Path,
    descriptor: &VersionDescriptor,
    vendor_repo: Option<&str>,
) -> LibrarySweepReport {
    let mut report = LibrarySweepReport::default();
    let mut queue = Vec::new();
    let mut fallbacks: HashMap<std::path::PathBuf, String> = HashMap::new();

    for lib in &descriptor.libraries {
        if !lib.is_allowed_for_current_os() {
            report.skipped += 1;
            continue;
        }

        // An explicit downloads block wins over the coordinate.
        if let Some(downloads) = &lib.downloads {
            if let Some(artifact) = &downloads.artifact {
                let dest = libs_dir.join(&artifact.path);
                if dest.exists() {
                    report.present += 1;
                } else {
                    queue.push(
                        DownloadEntry::new(artifact.url.as_str(), dest)
                            .with_sha1(artifact.sha1.as_str())
                            .with_size(artifact.size),
                    );
                }
            }

            if let Some(classifier) = lib.native_classifier_for_current_os() {
                if let Some(native) = downloads.classifiers.as_ref().and_then(|c| c.get(&classifier)) {
                    if let (Some(url), Some(path), Some(sha1)) = (
                        native.get("url").and_then(|v| v.as_str()),
                        native.get("path").and_then(|v| v.as_str()),
                        native.get("sha1").and_then(|v| v.as_str()),
                    ) {
                        let dest = libs_dir.join(path);
                        if dest.exists() {
                            report.present += 1;
                        } else {
                            queue.push(DownloadEntry::new(url, dest).with_sha1(sha1));
                        }
                    }
                }
            }
            continue;
        }

        let coordinate = match MavenArtifact::parse(&lib.name) {
            Ok(c) => c,
            Err(e) => {
                warn!("Library {} has no usable coordinate: {}", lib.name, e);
                report.failed += 1;
                continue;
            }
        };

        let dest = libs_dir.join(coordinate.local_path());
        if dest.exists() {
            report.present += 1;
            continue;
        }

        let (primary, fallback) =
            coordinate_download_plan(lib.url.as_deref(), vendor_repo, &coordinate);
        if let Some(fallback_url) = fallback {
            fallbacks.insert(dest.clone(), fallback_url);
        }
        queue.push(DownloadEntry::new(primary, dest));
    }

    let queued = queue.len();
    let failures = engine.download_batch(queue).await;

    let mut lost = Vec::new();
    let mut retry = Vec::new();
    for (entry, error) in failures {
        match fallbacks.remove(&entry.dest) {
            Some(fallback_url) => {
                debug!(
                    "Retrying {} from the Mojang mirror after: {}",
                    entry.dest.display(),
                    error
                );
                retry.push(DownloadEntry::new(fallback_url, entry.dest));
            }
            None => lost.push((entry, error)),
        }
    }
    lost.extend(engine.download_batch(retry).await);

    for (entry, error) in &lost {
        warn!("Library download failed for {}: {}", entry.url, error);
    }

    report.failed += lost.len();
    report.downloaded += queued - lost.len();

    info!(
        "Library sweep: {} present, {} downloaded, {} skipped, {} failed",
        report.present, report.downloaded, report.skipped, report.failed
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::build_http_client;

    #[test]
    fn coordinate_plan_prefers_lib_repo_then_vendor_then_mojang() {
        let artifact = MavenArtifact::parse("net.fabricmc:fabric-loader:0.16.10").unwrap();

        let (primary, fallback) = coordinate_download_plan(
            Some("https://maven.fabricmc.net"),
            Some("https://vendor.example"),
            &artifact,
        );
        assert!(primary.starts_with("https://maven.fabricmc.net/net/fabricmc/fabric-loader/"));
        assert_eq!(
            fallback.as_deref(),
            Some("https://libraries.minecraft.net/net/fabricmc/fabric-loader/0.16.10/fabric-loader-0.16.10.jar")
        );

        let (primary, fallback) =
            coordinate_download_plan(None, Some("https://vendor.example"), &artifact);
        assert!(primary.starts_with("https://vendor.example/"));
        assert!(fallback.is_some());

        let (primary, fallback) = coordinate_download_plan(None, None, &artifact);
        assert!(primary.starts_with("https://libraries.minecraft.net/"));
        assert!(fallback.is_none());
    }

    #[test]
    fn bridge_main_class_is_rewritten() {
        let mut descriptor = serde_json::json!({
            "id": "1.20.4-forge-49.2.0",
            "mainClass": "net.minecraftforge.bootstrap.ForgeBootstrap"
        });
        assert!(normalize_main_class(&mut descriptor));
        assert_eq!(descriptor["mainClass"], BOOTSTRAP_LAUNCHER_MAIN);

        let mut untouched = serde_json::json!({
            "id": "1.20.1-fabric-0.16.10",
            "mainClass": "net.fabricmc.loader.impl.launch.knot.KnotClient"
        });
        assert!(!normalize_main_class(&mut untouched));
        assert_eq!(
            untouched["mainClass"],
            "net.fabricmc.loader.impl.launch.knot.KnotClient"
        );
    }

    #[test]
    fn canonical_ids_embed_loader_and_build() {
        assert_eq!(
            canonical_version_id(LoaderType::Fabric, "1.20.1", "0.16.10"),
            "1.20.1-fabric-0.16.10"
        );
        assert_eq!(
            canonical_version_id(LoaderType::NeoForge, "1.20.4", "20.4.237"),
            "1.20.4-neoforge-20.4.237"
        );
    }

    #[tokio::test]
    async fn sweep_counts_present_downloaded_skipped_and_failed() {
        let dir = tempfile::tempdir().unwrap();
        let libs_dir = dir.path().join("libraries");

        let present = libs_dir.join("com/example/here/1.0/here-1.0.jar");
        std::fs::create_dir_all(present.parent().unwrap()).unwrap();
        std::fs::write(&present, b"jar").unwrap();

        let (ok_url, _served) = crate::testutil::serve(b"library-bytes".to_vec(), 4).await;
        let bad_url = crate::testutil::refused_url().await;

        let descriptor: VersionDescriptor = serde_json::from_value(serde_json::json!({
            "id": "sweep-test",
            "mainClass": "some.Main",
            "libraries": [
                {
                    "name": "com.example:here:1.0",
                    "downloads": {"artifact": {
                        "path": "com/example/here/1.0/here-1.0.jar",
                        "sha1": "0000000000000000000000000000000000000000",
                        "size": 3,
                        "url": "https://example.invalid/unused.jar"
                    }}
                },
                {
                    "name": "com.example:fetched:1.0",
                    "downloads": {"artifact": {
                        "path": "com/example/fetched/1.0/fetched-1.0.jar",
                        "sha1": "6ac178e3637abb0b8e09c8eca5214c79549c5528",
                        "size": 13,
                        "url": ok_url
                    }}
                },
                {
                    "name": "com.example:blocked:1.0",
                    "rules": [{"action": "disallow"}],
                    "downloads": {"artifact": {
                        "path": "com/example/blocked/1.0/blocked-1.0.jar",
                        "sha1": "0000000000000000000000000000000000000000",
                        "size": 3,
                        "url": "https://example.invalid/blocked.jar"
                    }}
                },
                {
                    "name": "com.example:unreachable:1.0",
                    "downloads": {"artifact": {
                        "path": "com/example/unreachable/1.0/unreachable-1.0.jar",
                        "sha1": "0000000000000000000000000000000000000000",
                        "size": 3,
                        "url": bad_url
                    }}
                }
            ]
        }))
        .unwrap();

        let engine = DownloadEngine::new(build_http_client().unwrap());
        let report = sweep_descriptor_libraries(&engine, &libs_dir, &descriptor, None).await;

        assert_eq!(report.present, 1);
        assert_eq!(report.downloaded, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.total(), 4);
        assert!(libs_dir.join("com/example/fetched/1.0/fetched-1.0.jar").exists());
        assert!(!libs_dir.join("com/example/unreachable/1.0/unreachable-1.0.jar").exists());
    }

    #[tokio::test]
    async fn sweep_fetches_coordinate_only_libraries_from_their_repo() {
        let dir = tempfile::tempdir().unwrap();
        let libs_dir = dir.path().join("libraries");

        let (repo_url, served) = crate::testutil::serve(b"library-bytes".to_vec(), 4).await;
        let repo_base = repo_url.trim_end_matches("/resource").to_string();

        let descriptor: VersionDescriptor = serde_json::from_value(serde_json::json!({
            "id": "coordinate-test",
            "mainClass": "some.Main",
            "libraries": [
                {"name": "org.example:plain:2.1"},
                {"name": "org.example:pinned:3.0", "url": repo_base}
            ]
        }))
        .unwrap();

        let engine = DownloadEngine::new(build_http_client().unwrap());
        let report =
            sweep_descriptor_libraries(&engine, &libs_dir, &descriptor, Some(&repo_base)).await;

        assert_eq!(report.downloaded, 2);
        assert_eq!(report.failed, 0);
        assert!(libs_dir.join("org/example/plain/2.1/plain-2.1.jar").exists());
        assert!(libs_dir.join("org/example/pinned/3.0/pinned-3.0.jar").exists());
        assert_eq!(served.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
