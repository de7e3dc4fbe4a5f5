use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::downloader::{Checksum, DownloadEngine};
use crate::error::{LauncherError, LauncherResult};
use crate::paths::DataPaths;

pub const ADOPTIUM_API_BASE: &str = "https://api.adoptium.net/v3/assets/latest";

/// Refuse to start a runtime install with less free space than this.
const MIN_FREE_DISK_BYTES: u64 = 512 * 1024 * 1024;

// ── Version tables ──────────────────────────────────

/// Mojang ships against three long-lived runtime generations. Anything
/// between the cutoffs runs fine on the newer track.
fn runtime_track(required_major: u32) -> u32 {
    if required_major <= 8 {
        8
    } else if required_major >= 21 {
        21
    } else {
        17
    }
}

/// Java major required by a Minecraft version: pre-1.17 wants 8, 1.17 through
/// 1.20.4 wants 17, 1.20.5 and later want 21. Snapshot ids (`24w14a`) are
/// mapped by year.
pub fn required_java_for_minecraft_version(minecraft_version: &str) -> u32 {
    let lower = minecraft_version.to_ascii_lowercase();
    if let Some(week_pos) = lower.find('w') {
        let year_hint = &lower[..week_pos];
        if year_hint.len() >= 2 {
            let year_suffix = &year_hint[year_hint.len() - 2..];
            if let Ok(snapshot_year) = year_suffix.parse::<u32>() {
                if snapshot_year >= 24 {
                    return 21;
                }
                return 17;
            }
        }
    }

    let mut parts = minecraft_version.split('.');
    let major = parts
        .next()
        .and_then(|p| p.parse::<u32>().ok())
        .unwrap_or(1);
    let minor = parts
        .next()
        .and_then(|p| p.parse::<u32>().ok())
        .unwrap_or(20);
    let patch = parts
        .next()
        .and_then(|p| p.parse::<u32>().ok())
        .unwrap_or(0);

    if major > 1 || minor >= 21 || (minor == 20 && patch >= 5) {
        21
    } else if minor >= 17 {
        17
    } else {
        8
    }
}

/// A newer runtime satisfies an older requirement only within the same track;
/// the 8 track in particular is not forward compatible.
pub fn is_java_compatible_major(installed_major: u32, required_major: u32) -> bool {
    installed_major >= required_major
        && runtime_track(installed_major) == runtime_track(required_major)
}

// ── Probed installations ────────────────────────────

/// A Java binary that answered a real `-version` invocation. Constructing one
/// any other way is impossible, so holding a value means the binary works.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JavaInstallation {
    pub path: PathBuf,
    pub version: String,
    pub major: u32,
    pub is_64bit: bool,
    pub vendor: String,
}

/// Runs the binary and parses its version banner. `None` means the path does
/// not exist, is not executable, or prints nothing recognizable.
pub fn probe_java(path: &Path) -> Option<JavaInstallation> {
    let output = Command::new(path)
        .args(["-XshowSettings:properties", "-version"])
        .output()
        .ok()?;

    let combined = format!(
        "{}\n{}",
        String::from_utf8_lossy(&output.stderr),
        String::from_utf8_lossy(&output.stdout)
    );
    debug!(
        "Probing {:?}: {}",
        path,
        combined.lines().next().unwrap_or("")
    );
    parse_probe_output(path, &combined)
}

fn parse_probe_output(path: &Path, output: &str) -> Option<JavaInstallation> {
    let version = parse_version_string(output)?;
    let major = parse_major_version(&version);
    let lower = output.to_ascii_lowercase();
    let is_64bit = lower.contains("sun.arch.data.model = 64")
        || lower.contains("os.arch = amd64")
        || lower.contains("os.arch = x86_64")
        || lower.contains("os.arch = aarch64");
    let vendor = parse_vendor(output);
    let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

    Some(JavaInstallation {
        path: canonical,
        version,
        major,
        is_64bit,
        vendor,
    })
}

fn parse_version_string(output: &str) -> Option<String> {
    for line in output.lines() {
        if let Some(start) = line.find('"') {
            if let Some(end) = line[start + 1..].find('"') {
                return Some(line[start + 1..start + 1 + end].to_string());
            }
        }
    }
    None
}

fn parse_vendor(output: &str) -> String {
    for line in output.lines() {
        if line.contains("Temurin") {
            return "Temurin".to_string();
        }
        if line.contains("Adoptium") {
            return "Adoptium".to_string();
        }
        if line.contains("OpenJDK") {
            return "OpenJDK".to_string();
        }
    }
    "unknown".to_string()
}

/// `"17.0.8"` is 17; legacy `"1.8.0_392"` is 8.
fn parse_major_version(version: &str) -> u32 {
    let first_part = version.split('.').next().unwrap_or("0");
    let major: u32 = first_part.parse().unwrap_or(0);

    if major == 1 {
        version
            .split('.')
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or(major)
    } else {
        major
    }
}

fn clean_openjdk_version(raw: &str) -> String {
    raw.split('-').next().unwrap_or(raw).to_string()
}

// ── Runtime manager ─────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
struct AdoptiumRelease {
    binary: AdoptiumBinary,
    version: AdoptiumVersion,
}

#[derive(Debug, Clone, Deserialize)]
struct AdoptiumBinary {
    package: AdoptiumPackage,
}

#[derive(Debug, Clone, Deserialize)]
struct AdoptiumPackage {
    checksum: String,
    link: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AdoptiumVersion {
    openjdk_version: String,
}

#[derive(Debug, Clone)]
struct RuntimeDownloadSpec {
    version: String,
    url: String,
    sha256: String,
}

/// Finds or provisions a Java runtime matching a Minecraft version.
///
/// `ensure` walks the host first (common vendor install dirs, `JAVA_HOME`,
/// `java` on PATH, then the managed `runtime/java<major>` dir) and only
/// downloads a Temurin build when nothing usable answers a probe. Managed
/// installs are verified by sha256 before extraction and probed before
/// being handed out.
#[derive(Clone)]
pub struct JavaRuntimeManager {
    client: reqwest::Client,
    engine: DownloadEngine,
    paths: DataPaths,
    api_base: String,
}

impl JavaRuntimeManager {
    pub fn new(client: reqwest::Client, engine: DownloadEngine, paths: DataPaths) -> Self {
        Self {
            client,
            engine,
            paths,
            api_base: ADOPTIUM_API_BASE.to_string(),
        }
    }

    /// Points the distribution API at a different base URL.
    pub fn with_api_base(mut self, url: impl Into<String>) -> Self {
        self.api_base = url.into();
        self
    }

    pub fn recommended_major(&self, minecraft_version: &str) -> u32 {
        required_java_for_minecraft_version(minecraft_version)
    }

    /// Returns a working Java for `minecraft_version`, installing one into
    /// the managed runtime dir if the host has none. `override_path` is an
    /// instance-level pin checked before anything else; an incompatible pin
    /// is skipped with a warning rather than failing the whole resolution.
    pub async fn ensure(
        &self,
        minecraft_version: &str,
        override_path: Option<&Path>,
    ) -> LauncherResult<JavaInstallation> {
        let required_major = required_java_for_minecraft_version(minecraft_version);

        if let Some(pinned) = override_path {
            match probe_java(pinned) {
                Some(found) if is_java_compatible_major(found.major, required_major) => {
                    debug!("Using pinned Java {} at {:?}", found.major, found.path);
                    return Ok(found);
                }
                Some(found) => warn!(
                    "Pinned Java at {:?} is major {}, need {}; ignoring",
                    pinned, found.major, required_major
                ),
                None => warn!("Pinned Java at {:?} did not answer a probe; ignoring", pinned),
            }
        }

        let managed_root = self.paths.java_runtime_dir(required_major);
        let existing = tokio::task::spawn_blocking(move || {
            locate_existing_runtime(required_major, &managed_root)
        })
        .await
        .map_err(|e| LauncherError::Other(format!("Task join error: {e}")))?;

        if let Some(found) = existing {
            debug!(
                "Found Java {} ({}) at {:?}",
                found.major, found.version, found.path
            );
            return Ok(found);
        }

        info!("No usable Java {} on host, installing one", required_major);
        self.install_runtime(required_major).await
    }

    async fn install_runtime(&self, required_major: u32) -> LauncherResult<JavaInstallation> {
        ensure_min_disk_space(self.paths.root(), MIN_FREE_DISK_BYTES)?;

        let spec = self.fetch_runtime_spec(required_major).await?;
        info!(
            "Fetching Java {} ({}) from {}",
            required_major, spec.version, spec.url
        );

        let staging = self
            .paths
            .temp_dir()
            .join(format!("java{}-install", required_major));
        if staging.exists() {
            let _ = tokio::fs::remove_dir_all(&staging).await;
        }
        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(|source| LauncherError::Io {
                path: staging.clone(),
                source,
            })?;

        let archive_path = staging.join(archive_file_name(&spec.url));
        self.engine
            .download_file(
                &spec.url,
                &archive_path,
                Some(&Checksum::sha256(spec.sha256.as_str())),
            )
            .await?;

        let unpack_dir = staging.join("unpacked");
        let archive = archive_path.clone();
        let unpack = unpack_dir.clone();
        tokio::task::spawn_blocking(move || extract_archive(&archive, &unpack))
            .await
            .map_err(|e| LauncherError::Other(format!("Task join error: {e}")))??;

        let content_root = flattened_root(&unpack_dir)?;
        let final_root = self.paths.java_runtime_dir(required_major);

        // Another pipeline may have finished the same install while this one
        // was downloading; an already-valid managed runtime wins.
        if let Some(existing) = probe_managed_runtime(&final_root, required_major) {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Ok(existing);
        }

        replace_dir(&content_root, &final_root)?;
        let _ = tokio::fs::remove_dir_all(&staging).await;

        let java_bin = locate_java_binary(&final_root);
        ensure_unix_exec_bit(&java_bin)?;

        let Some(found) = probe_java(&java_bin) else {
            return Err(LauncherError::JavaExecution(format!(
                "installed runtime at {} failed the version probe",
                final_root.display()
            )));
        };
        if !is_java_compatible_major(found.major, required_major) {
            return Err(LauncherError::JavaExecution(format!(
                "installed runtime at {} reports Java {}, expected {}",
                final_root.display(),
                found.major,
                required_major
            )));
        }

        info!(
            "Installed Java {} ({}) at {:?}",
            required_major, found.version, found.path
        );
        Ok(found)
    }

    /// Asks the distribution API for the newest build of `major` on this
    /// OS/arch. Tries the jre image first and falls back to the jdk, which
    /// some majors only publish.
    async fn fetch_runtime_spec(&self, major: u32) -> LauncherResult<RuntimeDownloadSpec> {
        let arch = platform::platform_arch();
        let os = platform::platform_os();
        let mut last_error: Option<LauncherError> = None;

        for image_type in ["jre", "jdk"] {
            let url = format!(
                "{}/{}/hotspot?architecture={}&image_type={}&os={}",
                self.api_base, major, arch, image_type, os
            );

            let response = match self.client.get(&url).send().await {
                Ok(response) => response,
                Err(source) => {
                    last_error = Some(source.into());
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                last_error = Some(LauncherError::DownloadFailed {
                    url,
                    status: status.as_u16(),
                });
                continue;
            }

            let releases: Vec<AdoptiumRelease> = response.json().await?;
            if let Some(release) = releases.into_iter().next() {
                return Ok(RuntimeDownloadSpec {
                    version: clean_openjdk_version(&release.version.openjdk_version),
                    url: release.binary.package.link,
                    sha256: release.binary.package.checksum,
                });
            }
        }

        Err(last_error.unwrap_or(LauncherError::JavaNotFound(major)))
    }
}

// ── Host probing ────────────────────────────────────

/// First working match wins, in the documented order: vendor install dirs,
/// `JAVA_HOME`, PATH, the managed runtime dir.
fn locate_existing_runtime(required_major: u32, managed_root: &Path) -> Option<JavaInstallation> {
    for candidate in system_java_binaries() {
        if let Some(found) = probe_java(&candidate) {
            if is_java_compatible_major(found.major, required_major) {
                return Some(found);
            }
        }
    }
    probe_managed_runtime(managed_root, required_major)
}

fn probe_managed_runtime(managed_root: &Path, required_major: u32) -> Option<JavaInstallation> {
    let java_bin = locate_java_binary(managed_root);
    if !java_bin.exists() {
        return None;
    }
    let found = probe_java(&java_bin)?;
    if is_java_compatible_major(found.major, required_major) {
        Some(found)
    } else {
        None
    }
}

fn system_java_binaries() -> Vec<PathBuf> {
    let mut found = Vec::new();

    for root in common_install_roots() {
        let Ok(entries) = std::fs::read_dir(&root) else {
            continue;
        };
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let bin = locate_java_binary(&path);
            if bin.exists() {
                found.push(bin);
            }
        }
    }

    if let Some(home) = std::env::var_os("JAVA_HOME") {
        let bin = PathBuf::from(home).join("bin").join(java_exe());
        if bin.exists() {
            found.push(bin);
        }
    }

    if let Some(path_var) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&path_var) {
            let bin = dir.join(java_exe());
            if bin.exists() {
                found.push(bin);
                break;
            }
        }
    }

    found
}

fn common_install_roots() -> Vec<PathBuf> {
    if cfg!(windows) {
        vec![
            PathBuf::from(r"C:\Program Files\Java"),
            PathBuf::from(r"C:\Program Files\Eclipse Adoptium"),
            PathBuf::from(r"C:\Program Files (x86)\Java"),
        ]
    } else if cfg!(target_os = "macos") {
        vec![PathBuf::from("/Library/Java/JavaVirtualMachines")]
    } else {
        vec![PathBuf::from("/usr/lib/jvm"), PathBuf::from("/usr/java")]
    }
}

fn java_exe() -> &'static str {
    if cfg!(windows) {
        "java.exe"
    } else {
        "java"
    }
}

fn locate_java_binary(runtime_root: &Path) -> PathBuf {
    let primary = runtime_root.join("bin").join(java_exe());
    if primary.exists() {
        return primary;
    }

    let mac_layout = runtime_root
        .join("Contents")
        .join("Home")
        .join("bin")
        .join(java_exe());
    if mac_layout.exists() {
        return mac_layout;
    }

    find_java_binary_recursive(runtime_root).unwrap_or(primary)
}

fn find_java_binary_recursive(root: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(root).ok()?;
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        let file_type = entry.file_type().ok()?;

        if file_type.is_file() {
            if path.file_name().and_then(|n| n.to_str()) == Some(java_exe()) {
                return Some(path);
            }
        } else if file_type.is_dir() {
            if let Some(found) = find_java_binary_recursive(&path) {
                return Some(found);
            }
        }
    }
    None
}

// ── Archive handling ────────────────────────────────

fn archive_file_name(url: &str) -> String {
    url.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("runtime-archive")
        .to_string()
}

fn extract_archive(archive: &Path, dest: &Path) -> LauncherResult<()> {
    let name = archive.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if name.ends_with(".zip") {
        extract_zip_archive(archive, dest)
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        extract_tar_archive(archive, dest)
    } else if cfg!(windows) {
        extract_zip_archive(archive, dest)
    } else {
        extract_tar_archive(archive, dest)
    }
}

fn extract_zip_archive(zip_path: &Path, dest: &Path) -> LauncherResult<()> {
    let zip_file = std::fs::File::open(zip_path).map_err(|source| LauncherError::Io {
        path: zip_path.to_path_buf(),
        source,
    })?;
    let mut archive = zip::ZipArchive::new(zip_file)?;

    std::fs::create_dir_all(dest).map_err(|source| LauncherError::Io {
        path: dest.to_path_buf(),
        source,
    })?;

    for index in 0..archive.len() {
        let mut zipped = archive.by_index(index)?;
        let rel_path = zipped
            .enclosed_name()
            .ok_or_else(|| LauncherError::Other("Invalid zip entry path".into()))?;
        let out_path = dest.join(rel_path);

        if zipped.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|source| LauncherError::Io {
                path: out_path,
                source,
            })?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| LauncherError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut out = std::fs::File::create(&out_path).map_err(|source| LauncherError::Io {
            path: out_path.clone(),
            source,
        })?;
        std::io::copy(&mut zipped, &mut out).map_err(|source| LauncherError::Io {
            path: out_path.clone(),
            source,
        })?;

        #[cfg(unix)]
        if let Some(mode) = zipped.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode));
        }
    }

    Ok(())
}

fn extract_tar_archive(tar_path: &Path, dest: &Path) -> LauncherResult<()> {
    let tar_file = std::fs::File::open(tar_path).map_err(|source| LauncherError::Io {
        path: tar_path.to_path_buf(),
        source,
    })?;
    std::fs::create_dir_all(dest).map_err(|source| LauncherError::Io {
        path: dest.to_path_buf(),
        source,
    })?;

    let decoder = flate2::read::GzDecoder::new(tar_file);
    let mut archive = tar::Archive::new(decoder);
    archive.unpack(dest).map_err(|source| LauncherError::Io {
        path: dest.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// JDK archives wrap everything in one `jdk-21.0.1+12/` style directory;
/// step into it so the managed dir has `bin/` at its top.
fn flattened_root(dir: &Path) -> LauncherResult<PathBuf> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|source| LauncherError::Io {
        path: dir.to_path_buf(),
        source,
    })? {
        let entry = entry.map_err(|source| LauncherError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        entries.push(entry.path());
    }

    match entries.as_slice() {
        [single] if single.is_dir() => Ok(single.clone()),
        _ => Ok(dir.to_path_buf()),
    }
}

fn replace_dir(from: &Path, to: &Path) -> LauncherResult<()> {
    if to.exists() {
        std::fs::remove_dir_all(to).map_err(|source| LauncherError::Io {
            path: to.to_path_buf(),
            source,
        })?;
    }
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).map_err(|source| LauncherError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    // rename fails across filesystems; fall back to a copy
    if std::fs::rename(from, to).is_err() {
        copy_dir_recursive(from, to)?;
    }
    Ok(())
}

fn copy_dir_recursive(source: &Path, destination: &Path) -> LauncherResult<()> {
    std::fs::create_dir_all(destination).map_err(|source_err| LauncherError::Io {
        path: destination.to_path_buf(),
        source: source_err,
    })?;

    for entry in std::fs::read_dir(source).map_err(|source_err| LauncherError::Io {
        path: source.to_path_buf(),
        source: source_err,
    })? {
        let entry = entry.map_err(|source_err| LauncherError::Io {
            path: source.to_path_buf(),
            source: source_err,
        })?;
        let src_path = entry.path();
        let dst_path = destination.join(entry.file_name());
        let file_type = entry.file_type().map_err(|source_err| LauncherError::Io {
            path: src_path.clone(),
            source: source_err,
        })?;

        if file_type.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else if file_type.is_file() {
            std::fs::copy(&src_path, &dst_path).map_err(|source_err| LauncherError::Io {
                path: dst_path,
                source: source_err,
            })?;
        }
    }

    Ok(())
}

fn ensure_unix_exec_bit(java_bin: &Path) -> LauncherResult<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if java_bin.exists() {
            let mut perms = std::fs::metadata(java_bin)
                .map_err(|source| LauncherError::Io {
                    path: java_bin.to_path_buf(),
                    source,
                })?
                .permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(java_bin, perms).map_err(|source| LauncherError::Io {
                path: java_bin.to_path_buf(),
                source,
            })?;
        }
    }
    #[cfg(not(unix))]
    {
        let _ = java_bin;
    }
    Ok(())
}

fn ensure_min_disk_space(path: &Path, minimum_bytes: u64) -> LauncherResult<()> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let mut best_len = 0usize;
    let mut available = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if canonical.starts_with(mount) {
            let len = mount.as_os_str().len();
            if len >= best_len {
                best_len = len;
                available = Some(disk.available_space());
            }
        }
    }
    if let Some(bytes) = available {
        if bytes < minimum_bytes {
            return Err(LauncherError::Other(format!(
                "Not enough free disk space for a Java runtime: {} MiB available, {} MiB required",
                bytes / (1024 * 1024),
                minimum_bytes / (1024 * 1024)
            )));
        }
    }
    Ok(())
}

mod platform {
    pub fn platform_arch() -> String {
        match std::env::consts::ARCH {
            "x86_64" => "x64".to_string(),
            "aarch64" => "arm64".to_string(),
            other => other.to_string(),
        }
    }

    pub fn platform_os() -> &'static str {
        match std::env::consts::OS {
            "windows" => "windows",
            "linux" => "linux",
            "macos" => "mac",
            _ => "windows",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parse_major_modern_and_legacy() {
        assert_eq!(parse_major_version("17.0.8"), 17);
        assert_eq!(parse_major_version("21.0.1"), 21);
        assert_eq!(parse_major_version("1.8.0_392"), 8);
    }

    #[test]
    fn java_required_by_minecraft_version() {
        assert_eq!(required_java_for_minecraft_version("1.16.5"), 8);
        assert_eq!(required_java_for_minecraft_version("1.18.2"), 17);
        assert_eq!(required_java_for_minecraft_version("1.20.4"), 17);
        assert_eq!(required_java_for_minecraft_version("1.20.5"), 21);
        assert_eq!(required_java_for_minecraft_version("1.21"), 21);
        assert_eq!(required_java_for_minecraft_version("24w14a"), 21);
        assert_eq!(required_java_for_minecraft_version("23w31a"), 17);
    }

    #[test]
    fn compatibility_respects_tracks() {
        assert!(is_java_compatible_major(17, 17));
        assert!(is_java_compatible_major(20, 17));
        assert!(!is_java_compatible_major(21, 17));
        assert!(!is_java_compatible_major(17, 8));
        assert!(!is_java_compatible_major(8, 17));
    }

    #[test]
    fn probe_output_parses_banner_and_arch() {
        let banner = r#"Property settings:
    os.arch = amd64
    sun.arch.data.model = 64
openjdk version "17.0.8" 2023-07-18
OpenJDK Runtime Environment Temurin-17.0.8+7"#;
        let info = parse_probe_output(Path::new("/opt/java/bin/java"), banner).unwrap();
        assert_eq!(info.version, "17.0.8");
        assert_eq!(info.major, 17);
        assert!(info.is_64bit);
        assert_eq!(info.vendor, "Temurin");
    }

    #[test]
    fn probe_output_without_version_line_is_rejected() {
        assert!(parse_probe_output(Path::new("/bin/true"), "no banner here").is_none());
    }

    #[test]
    fn locates_java_in_standard_and_mac_layouts() {
        let dir = tempfile::tempdir().unwrap();

        let standard = dir.path().join("standard");
        std::fs::create_dir_all(standard.join("bin")).unwrap();
        std::fs::write(standard.join("bin").join(java_exe()), b"").unwrap();
        assert_eq!(
            locate_java_binary(&standard),
            standard.join("bin").join(java_exe())
        );

        let mac = dir.path().join("mac");
        let mac_bin = mac.join("Contents").join("Home").join("bin");
        std::fs::create_dir_all(&mac_bin).unwrap();
        std::fs::write(mac_bin.join(java_exe()), b"").unwrap();
        assert_eq!(locate_java_binary(&mac), mac_bin.join(java_exe()));
    }

    #[test]
    fn flatten_steps_into_single_wrapper_dir() {
        let dir = tempfile::tempdir().unwrap();
        let wrapper = dir.path().join("jdk-21.0.1+12");
        std::fs::create_dir_all(wrapper.join("bin")).unwrap();
        assert_eq!(flattened_root(dir.path()).unwrap(), wrapper);

        std::fs::write(dir.path().join("release"), b"").unwrap();
        assert_eq!(flattened_root(dir.path()).unwrap(), dir.path());
    }

    #[test]
    fn zip_archive_extracts_with_nested_layout() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("runtime.zip");

        let file = std::fs::File::create(&zip_path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        writer.add_directory("jdk-17/bin/", options).unwrap();
        writer.start_file("jdk-17/bin/java", options).unwrap();
        writer.write_all(b"#!/bin/sh\n").unwrap();
        writer.start_file("jdk-17/release", options).unwrap();
        writer.write_all(b"JAVA_VERSION=17\n").unwrap();
        writer.finish().unwrap();

        let out = dir.path().join("out");
        extract_zip_archive(&zip_path, &out).unwrap();
        assert!(out.join("jdk-17").join("bin").join("java").is_file());
        assert_eq!(flattened_root(&out).unwrap(), out.join("jdk-17"));
    }

    #[test]
    fn tar_archive_extracts_with_nested_layout() {
        let dir = tempfile::tempdir().unwrap();
        let tar_path = dir.path().join("runtime.tar.gz");

        let source = dir.path().join("source");
        std::fs::create_dir_all(source.join("jdk-21").join("bin")).unwrap();
        std::fs::write(source.join("jdk-21").join("bin").join("java"), b"#!/bin/sh\n").unwrap();

        let file = std::fs::File::create(&tar_path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.append_dir_all("jdk-21", source.join("jdk-21")).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let out = dir.path().join("out");
        extract_tar_archive(&tar_path, &out).unwrap();
        assert!(out.join("jdk-21").join("bin").join("java").is_file());
        assert_eq!(flattened_root(&out).unwrap(), out.join("jdk-21"));
    }

    #[test]
    fn replace_dir_swaps_content_in() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("staged");
        std::fs::create_dir_all(from.join("bin")).unwrap();
        std::fs::write(from.join("bin").join("java"), b"new").unwrap();

        let to = dir.path().join("final");
        std::fs::create_dir_all(&to).unwrap();
        std::fs::write(to.join("stale"), b"old").unwrap();

        replace_dir(&from, &to).unwrap();
        assert!(to.join("bin").join("java").is_file());
        assert!(!to.join("stale").exists());
        assert!(!from.exists());
    }

    #[test]
    fn archive_name_comes_from_url_tail() {
        assert_eq!(
            archive_file_name("https://example.net/temurin/jdk_x64_linux.tar.gz"),
            "jdk_x64_linux.tar.gz"
        );
        assert_eq!(archive_file_name("https://example.net/"), "runtime-archive");
    }

    #[tokio::test]
    async fn runtime_spec_resolves_from_api() {
        let body = serde_json::json!([{
            "binary": {
                "package": {
                    "checksum": "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824",
                    "link": "https://example.net/temurin/jdk_x64_linux.tar.gz"
                }
            },
            "version": { "openjdk_version": "21.0.2+13-LTS" }
        }]);
        let (url, _served) = crate::testutil::serve(body.to_string().into_bytes(), 4).await;

        let dir = tempfile::tempdir().unwrap();
        let paths = crate::paths::DataPaths::at(dir.path()).unwrap();
        let client = crate::http::build_http_client().unwrap();
        let engine = DownloadEngine::new(client.clone());
        let manager =
            JavaRuntimeManager::new(client, engine, paths).with_api_base(url.trim_end_matches('/'));

        let spec = manager.fetch_runtime_spec(21).await.unwrap();
        assert_eq!(spec.version, "21.0.2+13");
        assert!(spec.url.ends_with("jdk_x64_linux.tar.gz"));
        assert_eq!(spec.sha256.len(), 64);
    }

    #[tokio::test]
    async fn unreachable_api_propagates_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let paths = crate::paths::DataPaths::at(dir.path()).unwrap();
        let client = crate::http::build_http_client().unwrap();
        let engine = DownloadEngine::new(client.clone());
        let manager = JavaRuntimeManager::new(client, engine, paths)
            .with_api_base(crate::testutil::refused_url().await);

        assert!(manager.fetch_runtime_spec(17).await.is_err());
    }
}
