// ─── Classpath ───
// Resolves an instance's recorded libraries to on-disk jars and assembles
// the -cp value, plus the per-session natives extraction that goes with it.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{LauncherError, LauncherResult};
use crate::instance::Instance;
use crate::loaders::BOOTSTRAP_LAUNCHER_MAIN;
use crate::maven::{version_sort_key, MavenArtifact};
use crate::paths::DataPaths;

/// Platform separator for `-cp` values.
pub fn classpath_separator() -> &'static str {
    if cfg!(target_os = "windows") {
        ";"
    } else {
        ":"
    }
}

/// Path rendered for a Java command line. Canonicalizes when possible; the
/// `\\?\` prefix canonicalization produces on Windows breaks Java's
/// classpath scanning, so it is stripped again.
pub fn safe_path_str(path: &Path) -> String {
    let resolved = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let text = resolved.to_string_lossy().to_string();

    #[cfg(target_os = "windows")]
    {
        if let Some(stripped) = text.strip_prefix(r"\\?\") {
            return stripped.to_string();
        }
    }

    text
}

fn boots_through_bootstraplauncher(instance: &Instance) -> bool {
    instance.loader.uses_module_launcher()
        && instance
            .main_class
            .as_deref()
            .is_some_and(|main| main == BOOTSTRAP_LAUNCHER_MAIN)
}

fn declares_module_path(instance: &Instance) -> bool {
    instance.jvm_args.iter().any(|arg| {
        let trimmed = arg.trim();
        trimmed == "--module-path"
            || trimmed == "-p"
            || trimmed.starts_with("--module-path=")
            || trimmed == "--add-modules"
            || trimmed.starts_with("--add-modules=")
    })
}

/// BootstrapLauncher builds its own MC-BOOTSTRAP module layer and loads the
/// jar-handling stack into it. The same jars on `-cp` get initialized twice
/// under different classloaders and crash with "factory already defined".
fn belongs_to_module_layer(artifact: &MavenArtifact) -> bool {
    artifact.group_id == "cpw.mods"
        && matches!(
            artifact.artifact_id.as_str(),
            "securejarhandler" | "modlauncher" | "jarhandling"
        )
}

/// Builds the launch classpath from the libraries recorded at install time
/// plus the client jar.
///
/// Every recorded library must resolve against the shared store, the
/// instance-local `libraries/`, or the legacy `<game dir>/libraries/`
/// location, in that order. A recorded library that resolves nowhere aborts
/// the launch: it passed this instance's OS rules during installation, so
/// the game needs it.
pub fn build_classpath(instance: &Instance, paths: &DataPaths) -> LauncherResult<String> {
    let libs_dir = paths.libraries_dir();
    let skip_module_layer_jars =
        declares_module_path(instance) || boots_through_bootstraplauncher(instance);

    // Forge/NeoForge bootstrap is sensitive to ASM order: the first version
    // on the classpath wins. Collect the newest per artifact+classifier and
    // emit those before everything else.
    let mut best_asm: HashMap<String, (String, String)> = HashMap::new();
    let mut plain: Vec<String> = Vec::new();
    let mut missing: Vec<String> = Vec::new();

    for raw in &instance.libraries {
        let coord = raw.trim();
        if coord.is_empty() {
            continue;
        }

        if let Ok(artifact) = MavenArtifact::parse(coord) {
            if skip_module_layer_jars && belongs_to_module_layer(&artifact) {
                debug!("Keeping {} off the classpath (module layer)", coord);
                continue;
            }

            if artifact.group_id == "org.ow2.asm" {
                let key = format!(
                    "{}:{}",
                    artifact.artifact_id,
                    artifact.classifier.as_deref().unwrap_or_default()
                );
                let replace = match best_asm.get(&key) {
                    None => true,
                    Some((_, held)) => version_sort_key(&artifact.version) > version_sort_key(held),
                };
                if replace {
                    best_asm.insert(key, (coord.to_string(), artifact.version));
                }
                continue;
            }
        }

        match resolve_library_entry(instance, &libs_dir, coord) {
            Some(entry) => plain.push(entry),
            None => missing.push(coord.to_string()),
        }
    }

    let mut entries: Vec<String> = Vec::new();

    let mut asm_jars: Vec<(String, String)> = best_asm.into_values().collect();
    asm_jars.sort_by(|(_, a), (_, b)| version_sort_key(b).cmp(&version_sort_key(a)));
    for (coord, _) in asm_jars {
        match resolve_library_entry(instance, &libs_dir, &coord) {
            Some(entry) => entries.push(entry),
            None => missing.push(coord),
        }
    }

    if !missing.is_empty() {
        return Err(LauncherError::MissingArtifact(format!(
            "recorded libraries resolved to no local file: {}",
            missing.join(", ")
        )));
    }

    entries.extend(plain);

    // Installer-based loaders can materialize launch-critical jars under the
    // instance-local and legacy library dirs without declaring them.
    append_undeclared_local_jars(instance, skip_module_layer_jars, &mut entries);

    for jar in installed_version_jars(instance, paths) {
        entries.push(safe_path_str(&jar));
    }

    let client_jar = instance.client_jar_path();
    if client_jar.exists() {
        entries.push(safe_path_str(&client_jar));
    } else if !instance.loader.uses_module_launcher() {
        return Err(LauncherError::MissingArtifact(format!(
            "client jar missing at {}",
            client_jar.display()
        )));
    }

    entries.retain(|entry| !entry.trim().is_empty());
    dedup_preserving_order(&mut entries);
    prioritize_bootstrap_entries(&mut entries);

    if entries.is_empty() {
        return Err(LauncherError::Integrity(
            "no classpath entries; the instance has no recorded libraries".into(),
        ));
    }

    Ok(entries.join(classpath_separator()))
}

fn resolve_library_entry(instance: &Instance, libs_dir: &Path, raw: &str) -> Option<String> {
    let direct = Path::new(raw);
    if direct.is_absolute() && direct.exists() && has_jar_extension(direct) {
        return Some(safe_path_str(direct));
    }

    // Store-relative paths first, then the same bases for maven coordinates.
    let mut candidates = vec![
        libs_dir.join(raw),
        instance.local_libraries_dir().join(raw),
        instance.game_dir().join("libraries").join(raw),
    ];

    if let Ok(artifact) = MavenArtifact::parse(raw) {
        let rel = artifact.local_path();
        candidates.push(libs_dir.join(&rel));
        candidates.push(instance.local_libraries_dir().join(&rel));
        candidates.push(instance.game_dir().join("libraries").join(&rel));
    }

    candidates
        .into_iter()
        .find(|candidate| candidate.exists() && has_jar_extension(candidate))
        .map(|candidate| safe_path_str(&candidate))
}

fn has_jar_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jar") || ext.eq_ignore_ascii_case("zip"))
}

fn append_undeclared_local_jars(
    instance: &Instance,
    skip_module_layer_jars: bool,
    entries: &mut Vec<String>,
) {
    let mut seen: HashSet<String> = entries
        .iter()
        .filter_map(|entry| basename_key(Path::new(entry)))
        .collect();

    for dir in [
        instance.local_libraries_dir(),
        instance.game_dir().join("libraries"),
    ] {
        if !dir.is_dir() {
            continue;
        }

        let mut stack = vec![dir];
        while let Some(current) = stack.pop() {
            let Ok(read_dir) = std::fs::read_dir(&current) else {
                continue;
            };
            for entry in read_dir.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                if !has_jar_extension(&path) {
                    continue;
                }
                let Some(key) = basename_key(&path) else {
                    continue;
                };
                if skip_module_layer_jars
                    && (key.starts_with("securejarhandler-")
                        || key.starts_with("modlauncher-")
                        || key.starts_with("jarhandling-"))
                {
                    continue;
                }
                if seen.insert(key) {
                    entries.push(safe_path_str(&path));
                }
            }
        }
    }
}

fn basename_key(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    Some(if cfg!(target_os = "windows") {
        name.to_lowercase()
    } else {
        name.to_string()
    })
}

/// Jars that external installers drop under the shared `versions/` store;
/// Forge's processed client lives here, not in the library store.
fn installed_version_jars(instance: &Instance, paths: &DataPaths) -> Vec<PathBuf> {
    let Some(loader_version) = instance.loader_version.as_deref() else {
        return Vec::new();
    };
    if loader_version.trim().is_empty() {
        return Vec::new();
    }

    let mc = &instance.minecraft_version;
    let ids: Vec<String> = match instance.loader {
        crate::instance::LoaderType::Forge => vec![
            format!("{}-{}", mc, loader_version),
            format!("forge-{}-{}", mc, loader_version),
            format!("{}-forge-{}", mc, loader_version),
        ],
        crate::instance::LoaderType::NeoForge => vec![
            format!("neoforge-{}", loader_version),
            format!("{}-neoforge-{}", mc, loader_version),
            format!("{}-{}", mc, loader_version),
        ],
        _ => Vec::new(),
    };

    ids.into_iter()
        .map(|id| paths.version_dir(&id).join(format!("{}.jar", id)))
        .filter(|jar| jar.exists())
        .collect()
}

fn dedup_preserving_order(entries: &mut Vec<String>) {
    let mut seen = HashSet::new();
    entries.retain(|entry| {
        let key = if cfg!(target_os = "windows") {
            entry.to_lowercase()
        } else {
            entry.clone()
        };
        seen.insert(key)
    });
}

/// ModLauncher stacks are order-sensitive; the bootstrap jars must come
/// before the rest of the runtime.
fn prioritize_bootstrap_entries(entries: &mut Vec<String>) {
    fn rank(entry: &str) -> usize {
        let lower = entry.to_ascii_lowercase();
        if lower.contains("bootstraplauncher") {
            0
        } else if lower.contains("modlauncher") {
            1
        } else if lower.contains("securejarhandler") {
            2
        } else {
            10
        }
    }

    let mut indexed: Vec<(usize, usize, String)> = entries
        .drain(..)
        .enumerate()
        .map(|(idx, entry)| (rank(&entry), idx, entry))
        .collect();
    indexed.sort_by_key(|(priority, idx, _)| (*priority, *idx));
    entries.extend(indexed.into_iter().map(|(_, _, entry)| entry));
}

/// Extract top-level `.dll` / `.so` / `.dylib` / `.jnilib` files from every
/// recorded library jar into the instance's per-session natives dir.
///
/// The previous session's dir is discarded first; jars without native files
/// contribute nothing, so the whole library list can be passed unfiltered.
pub async fn extract_natives(instance: &Instance, paths: &DataPaths) -> LauncherResult<PathBuf> {
    let natives_dir = instance.natives_dir();

    if natives_dir.exists() {
        let _ = tokio::fs::remove_dir_all(&natives_dir).await;
    }
    tokio::fs::create_dir_all(&natives_dir)
        .await
        .map_err(|source| LauncherError::Io {
            path: natives_dir.clone(),
            source,
        })?;

    let libs_dir = paths.libraries_dir();
    for coord in &instance.libraries {
        let Some(resolved) = resolve_library_entry(instance, &libs_dir, coord.trim()) else {
            continue;
        };
        let jar_path = PathBuf::from(resolved);

        let jar_bytes = tokio::fs::read(&jar_path)
            .await
            .map_err(|source| LauncherError::Io {
                path: jar_path.clone(),
                source,
            })?;

        let dest_dir = natives_dir.clone();
        tokio::task::spawn_blocking(move || {
            let cursor = std::io::Cursor::new(jar_bytes);
            let mut archive = match zip::ZipArchive::new(cursor) {
                Ok(archive) => archive,
                Err(err) => {
                    warn!("Cannot open {:?} as a jar: {}", jar_path, err);
                    return;
                }
            };

            for index in 0..archive.len() {
                let Ok(mut file) = archive.by_index(index) else {
                    continue;
                };
                let name = file.name().to_string();
                if name.contains('/') || name.contains('\\') {
                    continue;
                }
                let is_native = name.ends_with(".dll")
                    || name.ends_with(".so")
                    || name.ends_with(".dylib")
                    || name.ends_with(".jnilib");
                if !is_native {
                    continue;
                }

                let dest = dest_dir.join(&name);
                let Ok(mut out) = std::fs::File::create(&dest) else {
                    continue;
                };
                if std::io::copy(&mut file, &mut out).is_ok() {
                    debug!("Extracted native {}", name);
                }
            }
        })
        .await
        .map_err(|e| LauncherError::Other(format!("Task join error: {e}")))?;
    }

    Ok(natives_dir)
}

/// Remove the session natives dir after the game exits.
pub async fn cleanup_natives(instance: &Instance) {
    let natives_dir = instance.natives_dir();
    if natives_dir.exists() {
        let _ = tokio::fs::remove_dir_all(&natives_dir).await;
    }
}
