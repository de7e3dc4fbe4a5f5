use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Supported mod loaders.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LoaderType {
    Vanilla,
    Fabric,
    Quilt,
    Forge,
    NeoForge,
}

impl LoaderType {
    /// Loaders that boot through the JPMS module launcher instead of
    /// putting a plain main class on the classpath.
    pub fn uses_module_launcher(&self) -> bool {
        matches!(self, LoaderType::Forge | LoaderType::NeoForge)
    }
}

impl std::fmt::Display for LoaderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoaderType::Vanilla => write!(f, "vanilla"),
            LoaderType::Fabric => write!(f, "fabric"),
            LoaderType::Quilt => write!(f, "quilt"),
            LoaderType::Forge => write!(f, "forge"),
            LoaderType::NeoForge => write!(f, "neoforge"),
        }
    }
}

/// Lifecycle state of an instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Instance metadata exists but files haven't been provisioned.
    Created,
    /// Currently downloading / installing.
    Installing,
    /// Verified and launchable.
    Ready,
    /// Game is running.
    Running,
    /// Something went wrong during provisioning.
    Error,
}

/// Full instance representation persisted to disk as `instance.json`.
///
/// Each instance owns a folder under `instances/<id>/` with:
/// - `minecraft/`    the game working directory (.minecraft equivalent)
/// - `mods/`         mod JARs
/// - `config/`       mod configuration files
/// - `logs/`         game logs
/// - `instance.json` this serialized struct
///
/// Version descriptors, libraries, assets and Java runtimes live in the
/// shared stores next to `instances/`, not inside the instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    pub path: PathBuf,
    pub minecraft_version: String,
    pub loader: LoaderType,
    /// Concrete loader build; filled in after auto-pick so later runs never
    /// re-derive it from the network.
    pub loader_version: Option<String>,
    pub java_path: Option<PathBuf>,
    pub max_memory_mb: u32,

    // ── Internal state ──
    /// Stable, path-friendly identifier derived from the name.
    pub id: String,
    pub state: InstanceState,
    pub created_at: DateTime<Utc>,
    pub last_played: Option<DateTime<Utc>>,
    /// Main class resolved from the version descriptor / loader.
    pub main_class: Option<String>,
    /// Asset index id (e.g. "17" for 1.21.x).
    pub asset_index: Option<String>,
    /// Library entries saved during installation (maven coordinates or
    /// store-relative paths).
    pub libraries: Vec<String>,
    /// Extra JVM arguments from the loader profile.
    pub jvm_args: Vec<String>,
    /// Extra game arguments from the loader profile.
    pub game_args: Vec<String>,
}

impl Instance {
    pub fn new(
        id: String,
        name: String,
        minecraft_version: String,
        loader: LoaderType,
        loader_version: Option<String>,
        max_memory_mb: u32,
        base_dir: &std::path::Path,
    ) -> Self {
        let instance_dir = base_dir.join(&id);

        Self {
            name,
            path: instance_dir,
            minecraft_version,
            loader,
            loader_version,
            java_path: None,
            max_memory_mb,
            id,
            state: InstanceState::Created,
            created_at: Utc::now(),
            last_played: None,
            main_class: None,
            asset_index: None,
            libraries: Vec::new(),
            jvm_args: Vec::new(),
            game_args: Vec::new(),
        }
    }

    /// Launch is refused until this holds.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, InstanceState::Ready | InstanceState::Running)
    }

    /// Path to the instance's `minecraft/` game working directory.
    pub fn game_dir(&self) -> PathBuf {
        self.path.join("minecraft")
    }

    pub fn mods_dir(&self) -> PathBuf {
        self.path.join("mods")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.path.join("config")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.path.join("logs")
    }

    /// World saves live where the game itself writes them.
    pub fn saves_dir(&self) -> PathBuf {
        self.game_dir().join("saves")
    }

    /// Extracted per launch session.
    pub fn natives_dir(&self) -> PathBuf {
        self.path.join("natives")
    }

    /// Instance-local library overrides, consulted after the shared store.
    pub fn local_libraries_dir(&self) -> PathBuf {
        self.path.join("libraries")
    }

    pub fn client_jar_path(&self) -> PathBuf {
        self.game_dir().join("client.jar")
    }

    pub fn config_path(&self) -> PathBuf {
        self.path.join("instance.json")
    }
}

/// Reduce a display name to a stable, path-friendly identifier: lowercase
/// ASCII alphanumerics with single dashes, never empty.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());

    for c in name.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if matches!(c, ' ' | '-' | '_' | '.') && !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }

    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "instance".to_string()
    } else {
        slug
    }
}
