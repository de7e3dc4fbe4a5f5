use std::path::{Path, PathBuf};

use crate::error::{LauncherError, LauncherResult};

const APP_DIR_NAME: &str = "Basalt";

/// On-disk layout of the engine's data root.
///
/// Everything shareable lives directly under the root (version descriptors,
/// the library store, the asset store, managed Java runtimes); only files
/// specific to one instance live inside that instance's directory.
///
/// ```text
/// <root>/
///   instances.json                  instance summaries
///   instance-downloads-state.json   provisioning state (resumable)
///   instances/<id>/                 per-instance dir (instance.json, game dir)
///   versions/<id>/<id>.json         resolved version descriptors
///   libraries/<maven path>          shared library store
///   assets/indexes/ assets/objects/ shared content-addressed asset store
///   runtime/java<major>/            managed Java runtimes
/// ```
#[derive(Debug, Clone)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    /// Layout rooted at the per-user data directory.
    pub fn discover() -> LauncherResult<Self> {
        let root = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR_NAME);
        Self::at(root)
    }

    /// Layout rooted at an explicit directory. Tests point this at a scratch
    /// directory to get a fully isolated engine.
    pub fn at(root: impl Into<PathBuf>) -> LauncherResult<Self> {
        let root = canonical_or_create_dir(&root.into())?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn instances_dir(&self) -> PathBuf {
        self.root.join("instances")
    }

    pub fn instance_dir(&self, instance_id: &str) -> PathBuf {
        self.instances_dir().join(instance_id)
    }

    /// Index of instance summaries; the per-instance `instance.json` files
    /// remain the source of truth.
    pub fn instances_index(&self) -> PathBuf {
        self.root.join("instances.json")
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.root.join("versions")
    }

    pub fn version_dir(&self, version_id: &str) -> PathBuf {
        self.versions_dir().join(version_id)
    }

    pub fn version_descriptor(&self, version_id: &str) -> PathBuf {
        self.version_dir(version_id)
            .join(format!("{}.json", version_id))
    }

    pub fn manifest_cache(&self) -> PathBuf {
        self.versions_dir().join("manifest.json")
    }

    pub fn libraries_dir(&self) -> PathBuf {
        self.root.join("libraries")
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.root.join("assets")
    }

    pub fn asset_indexes_dir(&self) -> PathBuf {
        self.assets_dir().join("indexes")
    }

    pub fn asset_objects_dir(&self) -> PathBuf {
        self.assets_dir().join("objects")
    }

    pub fn runtime_dir(&self) -> PathBuf {
        self.root.join("runtime")
    }

    pub fn java_runtime_dir(&self, major: u32) -> PathBuf {
        self.runtime_dir().join(format!("java{}", major))
    }

    pub fn downloads_state_file(&self) -> PathBuf {
        self.root.join("instance-downloads-state.json")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Creates the shared directories so every later phase can assume they
    /// exist. Idempotent.
    pub fn ensure_layout(&self) -> LauncherResult<()> {
        for dir in [
            self.instances_dir(),
            self.versions_dir(),
            self.libraries_dir(),
            self.asset_indexes_dir(),
            self.asset_objects_dir(),
            self.runtime_dir(),
            self.temp_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|source| LauncherError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

fn canonical_or_create_dir(path: &Path) -> LauncherResult<PathBuf> {
    std::fs::create_dir_all(path).map_err(|source| LauncherError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    std::fs::canonicalize(path).map_err(|source| LauncherError::Io {
        path: path.to_path_buf(),
        source,
    })
}
