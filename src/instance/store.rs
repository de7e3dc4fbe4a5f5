use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use super::model::{slugify, Instance, InstanceState};
use crate::error::{LauncherError, LauncherResult};

/// Manages the lifecycle of instances on disk.
///
/// Each instance's `instance.json` is the source of truth; `instances.json`
/// at the data root is a derived summary index rebuilt after every change.
pub struct InstanceStore {
    instances_dir: PathBuf,
    index_path: PathBuf,
}

/// One line of the derived `instances.json` index.
#[derive(Debug, Serialize)]
struct InstanceSummary {
    id: String,
    name: String,
    minecraft_version: String,
    loader: super::model::LoaderType,
    loader_version: Option<String>,
    state: InstanceState,
}

impl InstanceStore {
    pub fn new(instances_dir: PathBuf, index_path: PathBuf) -> Self {
        Self {
            instances_dir,
            index_path,
        }
    }

    pub fn instances_dir(&self) -> &Path {
        &self.instances_dir
    }

    /// Derive an id from `name` that no existing instance uses.
    pub fn unique_id(&self, name: &str) -> String {
        let base = slugify(name);
        if !self.instances_dir.join(&base).exists() {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}-{}", base, n);
            if !self.instances_dir.join(&candidate).exists() {
                return candidate;
            }
            n += 1;
        }
    }

    /// Create a new instance on disk with its directory structure.
    pub async fn create(&self, mut instance: Instance) -> LauncherResult<Instance> {
        instance.path = self.instances_dir.join(&instance.id);

        if instance.path.exists() {
            return Err(LauncherError::InstanceAlreadyExists(instance.id.clone()));
        }

        self.ensure_structure(&instance).await?;
        self.save(&instance).await?;

        info!("Created instance '{}' ({})", instance.name, instance.id);
        Ok(instance)
    }

    /// Create the instance's standard folders; safe to call repeatedly.
    pub async fn ensure_structure(&self, instance: &Instance) -> LauncherResult<()> {
        let game_dir = instance.game_dir();
        let mods_dir = instance.mods_dir();
        let config_dir = instance.config_dir();
        let logs_dir = instance.logs_dir();
        let saves_dir = instance.saves_dir();
        tokio::try_join!(
            create_dir_safe(&game_dir),
            create_dir_safe(&mods_dir),
            create_dir_safe(&config_dir),
            create_dir_safe(&logs_dir),
            create_dir_safe(&saves_dir),
        )?;
        Ok(())
    }

    /// Save instance metadata to disk and refresh the summary index.
    pub async fn save(&self, instance: &Instance) -> LauncherResult<()> {
        let json = serde_json::to_string_pretty(instance)?;
        let config_path = instance.config_path();

        if let Some(parent) = config_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LauncherError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        tokio::fs::write(&config_path, json)
            .await
            .map_err(|e| LauncherError::Io {
                path: config_path,
                source: e,
            })?;

        self.rebuild_index().await;
        Ok(())
    }

    /// Load a single instance by id.
    pub async fn load(&self, id: &str) -> LauncherResult<Instance> {
        let config_path = self.instances_dir.join(id).join("instance.json");
        if !config_path.exists() {
            return Err(LauncherError::InstanceNotFound(id.to_string()));
        }

        let json = tokio::fs::read_to_string(&config_path)
            .await
            .map_err(|e| LauncherError::Io {
                path: config_path.clone(),
                source: e,
            })?;

        let instance: Instance = serde_json::from_str(&json)?;
        Ok(instance)
    }

    /// List all instances, skipping unreadable entries.
    pub async fn list(&self) -> LauncherResult<Vec<Instance>> {
        let mut instances = Vec::new();

        if !self.instances_dir.exists() {
            return Ok(instances);
        }

        let mut entries = tokio::fs::read_dir(&self.instances_dir)
            .await
            .map_err(|e| LauncherError::Io {
                path: self.instances_dir.clone(),
                source: e,
            })?;

        while let Some(entry) = entries.next_entry().await.map_err(|e| LauncherError::Io {
            path: self.instances_dir.clone(),
            source: e,
        })? {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let config_path = path.join("instance.json");
            if !config_path.exists() {
                continue;
            }
            match tokio::fs::read_to_string(&config_path).await {
                Ok(json) => match serde_json::from_str::<Instance>(&json) {
                    Ok(inst) => instances.push(inst),
                    Err(e) => warn!("Corrupt instance.json at {:?}: {}", config_path, e),
                },
                Err(e) => warn!("Cannot read {:?}: {}", config_path, e),
            }
        }

        instances.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(instances)
    }

    /// Delete an instance from disk.
    pub async fn delete(&self, id: &str) -> LauncherResult<()> {
        let instance_dir = self.instances_dir.join(id);
        if !instance_dir.exists() {
            return Err(LauncherError::InstanceNotFound(id.to_string()));
        }

        tokio::fs::remove_dir_all(&instance_dir)
            .await
            .map_err(|e| LauncherError::Io {
                path: instance_dir,
                source: e,
            })?;

        self.rebuild_index().await;
        info!("Deleted instance {}", id);
        Ok(())
    }

    /// Update instance state and persist.
    pub async fn set_state(
        &self,
        instance: &mut Instance,
        state: InstanceState,
    ) -> LauncherResult<()> {
        instance.state = state;
        self.save(instance).await
    }

    /// Rewrite `instances.json` from the per-instance files. Best effort;
    /// the index is derived data.
    async fn rebuild_index(&self) {
        let instances = match self.list().await {
            Ok(list) => list,
            Err(e) => {
                warn!("Could not scan instances for index: {}", e);
                return;
            }
        };

        let summaries: Vec<InstanceSummary> = instances
            .into_iter()
            .map(|i| InstanceSummary {
                id: i.id,
                name: i.name,
                minecraft_version: i.minecraft_version,
                loader: i.loader,
                loader_version: i.loader_version,
                state: i.state,
            })
            .collect();

        match serde_json::to_string_pretty(&summaries) {
            Ok(json) => {
                if let Err(e) = tokio::fs::write(&self.index_path, json).await {
                    warn!("Could not write {:?}: {}", self.index_path, e);
                }
            }
            Err(e) => warn!("Could not serialize instance index: {}", e),
        }
    }
}

async fn create_dir_safe(path: &Path) -> LauncherResult<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| LauncherError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::LoaderType;

    fn store(root: &Path) -> InstanceStore {
        InstanceStore::new(root.join("instances"), root.join("instances.json"))
    }

    fn demo_instance(store: &InstanceStore, name: &str) -> Instance {
        Instance::new(
            store.unique_id(name),
            name.to_string(),
            "1.20.4".into(),
            LoaderType::Vanilla,
            None,
            4096,
            store.instances_dir(),
        )
    }

    #[tokio::test]
    async fn create_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let created = store.create(demo_instance(&store, "My World")).await.unwrap();
        assert_eq!(created.id, "my-world");
        assert!(created.game_dir().is_dir());
        assert!(created.mods_dir().is_dir());
        assert!(created.logs_dir().is_dir());

        let loaded = store.load("my-world").await.unwrap();
        assert_eq!(loaded.name, "My World");
        assert_eq!(loaded.state, InstanceState::Created);
        assert!(dir.path().join("instances.json").exists());
    }

    #[tokio::test]
    async fn ids_are_uniquified_against_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let first = store.create(demo_instance(&store, "World")).await.unwrap();
        let second = store.create(demo_instance(&store, "World")).await.unwrap();
        let third = store.create(demo_instance(&store, "World")).await.unwrap();

        assert_eq!(first.id, "world");
        assert_eq!(second.id, "world-2");
        assert_eq!(third.id, "world-3");
        assert_eq!(store.list().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn delete_removes_dir_and_missing_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let inst = store.create(demo_instance(&store, "Gone")).await.unwrap();
        store.delete(&inst.id).await.unwrap();

        assert!(!inst.path.exists());
        assert!(matches!(
            store.load("gone").await,
            Err(LauncherError::InstanceNotFound(_))
        ));
        assert!(matches!(
            store.delete("gone").await,
            Err(LauncherError::InstanceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn set_state_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let mut inst = store.create(demo_instance(&store, "Stateful")).await.unwrap();
        store
            .set_state(&mut inst, InstanceState::Ready)
            .await
            .unwrap();

        let loaded = store.load(&inst.id).await.unwrap();
        assert_eq!(loaded.state, InstanceState::Ready);
        assert!(loaded.is_ready());
    }
}
