// ─── Version Manifest ───
// Fetches the Mojang version catalog and resolves per-version descriptors,
// caching both on disk so repeated provisioning runs stay off the network.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{LauncherError, LauncherResult};
use crate::paths::DataPaths;

use super::metadata::VersionDescriptor;

const VERSION_MANIFEST_URL: &str =
    "https://piston-meta.mojang.com/mc/game/version_manifest_v2.json";

/// How long a fetched catalog stays fresh.
const MANIFEST_TTL_MINUTES: i64 = 60;

/// Top-level Mojang version catalog.
#[derive(Debug, Deserialize, Serialize)]
pub struct VersionManifest {
    pub versions: Vec<VersionEntry>,
}

/// A single catalog entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VersionEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub version_type: String,
    #[serde(rename = "releaseTime")]
    pub release_time: String,
    pub url: String,
    #[serde(default)]
    pub sha1: Option<String>,
}

impl VersionManifest {
    /// Find a specific version entry by id (e.g. "1.20.4").
    pub fn find_version(&self, id: &str) -> Option<&VersionEntry> {
        self.versions.iter().find(|v| v.id == id)
    }

    /// All stable versions, newest first (catalog order).
    pub fn releases(&self) -> Vec<&VersionEntry> {
        self.versions
            .iter()
            .filter(|v| v.version_type == "release")
            .collect()
    }
}

/// On-disk cache wrapper carrying the fetch time.
#[derive(Debug, Deserialize, Serialize)]
struct CachedManifest {
    fetched_at: DateTime<Utc>,
    manifest: VersionManifest,
}

fn is_fresh(fetched_at: DateTime<Utc>) -> bool {
    Utc::now() - fetched_at < Duration::minutes(MANIFEST_TTL_MINUTES)
}

/// Resolves the Mojang version catalog and per-version descriptors.
///
/// The catalog is cached in memory and at `versions/manifest.json` for one
/// hour; when the network is down a stale copy is served instead of failing,
/// since an outdated catalog still lists every version anyone has installed.
pub struct VersionResolver {
    client: reqwest::Client,
    paths: DataPaths,
    manifest_url: String,
    cache: Mutex<Option<(DateTime<Utc>, Arc<VersionManifest>)>>,
}

impl VersionResolver {
    pub fn new(client: reqwest::Client, paths: DataPaths) -> Self {
        Self {
            client,
            paths,
            manifest_url: VERSION_MANIFEST_URL.to_string(),
            cache: Mutex::new(None),
        }
    }

    /// Point the resolver at a catalog mirror.
    pub fn with_manifest_url(mut self, url: impl Into<String>) -> Self {
        self.manifest_url = url.into();
        self
    }

    /// The version catalog, served from cache while fresh.
    pub async fn manifest(&self) -> LauncherResult<Arc<VersionManifest>> {
        let mut cache = self.cache.lock().await;

        if let Some((fetched_at, manifest)) = &*cache {
            if is_fresh(*fetched_at) {
                return Ok(manifest.clone());
            }
        }

        let disk = self.load_disk_cache().await;
        if let Some((fetched_at, manifest)) = &disk {
            if is_fresh(*fetched_at) {
                *cache = Some((*fetched_at, manifest.clone()));
                return Ok(manifest.clone());
            }
        }

        match self.fetch_remote().await {
            Ok((fetched_at, manifest)) => {
                *cache = Some((fetched_at, manifest.clone()));
                Ok(manifest)
            }
            Err(e) => {
                // Stale data beats no data for everything but brand-new ids.
                let stale = cache.clone().or(disk);
                match stale {
                    Some((fetched_at, manifest)) => {
                        warn!(
                            "Version catalog fetch failed ({}), serving stale copy from {}",
                            e, fetched_at
                        );
                        *cache = Some((fetched_at, manifest.clone()));
                        Ok(manifest)
                    }
                    None => Err(e),
                }
            }
        }
    }

    /// Resolve and persist the full descriptor for version `id`.
    ///
    /// Written once to `versions/<id>/<id>.json`; later calls parse the file
    /// without touching the network. A file that no longer parses into a
    /// launchable descriptor is fetched again.
    pub async fn version_metadata(&self, id: &str) -> LauncherResult<VersionDescriptor> {
        let path = self.paths.version_descriptor(id);

        if path.exists() {
            match VersionDescriptor::load(&path).await {
                Ok(descriptor) if descriptor.is_launchable() => return Ok(descriptor),
                Ok(_) => warn!("Descriptor {:?} is incomplete, refetching", path),
                Err(e) => warn!("Descriptor {:?} unreadable ({}), refetching", path, e),
            }
        }

        let manifest = self.manifest().await?;
        let entry = manifest.find_version(id).ok_or_else(|| {
            LauncherError::Other(format!("Minecraft version {} not found in manifest", id))
        })?;

        let (descriptor, raw) = VersionDescriptor::fetch(&self.client, &entry.url).await?;
        VersionDescriptor::persist_raw(&path, &raw).await?;
        info!("Resolved version metadata for {}", id);
        Ok(descriptor)
    }

    async fn fetch_remote(&self) -> LauncherResult<(DateTime<Utc>, Arc<VersionManifest>)> {
        info!("Fetching Minecraft version catalog...");

        let manifest: VersionManifest = self
            .client
            .get(&self.manifest_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        info!("Loaded {} versions from catalog", manifest.versions.len());

        let cached = CachedManifest {
            fetched_at: Utc::now(),
            manifest,
        };

        let path = self.paths.manifest_cache();
        match serde_json::to_string_pretty(&cached) {
            Ok(body) => {
                if let Some(parent) = path.parent() {
                    let _ = tokio::fs::create_dir_all(parent).await;
                }
                if let Err(e) = tokio::fs::write(&path, body).await {
                    warn!("Could not persist catalog cache at {:?}: {}", path, e);
                }
            }
            Err(e) => warn!("Could not serialize catalog cache: {}", e),
        }

        Ok((cached.fetched_at, Arc::new(cached.manifest)))
    }

    async fn load_disk_cache(&self) -> Option<(DateTime<Utc>, Arc<VersionManifest>)> {
        let path = self.paths.manifest_cache();
        let raw = tokio::fs::read_to_string(&path).await.ok()?;
        let cached: CachedManifest = serde_json::from_str(&raw).ok()?;
        Some((cached.fetched_at, Arc::new(cached.manifest)))
    }
}
