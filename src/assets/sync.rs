use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use serde::Deserialize;
use tracing::{info, warn};

use crate::downloader::{DownloadEngine, DownloadEntry};
use crate::error::{LauncherError, LauncherResult};

const RESOURCES_URL: &str = "https://resources.download.minecraft.net";

/// Top-level asset index JSON structure.
#[derive(Debug, Deserialize)]
pub struct AssetIndex {
    pub objects: HashMap<String, AssetObject>,
}

#[derive(Debug, Deserialize)]
pub struct AssetObject {
    pub hash: String,
    pub size: u64,
}

/// Outcome of one synchronization pass over the shared store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetSyncReport {
    pub already_present: usize,
    pub downloaded: usize,
    pub failed: usize,
}

/// Keeps the shared content-addressed asset store up to date.
///
/// Objects land at `objects/<first two hash chars>/<hash>`, so every
/// instance on the machine shares one copy of each asset and a second
/// sync of the same index downloads nothing.
pub struct AssetSynchronizer {
    client: reqwest::Client,
    engine: DownloadEngine,
    assets_dir: PathBuf,
    resources_url: String,
}

impl AssetSynchronizer {
    pub fn new(client: reqwest::Client, engine: DownloadEngine, assets_dir: PathBuf) -> Self {
        Self {
            client,
            engine,
            assets_dir,
            resources_url: RESOURCES_URL.to_string(),
        }
    }

    /// Point the synchronizer at an asset CDN mirror.
    pub fn with_resources_url(mut self, url: impl Into<String>) -> Self {
        self.resources_url = url.into();
        self
    }

    /// Download the index (skipped when already on disk) and every object
    /// missing from the store. Individual object failures are reported in
    /// the counts, not raised; a later pass picks them up again.
    pub async fn sync(&self, index_id: &str, index_url: &str) -> LauncherResult<AssetSyncReport> {
        let index_text = self.load_or_fetch_index(index_id, index_url).await?;
        let index: AssetIndex = serde_json::from_str(&index_text)?;

        // Different logical names can share one content hash; the store
        // holds a single copy, so download each hash once.
        let objects_dir = self.assets_dir.join("objects");
        let mut seen: HashSet<&str> = HashSet::new();
        let mut unique = 0usize;
        let mut entries = Vec::new();

        for obj in index.objects.values() {
            if obj.hash.len() < 2 || !seen.insert(obj.hash.as_str()) {
                continue;
            }
            unique += 1;

            let hash_prefix = &obj.hash[..2];
            let dest = objects_dir.join(hash_prefix).join(&obj.hash);
            if dest.exists() {
                continue;
            }

            let url = format!("{}/{}/{}", self.resources_url, hash_prefix, obj.hash);
            entries.push(
                DownloadEntry::new(url, dest)
                    .with_sha1(obj.hash.as_str())
                    .with_size(obj.size),
            );
        }

        let missing = entries.len();
        info!(
            "Asset index {}: {} objects, {} already cached, {} to download",
            index_id,
            unique,
            unique - missing,
            missing
        );

        let failures = self.engine.download_batch(entries).await;
        for (entry, err) in &failures {
            warn!("Asset download failed for {}: {}", entry.url, err);
        }

        Ok(AssetSyncReport {
            already_present: unique - missing,
            downloaded: missing - failures.len(),
            failed: failures.len(),
        })
    }

    async fn load_or_fetch_index(&self, index_id: &str, index_url: &str) -> LauncherResult<String> {
        let indexes_dir = self.assets_dir.join("indexes");
        let index_path = indexes_dir.join(format!("{}.json", index_id));

        if index_path.exists() {
            let raw = tokio::fs::read_to_string(&index_path)
                .await
                .map_err(|e| LauncherError::Io {
                    path: index_path.clone(),
                    source: e,
                })?;
            if serde_json::from_str::<AssetIndex>(&raw).is_ok() {
                return Ok(raw);
            }
            warn!("Asset index {:?} unreadable, refetching", index_path);
        }

        let response = self.client.get(index_url).send().await?;
        if !response.status().is_success() {
            return Err(LauncherError::DownloadFailed {
                url: index_url.to_string(),
                status: response.status().as_u16(),
            });
        }
        let raw = response.text().await?;

        // Parse before persisting so a bad body never poisons the cache.
        serde_json::from_str::<AssetIndex>(&raw)?;

        tokio::fs::create_dir_all(&indexes_dir)
            .await
            .map_err(|e| LauncherError::Io {
                path: indexes_dir.clone(),
                source: e,
            })?;
        tokio::fs::write(&index_path, &raw)
            .await
            .map_err(|e| LauncherError::Io {
                path: index_path,
                source: e,
            })?;

        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::serve;
    use std::sync::atomic::Ordering;

    // sha1("hello")
    const HELLO_SHA1: &str = "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d";

    fn index_body() -> Vec<u8> {
        serde_json::json!({
            "objects": {
                "minecraft/sounds/ambient.ogg": {"hash": HELLO_SHA1, "size": 5},
                "minecraft/lang/en_us.json": {"hash": HELLO_SHA1, "size": 5}
            }
        })
        .to_string()
        .into_bytes()
    }

    fn synchronizer(dir: &std::path::Path, resources_url: String) -> AssetSynchronizer {
        AssetSynchronizer::new(
            reqwest::Client::new(),
            DownloadEngine::new(reqwest::Client::new()).with_concurrency(4),
            dir.to_path_buf(),
        )
        .with_resources_url(resources_url)
    }

    #[tokio::test]
    async fn sync_downloads_each_hash_once_and_is_idempotent() {
        let (index_url, index_served) = serve(index_body(), 3).await;
        let (objects_url, objects_served) = serve(b"hello".to_vec(), 8).await;

        let dir = tempfile::tempdir().unwrap();
        let sync = synchronizer(dir.path(), objects_url);

        let first = sync.sync("17", &index_url).await.unwrap();
        assert_eq!(first.already_present, 0);
        assert_eq!(first.downloaded, 1);
        assert_eq!(first.failed, 0);
        assert_eq!(objects_served.load(Ordering::SeqCst), 1);

        let object_path = dir
            .path()
            .join("objects")
            .join(&HELLO_SHA1[..2])
            .join(HELLO_SHA1);
        assert_eq!(std::fs::read(&object_path).unwrap(), b"hello");
        assert!(dir.path().join("indexes/17.json").exists());

        let second = sync.sync("17", &index_url).await.unwrap();
        assert_eq!(second.already_present, 1);
        assert_eq!(second.downloaded, 0);
        assert_eq!(second.failed, 0);
        // Index was cached on disk, so upstream saw exactly one index fetch.
        assert_eq!(index_served.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn corrupted_object_counts_as_failed_and_leaves_no_file() {
        let bad_index = serde_json::json!({
            "objects": {
                "minecraft/sounds/one.ogg": {
                    "hash": "0000000000000000000000000000000000000000",
                    "size": 5
                }
            }
        })
        .to_string()
        .into_bytes();

        let (index_url, _) = serve(bad_index, 1).await;
        let (objects_url, _) = serve(b"hello".to_vec(), 4).await;

        let dir = tempfile::tempdir().unwrap();
        let sync = synchronizer(dir.path(), objects_url);

        let report = sync.sync("5", &index_url).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.downloaded, 0);
        assert!(!dir
            .path()
            .join("objects/00/0000000000000000000000000000000000000000")
            .exists());
    }
}
