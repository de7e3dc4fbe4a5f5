use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{LauncherError, LauncherResult};
use crate::instance::LoaderType;

/// Terminal entries older than this drop out of the state file.
const RETENTION_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Completed,
    Error,
    Cancelled,
}

impl DownloadStatus {
    /// Entries a client may still act on: not yet finished, or failed and
    /// waiting for an explicit resume.
    pub fn is_incomplete(&self) -> bool {
        matches!(
            self,
            DownloadStatus::Pending | DownloadStatus::Downloading | DownloadStatus::Error
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadStatus::Completed | DownloadStatus::Cancelled)
    }
}

/// Persisted provisioning record for one instance.
///
/// A record stuck in `Downloading` after a restart is crash evidence; it
/// shows up in [`DownloadStateStore::incomplete`] and can be resumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadState {
    /// Instance id this provisioning run belongs to.
    pub id: String,
    pub instance_path: PathBuf,
    pub minecraft_version: String,
    pub loader: LoaderType,
    pub loader_version: Option<String>,
    pub status: DownloadStatus,
    /// Whole-pipeline progress, 0.0 to 1.0.
    pub progress: f32,
    /// Human-readable name of the current phase.
    pub step: String,
    pub downloaded_files: u64,
    pub pending_files: u64,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl DownloadState {
    pub fn new(
        id: impl Into<String>,
        instance_path: PathBuf,
        minecraft_version: impl Into<String>,
        loader: LoaderType,
        loader_version: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            instance_path,
            minecraft_version: minecraft_version.into(),
            loader,
            loader_version,
            status: DownloadStatus::Pending,
            progress: 0.0,
            step: "pending".to_string(),
            downloaded_files: 0,
            pending_files: 0,
            error: None,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    downloads: Vec<DownloadState>,
}

/// Store behind `instance-downloads-state.json`.
///
/// Transitions are validated here so the on-disk record can never jump from
/// a failed run straight to completed; an `Error` entry re-enters the
/// pipeline only through [`resume`](Self::resume).
pub struct DownloadStateStore {
    file: PathBuf,
    states: Mutex<HashMap<String, DownloadState>>,
}

impl DownloadStateStore {
    /// Open the store, tolerating a missing or corrupt file, and prune
    /// expired terminal entries.
    pub async fn open(file: PathBuf) -> Self {
        let mut states = HashMap::new();

        match tokio::fs::read_to_string(&file).await {
            Ok(raw) => match serde_json::from_str::<StateFile>(&raw) {
                Ok(parsed) => {
                    for state in parsed.downloads {
                        states.insert(state.id.clone(), state);
                    }
                }
                Err(e) => warn!("Corrupt download state file {:?}: {}", file, e),
            },
            Err(_) => debug!("No download state file yet at {:?}", file),
        }

        let store = Self {
            file,
            states: Mutex::new(states),
        };
        if let Err(e) = store.persist().await {
            warn!("Could not persist download state: {}", e);
        }
        store
    }

    pub async fn get(&self, id: &str) -> Option<DownloadState> {
        self.states.lock().await.get(id).cloned()
    }

    /// Records that are pending, mid-flight (including crash orphans from a
    /// previous run) or failed, newest first.
    pub async fn incomplete(&self) -> Vec<DownloadState> {
        let states = self.states.lock().await;
        let mut list: Vec<DownloadState> = states
            .values()
            .filter(|s| s.status.is_incomplete())
            .cloned()
            .collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        list
    }

    /// Register a fresh pending record, replacing any previous record for
    /// the same instance.
    pub async fn begin(&self, state: DownloadState) -> LauncherResult<()> {
        {
            let mut states = self.states.lock().await;
            states.insert(state.id.clone(), state);
        }
        self.persist().await
    }

    pub async fn mark_downloading(&self, id: &str) -> LauncherResult<()> {
        self.transition(id, DownloadStatus::Downloading, None).await
    }

    pub async fn complete(&self, id: &str) -> LauncherResult<()> {
        self.transition(id, DownloadStatus::Completed, None).await
    }

    pub async fn fail(&self, id: &str, message: impl Into<String>) -> LauncherResult<()> {
        self.transition(id, DownloadStatus::Error, Some(message.into()))
            .await
    }

    pub async fn cancel(&self, id: &str) -> LauncherResult<()> {
        self.transition(id, DownloadStatus::Cancelled, None).await
    }

    /// Put an incomplete record back to `Pending` so the pipeline may run
    /// it again. This is the only way out of `Error`.
    pub async fn resume(&self, id: &str) -> LauncherResult<DownloadState> {
        let snapshot = {
            let mut states = self.states.lock().await;
            let state = states
                .get_mut(id)
                .ok_or_else(|| LauncherError::InstanceNotFound(id.to_string()))?;

            if !state.status.is_incomplete() {
                return Err(LauncherError::Other(format!(
                    "Download {} is {:?} and not resumable",
                    id, state.status
                )));
            }

            state.status = DownloadStatus::Pending;
            state.error = None;
            state.updated_at = Utc::now();
            state.clone()
        };

        self.persist().await?;
        Ok(snapshot)
    }

    /// Refresh progress and step without changing status.
    pub async fn update_progress(
        &self,
        id: &str,
        progress: f32,
        step: impl Into<String>,
    ) -> LauncherResult<()> {
        {
            let mut states = self.states.lock().await;
            if let Some(state) = states.get_mut(id) {
                state.progress = progress.clamp(0.0, 1.0);
                state.step = step.into();
                state.updated_at = Utc::now();
            }
        }
        self.persist().await
    }

    pub async fn add_file_counts(
        &self,
        id: &str,
        downloaded: u64,
        pending: u64,
    ) -> LauncherResult<()> {
        {
            let mut states = self.states.lock().await;
            if let Some(state) = states.get_mut(id) {
                state.downloaded_files += downloaded;
                state.pending_files = pending;
                state.updated_at = Utc::now();
            }
        }
        self.persist().await
    }

    pub async fn remove(&self, id: &str) -> LauncherResult<()> {
        {
            let mut states = self.states.lock().await;
            states.remove(id);
        }
        self.persist().await
    }

    async fn transition(
        &self,
        id: &str,
        next: DownloadStatus,
        error: Option<String>,
    ) -> LauncherResult<()> {
        {
            let mut states = self.states.lock().await;
            let state = states
                .get_mut(id)
                .ok_or_else(|| LauncherError::InstanceNotFound(id.to_string()))?;

            if !can_transition(state.status, next) {
                return Err(LauncherError::Other(format!(
                    "Invalid download state transition for {}: {:?} -> {:?}",
                    id, state.status, next
                )));
            }

            state.status = next;
            state.error = error;
            state.updated_at = Utc::now();
            if next == DownloadStatus::Completed {
                state.progress = 1.0;
            }
        }
        self.persist().await
    }

    /// Atomic write (temp file + rename), pruning expired terminal entries
    /// on the way out.
    async fn persist(&self) -> LauncherResult<()> {
        let cutoff = Utc::now() - Duration::days(RETENTION_DAYS);

        let mut downloads: Vec<DownloadState> = {
            let mut states = self.states.lock().await;
            states.retain(|_, s| !(s.status.is_terminal() && s.updated_at < cutoff));
            states.values().cloned().collect()
        };
        downloads.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        let body = serde_json::to_string_pretty(&StateFile { downloads })?;
        let tmp = self.file.with_extension("json.tmp");

        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| LauncherError::Io {
                path: tmp.clone(),
                source: e,
            })?;
        tokio::fs::rename(&tmp, &self.file)
            .await
            .map_err(|e| LauncherError::Io {
                path: self.file.clone(),
                source: e,
            })
    }
}

fn can_transition(from: DownloadStatus, to: DownloadStatus) -> bool {
    use DownloadStatus::*;
    matches!(
        (from, to),
        (Pending, Downloading)
            | (Downloading, Downloading)
            | (Pending | Downloading, Completed | Error | Cancelled)
    )
}
