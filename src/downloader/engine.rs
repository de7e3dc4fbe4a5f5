use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use md5::Md5;
use reqwest::Client;
use sha1::{Digest, Sha1};
use sha2::Sha256;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{LauncherError, LauncherResult};

/// Upper bound on simultaneous transfers across the whole engine.
const DEFAULT_CONCURRENCY: usize = 24;

/// Digest algorithms accepted for transfer validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgo {
    Sha1,
    Sha256,
    Md5,
}

/// Expected digest for a transfer, hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub algo: ChecksumAlgo,
    pub hex: String,
}

impl Checksum {
    pub fn sha1(hex: impl Into<String>) -> Self {
        Self {
            algo: ChecksumAlgo::Sha1,
            hex: hex.into(),
        }
    }

    pub fn sha256(hex: impl Into<String>) -> Self {
        Self {
            algo: ChecksumAlgo::Sha256,
            hex: hex.into(),
        }
    }

    pub fn md5(hex: impl Into<String>) -> Self {
        Self {
            algo: ChecksumAlgo::Md5,
            hex: hex.into(),
        }
    }
}

/// A single file to download with optional integrity check.
#[derive(Debug, Clone)]
pub struct DownloadEntry {
    pub url: String,
    pub dest: PathBuf,
    pub checksum: Option<Checksum>,
    pub size: Option<u64>,
}

impl DownloadEntry {
    pub fn new(url: impl Into<String>, dest: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            dest: dest.into(),
            checksum: None,
            size: None,
        }
    }

    pub fn with_sha1(mut self, hex: impl Into<String>) -> Self {
        self.checksum = Some(Checksum::sha1(hex));
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

/// Lifecycle of a tracked transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    Queued,
    Active,
    Completed,
    Failed(String),
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed(_) | TransferStatus::Cancelled
        )
    }
}

/// Snapshot of a tracked transfer returned by [`DownloadEngine::status`].
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub status: TransferStatus,
    pub bytes_downloaded: u64,
    pub total_bytes: Option<u64>,
}

pub type DownloadId = Uuid;

#[derive(Default)]
struct TransferGauge {
    bytes: AtomicU64,
    /// 0 means the server did not announce a length.
    total: AtomicU64,
}

struct Transfer {
    status: TransferStatus,
    cancel: Arc<AtomicBool>,
    gauge: Arc<TransferGauge>,
}

/// Concurrent, checksum-validated download engine.
///
/// Every transfer streams into a `.part` staging file and is renamed into
/// place only after its digest checks out, so a destination path that exists
/// is always a complete, verified file. Cancelled and failed transfers leave
/// nothing behind. All transfers, tracked or not, share one permit pool.
#[derive(Clone)]
pub struct DownloadEngine {
    client: Client,
    limiter: Arc<Semaphore>,
    concurrency: usize,
    transfers: Arc<Mutex<HashMap<DownloadId, Transfer>>>,
}

impl DownloadEngine {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            limiter: Arc::new(Semaphore::new(DEFAULT_CONCURRENCY)),
            concurrency: DEFAULT_CONCURRENCY,
            transfers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        let n = n.max(1);
        self.limiter = Arc::new(Semaphore::new(n));
        self.concurrency = n;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    // ── Tracked transfers ───────────────────────────────

    /// Queue a transfer and return its id immediately. The transfer runs on
    /// the shared pool; poll [`status`](Self::status) for the outcome.
    pub async fn enqueue(&self, entry: DownloadEntry) -> DownloadId {
        let id = Uuid::new_v4();
        let cancel = Arc::new(AtomicBool::new(false));
        let gauge = Arc::new(TransferGauge::default());

        {
            let mut transfers = self.transfers.lock().await;
            transfers.insert(
                id,
                Transfer {
                    status: TransferStatus::Queued,
                    cancel: cancel.clone(),
                    gauge: gauge.clone(),
                },
            );
        }

        let engine = self.clone();
        tokio::spawn(async move {
            let _permit = match engine.limiter.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    engine
                        .set_status(id, TransferStatus::Failed("download pool closed".into()))
                        .await;
                    return;
                }
            };

            engine.set_status(id, TransferStatus::Active).await;
            let result = engine
                .fetch_with_retry(
                    &entry.url,
                    &entry.dest,
                    entry.checksum.as_ref(),
                    &cancel,
                    Some(&gauge),
                )
                .await;

            let status = match result {
                Ok(()) => TransferStatus::Completed,
                Err(LauncherError::Cancelled) => TransferStatus::Cancelled,
                Err(e) => TransferStatus::Failed(e.to_string()),
            };
            engine.set_status(id, status).await;
        });

        id
    }

    pub async fn status(&self, id: DownloadId) -> Option<TransferReport> {
        let transfers = self.transfers.lock().await;
        transfers.get(&id).map(|t| {
            let total = t.gauge.total.load(Ordering::Relaxed);
            TransferReport {
                status: t.status.clone(),
                bytes_downloaded: t.gauge.bytes.load(Ordering::Relaxed),
                total_bytes: (total > 0).then_some(total),
            }
        })
    }

    /// Ask a transfer to stop. The flag is honored between streamed chunks;
    /// the staging file is deleted when the transfer notices. Unknown ids and
    /// already-finished transfers are a no-op.
    pub async fn cancel(&self, id: DownloadId) {
        let transfers = self.transfers.lock().await;
        if let Some(t) = transfers.get(&id) {
            if !t.status.is_terminal() {
                t.cancel.store(true, Ordering::Relaxed);
            }
        }
    }

    /// Drop bookkeeping for finished transfers.
    pub async fn prune_finished(&self) {
        let mut transfers = self.transfers.lock().await;
        transfers.retain(|_, t| !t.status.is_terminal());
    }

    async fn set_status(&self, id: DownloadId, status: TransferStatus) {
        let mut transfers = self.transfers.lock().await;
        if let Some(t) = transfers.get_mut(&id) {
            t.status = status;
        }
    }

    // ── Direct transfers ────────────────────────────────

    /// Download a single file to `dest`, validating the checksum when given.
    /// Waits for a pool permit, so bursts through here stay bounded too.
    pub async fn download_file(
        &self,
        url: &str,
        dest: &Path,
        checksum: Option<&Checksum>,
    ) -> LauncherResult<()> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| LauncherError::Other("download pool closed".into()))?;
        let cancel = AtomicBool::new(false);
        self.fetch_with_retry(url, dest, checksum, &cancel, None)
            .await
    }

    /// Download many files concurrently. Returns the entries that failed;
    /// the rest are in place and verified.
    pub async fn download_batch(
        &self,
        entries: Vec<DownloadEntry>,
    ) -> Vec<(DownloadEntry, LauncherError)> {
        info!(
            "Starting batch download: {} files, concurrency={}",
            entries.len(),
            self.concurrency
        );

        let results: Vec<_> = run_bounded(
            self.concurrency,
            entries.into_iter().map(|entry| async move {
                let result = self
                    .download_file(&entry.url, &entry.dest, entry.checksum.as_ref())
                    .await;
                (entry, result)
            }),
        )
        .await;

        results
            .into_iter()
            .filter_map(|(entry, result)| match result {
                Ok(()) => None,
                Err(e) => Some((entry, e)),
            })
            .collect()
    }

    /// Check an existing file against an expected digest.
    pub async fn verify_file(path: &Path, checksum: &Checksum) -> LauncherResult<bool> {
        let bytes = tokio::fs::read(path).await.map_err(|e| LauncherError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(hex_digest(checksum.algo, &bytes) == checksum.hex.to_lowercase())
    }

    // ── Transfer internals ──────────────────────────────

    /// One mismatch triggers exactly one clean re-fetch before giving up.
    async fn fetch_with_retry(
        &self,
        url: &str,
        dest: &Path,
        checksum: Option<&Checksum>,
        cancel: &AtomicBool,
        gauge: Option<&TransferGauge>,
    ) -> LauncherResult<()> {
        match self.fetch_once(url, dest, checksum, cancel, gauge).await {
            Err(LauncherError::ChecksumMismatch { expected, actual, .. }) => {
                debug!(
                    "Checksum mismatch for {} (expected {}, got {}), refetching once",
                    url, expected, actual
                );
                if let Some(gauge) = gauge {
                    gauge.bytes.store(0, Ordering::Relaxed);
                }
                self.fetch_once(url, dest, checksum, cancel, gauge).await
            }
            other => other,
        }
    }

    async fn fetch_once(
        &self,
        url: &str,
        dest: &Path,
        checksum: Option<&Checksum>,
        cancel: &AtomicBool,
        gauge: Option<&TransferGauge>,
    ) -> LauncherResult<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LauncherError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LauncherError::DownloadFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        if let (Some(gauge), Some(len)) = (gauge, response.content_length()) {
            gauge.total.store(len, Ordering::Relaxed);
        }

        let staging = staging_path(dest);
        let mut hasher = checksum.map(|c| StreamHasher::new(c.algo));
        let mut written: u64 = 0;

        // Write inside a block so the handle is dropped before any rename or
        // delete; Windows requires that.
        {
            let mut file =
                tokio::fs::File::create(&staging)
                    .await
                    .map_err(|e| LauncherError::Io {
                        path: staging.clone(),
                        source: e,
                    })?;

            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                if cancel.load(Ordering::Relaxed) {
                    drop(file);
                    let _ = tokio::fs::remove_file(&staging).await;
                    return Err(LauncherError::Cancelled);
                }

                let chunk = chunk?;
                if let Some(h) = hasher.as_mut() {
                    h.update(&chunk);
                }
                written += chunk.len() as u64;
                if let Some(gauge) = gauge {
                    gauge.bytes.store(written, Ordering::Relaxed);
                }
                file.write_all(&chunk).await.map_err(|e| LauncherError::Io {
                    path: staging.clone(),
                    source: e,
                })?;
            }

            file.flush().await.map_err(|e| LauncherError::Io {
                path: staging.clone(),
                source: e,
            })?;
        }

        if let (Some(hasher), Some(expected)) = (hasher, checksum) {
            let actual = hasher.finish();
            if actual != expected.hex.to_lowercase() {
                let _ = tokio::fs::remove_file(&staging).await;
                return Err(LauncherError::ChecksumMismatch {
                    path: dest.to_path_buf(),
                    expected: expected.hex.clone(),
                    actual,
                });
            }
        }

        tokio::fs::rename(&staging, dest)
            .await
            .map_err(|e| LauncherError::Io {
                path: dest.to_path_buf(),
                source: e,
            })?;

        debug!("Downloaded: {} -> {:?} ({} bytes)", url, dest, written);
        Ok(())
    }
}

/// Run futures with at most `limit` in flight at once.
pub(crate) async fn run_bounded<I, F, T>(limit: usize, tasks: I) -> Vec<T>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = T>,
{
    stream::iter(tasks)
        .buffer_unordered(limit.max(1))
        .collect()
        .await
}

fn staging_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

enum StreamHasher {
    Sha1(Sha1),
    Sha256(Sha256),
    Md5(Md5),
}

impl StreamHasher {
    fn new(algo: ChecksumAlgo) -> Self {
        match algo {
            ChecksumAlgo::Sha1 => StreamHasher::Sha1(Sha1::new()),
            ChecksumAlgo::Sha256 => StreamHasher::Sha256(Sha256::new()),
            ChecksumAlgo::Md5 => StreamHasher::Md5(Md5::new()),
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        match self {
            StreamHasher::Sha1(h) => h.update(bytes),
            StreamHasher::Sha256(h) => h.update(bytes),
            StreamHasher::Md5(h) => h.update(bytes),
        }
    }

    fn finish(self) -> String {
        match self {
            StreamHasher::Sha1(h) => hex::encode(h.finalize()),
            StreamHasher::Sha256(h) => hex::encode(h.finalize()),
            StreamHasher::Md5(h) => hex::encode(h.finalize()),
        }
    }
}

fn hex_digest(algo: ChecksumAlgo, bytes: &[u8]) -> String {
    let mut hasher = StreamHasher::new(algo);
    hasher.update(bytes);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::serve;
    use std::sync::atomic::AtomicUsize;

    // sha1("hello")
    const HELLO_SHA1: &str = "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d";

    fn test_engine() -> DownloadEngine {
        DownloadEngine::new(Client::new()).with_concurrency(4)
    }

    #[tokio::test]
    async fn download_writes_file_and_removes_staging() {
        let (url, _) = serve(b"hello".to_vec(), 1).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.bin");

        test_engine()
            .download_file(&url, &dest, Some(&Checksum::sha1(HELLO_SHA1)))
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");
        assert!(!staging_path(&dest).exists());
    }

    #[tokio::test]
    async fn checksum_mismatch_refetches_once_then_fails_clean() {
        let (url, served) = serve(b"hello".to_vec(), 3).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.bin");

        let err = test_engine()
            .download_file(&url, &dest, Some(&Checksum::sha1("00000000")))
            .await
            .unwrap_err();

        assert!(matches!(err, LauncherError::ChecksumMismatch { .. }));
        assert_eq!(served.load(Ordering::SeqCst), 2);
        assert!(!dest.exists());
        assert!(!staging_path(&dest).exists());
    }

    #[tokio::test]
    async fn enqueue_reaches_completed() {
        let (url, _) = serve(b"hello".to_vec(), 1).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.bin");

        let engine = test_engine();
        let id = engine
            .enqueue(DownloadEntry::new(url, &dest).with_sha1(HELLO_SHA1))
            .await;

        let mut status = TransferStatus::Queued;
        for _ in 0..200 {
            if let Some(report) = engine.status(id).await {
                status = report.status;
                if status.is_terminal() {
                    break;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        assert_eq!(status, TransferStatus::Completed);
        assert!(dest.exists());
    }

    #[tokio::test]
    async fn preset_cancel_leaves_no_partial() {
        let (url, _) = serve(b"hello".to_vec(), 1).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.bin");

        let engine = test_engine();
        let cancel = AtomicBool::new(true);
        let err = engine
            .fetch_once(&url, &dest, None, &cancel, None)
            .await
            .unwrap_err();

        assert!(matches!(err, LauncherError::Cancelled));
        assert!(!dest.exists());
        assert!(!staging_path(&dest).exists());
    }

    #[tokio::test]
    async fn cancel_of_unknown_id_is_a_noop() {
        let engine = test_engine();
        engine.cancel(Uuid::new_v4()).await;
        assert!(engine.status(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn run_bounded_caps_in_flight() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = (0..32).map(|_| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        });

        run_bounded(4, tasks).await;
        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn digests_cover_all_algorithms() {
        assert_eq!(hex_digest(ChecksumAlgo::Sha1, b"hello"), HELLO_SHA1);
        assert_eq!(
            hex_digest(ChecksumAlgo::Sha256, b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(
            hex_digest(ChecksumAlgo::Md5, b"hello"),
            "5d41402abc4b2a76b9719d911017c592"
        );
    }

    #[test]
    fn staging_path_appends_part() {
        assert_eq!(
            staging_path(Path::new("/tmp/client.jar")),
            PathBuf::from("/tmp/client.jar.part")
        );
    }
}
