//! Shared helpers for colocated tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::downloader::DownloadEngine;
use crate::error::LauncherResult;
use crate::http::build_http_client;
use crate::loaders::{InstallContext, InstallerProcessRunner, ProcessOutput};
use crate::paths::DataPaths;
use crate::version::VersionResolver;

/// Minimal canned-response HTTP server on the loopback interface.
///
/// Answers up to `max_requests` connections with the same 200 body and
/// counts how many it actually served.
pub(crate) async fn serve(body: Vec<u8>, max_requests: usize) -> (String, Arc<AtomicUsize>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let served = Arc::new(AtomicUsize::new(0));
    let counter = served.clone();

    tokio::spawn(async move {
        for _ in 0..max_requests {
            let Ok((mut sock, _)) = listener.accept().await else {
                break;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            let mut buf = [0u8; 4096];
            let _ = sock.read(&mut buf).await;
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = sock.write_all(head.as_bytes()).await;
            let _ = sock.write_all(&body).await;
            let _ = sock.shutdown().await;
        }
    });

    (format!("http://{}/resource", addr), served)
}

/// A loopback URL that refuses connections (the port was bound once and
/// released, so nothing listens there).
pub(crate) async fn refused_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/unreachable", addr)
}

/// Everything a loader install borrows, rooted in a throwaway directory.
/// The manifest URL points at a dead loopback port so any test that was not
/// supposed to touch the version catalog fails loudly.
pub(crate) struct InstallFixture {
    pub dir: tempfile::TempDir,
    pub paths: DataPaths,
    pub client: reqwest::Client,
    pub engine: DownloadEngine,
    pub resolver: VersionResolver,
    pub cancel: AtomicBool,
    pub client_jar: PathBuf,
    /// Set by tests that exercise external installer fallbacks.
    pub java_bin: Option<PathBuf>,
}

impl InstallFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::at(dir.path()).unwrap();
        let client = build_http_client().unwrap();
        let engine = DownloadEngine::new(client.clone());
        let resolver = VersionResolver::new(client.clone(), paths.clone())
            .with_manifest_url("http://127.0.0.1:9/version_manifest_v2.json");
        let client_jar = dir.path().join("instance/minecraft/client.jar");

        Self {
            dir,
            paths,
            client,
            engine,
            resolver,
            cancel: AtomicBool::new(false),
            client_jar,
            java_bin: None,
        }
    }

    pub fn ctx<'a>(
        &'a self,
        minecraft_version: &'a str,
        loader_version: Option<&'a str>,
    ) -> InstallContext<'a> {
        InstallContext {
            minecraft_version,
            loader_version,
            client_jar: &self.client_jar,
            paths: &self.paths,
            engine: &self.engine,
            resolver: &self.resolver,
            client: &self.client,
            java_bin: self.java_bin.as_deref(),
            cancel: &self.cancel,
        }
    }

    /// Drop a pre-made descriptor into the version store.
    pub fn write_descriptor(&self, version_id: &str, descriptor: &serde_json::Value) {
        let path = self.paths.version_descriptor(version_id);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, serde_json::to_string_pretty(descriptor).unwrap()).unwrap();
    }

    /// Put a file into the shared library store at a maven-layout path.
    pub fn write_library(&self, rel_path: &str, bytes: &[u8]) {
        let path = self.paths.libraries_dir().join(rel_path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, bytes).unwrap();
    }

    /// Pretend the client archive was already downloaded.
    pub fn write_client_jar(&self) {
        std::fs::create_dir_all(self.client_jar.parent().unwrap()).unwrap();
        std::fs::write(&self.client_jar, b"client-bytes").unwrap();
    }
}

/// Installer process stand-in that runs a closure instead of spawning Java.
pub(crate) struct ScriptedInstallerRun<F> {
    script: F,
    pub invocations: AtomicUsize,
}

impl<F> ScriptedInstallerRun<F>
where
    F: Fn(&Path, &[String], &Path) -> LauncherResult<ProcessOutput> + Send + Sync,
{
    pub fn new(script: F) -> Self {
        Self {
            script,
            invocations: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl<F> InstallerProcessRunner for ScriptedInstallerRun<F>
where
    F: Fn(&Path, &[String], &Path) -> LauncherResult<ProcessOutput> + Send + Sync,
{
    async fn run(
        &self,
        java_bin: &Path,
        args: &[String],
        working_dir: &Path,
    ) -> LauncherResult<ProcessOutput> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        (self.script)(java_bin, args, working_dir)
    }
}
