//! Headless Minecraft instance provisioning and launch engine.
//!
//! The crate owns a shared data directory (version descriptors, the library
//! and asset stores, managed Java runtimes) plus per-instance directories,
//! and drives the whole install pipeline: resolve version metadata, fetch
//! the Java runtime, install the chosen mod loader, synchronize assets,
//! verify the result, and finally launch it.

pub mod assets;
pub mod downloader;
pub mod error;
pub mod http;
pub mod instance;
pub mod java;
pub mod launch;
pub mod loaders;
pub mod maven;
pub mod orchestrator;
pub mod paths;
pub mod state;
pub mod verify;
pub mod version;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{LauncherError, LauncherResult};
pub use instance::{Instance, InstanceState, LoaderType};
pub use launch::PlayerIdentity;
pub use orchestrator::{
    CreateInstanceRequest, InstallPhase, Launcher, ProgressCallback, ProgressEvent,
};
pub use paths::DataPaths;

use tracing_subscriber::EnvFilter;

/// Install a process-wide tracing subscriber reading `RUST_LOG`, with a sane
/// default when the variable is unset. Embedders with their own subscriber
/// skip this.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,basalt_core=debug")),
        )
        .init();
}
