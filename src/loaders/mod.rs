// ─── Mod Loader Installers ───
// One installer per supported loader behind a closed dispatch enum, plus the
// shared machinery: descriptor merging over the vanilla parent, the external
// installer process port, and the final library sweep.

pub mod context;
pub mod fabric;
pub mod forge;
pub mod installer;
pub mod neoforge;
pub mod process;
pub mod quilt;
pub mod vanilla;

pub use context::InstallContext;
pub use installer::{
    Installer, LibrarySweepReport, LoaderInstallOutcome, LoaderInstaller, BOOTSTRAP_LAUNCHER_MAIN,
};
pub use process::{InstallerProcessRunner, JavaProcessRunner, ProcessOutput};
