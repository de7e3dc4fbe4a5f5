use tracing::info;

use crate::error::LauncherResult;

use super::context::InstallContext;
use super::installer::{
    ensure_client_jar, sweep_descriptor_libraries, LoaderInstallOutcome, LoaderInstaller,
};

/// Plain Minecraft: resolve the version descriptor, fetch the client
/// archive, fill the library store. The descriptor is the upstream one,
/// persisted by the resolver under `versions/<mc>/`.
#[derive(Default)]
pub struct VanillaInstaller;

impl VanillaInstaller {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl LoaderInstaller for VanillaInstaller {
    async fn install(&self, ctx: &InstallContext<'_>) -> LauncherResult<LoaderInstallOutcome> {
        ctx.check_cancelled()?;

        let descriptor = ctx.resolver.version_metadata(ctx.minecraft_version).await?;

        ctx.check_cancelled()?;
        ensure_client_jar(ctx, &descriptor).await?;

        ctx.check_cancelled()?;
        let libraries = sweep_descriptor_libraries(
            ctx.engine,
            &ctx.paths.libraries_dir(),
            &descriptor,
            None,
        )
        .await;

        info!("Vanilla {} ready", ctx.minecraft_version);
        Ok(LoaderInstallOutcome {
            version_id: ctx.minecraft_version.to_string(),
            loader_version: None,
            descriptor,
            libraries,
        })
    }
}
