use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{LauncherError, LauncherResult};
use crate::instance::LoaderType;
use crate::java::required_java_for_minecraft_version;
use crate::maven::{newest_with_prefix, MavenArtifact, MavenMetadata, FORGE_MAVEN};
use crate::version::VersionDescriptor;

use super::context::InstallContext;
use super::installer::{
    canonical_version_id, load_reusable_descriptor, normalize_main_class, persist_descriptor_value,
    resolve_descriptor_inheritance, run_external_installer, sweep_descriptor_libraries,
    ExternalInstallerRun, LoaderInstallOutcome, LoaderInstaller, BOOTSTRAP_LAUNCHER_MAIN,
    MODULE_BOOTSTRAP_LIBRARIES,
};
use super::process::{InstallerProcessRunner, JavaProcessRunner};

/// Forge installs in two shapes. Module-era builds (Java 17 and up) have a
/// regular enough published layout to construct the descriptor directly from
/// maven coordinates. Anything older, or a build whose artifacts are not
/// where expected, goes through the vendor's own installer jar.
pub struct ForgeInstaller {
    client: reqwest::Client,
    runner: Arc<dyn InstallerProcessRunner>,
    maven_base: String,
}

impl ForgeInstaller {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            runner: Arc::new(JavaProcessRunner),
            maven_base: FORGE_MAVEN.to_string(),
        }
    }

    pub fn with_maven_base(mut self, base: impl Into<String>) -> Self {
        self.maven_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn InstallerProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Forge publishes builds as `<mc>-<build>`; callers deal only in the
    /// build part.
    async fn resolve_loader_version(
        &self,
        minecraft_version: &str,
        requested: Option<&str>,
    ) -> LauncherResult<String> {
        let prefix = format!("{minecraft_version}-");
        if let Some(version) = requested {
            return Ok(version.strip_prefix(&prefix).unwrap_or(version).to_string());
        }

        let metadata = MavenMetadata::fetch(
            &self.client,
            &self.maven_base,
            "net.minecraftforge",
            "forge",
        )
        .await?;

        match newest_with_prefix(metadata.versions(), &prefix) {
            Some(full) => {
                let build = full[prefix.len()..].to_string();
                debug!("Picked Forge {} for {}", build, minecraft_version);
                Ok(build)
            }
            None => {
                let newest: Vec<&str> = metadata
                    .versions()
                    .iter()
                    .rev()
                    .take(5)
                    .map(String::as_str)
                    .collect();
                Err(LauncherError::MissingArtifact(format!(
                    "no Forge builds for Minecraft {minecraft_version} (newest published: {})",
                    newest.join(", ")
                )))
            }
        }
    }

    /// Synthesize the descriptor from known coordinates. `None` means this
    /// build needs the vendor installer instead.
    async fn construct_direct(
        &self,
        ctx: &InstallContext<'_>,
        loader_version: &str,
        version_id: &str,
    ) -> LauncherResult<Option<VersionDescriptor>> {
        if required_java_for_minecraft_version(ctx.minecraft_version) < 17 {
            debug!(
                "Forge for {} predates the module launcher, deferring to the vendor installer",
                ctx.minecraft_version
            );
            return Ok(None);
        }

        let forge_id = format!("{}-{}", ctx.minecraft_version, loader_version);
        let universal_coord = format!("net.minecraftforge:forge:{forge_id}:universal");
        let universal = MavenArtifact::parse(&universal_coord)?;

        // The universal jar doubles as the sanity probe: if it is not on the
        // vendor maven, the rest of the layout cannot be trusted either.
        let dest = ctx.paths.libraries_dir().join(universal.local_path());
        if let Err(e) = ctx
            .engine
            .download_file(&universal.url(&self.maven_base), &dest, None)
            .await
        {
            debug!(
                "Universal artifact for {} not fetchable ({}), deferring to the vendor installer",
                forge_id, e
            );
            return Ok(None);
        }

        let own = [
            universal_coord,
            format!("net.minecraftforge:fmlloader:{forge_id}"),
            format!("net.minecraftforge:fmlcore:{forge_id}"),
            format!("net.minecraftforge:javafmllanguage:{forge_id}"),
            format!("net.minecraftforge:lowcodelanguage:{forge_id}"),
            format!("net.minecraftforge:mclanguage:{forge_id}"),
        ];
        let libraries: Vec<serde_json::Value> = MODULE_BOOTSTRAP_LIBRARIES
            .iter()
            .map(|coord| serde_json::json!({ "name": coord }))
            .chain(
                own.iter()
                    .map(|coord| serde_json::json!({ "name": coord, "url": self.maven_base })),
            )
            .collect();

        let synthesized = serde_json::json!({
            "id": version_id,
            "inheritsFrom": ctx.minecraft_version,
            "mainClass": BOOTSTRAP_LAUNCHER_MAIN,
            "libraries": libraries,
            "arguments": {
                "game": [
                    "--launchTarget", "forgeclient",
                    "--fml.forgeVersion", loader_version,
                    "--fml.mcVersion", ctx.minecraft_version,
                    "--fml.forgeGroup", "net.minecraftforge"
                ],
                "jvm": []
            }
        });

        let mut merged = resolve_descriptor_inheritance(ctx, synthesized).await?;
        if let Some(obj) = merged.as_object_mut() {
            obj.insert(
                "id".to_string(),
                serde_json::Value::String(version_id.to_string()),
            );
        }
        let descriptor = persist_descriptor_value(ctx.paths, version_id, &merged).await?;

        info!("Constructed Forge {} without the vendor installer", forge_id);
        Ok(Some(descriptor))
    }

    async fn install_via_vendor_installer(
        &self,
        ctx: &InstallContext<'_>,
        loader_version: &str,
        version_id: &str,
    ) -> LauncherResult<VersionDescriptor> {
        let mc = ctx.minecraft_version;
        let forge_id = format!("{mc}-{loader_version}");
        let installer_urls = vec![format!(
            "{}/net/minecraftforge/forge/{forge_id}/forge-{forge_id}-installer.jar",
            self.maven_base
        )];
        let jar_name = format!("forge-{forge_id}-installer.jar");
        let candidates = vec![
            forge_id,
            format!("forge-{mc}-{loader_version}"),
            format!("{mc}-forge-{loader_version}"),
        ];

        let installed = run_external_installer(
            ctx,
            self.runner.as_ref(),
            ExternalInstallerRun {
                vendor: "Forge",
                installer_urls: &installer_urls,
                jar_name: &jar_name,
                descriptor_candidates: &candidates,
            },
        )
        .await?;

        let mut merged = resolve_descriptor_inheritance(ctx, installed).await?;
        normalize_main_class(&mut merged);
        if let Some(obj) = merged.as_object_mut() {
            obj.insert(
                "id".to_string(),
                serde_json::Value::String(version_id.to_string()),
            );
        }
        persist_descriptor_value(ctx.paths, version_id, &merged).await
    }
}

#[async_trait::async_trait]
impl LoaderInstaller for ForgeInstaller {
    async fn install(&self, ctx: &InstallContext<'_>) -> LauncherResult<LoaderInstallOutcome> {
        ctx.check_cancelled()?;

        let loader_version = self
            .resolve_loader_version(ctx.minecraft_version, ctx.loader_version)
            .await?;
        let version_id =
            canonical_version_id(LoaderType::Forge, ctx.minecraft_version, &loader_version);

        let descriptor = match load_reusable_descriptor(ctx.paths, &version_id).await {
            Some(descriptor) => descriptor,
            None => {
                // Both install paths merge over the vanilla parent.
                ctx.resolver.version_metadata(ctx.minecraft_version).await?;
                ctx.check_cancelled()?;

                match self
                    .construct_direct(ctx, &loader_version, &version_id)
                    .await?
                {
                    Some(descriptor) => descriptor,
                    None => {
                        self.install_via_vendor_installer(ctx, &loader_version, &version_id)
                            .await?
                    }
                }
            }
        };

        ctx.check_cancelled()?;
        let libraries = sweep_descriptor_libraries(
            ctx.engine,
            &ctx.paths.libraries_dir(),
            &descriptor,
            Some(&self.maven_base),
        )
        .await;

        info!(
            "Forge {} installed for Minecraft {}",
            loader_version, ctx.minecraft_version
        );
        Ok(LoaderInstallOutcome {
            version_id,
            loader_version: Some(loader_version),
            descriptor,
            libraries,
        })
    }
}
