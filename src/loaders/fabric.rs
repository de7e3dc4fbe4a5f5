use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{LauncherError, LauncherResult};
use crate::instance::LoaderType;
use crate::maven::FABRIC_MAVEN;
use crate::version::VersionDescriptor;

use super::context::InstallContext;
use super::installer::{
    canonical_version_id, ensure_client_jar, load_descriptor_value, load_reusable_descriptor,
    persist_descriptor_value, sweep_descriptor_libraries, LoaderInstallOutcome, LoaderInstaller,
};

pub const FABRIC_META_BASE: &str = "https://meta.fabricmc.net/v2";

#[derive(Debug, Deserialize)]
struct LoaderListEntry {
    loader: LoaderBuild,
}

#[derive(Debug, Deserialize)]
struct LoaderBuild {
    version: String,
    #[serde(default)]
    stable: bool,
}

/// First stable build, else the first listed; the meta service orders
/// newest first.
fn pick_loader_build(builds: &[LoaderListEntry]) -> Option<&str> {
    builds
        .iter()
        .find(|b| b.loader.stable)
        .or_else(|| builds.first())
        .map(|b| b.loader.version.as_str())
}

/// Fabric installs come entirely from the meta service: pick a loader
/// build, fetch its launch profile, merge it over the vanilla descriptor.
/// No installer jar is involved.
pub struct FabricInstaller {
    client: reqwest::Client,
    meta_base: String,
}

impl FabricInstaller {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            meta_base: FABRIC_META_BASE.to_string(),
        }
    }

    pub fn with_meta_base(mut self, base: impl Into<String>) -> Self {
        self.meta_base = base.into().trim_end_matches('/').to_string();
        self
    }

    async fn resolve_loader_version(
        &self,
        minecraft_version: &str,
        requested: Option<&str>,
    ) -> LauncherResult<String> {
        if let Some(version) = requested {
            return Ok(version.to_string());
        }

        let url = format!("{}/versions/loader/{}", self.meta_base, minecraft_version);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LauncherError::LoaderApi(format!(
                "Fabric meta returned {status} for {url}"
            )));
        }

        let builds: Vec<LoaderListEntry> = response.json().await?;
        let Some(version) = pick_loader_build(&builds) else {
            return Err(LauncherError::MissingArtifact(format!(
                "no Fabric loader builds published for Minecraft {minecraft_version}"
            )));
        };

        debug!("Picked Fabric loader {} for {}", version, minecraft_version);
        Ok(version.to_string())
    }

    async fn fetch_profile(
        &self,
        minecraft_version: &str,
        loader_version: &str,
    ) -> LauncherResult<serde_json::Value> {
        let url = format!(
            "{}/versions/loader/{}/{}/profile/json",
            self.meta_base, minecraft_version, loader_version
        );
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LauncherError::LoaderApi(format!(
                "Fabric meta returned {status} for {url}"
            )));
        }
        Ok(response.json().await?)
    }
}

#[async_trait::async_trait]
impl LoaderInstaller for FabricInstaller {
    async fn install(&self, ctx: &InstallContext<'_>) -> LauncherResult<LoaderInstallOutcome> {
        ctx.check_cancelled()?;

        let loader_version = self
            .resolve_loader_version(ctx.minecraft_version, ctx.loader_version)
            .await?;
        let version_id =
            canonical_version_id(LoaderType::Fabric, ctx.minecraft_version, &loader_version);

        if let Some(descriptor) = load_reusable_descriptor(ctx.paths, &version_id).await {
            if !ctx.client_jar.exists() {
                let base = ctx.resolver.version_metadata(ctx.minecraft_version).await?;
                ensure_client_jar(ctx, &base).await?;
            }
            let libraries = sweep_descriptor_libraries(
                ctx.engine,
                &ctx.paths.libraries_dir(),
                &descriptor,
                Some(FABRIC_MAVEN),
            )
            .await;
            return Ok(LoaderInstallOutcome {
                version_id,
                loader_version: Some(loader_version),
                descriptor,
                libraries,
            });
        }

        let base = ctx.resolver.version_metadata(ctx.minecraft_version).await?;
        ensure_client_jar(ctx, &base).await?;

        ctx.check_cancelled()?;
        let profile = self
            .fetch_profile(ctx.minecraft_version, &loader_version)
            .await?;
        let base_json = load_descriptor_value(ctx, ctx.minecraft_version).await?;

        let mut merged = VersionDescriptor::merge_with_parent_json(&profile, &base_json);
        if let Some(obj) = merged.as_object_mut() {
            obj.remove("inheritsFrom");
            obj.insert(
                "id".to_string(),
                serde_json::Value::String(version_id.clone()),
            );
        }
        let descriptor = persist_descriptor_value(ctx.paths, &version_id, &merged).await?;

        ctx.check_cancelled()?;
        let libraries = sweep_descriptor_libraries(
            ctx.engine,
            &ctx.paths.libraries_dir(),
            &descriptor,
            Some(FABRIC_MAVEN),
        )
        .await;

        info!(
            "Fabric {} installed for Minecraft {}",
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
