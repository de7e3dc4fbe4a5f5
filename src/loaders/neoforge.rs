use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{LauncherError, LauncherResult};
use crate::instance::LoaderType;
use crate::maven::{newest_with_prefix, MavenArtifact, MavenMetadata, NEOFORGE_MAVEN};
use crate::version::VersionDescriptor;

use super::context::InstallContext;
use super::installer::{
    canonical_version_id, load_reusable_descriptor, normalize_main_class, persist_descriptor_value,
    resolve_descriptor_inheritance, run_external_installer, sweep_descriptor_libraries,
    ExternalInstallerRun, LoaderInstallOutcome, LoaderInstaller, BOOTSTRAP_LAUNCHER_MAIN,
    MODULE_BOOTSTRAP_LIBRARIES,
};
use super::process::{InstallerProcessRunner, JavaProcessRunner};

/// The one game version NeoForge shipped under Forge's `<mc>-<build>`
/// version scheme before adopting its own.
const LEGACY_GAME_VERSION: &str = "1.20.1";

/// NeoForge build numbers encode the game version: `20.4.237` belongs to
/// Minecraft 1.20.4, `21.0.x` to 1.21.
fn neoforge_version_prefix(minecraft_version: &str) -> String {
    let mut parts = minecraft_version.split('.');
    let _ = parts.next();
    let minor = parts.next().unwrap_or("0");
    let patch = parts.next().unwrap_or("0");
    format!("{minor}.{patch}.")
}

/// NeoForge mirrors Forge's install shapes: direct descriptor construction
/// for its own releases, the vendor installer for the legacy 1.20.1 line.
pub struct NeoForgeInstaller {
    client: reqwest::Client,
    runner: Arc<dyn InstallerProcessRunner>,
    maven_base: String,
}

impl NeoForgeInstaller {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            runner: Arc::new(JavaProcessRunner),
            maven_base: NEOFORGE_MAVEN.to_string(),
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

    async fn resolve_loader_version(
        &self,
        minecraft_version: &str,
        requested: Option<&str>,
    ) -> LauncherResult<String> {
        if let Some(version) = requested {
            return Ok(version.to_string());
        }

        if minecraft_version == LEGACY_GAME_VERSION {
            let metadata =
                MavenMetadata::fetch(&self.client, &self.maven_base, "net.neoforged", "forge")
                    .await?;
            let prefix = format!("{minecraft_version}-");
            return match newest_with_prefix(metadata.versions(), &prefix) {
                Some(full) => {
                    let build = full[prefix.len()..].to_string();
                    debug!("Picked legacy NeoForge {} for {}", build, minecraft_version);
                    Ok(build)
                }
                None => Err(LauncherError::MissingArtifact(format!(
                    "no NeoForge builds for Minecraft {minecraft_version}"
                ))),
            };
        }

        let metadata =
            MavenMetadata::fetch(&self.client, &self.maven_base, "net.neoforged", "neoforge")
                .await?;
        let prefix = neoforge_version_prefix(minecraft_version);
        match newest_with_prefix(metadata.versions(), &prefix) {
            Some(version) => {
                debug!("Picked NeoForge {} for {}", version, minecraft_version);
                Ok(version)
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
                    "no NeoForge builds for Minecraft {minecraft_version} (newest published: {})",
                    newest.join(", ")
                )))
            }
        }
    }

    async fn construct_direct(
        &self,
        ctx: &InstallContext<'_>,
        loader_version: &str,
        version_id: &str,
    ) -> LauncherResult<Option<VersionDescriptor>> {
        if ctx.minecraft_version == LEGACY_GAME_VERSION {
            debug!("Legacy NeoForge line, deferring to the vendor installer");
            return Ok(None);
        }

        let universal_coord = format!("net.neoforged:neoforge:{loader_version}:universal");
        let universal = MavenArtifact::parse(&universal_coord)?;

        let dest = ctx.paths.libraries_dir().join(universal.local_path());
        if let Err(e) = ctx
            .engine
            .download_file(&universal.url(&self.maven_base), &dest, None)
            .await
        {
            debug!(
                "Universal artifact for NeoForge {} not fetchable ({}), deferring to the vendor installer",
                loader_version, e
            );
            return Ok(None);
        }

        let libraries: Vec<serde_json::Value> = MODULE_BOOTSTRAP_LIBRARIES
            .iter()
            .map(|coord| serde_json::json!({ "name": coord }))
            .chain(std::iter::once(
                serde_json::json!({ "name": universal_coord, "url": self.maven_base }),
            ))
            .collect();

        let synthesized = serde_json::json!({
            "id": version_id,
            "inheritsFrom": ctx.minecraft_version,
            "mainClass": BOOTSTRAP_LAUNCHER_MAIN,
            "libraries": libraries,
            "arguments": {
                "game": [
                    "--launchTarget", "forgeclient",
                    "--fml.neoForgeVersion", loader_version,
                    "--fml.mcVersion", ctx.minecraft_version
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

        info!(
            "Constructed NeoForge {} without the vendor installer",
            loader_version
        );
        Ok(Some(descriptor))
    }

    async fn install_via_vendor_installer(
        &self,
        ctx: &InstallContext<'_>,
        loader_version: &str,
        version_id: &str,
    ) -> LauncherResult<VersionDescriptor> {
        let mc = ctx.minecraft_version;
        let legacy = mc == LEGACY_GAME_VERSION;

        let installer_urls = if legacy {
            vec![format!(
                "{}/net/neoforged/forge/{mc}-{loader_version}/forge-{mc}-{loader_version}-installer.jar",
                self.maven_base
            )]
        } else {
            vec![
                format!(
                    "{}/net/neoforged/neoforge/{loader_version}/neoforge-{loader_version}-installer.jar",
                    self.maven_base
                ),
                format!(
                    "{}/net/neoforged/forge/{loader_version}/forge-{loader_version}-installer.jar",
                    self.maven_base
                ),
            ]
        };
        let jar_name = format!("neoforge-{loader_version}-installer.jar");

        let mut candidates = vec![
            format!("neoforge-{loader_version}"),
            format!("{mc}-neoforge-{loader_version}"),
        ];
        if legacy {
            candidates.push(format!("{mc}-{loader_version}"));
            candidates.push(format!("forge-{mc}-{loader_version}"));
            candidates.push(format!("{mc}-forge-{loader_version}"));
        }

        let installed = run_external_installer(
            ctx,
            self.runner.as_ref(),
            ExternalInstallerRun {
                vendor: "NeoForge",
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
impl LoaderInstaller for NeoForgeInstaller {
    async fn install(&self, ctx: &InstallContext<'_>) -> LauncherResult<LoaderInstallOutcome> {
        ctx.check_cancelled()?;

        let loader_version = self
            .resolve_loader_version(ctx.minecraft_version, ctx.loader_version)
            .await?;
        let version_id =
            canonical_version_id(LoaderType::NeoForge, ctx.minecraft_version, &loader_version);

        let descriptor = match load_reusable_descriptor(ctx.paths, &version_id).await {
            Some(descriptor) => descriptor,
            None => {
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
            "NeoForge {} installed for Minecraft {}",
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{InstallFixture, ScriptedInstallerRun};
    use std::sync::atomic::Ordering;

    #[test]
    fn build_prefix_tracks_the_game_version() {
        assert_eq!(neoforge_version_prefix("1.20.4"), "20.4.");
        assert_eq!(neoforge_version_prefix("1.21"), "21.0.");
        assert_eq!(neoforge_version_prefix("1.21.4"), "21.4.");
    }

    #[tokio::test]
    async fn auto_pick_stays_on_the_requested_game_version() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata>
  <groupId>net.neoforged</groupId>
  <artifactId>neoforge</artifactId>
  <versioning>
    <versions>
      <version>20.4.80</version>
      <version>20.4.237</version>
      <version>20.6.119</version>
      <version>21.0.143</version>
    </versions>
  </versioning>
</metadata>"#;
        let (url, _served) = crate::testutil::serve(xml.as_bytes().to_vec(), 1).await;
        let installer = NeoForgeInstaller::new(crate::http::build_http_client().unwrap())
            .with_maven_base(url.trim_end_matches("/resource"));

        let build = installer.resolve_loader_version("1.20.4", None).await.unwrap();
        assert_eq!(build, "20.4.237");
    }

    #[tokio::test]
    async fn legacy_line_resolves_from_the_forge_scheme() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata>
  <groupId>net.neoforged</groupId>
  <artifactId>forge</artifactId>
  <versioning>
    <versions>
      <version>1.20.1-47.1.84</version>
      <version>1.20.1-47.1.106</version>
    </versions>
  </versioning>
</metadata>"#;
        let (url, _served) = crate::testutil::serve(xml.as_bytes().to_vec(), 1).await;
        let installer = NeoForgeInstaller::new(crate::http::build_http_client().unwrap())
            .with_maven_base(url.trim_end_matches("/resource"));

        let build = installer.resolve_loader_version("1.20.1", None).await.unwrap();
        assert_eq!(build, "47.1.106");
    }

    #[tokio::test]
    async fn modern_build_constructs_directly_with_a_single_own_artifact() {
        let fixture = InstallFixture::new();
        fixture.write_descriptor(
            "1.20.4",
            &serde_json::json!({
                "id": "1.20.4",
                "mainClass": "net.minecraft.client.main.Main",
                "libraries": [{
                    "name": "com.mojang:base:1.0",
                    "downloads": {"artifact": {
                        "path": "com/mojang/base/1.0/base-1.0.jar",
                        "sha1": "0000000000000000000000000000000000000000",
                        "size": 3,
                        "url": "https://example.invalid/base-1.0.jar"
                    }}
                }]
            }),
        );
        fixture.write_library("com/mojang/base/1.0/base-1.0.jar", b"jar");

        let (url, served) = crate::testutil::serve(b"universal-jar".to_vec(), 12).await;

        let runner = Arc::new(ScriptedInstallerRun::new(|_java, _args, _cwd| {
            Err(LauncherError::Other("installer must not run".to_string()))
        }));
        let installer = NeoForgeInstaller::new(fixture.client.clone())
            .with_maven_base(url.trim_end_matches("/resource"))
            .with_runner(runner.clone());

        let ctx = fixture.ctx("1.20.4", Some("20.4.237"));
        let outcome = installer.install(&ctx).await.unwrap();

        assert_eq!(outcome.version_id, "1.20.4-neoforge-20.4.237");
        assert_eq!(outcome.descriptor.main_class, BOOTSTRAP_LAUNCHER_MAIN);
        assert_eq!(runner.invocations.load(Ordering::SeqCst), 0);

        // Bootstrap set, the universal artifact, the vanilla parent's one.
        assert_eq!(outcome.descriptor.libraries.len(), 10);
        assert_eq!(outcome.libraries.failed, 0);

        // Universal probe plus eight bootstrap fetches.
        assert_eq!(served.load(Ordering::SeqCst), 9);
    }
}
