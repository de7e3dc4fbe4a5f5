// ─── Integrity Verification ───
// Final readiness gate of the install pipeline. Nothing launches until an
// instance passes here.

use tracing::info;

use crate::error::{LauncherError, LauncherResult};
use crate::instance::{Instance, InstanceState, InstanceStore, LoaderType};
use crate::loaders::installer::canonical_version_id;
use crate::paths::DataPaths;
use crate::version::VersionDescriptor;

/// Real client archives are tens of megabytes; anything under this is a
/// truncated download or an error page that got saved to disk.
const MIN_CLIENT_JAR_BYTES: u64 = 1024 * 1024;

/// Check that an installed instance has what its loader needs to launch,
/// create any missing auxiliary folders, then mark it ready and persist.
///
/// Forge and NeoForge boot through the module launcher and never keep a
/// client archive in the instance directory, so for them the gate is a
/// launchable resolved descriptor instead of the jar-size floor.
pub async fn verify_instance(
    store: &InstanceStore,
    paths: &DataPaths,
    instance: &mut Instance,
) -> LauncherResult<()> {
    store.ensure_structure(instance).await?;

    match instance.loader {
        LoaderType::Vanilla | LoaderType::Fabric | LoaderType::Quilt => {
            verify_client_jar(instance).await?;
        }
        LoaderType::Forge | LoaderType::NeoForge => {
            verify_resolved_descriptor(paths, instance).await?;
        }
    }

    store.set_state(instance, InstanceState::Ready).await?;
    info!("Instance {} passed integrity verification", instance.id);
    Ok(())
}

async fn verify_client_jar(instance: &Instance) -> LauncherResult<()> {
    let jar = instance.client_jar_path();
    let metadata = tokio::fs::metadata(&jar).await.map_err(|_| {
        LauncherError::Integrity(format!("client jar missing at {}", jar.display()))
    })?;

    if metadata.len() < MIN_CLIENT_JAR_BYTES {
        return Err(LauncherError::Integrity(format!(
            "client jar at {} is {} bytes, below the {} byte plausibility floor",
            jar.display(),
            metadata.len(),
            MIN_CLIENT_JAR_BYTES
        )));
    }
    Ok(())
}

async fn verify_resolved_descriptor(
    paths: &DataPaths,
    instance: &Instance,
) -> LauncherResult<()> {
    let Some(loader_version) = instance.loader_version.as_deref() else {
        return Err(LauncherError::Integrity(format!(
            "no {} build recorded for instance {}",
            instance.loader, instance.id
        )));
    };

    let version_id =
        canonical_version_id(instance.loader, &instance.minecraft_version, loader_version);
    let path = paths.version_descriptor(&version_id);
    if !path.exists() {
        return Err(LauncherError::Integrity(format!(
            "resolved descriptor {} missing from the version store",
            version_id
        )));
    }

    let descriptor = VersionDescriptor::load(&path).await.map_err(|e| {
        LauncherError::Integrity(format!("resolved descriptor {} unreadable: {}", version_id, e))
    })?;

    if !descriptor.is_launchable() {
        return Err(LauncherError::Integrity(format!(
            "resolved descriptor {} has no main class or no libraries",
            version_id
        )));
    }
    Ok(())
}
