// ─── Launch Task ───
// Composes the full java invocation and spawns the game process.

use std::path::Path;
use std::process::Stdio;

use tracing::{debug, info};

use crate::error::{LauncherError, LauncherResult};
use crate::instance::{Instance, LoaderType};
use crate::java;
use crate::paths::DataPaths;

use super::classpath::{classpath_separator, safe_path_str};
use super::identity::PlayerIdentity;

/// Value substituted for `${launcher_name}` and reported to the game.
pub const LAUNCHER_BRAND: &str = "basalt";

const MIN_INITIAL_HEAP_MB: u32 = 512;

/// `-Xms` derivation: a quarter of the maximum, floored at 512 MiB, never
/// above the maximum itself.
pub fn initial_heap_mb(max_memory_mb: u32) -> u32 {
    (max_memory_mb / 4)
        .max(MIN_INITIAL_HEAP_MB)
        .min(max_memory_mb)
}

/// Spawn the game. Returns right after a successful spawn; the orchestrator
/// monitors the child and restores instance state when it exits.
pub async fn launch(
    instance: &Instance,
    identity: &PlayerIdentity,
    classpath: &str,
    paths: &DataPaths,
    java_bin: &Path,
) -> LauncherResult<tokio::process::Child> {
    if instance.main_class.is_none() {
        return Err(LauncherError::Integrity(
            "main class not set on instance".into(),
        ));
    }
    if classpath.trim().is_empty() {
        return Err(LauncherError::Integrity(
            "refusing to launch with an empty classpath".into(),
        ));
    }

    let identity = identity.clone().sanitized();
    let argv = compose_arguments(instance, &identity, classpath, paths);

    let mut cmd = tokio::process::Command::new(java_bin);
    cmd.args(&argv);
    cmd.current_dir(instance.game_dir());
    native_library_env(&mut cmd, &instance.natives_dir());
    platform_spawn_tweaks(&mut cmd);
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    info!("Launching {} with {:?}", instance.id, java_bin);
    debug!("Command: {}", loggable_command(&cmd));

    cmd.spawn()
        .map_err(|e| LauncherError::JavaExecution(format!("spawn failed: {e}")))
}

/// Every argument after the java binary, in order: memory and property
/// flags, profile JVM args, `-cp`, the main class, then game arguments.
pub fn compose_arguments(
    instance: &Instance,
    identity: &PlayerIdentity,
    classpath: &str,
    paths: &DataPaths,
) -> Vec<String> {
    let natives_dir = instance.natives_dir();
    let game_dir = instance.game_dir();
    let assets_dir = paths.assets_dir();
    let libraries_dir = paths.libraries_dir();

    let mut argv = Vec::new();

    argv.push(format!("-Xmx{}M", instance.max_memory_mb));
    argv.push(format!("-Xms{}M", initial_heap_mb(instance.max_memory_mb)));
    argv.push(format!(
        "-Djava.library.path={}",
        safe_path_str(&natives_dir)
    ));
    argv.push(format!(
        "-DlibraryDirectory={}",
        safe_path_str(&libraries_dir)
    ));
    argv.push(format!("-Dminecraft.launcher.brand={}", LAUNCHER_BRAND));
    argv.push(format!(
        "-Dminecraft.launcher.version={}",
        env!("CARGO_PKG_VERSION")
    ));

    let mut jvm = render_jvm_args(instance, &natives_dir, &libraries_dir, classpath);
    apply_module_launcher_flags(instance, &mut jvm);
    argv.extend(jvm);

    argv.push("-cp".into());
    argv.push(classpath.to_string());
    if let Some(main_class) = instance.main_class.as_deref() {
        argv.push(main_class.to_string());
    }

    argv.extend(render_game_args(instance, identity, &game_dir, &assets_dir));
    argv
}

/// Profile JVM args with placeholders substituted. Classpath switches are
/// dropped with their value since the engine injects `-cp` itself, and an
/// arg left holding an unresolved placeholder is dropped together with the
/// flag before it.
fn render_jvm_args(
    instance: &Instance,
    natives_dir: &Path,
    libraries_dir: &Path,
    classpath: &str,
) -> Vec<String> {
    let natives = safe_path_str(natives_dir);
    let libraries = safe_path_str(libraries_dir);
    let game_dir = safe_path_str(&instance.game_dir());
    let version_name = launch_version_name(instance);
    let loader_version = instance.loader_version.as_deref().unwrap_or("");

    let mut rendered = Vec::new();
    let mut i = 0;
    while i < instance.jvm_args.len() {
        let arg = &instance.jvm_args[i];

        if arg == "-cp" || arg == "-classpath" || arg == "--class-path" {
            i += 2;
            continue;
        }

        let resolved = arg
            .replace("${natives_directory}", &natives)
            .replace("${library_directory}", &libraries)
            .replace("${classpath}", classpath)
            .replace("${classpath_separator}", classpath_separator())
            .replace("${game_directory}", &game_dir)
            .replace("${version_name}", &version_name)
            .replace("${version}", loader_version)
            .replace("${mc_version}", &instance.minecraft_version)
            .replace("${launcher_name}", LAUNCHER_BRAND)
            .replace("${launcher_version}", env!("CARGO_PKG_VERSION"));

        if resolved.contains("${") {
            drop_dangling_flag(&mut rendered);
            i += 1;
            continue;
        }

        rendered.push(resolved);
        i += 1;
    }

    rendered
}

fn render_game_args(
    instance: &Instance,
    identity: &PlayerIdentity,
    game_dir: &Path,
    assets_dir: &Path,
) -> Vec<String> {
    let game_dir = safe_path_str(game_dir);
    let assets_dir = safe_path_str(assets_dir);
    let version_name = launch_version_name(instance);
    let loader_version = instance.loader_version.as_deref().unwrap_or("");

    let mut rendered = Vec::new();
    let mut i = 0;
    while i < instance.game_args.len() {
        let arg = &instance.game_args[i];

        let resolved = arg
            .replace("${auth_player_name}", &identity.username)
            .replace("${version_name}", &version_name)
            .replace("${version}", loader_version)
            .replace("${mc_version}", &instance.minecraft_version)
            .replace("${game_directory}", &game_dir)
            .replace("${assets_root}", &assets_dir)
            .replace(
                "${assets_index_name}",
                instance.asset_index.as_deref().unwrap_or("legacy"),
            )
            .replace("${auth_uuid}", &identity.uuid)
            .replace("${auth_access_token}", &identity.access_token)
            .replace("${auth_xuid}", &identity.xuid)
            .replace("${clientid}", &identity.client_id)
            .replace("${user_properties}", "{}")
            .replace("${user_type}", &identity.user_type)
            .replace("${version_type}", "release");

        if resolved.contains("${") {
            drop_dangling_flag(&mut rendered);
            i += 1;
            continue;
        }

        rendered.push(resolved);
        i += 1;
    }

    let rendered = validate_window_args(rendered);
    inject_required_fml_args(instance, rendered)
}

/// Forge/NeoForge refuse to boot without their version flags; profiles
/// produced by older installers sometimes omit them.
fn inject_required_fml_args(instance: &Instance, mut args: Vec<String>) -> Vec<String> {
    if !instance.loader.uses_module_launcher() {
        return args;
    }

    if !contains_flag(&args, "--fml.mcVersion") {
        args.push("--fml.mcVersion".into());
        args.push(instance.minecraft_version.clone());
    }

    let Some(loader_version) = instance.loader_version.as_deref() else {
        return args;
    };
    if loader_version.trim().is_empty() {
        return args;
    }

    match instance.loader {
        LoaderType::Forge => {
            if !contains_flag(&args, "--fml.forgeVersion") {
                args.push("--fml.forgeVersion".into());
                args.push(loader_version.to_string());
            }
        }
        LoaderType::NeoForge => {
            if !contains_flag(&args, "--fml.neoForgeVersion") {
                args.push("--fml.neoForgeVersion".into());
                args.push(loader_version.to_string());
            }
        }
        _ => {}
    }

    args
}

fn contains_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|arg| arg == flag)
}

/// `--width`/`--height` whose value is absent or non-numeric would crash the
/// game's option parser; drop the pair instead.
fn validate_window_args(args: Vec<String>) -> Vec<String> {
    let mut validated = Vec::with_capacity(args.len());
    let mut i = 0;

    while i < args.len() {
        let arg = &args[i];
        if arg == "--width" || arg == "--height" {
            let Some(value) = args.get(i + 1) else {
                i += 1;
                continue;
            };

            if value.starts_with('-') || value.parse::<u32>().is_err() {
                i += 1;
                continue;
            }

            validated.push(arg.clone());
            validated.push(value.clone());
            i += 2;
            continue;
        }

        validated.push(arg.clone());
        i += 1;
    }

    validated
}

fn launch_version_name(instance: &Instance) -> String {
    match instance.loader_version.as_deref() {
        Some(loader_version) if !loader_version.trim().is_empty() => {
            format!("{}-{}", instance.minecraft_version, loader_version)
        }
        _ => instance.minecraft_version.clone(),
    }
}

fn drop_dangling_flag(args: &mut Vec<String>) {
    if args.last().is_some_and(|last| last.starts_with('-')) {
        let _ = args.pop();
    }
}

/// Module-opening flags the module-launcher loaders need on Java 17+, plus
/// NeoForge's extra module and early-display properties.
fn apply_module_launcher_flags(instance: &Instance, args: &mut Vec<String>) {
    if !instance.loader.uses_module_launcher() {
        return;
    }

    if java::required_java_for_minecraft_version(&instance.minecraft_version) >= 17 {
        for (flag, value) in MODULE_OPENING_FLAGS {
            push_flag_pair(args, flag, value);
        }
    }

    if !matches!(instance.loader, LoaderType::NeoForge) {
        return;
    }

    push_flag(args, "--add-modules=jdk.naming.dns");
    push_flag(args, "--add-opens=java.base/java.util.jar=ALL-UNNAMED");
    set_system_property(args, "ignoreList", "bootstraplauncher,neon-fml");

    // The early-display window crashes on some GPU setups before LWJGL gets
    // a chance to create the real one; force the normal init path. Both
    // property namespaces appear in the wild.
    set_system_property(args, "fml.earlyprogresswindow", "false");
    set_system_property(args, "forge.earlywindow", "false");
    set_system_property(args, "neoforge.earlydisplay", "false");
}

const MODULE_OPENING_FLAGS: [(&str, &str); 12] = [
    ("--add-modules", "ALL-SYSTEM"),
    ("--add-opens", "java.base/java.util.jar=ALL-UNNAMED"),
    ("--add-opens", "java.base/java.lang=ALL-UNNAMED"),
    ("--add-opens", "java.base/java.util=ALL-UNNAMED"),
    ("--add-opens", "java.base/java.lang.invoke=ALL-UNNAMED"),
    ("--add-opens", "java.base/java.lang.reflect=ALL-UNNAMED"),
    ("--add-opens", "java.base/java.nio.file=ALL-UNNAMED"),
    ("--add-opens", "java.base/sun.security.util=ALL-UNNAMED"),
    ("--add-exports", "java.base/sun.security.action=ALL-UNNAMED"),
    ("--add-opens", "java.base/java.io=ALL-UNNAMED"),
    ("--add-opens", "java.base/java.net=ALL-UNNAMED"),
    ("--add-opens", "java.base/sun.nio.ch=ALL-UNNAMED"),
];

fn push_flag_pair(args: &mut Vec<String>, flag: &str, value: &str) {
    let combined = format!("{}={}", flag, value);
    if args.iter().any(|arg| arg == &combined) {
        return;
    }
    let mut i = 0;
    while i + 1 < args.len() {
        if args[i] == flag && args[i + 1] == value {
            return;
        }
        i += 1;
    }
    args.push(flag.to_string());
    args.push(value.to_string());
}

fn push_flag(args: &mut Vec<String>, flag_with_value: &str) {
    if args.iter().any(|arg| arg == flag_with_value) {
        return;
    }
    args.push(flag_with_value.to_string());
}

fn set_system_property(args: &mut Vec<String>, property: &str, value: &str) {
    let prefix = format!("-D{}=", property);
    args.retain(|arg| !arg.starts_with(&prefix));
    args.push(format!("{}{}", prefix, value));
}

fn native_library_env(cmd: &mut tokio::process::Command, natives_dir: &Path) {
    let native_path = safe_path_str(natives_dir);

    if cfg!(target_os = "windows") {
        cmd.env("PATH", prepend_env_path("PATH", &native_path));
    } else if cfg!(target_os = "macos") {
        cmd.env(
            "DYLD_LIBRARY_PATH",
            prepend_env_path("DYLD_LIBRARY_PATH", &native_path),
        );
    } else {
        cmd.env(
            "LD_LIBRARY_PATH",
            prepend_env_path("LD_LIBRARY_PATH", &native_path),
        );
    }
}

fn prepend_env_path(var_name: &str, value: &str) -> String {
    let separator = if cfg!(target_os = "windows") {
        ";"
    } else {
        ":"
    };
    match std::env::var(var_name) {
        Ok(existing) if !existing.trim().is_empty() => {
            format!("{}{}{}", value, separator, existing)
        }
        _ => value.to_string(),
    }
}

fn platform_spawn_tweaks(cmd: &mut tokio::process::Command) {
    #[cfg(windows)]
    {
        const CREATE_NEW_CONSOLE: u32 = 0x00000010;
        cmd.creation_flags(CREATE_NEW_CONSOLE);

        // Terminal session vars make Java/LWJGL treat the child as a virtual
        // terminal; keep its environment close to a desktop launch.
        cmd.env_remove("WT_SESSION");
        cmd.env_remove("TERM");
        cmd.env_remove("ConEmuANSI");
    }
    #[cfg(not(windows))]
    {
        let _ = cmd;
    }
}

fn loggable_command(cmd: &tokio::process::Command) -> String {
    let std_cmd = cmd.as_std();
    let program = shell_escape(&std_cmd.get_program().to_string_lossy());
    let args = std_cmd
        .get_args()
        .map(|arg| shell_escape(&arg.to_string_lossy()))
        .collect::<Vec<_>>()
        .join(" ");

    if args.is_empty() {
        program
    } else {
        format!("{} {}", program, args)
    }
}

fn shell_escape(raw: &str) -> String {
    if raw.is_empty() {
        return "\"\"".to_string();
    }

    if raw.chars().all(|ch| {
        ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '/' | ':' | '\\' | '=')
    }) {
        return raw.to_string();
    }

    format!("\"{}\"", raw.replace('"', "\\\""))
}
