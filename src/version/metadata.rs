// ─── Version Metadata ───
// Parses a version descriptor (Mojang version JSON shape) and evaluates the
// OS rules that gate libraries and arguments.

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::downloader::DownloadEntry;
use crate::error::{LauncherError, LauncherResult};

/// A fully parsed version descriptor.
///
/// Vanilla metadata, Fabric/Quilt profiles and Forge/NeoForge version files
/// all share this shape; loader descriptors are merged over their vanilla
/// parent before launch.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDescriptor {
    pub id: Option<String>,
    pub main_class: String,
    #[serde(default)]
    pub inherits_from: Option<String>,
    #[serde(default)]
    pub libraries: Vec<LibraryEntry>,
    pub downloads: Option<VersionDownloads>,
    #[serde(default)]
    pub asset_index: Option<AssetIndexInfo>,
    #[serde(default)]
    pub arguments: Option<Arguments>,
    /// Legacy `minecraftArguments` field (pre-1.13).
    #[serde(default)]
    pub minecraft_arguments: Option<String>,
    #[serde(default)]
    pub java_version: Option<JavaVersionInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JavaVersionInfo {
    pub major_version: u32,
}

#[derive(Debug, Deserialize)]
pub struct VersionDownloads {
    pub client: Option<DownloadArtifact>,
    pub server: Option<DownloadArtifact>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadArtifact {
    pub sha1: String,
    pub size: u64,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetIndexInfo {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub total_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct Arguments {
    #[serde(default)]
    pub game: Vec<serde_json::Value>,
    #[serde(default)]
    pub jvm: Vec<serde_json::Value>,
}

// ─── Library Entry with Rules ───

#[derive(Debug, Deserialize)]
pub struct LibraryEntry {
    pub name: String,
    #[serde(default)]
    pub downloads: Option<LibraryDownloads>,
    /// Repository base for coordinate-only entries (Fabric/Quilt profiles
    /// point each library at their own maven this way).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub rules: Option<Vec<LibraryRule>>,
    #[serde(default)]
    pub natives: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct LibraryDownloads {
    pub artifact: Option<LibDownloadArtifact>,
    #[serde(default)]
    pub classifiers: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
pub struct LibDownloadArtifact {
    pub path: String,
    pub sha1: String,
    #[serde(default)]
    pub size: u64,
    pub url: String,
}

// ─── OS Rule Evaluation ───

#[derive(Debug, Deserialize)]
pub struct LibraryRule {
    pub action: RuleAction,
    #[serde(default)]
    pub os: Option<OsRule>,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Disallow,
}

#[derive(Debug, Deserialize)]
pub struct OsRule {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arch: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// Mojang rule walk, pure over its inputs so every platform branch is
/// testable anywhere:
/// - No rules at all means allowed.
/// - With rules, start disallowed and apply them in order; each rule whose
///   OS constraint matches (or that has none) overwrites the state, so the
///   last matching rule wins.
pub fn rules_allow(rules: Option<&[LibraryRule]>, os_name: &str) -> bool {
    let Some(rules) = rules else {
        return true;
    };

    let mut allowed = false;
    for rule in rules {
        let os_matches = match &rule.os {
            None => true,
            Some(os) => match &os.name {
                None => true,
                Some(name) => name == os_name,
            },
        };

        if os_matches {
            allowed = rule.action == RuleAction::Allow;
        }
    }

    allowed
}

impl LibraryEntry {
    pub fn is_allowed_on(&self, os_name: &str) -> bool {
        rules_allow(self.rules.as_deref(), os_name)
    }

    pub fn is_allowed_for_current_os(&self) -> bool {
        self.is_allowed_on(current_os_name())
    }

    /// Native classifier key for the current OS, with `${arch}` expanded.
    pub fn native_classifier_for_current_os(&self) -> Option<String> {
        let natives = self.natives.as_ref()?;
        let os = current_os_name();
        natives.as_object()?.get(os)?.as_str().map(|s| {
            let arch = if cfg!(target_arch = "x86_64") {
                "64"
            } else {
                "32"
            };
            s.replace("${arch}", arch)
        })
    }
}

/// The Mojang OS name for the current platform.
pub fn current_os_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "macos") {
        "osx"
    } else {
        "linux"
    }
}

impl VersionDescriptor {
    /// Fetch and parse a descriptor, returning the raw body alongside so
    /// callers can persist exactly what upstream served.
    pub async fn fetch(client: &reqwest::Client, url: &str) -> LauncherResult<(Self, String)> {
        let raw = client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let descriptor: VersionDescriptor = serde_json::from_str(&raw)?;
        Ok((descriptor, raw))
    }

    /// Parse a descriptor from disk.
    pub async fn load(path: &Path) -> LauncherResult<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| LauncherError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write descriptor text to disk, creating parent directories.
    pub async fn persist_raw(path: &Path, raw: &str) -> LauncherResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LauncherError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        tokio::fs::write(path, raw)
            .await
            .map_err(|e| LauncherError::Io {
                path: path.to_path_buf(),
                source: e,
            })
    }

    /// A descriptor with no main class or no libraries cannot produce a
    /// working classpath; callers treat such a file as absent and rebuild it.
    pub fn is_launchable(&self) -> bool {
        !self.main_class.trim().is_empty() && !self.libraries.is_empty()
    }

    /// The client archive download, when this descriptor carries one.
    pub fn client_artifact(&self) -> Option<&DownloadArtifact> {
        self.downloads.as_ref().and_then(|d| d.client.as_ref())
    }

    /// Gather the library artifacts not yet present under `libs_dir`, plus
    /// the classpath-relative paths of every OS-allowed library.
    ///
    /// Native classifiers for the current OS are queued for download but do
    /// not contribute classpath entries; they get extracted, not loaded.
    pub fn collect_library_downloads(&self, libs_dir: &Path) -> (Vec<DownloadEntry>, Vec<String>) {
        let mut entries = Vec::new();
        let mut coords = Vec::new();

        for lib in &self.libraries {
            if !lib.is_allowed_for_current_os() {
                debug!("Skipping library (OS rule): {}", lib.name);
                continue;
            }

            let mut classpath_entry = lib.name.clone();

            if let Some(downloads) = &lib.downloads {
                if let Some(artifact) = &downloads.artifact {
                    let dest = libs_dir.join(&artifact.path);
                    if !dest.exists() {
                        entries.push(
                            DownloadEntry::new(artifact.url.as_str(), dest)
                                .with_sha1(artifact.sha1.as_str())
                                .with_size(artifact.size),
                        );
                    }
                    classpath_entry = artifact.path.clone();
                }

                if let Some(classifier) = lib.native_classifier_for_current_os() {
                    if let Some(classifiers) = &downloads.classifiers {
                        if let Some(native) = classifiers.get(&classifier) {
                            if let (Some(url), Some(path), Some(sha1)) = (
                                native.get("url").and_then(|v| v.as_str()),
                                native.get("path").and_then(|v| v.as_str()),
                                native.get("sha1").and_then(|v| v.as_str()),
                            ) {
                                let dest = libs_dir.join(path);
                                if !dest.exists() {
                                    entries.push(DownloadEntry::new(url, dest).with_sha1(sha1));
                                }
                            }
                        }
                    }
                }
            }

            coords.push(classpath_entry);
        }

        (entries, coords)
    }

    /// Java major this version asks for, when it says.
    pub fn required_java_major(&self) -> Option<u32> {
        self.java_version.as_ref().map(|j| j.major_version)
    }

    /// Game argument template with conditional entries resolved for the
    /// current OS. Placeholders (`${...}`) are left untouched.
    pub fn simple_game_args(&self) -> Vec<String> {
        match &self.arguments {
            Some(args) => args.game.iter().flat_map(extract_argument_values).collect(),
            None => match &self.minecraft_arguments {
                Some(s) => s.split_whitespace().map(|s| s.to_string()).collect(),
                None => vec![],
            },
        }
    }

    /// JVM argument template with conditional entries resolved for the
    /// current OS.
    pub fn simple_jvm_args(&self) -> Vec<String> {
        match &self.arguments {
            Some(args) => args.jvm.iter().flat_map(extract_argument_values).collect(),
            None => vec![],
        }
    }

    /// Merge a loader descriptor over its vanilla parent.
    ///
    /// Scalar keys from the child win. `libraries` concatenates child first,
    /// parent after, so a loader's pinned builds shadow the vanilla ones when
    /// the classpath later dedupes by artifact name. `arguments` lists append
    /// the child's entries to the parent's, matching how the game's own
    /// `inheritsFrom` resolution behaves.
    pub fn merge_with_parent_json(
        current_json: &serde_json::Value,
        parent_json: &serde_json::Value,
    ) -> serde_json::Value {
        let mut merged = parent_json.clone();
        if !merged.is_object() {
            merged = serde_json::json!({});
        }

        let Some(obj) = current_json.as_object() else {
            return merged;
        };

        for (k, v) in obj {
            match k.as_str() {
                "libraries" => {
                    let mut combined = v.as_array().cloned().unwrap_or_default();
                    if let Some(parent_libs) = merged.get("libraries").and_then(|p| p.as_array()) {
                        combined.extend(parent_libs.iter().cloned());
                    }
                    merged["libraries"] = serde_json::Value::Array(combined);
                }
                "arguments" => {
                    merged["arguments"] = merge_argument_lists(v, merged.get("arguments"));
                }
                _ => {
                    merged[k.as_str()] = v.clone();
                }
            }
        }

        merged
    }
}

fn merge_argument_lists(
    child: &serde_json::Value,
    parent: Option<&serde_json::Value>,
) -> serde_json::Value {
    let mut result = match parent {
        Some(p) if p.is_object() => p.clone(),
        _ => serde_json::json!({}),
    };

    let Some(child_obj) = child.as_object() else {
        return result;
    };

    for (list_name, additions) in child_obj {
        let mut combined = result
            .get(list_name)
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        if let Some(extra) = additions.as_array() {
            combined.extend(extra.iter().cloned());
        }
        result[list_name.as_str()] = serde_json::Value::Array(combined);
    }

    result
}

fn extract_argument_values(value: &serde_json::Value) -> Vec<String> {
    if let Some(arg) = value.as_str() {
        return vec![arg.to_string()];
    }

    let Some(obj) = value.as_object() else {
        return vec![];
    };

    if let Some(rules) = obj.get("rules").and_then(|r| r.as_array()) {
        if !json_rules_allow_current_os(rules) {
            return vec![];
        }
    }

    match obj.get("value") {
        Some(serde_json::Value::String(s)) => vec![s.clone()],
        Some(serde_json::Value::Array(arr)) => arr
            .iter()
            .filter_map(|v| v.as_str().map(ToString::to_string))
            .collect(),
        _ => vec![],
    }
}

fn json_rules_allow_current_os(rules: &[serde_json::Value]) -> bool {
    let mut allowed = false;
    let current_os = current_os_name();

    for rule in rules {
        let action = rule
            .get("action")
            .and_then(|v| v.as_str())
            .unwrap_or("disallow");

        let os_matches = match rule
            .get("os")
            .and_then(|os| os.get("name"))
            .and_then(|name| name.as_str())
        {
            None => true,
            Some(name) => name == current_os,
        };

        if os_matches {
            allowed = action == "allow";
        }
    }

    allowed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lib(rules: Option<Vec<LibraryRule>>) -> LibraryEntry {
        LibraryEntry {
            name: "test:lib:1.0".into(),
            downloads: None,
            url: None,
            rules,
            natives: None,
        }
    }

    fn os_rule(name: &str) -> OsRule {
        OsRule {
            name: Some(name.to_string()),
            arch: None,
            version: None,
        }
    }

    #[test]
    fn no_rules_means_allowed() {
        assert!(rules_allow(None, "linux"));
        assert!(lib(None).is_allowed_for_current_os());
    }

    #[test]
    fn allow_all_then_disallow_target_blocks_it() {
        let rules = vec![
            LibraryRule {
                action: RuleAction::Allow,
                os: None,
            },
            LibraryRule {
                action: RuleAction::Disallow,
                os: Some(os_rule("osx")),
            },
        ];
        assert!(!rules_allow(Some(&rules), "osx"));
        assert!(rules_allow(Some(&rules), "linux"));
    }

    #[test]
    fn allow_scoped_elsewhere_stays_disallowed() {
        let rules = vec![LibraryRule {
            action: RuleAction::Allow,
            os: Some(os_rule("windows")),
        }];
        assert!(rules_allow(Some(&rules), "windows"));
        assert!(!rules_allow(Some(&rules), "linux"));
    }

    #[test]
    fn rule_order_decides_when_both_match() {
        let rules = vec![
            LibraryRule {
                action: RuleAction::Disallow,
                os: Some(os_rule("linux")),
            },
            LibraryRule {
                action: RuleAction::Allow,
                os: None,
            },
        ];
        assert!(rules_allow(Some(&rules), "linux"));
    }

    #[test]
    fn descriptor_without_libraries_is_not_launchable() {
        let parsed: VersionDescriptor = serde_json::from_value(serde_json::json!({
            "id": "x",
            "mainClass": "some.Main"
        }))
        .unwrap();
        assert!(!parsed.is_launchable());

        let parsed: VersionDescriptor = serde_json::from_value(serde_json::json!({
            "id": "x",
            "mainClass": "  ",
            "libraries": [{"name": "a:b:1"}]
        }))
        .unwrap();
        assert!(!parsed.is_launchable());

        let parsed: VersionDescriptor = serde_json::from_value(serde_json::json!({
            "id": "x",
            "mainClass": "some.Main",
            "libraries": [{"name": "a:b:1"}]
        }))
        .unwrap();
        assert!(parsed.is_launchable());
    }

    #[test]
    fn argument_object_rules_apply_to_current_os() {
        let parsed: VersionDescriptor = serde_json::from_value(serde_json::json!({
            "id": "test",
            "mainClass": "net.minecraft.client.main.Main",
            "arguments": {
                "game": [
                    "--username",
                    "${auth_player_name}",
                    {
                        "rules": [{"action": "allow", "os": {"name": "linux"}}],
                        "value": ["--demo"]
                    },
                    {
                        "rules": [{"action": "allow", "os": {"name": "windows"}}],
                        "value": "--should-not-appear"
                    }
                ]
            }
        }))
        .unwrap();

        let game_args = parsed.simple_game_args();
        assert!(game_args.contains(&"--username".to_string()));
        assert!(game_args.contains(&"${auth_player_name}".to_string()));
        if cfg!(target_os = "linux") {
            assert!(game_args.contains(&"--demo".to_string()));
            assert!(!game_args.contains(&"--should-not-appear".to_string()));
        }
    }

    #[test]
    fn legacy_minecraft_arguments_are_split() {
        let parsed: VersionDescriptor = serde_json::from_value(serde_json::json!({
            "id": "1.12.2",
            "mainClass": "net.minecraft.client.main.Main",
            "minecraftArguments": "--username ${auth_player_name} --gameDir ${game_directory}"
        }))
        .unwrap();

        let args = parsed.simple_game_args();
        assert_eq!(args[0], "--username");
        assert_eq!(args[1], "${auth_player_name}");
        assert_eq!(args.len(), 4);
    }

    #[test]
    fn merge_with_parent_json_overrides_scalars_and_appends_lists() {
        let parent = serde_json::json!({
            "mainClass": "parent.Main",
            "assetIndex": {"id": "5", "url": "https://example.invalid/5.json"},
            "libraries": [{"name": "a:b:1.0"}],
            "arguments": { "game": ["--parent"], "jvm": ["-Dparent=1"] }
        });
        let current = serde_json::json!({
            "inheritsFrom": "1.20.1",
            "mainClass": "child.Main",
            "libraries": [{"name": "c:d:2.0"}],
            "arguments": { "game": ["--child"] }
        });

        let merged = VersionDescriptor::merge_with_parent_json(&current, &parent);

        assert_eq!(merged["mainClass"], "child.Main");
        assert_eq!(merged["assetIndex"]["id"], "5");

        // Loader libraries come first so they shadow vanilla duplicates.
        assert_eq!(merged["libraries"][0]["name"], "c:d:2.0");
        assert_eq!(merged["libraries"][1]["name"], "a:b:1.0");

        let game = merged["arguments"]["game"].as_array().unwrap();
        assert_eq!(game[0], "--parent");
        assert_eq!(game[1], "--child");
        assert_eq!(merged["arguments"]["jvm"][0], "-Dparent=1");
    }

    #[test]
    fn collect_skips_artifacts_already_in_store() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("com/mojang/present/1.0/present-1.0.jar");
        std::fs::create_dir_all(present.parent().unwrap()).unwrap();
        std::fs::write(&present, b"jar").unwrap();

        let parsed: VersionDescriptor = serde_json::from_value(serde_json::json!({
            "id": "x",
            "mainClass": "some.Main",
            "libraries": [
                {
                    "name": "com.mojang:present:1.0",
                    "downloads": {"artifact": {
                        "path": "com/mojang/present/1.0/present-1.0.jar",
                        "sha1": "da39a3ee5e6b4b0d3255bfef95601890afd80709",
                        "size": 3,
                        "url": "https://libraries.minecraft.net/present.jar"
                    }}
                },
                {
                    "name": "com.mojang:missing:1.0",
                    "downloads": {"artifact": {
                        "path": "com/mojang/missing/1.0/missing-1.0.jar",
                        "sha1": "da39a3ee5e6b4b0d3255bfef95601890afd80709",
                        "size": 3,
                        "url": "https://libraries.minecraft.net/missing.jar"
                    }}
                }
            ]
        }))
        .unwrap();

        let (entries, coords) = parsed.collect_library_downloads(dir.path());
        assert_eq!(entries.len(), 1);
        assert!(entries[0].url.ends_with("missing.jar"));
        assert_eq!(coords.len(), 2);
        assert_eq!(coords[0], "com/mojang/present/1.0/present-1.0.jar");
    }
}
