use serde::Deserialize;

use crate::error::{LauncherError, LauncherResult};

use super::MavenArtifact;

/// Parsed artifact-level `maven-metadata.xml`, the version index every
/// maven-layout repository publishes next to an artifact.
#[derive(Debug, Default, Deserialize)]
pub struct MavenMetadata {
    #[serde(default)]
    pub versioning: Versioning,
}

#[derive(Debug, Default, Deserialize)]
pub struct Versioning {
    #[serde(default)]
    pub latest: Option<String>,
    #[serde(default)]
    pub release: Option<String>,
    #[serde(default)]
    pub versions: VersionList,
}

#[derive(Debug, Default, Deserialize)]
pub struct VersionList {
    #[serde(rename = "version", default)]
    pub entries: Vec<String>,
}

impl MavenMetadata {
    pub async fn fetch(
        client: &reqwest::Client,
        repo_base: &str,
        group_id: &str,
        artifact_id: &str,
    ) -> LauncherResult<Self> {
        let url = MavenArtifact::metadata_url(repo_base, group_id, artifact_id);
        let response = client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LauncherError::DownloadFailed {
                url,
                status: status.as_u16(),
            });
        }
        let xml = response.text().await?;
        Ok(quick_xml::de::from_str(&xml)?)
    }

    /// Every published version, oldest first (repository order).
    pub fn versions(&self) -> &[String] {
        &self.versioning.versions.entries
    }
}

/// One dot/dash-delimited chunk of a version string. Deriving `Ord` makes
/// whole keys comparable piecewise.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum VersionPart {
    Text(String),
    Num(u64),
}

/// Sort key that compares numeric chunks as numbers, so `47.10.0` outranks
/// `47.9.2` where a plain string compare would not.
pub fn version_sort_key(version: &str) -> Vec<VersionPart> {
    version
        .split(&['.', '-', '_', '+'][..])
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| match chunk.parse::<u64>() {
            Ok(n) => VersionPart::Num(n),
            Err(_) => VersionPart::Text(chunk.to_ascii_lowercase()),
        })
        .collect()
}

/// Highest version carrying `prefix`, compared by the numeric-aware key of
/// what follows the prefix.
pub fn newest_with_prefix(versions: &[String], prefix: &str) -> Option<String> {
    versions
        .iter()
        .filter(|v| v.starts_with(prefix))
        .max_by_key(|v| version_sort_key(v.strip_prefix(prefix).unwrap_or(v)))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata>
  <groupId>net.minecraftforge</groupId>
  <artifactId>forge</artifactId>
  <versioning>
    <latest>1.20.1-47.10.0</latest>
    <release>1.20.1-47.10.0</release>
    <versions>
      <version>1.19.4-45.1.0</version>
      <version>1.20.1-47.2.0</version>
      <version>1.20.1-47.9.2</version>
      <version>1.20.1-47.10.0</version>
    </versions>
    <lastUpdated>20240101000000</lastUpdated>
  </versioning>
</metadata>"#;

    #[test]
    fn parses_version_index() {
        let metadata: MavenMetadata = quick_xml::de::from_str(SAMPLE).unwrap();
        assert_eq!(metadata.versions().len(), 4);
        assert_eq!(metadata.versioning.release.as_deref(), Some("1.20.1-47.10.0"));
    }

    #[test]
    fn numeric_chunks_beat_string_order() {
        assert!(version_sort_key("47.10.0") > version_sort_key("47.9.2"));
        assert!(version_sort_key("20.4.237") > version_sort_key("20.4.80"));
        assert!(version_sort_key("47.2.0") < version_sort_key("47.2.1"));
    }

    #[test]
    fn newest_with_prefix_is_numeric_aware() {
        let metadata: MavenMetadata = quick_xml::de::from_str(SAMPLE).unwrap();
        assert_eq!(
            newest_with_prefix(metadata.versions(), "1.20.1-").as_deref(),
            Some("1.20.1-47.10.0")
        );
        assert_eq!(newest_with_prefix(metadata.versions(), "1.20.2-"), None);
    }
}
