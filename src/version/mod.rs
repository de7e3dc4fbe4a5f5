pub mod manifest;
pub mod metadata;

pub use manifest::{VersionEntry, VersionManifest, VersionResolver};
pub use metadata::{
    current_os_name, rules_allow, AssetIndexInfo, DownloadArtifact, LibraryEntry, LibraryRule,
    OsRule, RuleAction, VersionDescriptor,
};
