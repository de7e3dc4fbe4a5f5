// ─── Launch ───
// Classpath assembly, player identity, and process spawn.

pub mod classpath;
pub mod identity;
pub mod task;

pub use classpath::{
    build_classpath, classpath_separator, cleanup_natives, extract_natives, safe_path_str,
};
pub use identity::{canonical_uuid, offline_uuid, IdentityKind, PlayerIdentity};
pub use task::{compose_arguments, initial_heap_mb, launch, LAUNCHER_BRAND};
