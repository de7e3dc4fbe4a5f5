pub mod runtime;

pub use runtime::{
    is_java_compatible_major, probe_java, required_java_for_minecraft_version, JavaInstallation,
    JavaRuntimeManager,
};
