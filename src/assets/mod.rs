pub mod sync;

pub use sync::{AssetIndex, AssetObject, AssetSyncReport, AssetSynchronizer};
