pub mod downloads;

pub use downloads::{DownloadState, DownloadStateStore, DownloadStatus};
