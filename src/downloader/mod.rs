pub mod engine;

pub use engine::{
    Checksum, ChecksumAlgo, DownloadEngine, DownloadEntry, DownloadId, TransferReport,
    TransferStatus,
};
