pub mod file_info;
pub mod fs_watcher;
pub mod incremental;
pub mod manifest;
pub mod path;
pub mod progress;
pub mod walker;

pub use file_info::{FileInfo, calculate_hash, get_utc_timestamp, modified_secs};
pub use fs_watcher::{FileSystemWatcher, WatchError};
pub use incremental::{FileDisposition, IncrementalIndexer, IndexerComponents};
pub use manifest::{Manifest, ManifestEntry};
pub use path::PathNormalizer;
pub use progress::IndexStats;
pub use walker::{FileWalker, IndexFilter};
