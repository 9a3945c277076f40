pub mod disk;

use crate::core::config::AppConfig;
use anyhow::Result;
pub use disk::SnapshotStore;

/// Opens the snapshot store under the configured data directory.
pub fn open_default(config: &AppConfig) -> Result<SnapshotStore> {
    let path = config.default_data_path()?.join("cache");
    SnapshotStore::open(&path)
}
