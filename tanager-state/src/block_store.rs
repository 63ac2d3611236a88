//! File-per-block persistence.
//!
//! Each block lives in its own file under a bucket directory of 1000
//! heights: `{data_dir}/blocks/{height/1000}/{height:09}.blk`, raw block
//! bytes with no framing. Blocks arrive out of order during download, so
//! a keyed file per height is the natural layout, and pruning is a
//! single unlink.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use tracing::{debug, info};

use tanager_chain::block::Height;

use crate::error::StoreError;
use crate::Config;

pub struct BlockStore {
    blocks_dir: PathBuf,
}

impl BlockStore {
    pub fn open(config: &Config) -> Result<BlockStore, StoreError> {
        let blocks_dir = config.blocks_dir();
        fs::create_dir_all(&blocks_dir)?;
        Ok(BlockStore { blocks_dir })
    }

    fn bucket_dir(&self, height: Height) -> PathBuf {
        self.blocks_dir.join(format!("{}", height.0 / 1000))
    }

    fn block_path(&self, height: Height) -> PathBuf {
        self.bucket_dir(height).join(format!("{:09}.blk", height.0))
    }

    /// Write raw block bytes, creating the bucket directory as needed.
    /// Overwrites any existing file: re-downloads are idempotent.
    pub fn write(&self, height: Height, bytes: &[u8]) -> Result<(), StoreError> {
        fs::create_dir_all(self.bucket_dir(height))?;
        let path = self.block_path(height);
        let mut file = fs::File::create(&path)?;
        file.write_all(bytes)?;
        file.sync_data()?;
        debug!(height = height.0, len = bytes.len(), "stored block");
        Ok(())
    }

    pub fn read(&self, height: Height) -> Result<Vec<u8>, StoreError> {
        match fs::read(self.block_path(height)) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(err) => Err(err.into()),
        }
    }

    pub fn exists(&self, height: Height) -> bool {
        self.block_path(height).is_file()
    }

    /// Unlink the block file. Pruning an absent height is a no-op.
    pub fn prune(&self, height: Height) -> Result<(), StoreError> {
        match fs::remove_file(self.block_path(height)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// All stored heights in ascending order, for restart recovery.
    pub fn scan(&self) -> Result<Vec<Height>, StoreError> {
        let mut heights = Vec::new();
        for bucket in fs::read_dir(&self.blocks_dir)? {
            let bucket = bucket?;
            if !bucket.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(bucket.path())? {
                let entry = entry?;
                let name = entry.file_name();
                let name = match name.to_str() {
                    Some(name) => name,
                    None => continue,
                };
                if let Some(stem) = name.strip_suffix(".blk") {
                    if let Ok(height) = stem.parse::<u32>() {
                        heights.push(Height(height));
                    }
                }
            }
        }
        heights.sort();
        info!(stored = heights.len(), "scanned block store");
        Ok(heights)
    }

    /// Total bytes across all block files, for the prune threshold.
    pub fn total_size(&self) -> Result<u64, StoreError> {
        let mut total = 0u64;
        for bucket in fs::read_dir(&self.blocks_dir)? {
            let bucket = bucket?;
            if !bucket.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(bucket.path())? {
                let entry = entry?;
                if entry.file_name().to_str().map_or(false, |n| n.ends_with(".blk")) {
                    total += entry.metadata()?.len();
                }
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn store() -> (TempDir, BlockStore) {
        let dir = TempDir::new("tanager-blocks").unwrap();
        let config = Config::new(dir.path());
        let store = BlockStore::open(&config).unwrap();
        (dir, store)
    }

    #[test]
    fn write_read_roundtrip() {
        tanager_test::init();
        let (_dir, store) = store();

        let bytes = vec![0xaa, 0xbb, 0xcc];
        store.write(Height(1234), &bytes).unwrap();
        assert!(store.exists(Height(1234)));
        assert_eq!(store.read(Height(1234)).unwrap(), bytes);

        // Overwrite is idempotent.
        store.write(Height(1234), &bytes).unwrap();
        assert_eq!(store.read(Height(1234)).unwrap(), bytes);
    }

    #[test]
    fn missing_blocks_are_not_found() {
        tanager_test::init();
        let (_dir, store) = store();
        assert!(!store.exists(Height(5)));
        assert!(matches!(store.read(Height(5)), Err(StoreError::NotFound)));
    }

    #[test]
    fn bucketed_layout() {
        tanager_test::init();
        let (dir, store) = store();
        store.write(Height(1_234_567), &[1]).unwrap();
        let expected = dir
            .path()
            .join("blocks")
            .join("1234")
            .join("001234567.blk");
        assert!(expected.is_file());
    }

    #[test]
    fn prune_is_idempotent() {
        tanager_test::init();
        let (_dir, store) = store();
        store.write(Height(9), &[1, 2]).unwrap();
        store.prune(Height(9)).unwrap();
        assert!(!store.exists(Height(9)));
        // Pruning an absent height is not an error.
        store.prune(Height(9)).unwrap();
    }

    #[test]
    fn scan_returns_sorted_heights() {
        tanager_test::init();
        let (_dir, store) = store();
        for &height in &[5u32, 1, 2000, 3] {
            store.write(Height(height), &[height as u8]).unwrap();
        }
        let heights = store.scan().unwrap();
        assert_eq!(
            heights,
            vec![Height(1), Height(3), Height(5), Height(2000)]
        );
    }

    #[test]
    fn total_size_sums_all_files() {
        tanager_test::init();
        let (_dir, store) = store();
        store.write(Height(1), &[0; 10]).unwrap();
        store.write(Height(2), &[0; 32]).unwrap();
        assert_eq!(store.total_size().unwrap(), 42);
    }
}
