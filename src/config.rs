use crate::peer_id::PeerId;
use crate::tth::TreeHash;
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Delay before a peer whose connection failed or dropped may be connected to again.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(60);
/// Scheduling requests arriving within this window are served by a single pass.
pub const RESCAN_DELAY: Duration = Duration::from_millis(500);
/// Interval of the incoming/list directory sweep and store flush.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Files up to this size are verified against their root hash alone, larger ones need the
/// block hash list first.
pub const MIN_TTHL_SIZE: u64 = 2048 * 1024;
/// Block hash lists finer than this are collapsed until every block is at least this large.
pub const MIN_BLOCK_SIZE: u64 = 1024 * 1024;

pub const DEFAULT_SLOTS: usize = 3;
pub const DEFAULT_FILELIST_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// finished files are moved below this directory.
    pub download_dir: PathBuf,
    /// partial files, named by the base32 form of their hash.
    pub incoming_dir: PathBuf,
    /// downloaded file lists.
    pub list_dir: PathBuf,
    pub download_slots: usize,
    pub filelist_max_age: Duration,
}

impl QueueConfig {
    pub fn from_data_dir(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            download_dir: data_dir.join("dl"),
            incoming_dir: data_dir.join("inc"),
            list_dir: data_dir.join("fl"),
            download_slots: DEFAULT_SLOTS,
            filelist_max_age: DEFAULT_FILELIST_MAX_AGE,
        }
    }

    pub fn with_slots(mut self, slots: usize) -> Self {
        self.download_slots = slots;
        self
    }

    pub fn partial_path(&self, hash: &TreeHash) -> PathBuf {
        self.incoming_dir.join(hash.to_base32())
    }

    pub fn list_path(&self, peer: PeerId) -> PathBuf {
        self.list_dir.join(peer.list_file_name())
    }

    pub fn create_dirs(&self) -> anyhow::Result<()> {
        for dir in [&self.download_dir, &self.incoming_dir, &self.list_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn test_layout_below_data_dir() {
        let config = QueueConfig::from_data_dir("/data").with_slots(5);
        let hash = TreeHash::tiger(b"x");

        assert_eq!(config.download_slots, 5);
        assert_eq!(
            config.partial_path(&hash),
            Path::new("/data/inc").join(hash.to_base32())
        );
        assert_eq!(
            config.list_path(PeerId::new(1)),
            Path::new("/data/fl/0000000000000001.xml.bz2")
        );
    }

    #[rstest]
    fn test_create_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let config = QueueConfig::from_data_dir(dir.path());
        config.create_dirs().unwrap();

        assert!(config.download_dir.is_dir());
        assert!(config.incoming_dir.is_dir());
        assert!(config.list_dir.is_dir());
    }
}
