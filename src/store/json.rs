use super::{JobRow, LinkRow, QueueStore, StoreTables};
use crate::error::JobError;
use crate::peer_id::PeerId;
use crate::prelude::*;
use crate::queue::Priority;
use crate::tth::TreeHash;
use anyhow::Context;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Store kept in memory and written out as one JSON document on [`QueueStore::flush`].
///
/// The document is written next to its final path and renamed over it, so a crash leaves
/// either the previous or the new version behind.
#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    tables: Mutex<StoreTables>,
    dirty: AtomicBool,
}

impl JsonStore {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let tables = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("parse queue store {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no queue store at {}, starting empty", path.display());
                StoreTables::default()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("read queue store {}", path.display()))
            }
        };

        Ok(Self {
            path,
            tables: Mutex::new(tables),
            dirty: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(&self, f: impl FnOnce(&mut StoreTables) -> bool) {
        if f(&mut self.tables.lock()) {
            self.dirty.store(true, Ordering::Release);
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl QueueStore for JsonStore {
    fn load_jobs(&self) -> anyhow::Result<Vec<JobRow>> {
        Ok(self.tables.lock().jobs())
    }

    fn load_links(&self) -> anyhow::Result<Vec<LinkRow>> {
        Ok(self.tables.lock().links())
    }

    fn upsert_job(&self, row: &JobRow) -> anyhow::Result<()> {
        self.update(|tables| {
            tables.upsert_job(row);
            true
        });
        Ok(())
    }

    fn upsert_link(&self, row: &LinkRow) -> anyhow::Result<()> {
        self.update(|tables| {
            tables.upsert_link(row);
            true
        });
        Ok(())
    }

    fn set_job_status(
        &self,
        hash: &TreeHash,
        priority: Priority,
        error: Option<&JobError>,
    ) -> anyhow::Result<()> {
        self.update(|tables| tables.set_job_status(hash, priority, error));
        Ok(())
    }

    fn set_link_status(
        &self,
        peer: PeerId,
        hash: Option<&TreeHash>,
        error: Option<&JobError>,
    ) -> anyhow::Result<()> {
        self.update(|tables| tables.set_link_status(peer, hash, error));
        Ok(())
    }

    fn set_block_hashes(&self, hash: &TreeHash, hashes: &[TreeHash]) -> anyhow::Result<()> {
        self.update(|tables| tables.set_block_hashes(hash, hashes));
        Ok(())
    }

    fn block_hashes(&self, hash: &TreeHash) -> anyhow::Result<Option<Vec<TreeHash>>> {
        Ok(self.tables.lock().block_hashes(hash))
    }

    fn has_block_hash(
        &self,
        hash: &TreeHash,
        index: usize,
        digest: &TreeHash,
    ) -> anyhow::Result<bool> {
        Ok(self.tables.lock().has_block_hash(hash, index, digest))
    }

    fn delete_job(&self, hash: &TreeHash) -> anyhow::Result<()> {
        self.update(|tables| tables.delete_job(hash));
        Ok(())
    }

    fn delete_link(&self, peer: PeerId, hash: &TreeHash) -> anyhow::Result<()> {
        self.update(|tables| tables.delete_link(peer, hash));
        Ok(())
    }

    fn delete_peer_links(&self, peer: PeerId) -> anyhow::Result<()> {
        self.update(|tables| tables.delete_peer_links(peer));
        Ok(())
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    fn flush(&self) -> anyhow::Result<()> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let bytes = {
            let tables = self.tables.lock();
            serde_json::to_vec_pretty(&*tables).context("serialize queue store")
        };
        let result = bytes.and_then(|bytes| {
            let tmp = self.tmp_path();
            std::fs::write(&tmp, bytes)
                .with_context(|| format!("write {}", tmp.display()))?;
            std::fs::rename(&tmp, &self.path)
                .with_context(|| format!("rename {} into place", tmp.display()))
        });

        match result {
            Ok(()) => {
                debug!("queue store flushed");
                Ok(())
            }
            Err(e) => {
                self.dirty.store(true, Ordering::Release);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorKind;
    use rstest::rstest;

    fn row(hash: TreeHash) -> JobRow {
        JobRow {
            hash,
            size: 3_000_000,
            destination: PathBuf::from("/dl/movie.mkv"),
            priority: Priority::High,
            error: None,
            block_hash_len: 0,
        }
    }

    #[rstest]
    fn test_flush_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let hash = TreeHash::tiger(b"movie");

        let store = JsonStore::open(&path).unwrap();
        store.upsert_job(&row(hash)).unwrap();
        store
            .upsert_link(&LinkRow {
                hash,
                peer: PeerId::new(42),
                error: Some(ErrorKind::PeerMissingFile.into()),
            })
            .unwrap();
        store
            .set_block_hashes(&hash, &[TreeHash::tiger(b"a"), TreeHash::tiger(b"b")])
            .unwrap();
        store.flush().unwrap();
        assert!(!store.tmp_path().exists());

        let reopened = JsonStore::open(&path).unwrap();
        let jobs = reopened.load_jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].block_hash_len, 2);
        assert_eq!(jobs[0].priority, Priority::High);

        let links = reopened.load_links().unwrap();
        assert_eq!(links[0].peer, PeerId::new(42));
        assert_eq!(
            links[0].error.as_ref().map(|e| e.kind),
            Some(ErrorKind::PeerMissingFile)
        );
        assert!(reopened
            .has_block_hash(&hash, 1, &TreeHash::tiger(b"b"))
            .unwrap());
    }

    #[rstest]
    fn test_clean_store_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");

        let store = JsonStore::open(&path).unwrap();
        store.delete_job(&TreeHash::tiger(b"nothing")).unwrap();
        store.flush().unwrap();

        assert!(!path.exists());
    }

    #[rstest]
    fn test_corrupt_store_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        std::fs::write(&path, b"{ not json").unwrap();

        assert!(JsonStore::open(&path).is_err());
    }
}
