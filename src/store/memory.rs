use super::{JobRow, LinkRow, QueueStore, StoreTables};
use crate::error::JobError;
use crate::peer_id::PeerId;
use crate::queue::Priority;
use crate::tth::TreeHash;
use parking_lot::Mutex;

/// Store that lives and dies with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<StoreTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueueStore for MemoryStore {
    fn load_jobs(&self) -> anyhow::Result<Vec<JobRow>> {
        Ok(self.tables.lock().jobs())
    }

    fn load_links(&self) -> anyhow::Result<Vec<LinkRow>> {
        Ok(self.tables.lock().links())
    }

    fn upsert_job(&self, row: &JobRow) -> anyhow::Result<()> {
        self.tables.lock().upsert_job(row);
        Ok(())
    }

    fn upsert_link(&self, row: &LinkRow) -> anyhow::Result<()> {
        self.tables.lock().upsert_link(row);
        Ok(())
    }

    fn set_job_status(
        &self,
        hash: &TreeHash,
        priority: Priority,
        error: Option<&JobError>,
    ) -> anyhow::Result<()> {
        self.tables.lock().set_job_status(hash, priority, error);
        Ok(())
    }

    fn set_link_status(
        &self,
        peer: PeerId,
        hash: Option<&TreeHash>,
        error: Option<&JobError>,
    ) -> anyhow::Result<()> {
        self.tables.lock().set_link_status(peer, hash, error);
        Ok(())
    }

    fn set_block_hashes(&self, hash: &TreeHash, hashes: &[TreeHash]) -> anyhow::Result<()> {
        self.tables.lock().set_block_hashes(hash, hashes);
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
        self.tables.lock().delete_job(hash);
        Ok(())
    }

    fn delete_link(&self, peer: PeerId, hash: &TreeHash) -> anyhow::Result<()> {
        self.tables.lock().delete_link(peer, hash);
        Ok(())
    }

    fn delete_peer_links(&self, peer: PeerId) -> anyhow::Result<()> {
        self.tables.lock().delete_peer_links(peer);
        Ok(())
    }

    fn flush(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
