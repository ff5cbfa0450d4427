mod json;
mod memory;

pub use json::JsonStore;
pub use memory::MemoryStore;

use crate::error::JobError;
use crate::peer_id::PeerId;
use crate::queue::Priority;
use crate::tth::TreeHash;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A persisted job. File lists are never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRow {
    pub hash: TreeHash,
    pub size: u64,
    pub destination: PathBuf,
    pub priority: Priority,
    #[serde(default)]
    pub error: Option<JobError>,
    /// number of stored block hashes, zero when none were fetched yet.
    #[serde(default)]
    pub block_hash_len: usize,
}

/// A persisted association between a job and a peer offering it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRow {
    pub hash: TreeHash,
    pub peer: PeerId,
    #[serde(default)]
    pub error: Option<JobError>,
}

/// Persistence contract of the download queue, keyed by content hash.
///
/// Writes are fire-and-forget from the queue's point of view: a failing write is logged by
/// the caller and never turns into a job error.
pub trait QueueStore: Send + Sync {
    fn load_jobs(&self) -> anyhow::Result<Vec<JobRow>>;
    fn load_links(&self) -> anyhow::Result<Vec<LinkRow>>;

    fn upsert_job(&self, row: &JobRow) -> anyhow::Result<()>;
    fn upsert_link(&self, row: &LinkRow) -> anyhow::Result<()>;
    fn set_job_status(
        &self,
        hash: &TreeHash,
        priority: Priority,
        error: Option<&JobError>,
    ) -> anyhow::Result<()>;
    /// with `hash` = None the status of every link of the peer is set.
    fn set_link_status(
        &self,
        peer: PeerId,
        hash: Option<&TreeHash>,
        error: Option<&JobError>,
    ) -> anyhow::Result<()>;

    fn set_block_hashes(&self, hash: &TreeHash, hashes: &[TreeHash]) -> anyhow::Result<()>;
    fn block_hashes(&self, hash: &TreeHash) -> anyhow::Result<Option<Vec<TreeHash>>>;
    /// whether stored block hash number `index` of `hash` equals `digest`.
    fn has_block_hash(&self, hash: &TreeHash, index: usize, digest: &TreeHash)
        -> anyhow::Result<bool>;

    /// removes the job together with its links and block hashes.
    fn delete_job(&self, hash: &TreeHash) -> anyhow::Result<()>;
    fn delete_link(&self, peer: PeerId, hash: &TreeHash) -> anyhow::Result<()>;
    fn delete_peer_links(&self, peer: PeerId) -> anyhow::Result<()>;

    fn flush(&self) -> anyhow::Result<()>;
}

/// The rows behind both store implementations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StoreTables {
    jobs: BTreeMap<TreeHash, JobRow>,
    links: BTreeMap<TreeHash, BTreeMap<PeerId, LinkRow>>,
    block_hashes: BTreeMap<TreeHash, Vec<TreeHash>>,
}

impl StoreTables {
    fn jobs(&self) -> Vec<JobRow> {
        self.jobs
            .values()
            .map(|row| JobRow {
                block_hash_len: self.block_hashes.get(&row.hash).map_or(0, Vec::len),
                ..row.clone()
            })
            .collect()
    }

    fn links(&self) -> Vec<LinkRow> {
        self.links
            .values()
            .flat_map(|peers| peers.values().cloned())
            .collect()
    }

    fn upsert_job(&mut self, row: &JobRow) {
        self.jobs.insert(row.hash, row.clone());
    }

    fn upsert_link(&mut self, row: &LinkRow) {
        self.links
            .entry(row.hash)
            .or_default()
            .insert(row.peer, row.clone());
    }

    /// returns whether a row was touched.
    fn set_job_status(
        &mut self,
        hash: &TreeHash,
        priority: Priority,
        error: Option<&JobError>,
    ) -> bool {
        let Some(row) = self.jobs.get_mut(hash) else {
            return false;
        };
        row.priority = priority;
        row.error = error.cloned();
        true
    }

    fn set_link_status(
        &mut self,
        peer: PeerId,
        hash: Option<&TreeHash>,
        error: Option<&JobError>,
    ) -> bool {
        let mut touched = false;
        for (job, peers) in self.links.iter_mut() {
            if hash.is_some_and(|hash| hash != job) {
                continue;
            }
            if let Some(row) = peers.get_mut(&peer) {
                row.error = error.cloned();
                touched = true;
            }
        }
        touched
    }

    fn set_block_hashes(&mut self, hash: &TreeHash, hashes: &[TreeHash]) -> bool {
        if !self.jobs.contains_key(hash) {
            return false;
        }
        self.block_hashes.insert(*hash, hashes.to_vec());
        true
    }

    fn block_hashes(&self, hash: &TreeHash) -> Option<Vec<TreeHash>> {
        self.block_hashes.get(hash).cloned()
    }

    fn has_block_hash(&self, hash: &TreeHash, index: usize, digest: &TreeHash) -> bool {
        self.block_hashes
            .get(hash)
            .and_then(|hashes| hashes.get(index))
            .is_some_and(|stored| stored == digest)
    }

    fn delete_job(&mut self, hash: &TreeHash) -> bool {
        let existed = self.jobs.remove(hash).is_some();
        self.links.remove(hash);
        self.block_hashes.remove(hash);
        existed
    }

    fn delete_link(&mut self, peer: PeerId, hash: &TreeHash) -> bool {
        let Some(peers) = self.links.get_mut(hash) else {
            return false;
        };
        let existed = peers.remove(&peer).is_some();
        if peers.is_empty() {
            self.links.remove(hash);
        }
        existed
    }

    fn delete_peer_links(&mut self, peer: PeerId) -> bool {
        let mut touched = false;
        self.links.retain(|_, peers| {
            touched |= peers.remove(&peer).is_some();
            !peers.is_empty()
        });
        touched
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorKind;
    use rstest::{fixture, rstest};

    fn hash(n: u8) -> TreeHash {
        TreeHash::tiger(&[n])
    }

    #[fixture]
    fn tables() -> StoreTables {
        let mut tables = StoreTables::default();
        for n in 0..2 {
            tables.upsert_job(&JobRow {
                hash: hash(n),
                size: 10,
                destination: PathBuf::from(format!("/dl/{n}")),
                priority: Priority::Medium,
                error: None,
                block_hash_len: 0,
            });
            for peer in 1..=2 {
                tables.upsert_link(&LinkRow {
                    hash: hash(n),
                    peer: PeerId::new(peer),
                    error: None,
                });
            }
        }
        tables
    }

    #[rstest]
    fn test_delete_job_cascades(mut tables: StoreTables) {
        assert!(tables.set_block_hashes(&hash(0), &[hash(9)]));
        assert!(tables.delete_job(&hash(0)));

        assert_eq!(tables.jobs().len(), 1);
        assert!(tables.links().iter().all(|row| row.hash == hash(1)));
        assert!(!tables.has_block_hash(&hash(0), 0, &hash(9)));
    }

    #[rstest]
    fn test_link_status_for_all_jobs(mut tables: StoreTables) {
        let err = JobError::from(ErrorKind::PeerMissingFile);
        assert!(tables.set_link_status(PeerId::new(1), None, Some(&err)));

        for row in tables.links() {
            let expected = (row.peer == PeerId::new(1)).then(|| err.clone());
            assert_eq!(row.error, expected);
        }
    }

    #[rstest]
    fn test_block_hashes_reported_as_length(mut tables: StoreTables) {
        tables.set_block_hashes(&hash(1), &[hash(7), hash(8), hash(9)]);

        let row = tables.jobs().into_iter().find(|row| row.hash == hash(1)).unwrap();
        assert_eq!(row.block_hash_len, 3);
        assert!(tables.has_block_hash(&hash(1), 2, &hash(9)));
        assert!(!tables.has_block_hash(&hash(1), 3, &hash(9)));
        assert!(!tables.has_block_hash(&hash(1), 0, &hash(9)));
    }

    #[rstest]
    fn test_delete_peer_links(mut tables: StoreTables) {
        assert!(tables.delete_peer_links(PeerId::new(2)));
        assert!(!tables.delete_peer_links(PeerId::new(2)));
        assert!(tables.links().iter().all(|row| row.peer == PeerId::new(1)));
        assert!(tables.delete_link(PeerId::new(1), &hash(0)));
        assert_eq!(tables.links().len(), 1);
    }
}
