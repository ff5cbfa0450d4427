use crate::config::MIN_TTHL_SIZE;
use crate::error::JobError;
use crate::peer_id::PeerId;
use crate::store::JobRow;
use crate::tth::{block_size_for, TreeHash, TreeHasher};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Download priority of a job. Anything at or below [`Priority::Off`] is never scheduled.
///
/// Declared in ascending order, the derived `Ord` is the scheduling order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(into = "i8", try_from = "i8")]
#[repr(i8)]
pub enum Priority {
    /// disabled because of a job error, distinct from a user disabling the job.
    Error = -65,
    Off = -64,
    VeryLow = -2,
    Low = -1,
    #[default]
    Medium = 0,
    High = 1,
    VeryHigh = 2,
}

impl Priority {
    pub fn is_enabled(self) -> bool {
        self > Self::Off
    }
}

impl From<Priority> for i8 {
    fn from(priority: Priority) -> Self {
        priority as i8
    }
}

impl TryFrom<i8> for Priority {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, String> {
        Ok(match value {
            -65 => Priority::Error,
            -64 => Self::Off,
            -2 => Self::VeryLow,
            -1 => Self::Low,
            0 => Self::Medium,
            1 => Self::High,
            2 => Self::VeryHigh,
            other => return Err(format!("invalid priority {other}")),
        })
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "error",
            Self::Off => "off",
            Self::VeryLow => "very-low",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::VeryHigh => "very-high",
        })
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "off" => Ok(Self::Off),
            "very-low" | "verylow" => Ok(Self::VeryLow),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "very-high" | "veryhigh" => Ok(Self::VeryHigh),
            // the error state is entered by failures, not chosen.
            other => {
                let value: i8 = other
                    .parse()
                    .map_err(|_| anyhow::anyhow!("unknown priority `{s}`"))?;
                match Self::try_from(value).map_err(anyhow::Error::msg)? {
                    Self::Error => anyhow::bail!("the error priority can not be set by hand"),
                    priority => Ok(priority),
                }
            }
        }
    }
}

/// What to do with a file list once it is downloaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    /// path inside the list to select when it is opened.
    pub select: Option<String>,
    pub open: bool,
    /// match the list against the queue, adding the peer to every job it offers.
    pub match_queue: bool,
}

/// One queued download, a regular file or a peer's file list, keyed by content hash.
#[derive(Debug)]
pub struct Job {
    pub(crate) hash: TreeHash,
    pub(crate) is_list: bool,
    pub(crate) size: u64,
    pub(crate) have: u64,
    pub(crate) priority: Priority,
    pub(crate) error: Option<JobError>,
    pub(crate) destination: PathBuf,
    pub(crate) partial_path: PathBuf,

    /// open partial file, absent while a receiver holds it.
    pub(crate) partial: Option<File>,
    /// hash state of the block in progress, covers the bytes between the last block
    /// boundary and `have`.
    pub(crate) hasher: TreeHasher,
    pub(crate) has_block_hashes: bool,
    pub(crate) block_size: u64,

    pub(crate) active: bool,
    pub(crate) receiving: bool,
    pub(crate) pending_delete: bool,

    pub(crate) peers: Vec<PeerId>,
    pub(crate) list: Option<ListRequest>,
}

impl Job {
    pub(crate) fn new_file(
        hash: TreeHash,
        size: u64,
        destination: PathBuf,
        partial_path: PathBuf,
    ) -> Self {
        let mut job = Self {
            hash,
            is_list: false,
            size,
            have: 0,
            priority: Priority::default(),
            error: None,
            destination,
            partial_path,
            partial: None,
            hasher: TreeHasher::new(),
            has_block_hashes: false,
            block_size: 0,
            active: false,
            receiving: false,
            pending_delete: false,
            peers: Vec::new(),
            list: None,
        };
        job.init_block_hashes(0);
        job
    }

    pub(crate) fn new_list(
        peer: PeerId,
        destination: PathBuf,
        partial_path: PathBuf,
        request: ListRequest,
    ) -> Self {
        let mut job = Self {
            is_list: true,
            list: Some(request),
            ..Self::new_file(peer.list_hash(), 0, destination, partial_path)
        };
        job.init_block_hashes(0);
        job
    }

    pub(crate) fn from_row(row: JobRow, partial_path: PathBuf) -> Self {
        let mut job = Self::new_file(row.hash, row.size, row.destination, partial_path);
        job.priority = row.priority;
        job.error = row.error;
        job.init_block_hashes(row.block_hash_len);
        job
    }

    pub(crate) fn to_row(&self) -> JobRow {
        JobRow {
            hash: self.hash,
            size: self.size,
            destination: self.destination.clone(),
            priority: self.priority,
            error: self.error.clone(),
            block_hash_len: 0,
        }
    }

    /// Small files are checked against their root as one block, others need a block hash
    /// list of `block_hash_len` entries before any content is accepted.
    pub(crate) fn init_block_hashes(&mut self, block_hash_len: usize) {
        if self.is_list {
            self.has_block_hashes = false;
            self.block_size = 0;
        } else if self.size <= MIN_TTHL_SIZE {
            self.has_block_hashes = true;
            self.block_size = MIN_TTHL_SIZE;
        } else if block_hash_len > 0 {
            self.has_block_hashes = true;
            self.block_size = block_size_for(self.size, block_hash_len);
        }
    }

    pub fn hash(&self) -> TreeHash {
        self.hash
    }

    pub fn is_list(&self) -> bool {
        self.is_list
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn have(&self) -> u64 {
        self.have
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn error(&self) -> Option<&JobError> {
        self.error.as_ref()
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn partial_path(&self) -> &Path {
        &self.partial_path
    }

    pub fn block_size(&self) -> Option<u64> {
        self.has_block_hashes.then_some(self.block_size)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn peers(&self) -> &[PeerId] {
        &self.peers
    }

    /// everything there is to download has been downloaded. A list of unknown size is
    /// never complete.
    pub fn is_complete(&self) -> bool {
        (self.size > 0 || !self.is_list) && self.have == self.size
    }

    /// whether the job may be scheduled at all, links add their own errors on top.
    pub fn is_enabled(&self) -> bool {
        self.priority.is_enabled()
            && ((self.size == 0 && self.is_list) || self.size != self.have)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            hash: self.hash,
            is_list: self.is_list,
            size: self.size,
            have: self.have,
            priority: self.priority,
            error: self.error.clone(),
            destination: self.destination.clone(),
            active: self.active,
            peers: self.peers.clone(),
        }
    }
}

/// Owned copy of the user visible state of a [`Job`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub hash: TreeHash,
    pub is_list: bool,
    pub size: u64,
    pub have: u64,
    pub priority: Priority,
    pub error: Option<JobError>,
    pub destination: PathBuf,
    pub active: bool,
    pub peers: Vec<PeerId>,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::MIN_BLOCK_SIZE;
    use rstest::rstest;

    #[rstest]
    fn test_priority_order() {
        let mut all = vec![
            Priority::VeryHigh,
            Priority::Off,
            Priority::Low,
            Priority::Error,
            Priority::Medium,
        ];
        all.sort();
        assert_eq!(
            all,
            [
                Priority::Error,
                Priority::Off,
                Priority::Low,
                Priority::Medium,
                Priority::VeryHigh
            ]
        );
        assert!(!Priority::Off.is_enabled());
        assert!(Priority::VeryLow.is_enabled());
    }

    #[rstest]
    #[case("high", Priority::High)]
    #[case("Very_Low", Priority::VeryLow)]
    #[case("-64", Priority::Off)]
    #[case("2", Priority::VeryHigh)]
    fn test_priority_parse(#[case] input: &str, #[case] expected: Priority) {
        assert_eq!(input.parse::<Priority>().unwrap(), expected);
    }

    #[rstest]
    #[case("-65")]
    #[case("5")]
    #[case("urgent")]
    fn test_priority_parse_rejects(#[case] input: &str) {
        assert!(input.parse::<Priority>().is_err());
    }

    #[rstest]
    #[case(0, true, MIN_TTHL_SIZE)]
    #[case(MIN_TTHL_SIZE, true, MIN_TTHL_SIZE)]
    #[case(MIN_TTHL_SIZE + 1, false, 0)]
    fn test_block_hashes_for_new_file(
        #[case] size: u64,
        #[case] has_block_hashes: bool,
        #[case] block_size: u64,
    ) {
        let job = Job::new_file(TreeHash::tiger(b"f"), size, "/a".into(), "/inc/a".into());
        assert_eq!(job.has_block_hashes, has_block_hashes);
        assert_eq!(job.block_size, block_size);
    }

    #[rstest]
    fn test_block_size_from_row() {
        let row = JobRow {
            hash: TreeHash::tiger(b"f"),
            size: 3_000_000,
            destination: "/dl/f".into(),
            priority: Priority::Low,
            error: None,
            block_hash_len: 3,
        };
        let job = Job::from_row(row, "/inc/f".into());
        assert_eq!(job.block_size(), Some(MIN_BLOCK_SIZE));
        assert_eq!(job.priority(), Priority::Low);
    }

    #[rstest]
    fn test_enabled() {
        let peer = PeerId::new(7);
        let mut list = Job::new_list(peer, "/fl/x".into(), "/inc/x".into(), ListRequest::default());
        assert!(list.is_enabled());
        assert!(!list.is_complete());
        list.size = 100;
        list.have = 100;
        assert!(!list.is_enabled());
        assert!(list.is_complete());

        let mut file = Job::new_file(TreeHash::tiger(b"f"), 10, "/a".into(), "/inc/a".into());
        assert!(file.is_enabled());
        file.priority = Priority::Off;
        assert!(!file.is_enabled());
    }
}
