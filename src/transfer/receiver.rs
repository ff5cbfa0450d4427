use super::verify::BlockVerifier;
use crate::error::{ErrorKind, JobError};
use crate::peer_id::PeerId;
use crate::prelude::*;
use crate::tth::{TreeHash, TreeHasher};
use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};

/// Writes one transfer into a job's partial file, verifying as it goes.
///
/// Owns the partial file and the hash state of the job from
/// [`bind_receiver`](crate::queue::DownloadQueue::bind_receiver) until [`Receiver::finish`];
/// it may run on any thread. Nothing it finds out reaches the queue before the
/// [`ReceiveReport`] is handed back.
pub struct Receiver {
    pub(crate) peer: PeerId,
    pub(crate) hash: TreeHash,
    pub(crate) is_list: bool,
    pub(crate) size: u64,
    pub(crate) have: u64,
    pub(crate) block_size: u64,
    pub(crate) file: File,
    pub(crate) verifier: Option<BlockVerifier>,
    pub(crate) error: Option<JobError>,
    pub(crate) peer_error: Option<JobError>,
}

impl Receiver {
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn hash(&self) -> TreeHash {
        self.hash
    }

    /// bytes on disk, also the offset the next write goes to.
    pub fn have(&self) -> u64 {
        self.have
    }

    /// Appends a chunk of the transfer. Returns false once the transfer should stop: the file
    /// is complete or something went wrong, see the report.
    pub fn write(&mut self, buf: &[u8]) -> bool {
        if self.error.is_some() || self.peer_error.is_some() {
            return false;
        }

        let buf = if self.unbounded() {
            buf
        } else {
            let left = self.size.saturating_sub(self.have);
            &buf[..buf.len().min(usize::try_from(left).unwrap_or(usize::MAX))]
        };

        if let Err(e) = self.file.write_all(buf) {
            self.error = Some(JobError::io(ErrorKind::PartialIo, &e));
            return false;
        }
        let offset = self.have;
        self.have += buf.len() as u64;

        if let Some(verifier) = &mut self.verifier {
            if let Err(block) = verifier.update(offset, buf) {
                self.rewind(block);
                return false;
            }
        }

        self.unbounded() || self.have < self.size
    }

    /// a list whose size the peer has not told yet.
    fn unbounded(&self) -> bool {
        self.is_list && self.size == 0
    }

    /// drops everything from the start of `block` on.
    fn rewind(&mut self, block: usize) {
        self.have = block as u64 * self.block_size;
        warn!(peer = %self.peer, hash = %self.hash, "hash of block {block} does not match, resuming at {}", self.have);
        self.peer_error = Some(JobError::detail(
            ErrorKind::BlockHashMismatch,
            format!("Hash for block {block} does not match."),
        ));

        if let Err(e) = truncate(&mut self.file, self.have) {
            self.error = Some(JobError::io(ErrorKind::PartialIo, &e));
        }
    }

    pub fn finish(self) -> ReceiveReport {
        debug!(peer = %self.peer, hash = %self.hash, have = self.have, "receiver done");
        ReceiveReport {
            peer: self.peer,
            hash: self.hash,
            have: self.have,
            file: self.file,
            hasher: self
                .verifier
                .map(BlockVerifier::into_hasher)
                .unwrap_or_default(),
            error: self.error,
            peer_error: self.peer_error,
        }
    }
}

pub(crate) fn truncate(file: &mut File, len: u64) -> io::Result<()> {
    file.set_len(len)?;
    file.seek(SeekFrom::Start(len))?;
    Ok(())
}

/// What a [`Receiver`] hands back to the queue when it unbinds.
pub struct ReceiveReport {
    pub peer: PeerId,
    pub hash: TreeHash,
    pub have: u64,
    pub(crate) file: File,
    pub(crate) hasher: TreeHasher,
    /// fatal to the job.
    pub error: Option<JobError>,
    /// only this peer's offer of the job is affected.
    pub peer_error: Option<JobError>,
}

impl std::fmt::Debug for ReceiveReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiveReport")
            .field("peer", &self.peer)
            .field("hash", &self.hash)
            .field("have", &self.have)
            .field("error", &self.error)
            .field("peer_error", &self.peer_error)
            .finish_non_exhaustive()
    }
}
