//! Receive pipeline: block hash list ingestion, binding a [`Receiver`] to an active
//! transfer, taking its report back, and placing finished files.

mod receiver;
mod verify;

pub use receiver::{ReceiveReport, Receiver};
pub use verify::BlockVerifier;

use crate::config::MIN_BLOCK_SIZE;
use crate::error::{ErrorKind, JobError};
use crate::events::QueueEvent;
use crate::peer_id::PeerId;
use crate::prelude::*;
use crate::queue::{DownloadQueue, Job, Priority};
use crate::tth::{block_size_for, num_blocks, root_of, shrink_block_hashes, TreeHash};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

impl DownloadQueue {
    /// Takes the block hash list of a large file as sent by `peer`.
    ///
    /// The list must describe the whole file and hash up to the job's root, otherwise the
    /// peer is marked as a bad source for this job. Lists finer than [`MIN_BLOCK_SIZE`] are
    /// collapsed before they are stored.
    #[instrument(skip(self, hashes), fields(len = hashes.len()))]
    pub fn set_block_hashes(&mut self, peer: PeerId, hash: &TreeHash, hashes: Vec<TreeHash>) {
        let Some(job) = self.job(hash) else {
            return;
        };
        if job.is_list || job.has_block_hashes {
            debug!("block hashes not needed");
            return;
        }

        let size = job.size;
        let expected = num_blocks(size, block_size_for(size, hashes.len()));
        if hashes.len() != expected || root_of(&hashes) != Some(*hash) {
            self.set_peer_error(peer, Some(*hash), ErrorKind::HashTreeMismatch.into());
            return;
        }

        let (hashes, block_size) = shrink_block_hashes(size, hashes, MIN_BLOCK_SIZE);
        if let Err(e) = self.store.set_block_hashes(hash, &hashes) {
            warn!("failed to store block hashes: {e:#}");
            return;
        }

        if let Some(job) = self.jobs.get_mut(hash) {
            debug!(block_size, blocks = hashes.len(), "block hashes stored");
            job.has_block_hashes = true;
            job.block_size = block_size;
        }
        self.events.emit(QueueEvent::JobUpdated(*hash));
    }

    /// Lends the partial file and hash state of `hash` to a receiver for the transfer `peer`
    /// is running. Returns None when the peer is not transferring this job, another receiver
    /// is bound, the block hashes are still missing or the partial file can not be opened.
    #[instrument(skip(self))]
    pub fn bind_receiver(&mut self, peer: PeerId, hash: &TreeHash) -> Option<Receiver> {
        let transferring = self
            .peers
            .get(&peer)
            .is_some_and(|queue| queue.state.active_link() == Some(*hash));
        if !transferring {
            warn!("peer is not transferring this job");
            return None;
        }

        let job = self.jobs.get_mut(hash)?;
        if job.receiving {
            warn!("a receiver is already bound");
            return None;
        }
        if !job.is_list && !job.has_block_hashes {
            warn!("block hashes are required before any content");
            return None;
        }

        let file = match open_partial(job) {
            Ok(file) => file,
            Err(e) => {
                self.set_error(hash, JobError::io(ErrorKind::PartialIo, &e));
                return None;
            }
        };

        job.receiving = true;
        let hasher = std::mem::take(&mut job.hasher);
        let verifier = (!job.is_list).then(|| {
            BlockVerifier::new(
                job.hash,
                job.size,
                job.block_size,
                Arc::clone(&self.store),
                hasher,
            )
        });
        debug!(have = job.have, "receiver bound");

        Some(Receiver {
            peer,
            hash: *hash,
            is_list: job.is_list,
            size: job.size,
            have: job.have,
            block_size: job.block_size,
            file,
            verifier,
            error: None,
            peer_error: None,
        })
    }

    /// A receiver unbound. Takes back its state and acts on what it found: errors, a
    /// rolled back block, a finished file.
    #[instrument(skip(self))]
    pub fn receive_done(&mut self, report: ReceiveReport) {
        let hash = report.hash;
        let Some(job) = self.jobs.get_mut(&hash) else {
            return;
        };
        job.receiving = false;
        if job.pending_delete {
            drop(report.file);
            self.discard_job(&hash);
            return;
        }

        job.have = report.have;
        job.partial = Some(report.file);
        job.hasher = report.hasher;

        // the size of a list may arrive after its receiver was bound.
        let mut overrun = None;
        if job.is_list && job.size > 0 && job.have > job.size {
            debug!(have = job.have, size = job.size, "cutting file list to its announced size");
            job.have = job.size;
            if let Some(file) = &mut job.partial {
                overrun = receiver::truncate(file, job.size).err();
            }
        }
        self.events.emit(QueueEvent::JobUpdated(hash));

        if let Some(e) = overrun {
            self.set_error(&hash, JobError::io(ErrorKind::PartialIo, &e));
        }

        if let Some(error) = report.error {
            self.set_error(&hash, error);
        }
        if let Some(error) = report.peer_error {
            self.set_peer_error(report.peer, Some(hash), error);
        }

        let finished = self
            .jobs
            .get(&hash)
            .is_some_and(|job| job.is_complete() && job.priority != Priority::Error);
        if finished {
            self.finish_job(&hash);
        } else {
            // other peers were kept off the job while the receiver held it.
            self.request_rescan();
        }
    }

    /// Moves a fully downloaded job to its destination and lets go of it.
    ///
    /// A failed move disables the job but keeps its partial file and row, raising the
    /// priority again retries.
    pub(crate) fn finish_job(&mut self, hash: &TreeHash) {
        let Some(job) = self.jobs.get_mut(hash) else {
            return;
        };
        drop(job.partial.take());
        if job.priority == Priority::Error {
            return;
        }

        match place(job) {
            Ok(path) => {
                info!("finished `{}`", path.display());
                if let (Some(request), Some(peer)) = (&job.list, job.peers.first()) {
                    self.events.emit(QueueEvent::ListReady {
                        peer: *peer,
                        path,
                        select: request.select.clone(),
                        open: request.open,
                        match_queue: request.match_queue,
                    });
                }
            }
            Err(e) => {
                self.set_error(hash, JobError::io(ErrorKind::DestinationIo, &e));
            }
        }

        self.check_removable(hash, true);
    }
}

/// the partial file cut to the verified length, positioned for appending.
fn open_partial(job: &mut Job) -> io::Result<File> {
    let mut file = match job.partial.take() {
        Some(file) => file,
        None => OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&job.partial_path)?,
    };
    receiver::truncate(&mut file, job.have)?;
    Ok(file)
}

fn place(job: &Job) -> io::Result<PathBuf> {
    if job.size == 0 && !job.partial_path.exists() {
        File::create(&job.partial_path)?;
    }
    if let Some(parent) = job.destination.parent() {
        fs::create_dir_all(parent)?;
    }

    // a newer list replaces the old one, files never overwrite anything.
    let target = if job.is_list {
        job.destination.clone()
    } else {
        free_path(&job.destination)
    };

    if let Err(e) = fs::rename(&job.partial_path, &target) {
        debug!("rename failed ({e}), copying instead");
        fs::copy(&job.partial_path, &target)?;
        fs::remove_file(&job.partial_path)?;
    }
    Ok(target)
}

/// `path`, or the first of `path.1`, `path.2`, ... that does not exist.
fn free_path(path: &Path) -> PathBuf {
    let mut candidate = path.to_path_buf();
    let mut n = 0u32;
    while candidate.exists() {
        n += 1;
        let mut name = path.as_os_str().to_owned();
        name.push(format!(".{n}"));
        candidate = PathBuf::from(name);
    }
    candidate
}
