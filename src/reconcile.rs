use crate::config::QueueConfig;
use crate::events::Events;
use crate::network::PeerNetwork;
use crate::prelude::*;
use crate::queue::{DownloadQueue, Job, Priority};
use crate::store::QueueStore;
use crate::transfer::BlockVerifier;
use crate::tth::{TreeHash, TreeHasher};
use anyhow::Context;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

const REPLAY_BUF_SIZE: usize = 10 * 1024;

impl DownloadQueue {
    /// Loads the queue from `store` and brings it in line with what is on disk.
    #[instrument(skip_all)]
    pub fn startup(
        config: QueueConfig,
        store: Arc<dyn QueueStore>,
        network: Box<dyn PeerNetwork>,
        events: Events,
    ) -> anyhow::Result<Self> {
        config.create_dirs()?;
        let mut queue = Self::new(config, store, network, events);

        let rows = queue.store.load_jobs().context("load queued jobs")?;
        for row in rows {
            let partial_path = queue.config.partial_path(&row.hash);
            let mut job = Job::from_row(row, partial_path);
            reconcile_partial(&mut job, &queue.store);
            queue.insert_job(job);
        }

        let links = queue.store.load_links().context("load queued peers")?;
        for row in links {
            if !queue.jobs.contains_key(&row.hash) {
                warn!(peer = %row.peer, hash = %row.hash, "dropping link to unknown job");
                continue;
            }
            queue.add_link(row.hash, row.peer, row.error);
        }

        // downloaded before the last shutdown but never placed
        let finished: Vec<TreeHash> = queue
            .jobs
            .values()
            .filter(|job| job.is_complete() && job.priority != Priority::Error)
            .map(|job| job.hash)
            .collect();
        for hash in finished {
            queue.finish_job(&hash);
        }

        queue.clean_lists();
        queue.request_rescan();
        info!(
            jobs = queue.jobs.len(),
            peers = queue.peers.len(),
            "download queue loaded"
        );
        Ok(queue)
    }

    /// Leaves the disk in a state [`DownloadQueue::startup`] can pick up again.
    #[instrument(skip_all)]
    pub fn shutdown(&mut self) -> anyhow::Result<()> {
        // lists are not kept across runs, neither are their partial files
        for job in self.jobs.values_mut().filter(|job| job.is_list) {
            drop(job.partial.take());
            remove_file(&job.partial_path);
        }
        self.clean_lists();
        self.store.flush().context("flush queue store")
    }

    /// Periodic cleanup, also flushes the store. Returns the number of partial files and
    /// file lists deleted.
    pub fn sweep(&mut self) -> (usize, usize) {
        let cleaned = (self.clean_incoming(), self.clean_lists());
        if let Err(e) = self.store.flush() {
            warn!("failed to flush the queue store: {e:#}");
        }
        cleaned
    }

    /// Deletes partial files no job refers to. Returns the number of files deleted.
    #[instrument(skip(self))]
    pub fn clean_incoming(&self) -> usize {
        let entries = match fs::read_dir(&self.config.incoming_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("failed to read {}: {e}", self.config.incoming_dir.display());
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(hash) = name
                .to_str()
                .filter(|name| TreeHash::is_base32_name(name))
                .and_then(|name| TreeHash::from_base32(name).ok())
            else {
                continue;
            };
            if self.jobs.contains_key(&hash) {
                continue;
            }
            debug!("removing orphaned partial file {hash}");
            if remove_file(&entry.path()) {
                removed += 1;
            }
        }
        removed
    }

    /// Deletes downloaded file lists older than the configured maximum age. Returns the
    /// number of files deleted.
    #[instrument(skip(self))]
    pub fn clean_lists(&self) -> usize {
        let entries = match fs::read_dir(&self.config.list_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("failed to read {}: {e}", self.config.list_dir.display());
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries.flatten() {
            let expired = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age > self.config.filelist_max_age);
            if expired && remove_file(&entry.path()) {
                removed += 1;
            }
        }
        if removed > 0 {
            info!("removed {removed} old file lists");
        }
        removed
    }
}

fn remove_file(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!("failed to remove {}: {e}", path.display());
            false
        }
    }
}

/// Picks up where a previous run left the partial file of `job`.
///
/// Only whole blocks count as verified. The bytes of a trailing partial block are read back
/// into the job's hash state; if they complete the file they are checked like a received
/// block and dropped on a mismatch.
fn reconcile_partial(job: &mut Job, store: &Arc<dyn QueueStore>) {
    job.have = 0;
    job.hasher = TreeHasher::new();

    let len = match fs::metadata(&job.partial_path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return,
        Err(e) => {
            warn!("failed to stat {}: {e}", job.partial_path.display());
            return;
        }
    };
    if !job.has_block_hashes {
        // nothing was accepted without block hashes, whatever is there gets truncated
        return;
    }
    if len > job.size {
        warn!(
            "partial file {} is larger than the file, starting over",
            job.partial_path.display()
        );
        return;
    }

    let block_start = len - len % job.block_size;
    job.have = block_start;
    if block_start == len {
        return;
    }

    let mut verifier = BlockVerifier::new(
        job.hash,
        job.size,
        job.block_size,
        Arc::clone(store),
        TreeHasher::new(),
    );
    match replay(&job.partial_path, block_start, len, &mut verifier) {
        Ok(true) => {
            job.have = len;
            job.hasher = verifier.into_hasher();
        }
        Ok(false) => {
            warn!(hash = %job.hash, "last block of the partial file does not match, dropping it");
        }
        Err(e) => {
            warn!("failed to read back {}: {e}", job.partial_path.display());
        }
    }
    debug!(hash = %job.hash, have = job.have, "partial file reconciled");
}

/// feeds `start..end` of the file at `path` to `verifier`. Ok(false) on a block mismatch.
fn replay(path: &Path, start: u64, end: u64, verifier: &mut BlockVerifier) -> io::Result<bool> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(start))?;

    let mut buf = [0u8; REPLAY_BUF_SIZE];
    let mut offset = start;
    while offset < end {
        let want = ((end - offset) as usize).min(buf.len());
        file.read_exact(&mut buf[..want])?;
        if verifier.update(offset, &buf[..want]).is_err() {
            return Ok(false);
        }
        offset += want as u64;
    }
    Ok(true)
}
