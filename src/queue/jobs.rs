use super::job::{Job, ListRequest, Priority};
use super::DownloadQueue;
use crate::error::JobError;
use crate::events::QueueEvent;
use crate::peer_id::PeerId;
use crate::prelude::*;
use crate::store::LinkRow;
use crate::tth::TreeHash;
use std::path::{Path, PathBuf};

/// Outcome of offering an already queued file from another peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    NotQueued,
    AlreadyLinked,
    Added,
}

/// A decoded entry of a peer's file list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEntry {
    File {
        name: String,
        size: u64,
        hash: Option<TreeHash>,
    },
    Directory {
        name: String,
        children: Vec<FileEntry>,
    },
}

impl FileEntry {
    pub fn name(&self) -> &str {
        match self {
            Self::File { name, .. } | Self::Directory { name, .. } => name,
        }
    }
}

impl DownloadQueue {
    /// Queues a file from `peer`. `destination` is relative to the download directory.
    /// Returns false if a job with this content hash is already queued.
    #[instrument(skip(self, destination), fields(destination = %destination.as_ref().display()))]
    pub fn enqueue_file(
        &mut self,
        peer: PeerId,
        hash: TreeHash,
        size: u64,
        destination: impl AsRef<Path>,
    ) -> bool {
        if self.jobs.contains_key(&hash) {
            return false;
        }

        let job = Job::new_file(
            hash,
            size,
            self.config.download_dir.join(destination),
            self.config.partial_path(&hash),
        );
        debug!(%peer, "queueing {}", job.destination.display());
        let row = job.to_row();
        self.store_write(|store| store.upsert_job(&row));
        self.insert_job(job);

        self.add_link(hash, peer, None);
        self.store_write(|store| {
            store.upsert_link(&LinkRow {
                hash,
                peer,
                error: None,
            })
        });

        if size == 0 {
            // nothing to transfer, place the empty file right away.
            self.finish_job(&hash);
        }
        self.request_rescan();
        true
    }

    /// Queues the file list of `peer`. Queueing it again only adds the open/match requests.
    #[instrument(skip(self))]
    pub fn enqueue_list(
        &mut self,
        peer: PeerId,
        select: Option<String>,
        open: bool,
        match_queue: bool,
    ) {
        let hash = peer.list_hash();
        if let Some(job) = self.jobs.get_mut(&hash) {
            if job.pending_delete {
                warn!(%peer, "file list is being removed, not queueing it again yet");
                return;
            }
            let request = job.list.get_or_insert_with(ListRequest::default);
            request.open |= open;
            request.match_queue |= match_queue;
            warn!(%peer, "file list already queued, updating flags");
            return;
        }

        let job = Job::new_list(
            peer,
            self.config.list_path(peer),
            self.config.partial_path(&hash),
            ListRequest {
                select,
                open,
                match_queue,
            },
        );
        debug!(%peer, "queueing file list");
        self.insert_job(job);
        self.add_link(hash, peer, None);
        self.request_rescan();
    }

    /// Adds `peer` as a source of an already queued file.
    pub fn match_file(&mut self, peer: PeerId, hash: &TreeHash) -> MatchResult {
        let Some(job) = self.job(hash) else {
            return MatchResult::NotQueued;
        };
        if job.peers.contains(&peer) {
            return MatchResult::AlreadyLinked;
        }
        if job.is_list {
            return MatchResult::NotQueued;
        }

        self.add_link(*hash, peer, None);
        self.store_write(|store| {
            store.upsert_link(&LinkRow {
                hash: *hash,
                peer,
                error: None,
            })
        });
        self.request_rescan();
        MatchResult::Added
    }

    /// Matches every hashed file below `entry` against the queue.
    /// Returns how many files are queued and for how many of those `peer` was new.
    pub fn match_tree(&mut self, peer: PeerId, entry: &FileEntry) -> (usize, usize) {
        match entry {
            FileEntry::File {
                hash: Some(hash), ..
            } => match self.match_file(peer, hash) {
                MatchResult::NotQueued => (0, 0),
                MatchResult::AlreadyLinked => (1, 0),
                MatchResult::Added => (1, 1),
            },
            FileEntry::File { hash: None, .. } => (0, 0),
            FileEntry::Directory { children, .. } => {
                children.iter().fold((0, 0), |(found, added), child| {
                    let (f, a) = self.match_tree(peer, child);
                    (found + f, added + a)
                })
            }
        }
    }

    /// Queues `entry` and, for a directory, everything below it under `base/<name>`.
    /// Entries below the top level whose name matches `exclude` are skipped.
    /// Returns the number of newly queued files.
    pub fn enqueue_tree(
        &mut self,
        peer: PeerId,
        entry: &FileEntry,
        base: Option<&Path>,
        exclude: &dyn Fn(&str) -> bool,
    ) -> usize {
        if base.is_some() && exclude(entry.name()) {
            info!("ignoring `{}`: excluded", entry.name());
            return 0;
        }

        let name = match base {
            Some(base) => base.join(entry.name()),
            None => PathBuf::from(entry.name()),
        };
        match entry {
            FileEntry::File {
                size,
                hash: Some(hash),
                ..
            } => {
                if self.enqueue_file(peer, *hash, *size, &name) {
                    1
                } else {
                    info!("ignoring `{}`: already queued", name.display());
                    0
                }
            }
            FileEntry::File { hash: None, .. } => {
                info!("ignoring `{}`: no content hash", name.display());
                0
            }
            FileEntry::Directory { children, .. } => children
                .iter()
                .map(|child| self.enqueue_tree(peer, child, Some(&name), exclude))
                .sum(),
        }
    }

    /// Removes a job. A bound receiver keeps the job's memory and partial file alive until
    /// it reports back, everything else goes now.
    #[instrument(skip(self))]
    pub fn remove(&mut self, hash: &TreeHash) {
        let Some(job) = self.jobs.get_mut(hash) else {
            return;
        };
        if job.pending_delete {
            return;
        }
        job.pending_delete = true;
        let is_list = job.is_list;

        for peer in job.peers.clone() {
            self.drop_link(*hash, peer);
        }
        self.events.emit(QueueEvent::JobRemoved(*hash));
        if !is_list {
            self.store_write(|store| store.delete_job(hash));
        }

        if self.jobs.get(hash).is_some_and(|job| job.receiving) {
            debug!("receiver still bound, deferring cleanup");
            return;
        }
        self.discard_job(hash);
    }

    /// frees a job marked for deletion, together with its partial file.
    pub(crate) fn discard_job(&mut self, hash: &TreeHash) {
        let Some(mut job) = self.jobs.remove(hash) else {
            return;
        };
        drop(job.partial.take());
        match std::fs::remove_file(&job.partial_path) {
            Ok(()) => debug!("removed {}", job.partial_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove {}: {e}", job.partial_path.display()),
        }
    }

    /// Removes the job once it is complete and nobody holds it anymore.
    ///
    /// With `just_finished` the job was placed a moment ago: its row is dropped so it is not
    /// loaded again, and every peer except the one still transferring it lets go.
    pub(crate) fn check_removable(&mut self, hash: &TreeHash, just_finished: bool) {
        let Some(job) = self.jobs.get(hash) else {
            return;
        };
        if job.pending_delete {
            return;
        }

        if just_finished {
            let persisted = !job.is_list;
            // a failed placement keeps the row so the next start can place it again.
            let keep_row = job.priority == Priority::Error;
            if persisted && !keep_row {
                self.store_write(|store| store.delete_job(hash));
            }
            let transferring = job
                .peers
                .iter()
                .copied()
                .find(|peer| self.peer_is_transferring(*peer, hash));
            for peer in job.peers.clone() {
                if Some(peer) != transferring {
                    self.drop_link(*hash, peer);
                    if persisted && keep_row {
                        self.store_write(|store| store.delete_link(peer, hash));
                    }
                }
            }
            self.resort_job_peers(hash);
        }

        let removable = self.jobs.get(hash).is_some_and(|job| {
            !job.active && !job.receiving && job.is_complete() && job.priority != Priority::Error
        });
        if removable {
            debug!(%hash, "download complete, dropping job");
            self.remove(hash);
        }
    }

    fn peer_is_transferring(&self, peer: PeerId, hash: &TreeHash) -> bool {
        self.peers
            .get(&peer)
            .is_some_and(|queue| queue.state.active_link() == Some(*hash))
    }

    /// Changes a job's priority. Enabling a disabled job clears its error and, for a job
    /// that is downloaded but could not be placed, retries the placement.
    #[instrument(skip(self))]
    pub fn set_priority(&mut self, hash: &TreeHash, priority: Priority) {
        let Some(job) = self.jobs.get_mut(hash).filter(|job| !job.pending_delete) else {
            return;
        };
        let enabled = !job.priority.is_enabled() && priority.is_enabled();
        job.priority = priority;
        if priority.is_enabled() {
            job.error = None;
        }

        let (is_list, error) = (job.is_list, job.error.clone());
        if !is_list {
            self.store_write(|store| store.set_job_status(hash, priority, error.as_ref()));
        }
        self.events.emit(QueueEvent::JobUpdated(*hash));
        self.resort_job_peers(hash);

        if enabled {
            let placeable = self
                .jobs
                .get(hash)
                .is_some_and(|job| job.is_complete() && !job.active && !job.receiving);
            if placeable {
                self.finish_job(hash);
            }
            self.request_rescan();
        }
    }

    /// Disables a job because of `kind`.
    pub fn set_error(&mut self, hash: &TreeHash, error: JobError) {
        let Some(job) = self.jobs.get_mut(hash) else {
            return;
        };
        warn!("download of `{}` failed: {error}", job.destination.display());
        job.error = Some(error.clone());
        self.events.emit(QueueEvent::Error {
            hash: *hash,
            peer: None,
            error,
        });
        self.set_priority(hash, Priority::Error);
    }

    /// Records an error for one peer, on one job or with `hash` = None on all of its jobs.
    /// The jobs stay available from other peers.
    #[instrument(skip(self))]
    pub fn set_peer_error(&mut self, peer: PeerId, hash: Option<TreeHash>, error: JobError) {
        if hash.is_some_and(|hash| !self.jobs.contains_key(&hash)) {
            return;
        }
        let Some(queue) = self.peers.get_mut(&peer) else {
            return;
        };

        let target = hash.map_or_else(|| "all".to_string(), |hash| hash.to_string());
        info!(%peer, "setting download error for {target}: {error}");
        let mut touched = Vec::new();
        for link in queue.queue.iter_mut() {
            if hash.is_some_and(|hash| hash != link.hash) {
                continue;
            }
            link.error = Some(error.clone());
            touched.push(link.hash);
        }
        queue.sort(&self.jobs);

        for hash in touched {
            self.events.emit(QueueEvent::LinkUpdated { hash, peer });
            self.events.emit(QueueEvent::Error {
                hash,
                peer: Some(peer),
                error: error.clone(),
            });
        }
        self.store_write(|store| store.set_link_status(peer, hash.as_ref(), Some(&error)));
        self.request_rescan();
    }

    /// Drops `peer` as a source of one job, or with `hash` = None of every job.
    /// A file list left without its owner is removed as well.
    #[instrument(skip(self))]
    pub fn remove_peer(&mut self, peer: PeerId, hash: Option<TreeHash>) {
        let Some(queue) = self.peers.get(&peer) else {
            return;
        };
        let hashes: Vec<_> = match hash {
            Some(hash) => queue
                .queue
                .iter()
                .filter(|link| link.hash == hash)
                .map(|link| link.hash)
                .collect(),
            None => queue.queue.iter().map(|link| link.hash).collect(),
        };

        for hash in hashes {
            self.drop_link(hash, peer);
            let orphaned_list = self
                .jobs
                .get(&hash)
                .is_some_and(|job| job.is_list && job.peers.is_empty());
            if orphaned_list {
                self.remove(&hash);
            }
        }

        match hash {
            Some(hash) => self.store_write(|store| store.delete_link(peer, &hash)),
            None => self.store_write(|store| store.delete_peer_links(peer)),
        }
    }

    /// The transport learned the size of a file list before streaming it.
    pub fn learn_list_size(&mut self, hash: &TreeHash, size: u64) {
        let Some(job) = self.jobs.get_mut(hash).filter(|job| job.is_list) else {
            return;
        };
        job.size = size;
        self.events.emit(QueueEvent::JobUpdated(*hash));
    }
}
