//! The download queue: jobs keyed by content hash, the peers offering them, and the
//! scheduler deciding whom to connect to and what to fetch next.
//!
//! Everything here runs on one event loop. The only state that leaves it is a job's partial
//! file and hash state, lent to a [`Receiver`](crate::transfer::Receiver) while bound.

mod job;
mod jobs;
mod peer;
mod scheduler;

pub use job::{Job, JobSnapshot, ListRequest, Priority};
pub use jobs::{FileEntry, MatchResult};
pub use peer::{PeerLink, PeerQueue, PeerState};

use crate::config::QueueConfig;
use crate::error::JobError;
use crate::events::{Events, QueueEvent};
use crate::network::PeerNetwork;
use crate::peer_id::PeerId;
use crate::prelude::*;
use crate::store::QueueStore;
use crate::tth::TreeHash;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;

pub struct DownloadQueue {
    pub(crate) config: QueueConfig,
    pub(crate) store: Arc<dyn QueueStore>,
    pub(crate) network: Box<dyn PeerNetwork>,
    pub(crate) events: Events,
    pub(crate) jobs: HashMap<TreeHash, Job>,
    pub(crate) peers: HashMap<PeerId, PeerQueue>,
    /// when the pending scheduling pass runs, None if none is pending.
    pub(crate) rescan_at: Option<Instant>,
}

impl DownloadQueue {
    /// An empty queue. See [`DownloadQueue::startup`] for one loaded from its store.
    pub fn new(
        config: QueueConfig,
        store: Arc<dyn QueueStore>,
        network: Box<dyn PeerNetwork>,
        events: Events,
    ) -> Self {
        Self {
            config,
            store,
            network,
            events,
            jobs: HashMap::new(),
            peers: HashMap::new(),
            rescan_at: None,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// a queued job. Jobs being removed are no longer visible.
    pub fn job(&self, hash: &TreeHash) -> Option<&Job> {
        self.jobs.get(hash).filter(|job| !job.pending_delete)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values().filter(|job| !job.pending_delete)
    }

    /// snapshots of all jobs ordered by destination.
    pub fn snapshot(&self) -> Vec<JobSnapshot> {
        let mut jobs: Vec<_> = self.jobs().map(Job::snapshot).collect();
        jobs.sort_by(|a, b| a.destination.cmp(&b.destination));
        jobs
    }

    pub fn peer(&self, peer: PeerId) -> Option<&PeerQueue> {
        self.peers.get(&peer)
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerQueue> {
        self.peers.values()
    }

    /// Runs a store write, a failure is logged and otherwise ignored.
    pub(crate) fn store_write(&self, write: impl FnOnce(&dyn QueueStore) -> anyhow::Result<()>) {
        if let Err(e) = write(self.store.as_ref()) {
            warn!("failed to update the queue store: {e:#}");
        }
    }

    pub(crate) fn insert_job(&mut self, job: Job) {
        let hash = job.hash;
        self.jobs.insert(hash, job);
        self.events.emit(QueueEvent::JobAdded(hash));
    }

    /// Associates a peer with a job. Neither persisted nor followed by a scheduling pass.
    pub(crate) fn add_link(&mut self, hash: TreeHash, peer: PeerId, error: Option<JobError>) {
        let Some(job) = self.jobs.get_mut(&hash) else {
            warn!(%peer, %hash, "link to a job that is not queued");
            return;
        };
        if job.peers.contains(&peer) {
            return;
        }
        if job.is_list && !job.peers.is_empty() {
            warn!(%peer, %hash, "file lists are only fetched from their owner");
            return;
        }
        job.peers.push(peer);

        let queue = self
            .peers
            .entry(peer)
            .or_insert_with(|| PeerQueue::new(peer));
        queue.queue.push(PeerLink { hash, error });
        queue.sort(&self.jobs);

        self.events.emit(QueueEvent::LinkAdded { hash, peer });
    }

    /// Breaks the association between a job and a peer, disconnecting the peer if it is
    /// transferring that job right now. Not persisted.
    pub(crate) fn drop_link(&mut self, hash: TreeHash, peer: PeerId) {
        if let Some(job) = self.jobs.get_mut(&hash) {
            job.peers.retain(|p| *p != peer);
        }

        let Some(queue) = self.peers.get_mut(&peer) else {
            return;
        };
        let before = queue.queue.len();
        queue.queue.retain(|link| link.hash != hash);
        if queue.queue.len() == before {
            return;
        }
        self.events.emit(QueueEvent::LinkRemoved { hash, peer });

        let state = queue.state;
        match state {
            PeerState::Active { conn, link } if link == hash => {
                debug!(%peer, %hash, "job taken away mid transfer, disconnecting");
                self.network.disconnect(peer, conn);
                self.set_state(peer, PeerState::waiting());
            }
            _ => self.settle_peer(peer),
        }
    }

    /// re-sorts the queues of every peer linked to `hash`.
    pub(crate) fn resort_job_peers(&mut self, hash: &TreeHash) {
        let Some(job) = self.jobs.get(hash) else {
            return;
        };
        for peer in &job.peers {
            if let Some(queue) = self.peers.get_mut(peer) {
                queue.sort(&self.jobs);
            }
        }
    }

    /// Moves a peer to a new state, releasing the job it was transferring.
    pub(crate) fn set_state(&mut self, peer: PeerId, state: PeerState) {
        let Some(queue) = self.peers.get_mut(&peer) else {
            return;
        };
        let old = std::mem::replace(&mut queue.state, state);
        debug!(%peer, from = old.name(), to = state.name(), "peer state");

        if let Some(hash) = old.active_link() {
            if state.active_link() != Some(hash) {
                if let Some(job) = self.jobs.get_mut(&hash) {
                    job.active = false;
                }
                self.check_removable(&hash, false);
            }
        }

        self.settle_peer(peer);
    }

    /// forgets a peer with nothing queued and no connection, then schedules a pass.
    pub(crate) fn settle_peer(&mut self, peer: PeerId) {
        let garbage = self
            .peers
            .get(&peer)
            .is_some_and(|q| q.state == PeerState::NotConnected && q.queue.is_empty());
        if garbage {
            debug!(%peer, "nothing left to fetch, forgetting peer");
            self.peers.remove(&peer);
        }
        self.request_rescan();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::{harness, Harness};
    use rstest::rstest;

    #[rstest]
    fn test_links_stay_consistent(mut harness: Harness) {
        let (p1, p2) = (PeerId::new(1), PeerId::new(2));
        let hash = harness.enqueue(p1, "a", 100);
        harness.queue.match_file(p2, &hash);

        assert_eq!(harness.queue.job(&hash).unwrap().peers(), [p1, p2]);
        assert!(harness.queue.peer(p2).unwrap().link(&hash).is_some());

        harness.queue.remove_peer(p1, Some(hash));
        assert_eq!(harness.queue.job(&hash).unwrap().peers(), [p2]);
        // not connected and nothing queued
        assert!(harness.queue.peer(p1).is_none());
    }

    #[rstest]
    fn test_waiting_peer_survives_empty_queue(mut harness: Harness) {
        let peer = PeerId::new(1);
        let hash = harness.enqueue(peer, "a", 100);
        harness.queue.set_state(peer, PeerState::waiting());

        harness.queue.remove_peer(peer, Some(hash));
        assert!(harness.queue.peer(peer).unwrap().links().is_empty());

        harness.queue.set_state(peer, PeerState::NotConnected);
        assert!(harness.queue.peer(peer).is_none());
    }
}
