use super::peer::{LinkKey, PeerState};
use super::DownloadQueue;
use crate::config::RESCAN_DELAY;
use crate::error::{ErrorKind, JobError};
use crate::network::{ConnectionId, TransferRequest};
use crate::peer_id::PeerId;
use crate::prelude::*;
use crate::tth::{TreeHash, TreeHasher};
use std::cmp::Ordering;
use std::fs::File;
use tokio::time::Instant;

impl DownloadQueue {
    /// Asks for a scheduling pass. Requests are coalesced: the pass runs once,
    /// [`RESCAN_DELAY`] after the first request since the previous pass.
    pub fn request_rescan(&mut self) {
        if self.rescan_at.is_none() {
            self.rescan_at = Some(Instant::now() + RESCAN_DELAY);
        }
    }

    /// earliest point at which [`DownloadQueue::tick`] has something to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.peers
            .values()
            .filter_map(|queue| match queue.state {
                PeerState::Waiting { until } => Some(until),
                _ => None,
            })
            .chain(self.rescan_at)
            .min()
    }

    /// Fires expired reconnect timers and the pending scheduling pass.
    pub fn tick(&mut self) {
        let now = Instant::now();
        let expired: Vec<PeerId> = self
            .peers
            .values()
            .filter(|queue| matches!(queue.state, PeerState::Waiting { until } if until <= now))
            .map(|queue| queue.id)
            .collect();
        for peer in expired {
            self.set_state(peer, PeerState::NotConnected);
        }

        if self.rescan_at.is_some_and(|at| at <= now) {
            // cleared first, anything requested during the pass gets a pass of its own.
            self.rescan_at = None;
            self.run_scan();
        }
    }

    /// One scheduling pass: connect to the best peers and start transfers on idle
    /// connections until every slot is taken or no peer qualifies.
    #[instrument(skip(self))]
    pub fn run_scan(&mut self) {
        let active = self
            .peers
            .values()
            .filter(|queue| queue.state.is_active())
            .count();
        let mut free_slots = self.config.download_slots.saturating_sub(active);
        if free_slots == 0 {
            trace!("all download slots in use");
            return;
        }

        let mut targets: Vec<PeerId> = self
            .peers
            .keys()
            .copied()
            .filter(|peer| self.is_target(*peer))
            .collect();

        while free_slots > 0 {
            let Some(best) = targets
                .iter()
                .copied()
                .min_by(|a, b| self.compare_peers(*a, *b))
            else {
                break;
            };
            targets.retain(|peer| *peer != best);

            match self.peers.get(&best).map(|queue| queue.state) {
                Some(PeerState::NotConnected) => self.start_connect(best),
                Some(PeerState::Idle { conn }) => {
                    if self.start_transfer(best, conn) {
                        free_slots -= 1;
                    }
                }
                _ => {}
            }

            targets.retain(|peer| self.is_target(*peer));
        }
    }

    /// Whether the scheduler could do something with this peer right now.
    pub fn is_target(&self, peer: PeerId) -> bool {
        let Some(queue) = self.peers.get(&peer) else {
            return false;
        };
        match queue.state {
            PeerState::NotConnected => {
                self.best_candidate(peer).is_some() && self.network.is_online(peer)
            }
            PeerState::Idle { .. } => self.best_candidate(peer).is_some(),
            _ => false,
        }
    }

    /// First job of the peer's queue nobody else is transferring and no receiver still holds.
    /// The scan stops at the first disabled link, the rest of the queue is disabled as well.
    pub fn best_candidate(&self, peer: PeerId) -> Option<TreeHash> {
        let queue = self.peers.get(&peer)?;
        for link in &queue.queue {
            if LinkKey::new(&self.jobs, link).is_disabled() {
                return None;
            }
            if self
                .jobs
                .get(&link.hash)
                .is_some_and(|job| !job.active && !job.receiving)
            {
                return Some(link.hash);
            }
        }
        None
    }

    /// Less is better. An idle peer beats an unconnected one whatever it offers, reusing a
    /// connection is cheaper than opening one. Otherwise the best offered jobs decide.
    fn compare_peers(&self, a: PeerId, b: PeerId) -> Ordering {
        let idle = |peer: PeerId| {
            self.peers
                .get(&peer)
                .is_some_and(|queue| matches!(queue.state, PeerState::Idle { .. }))
        };
        let key = |peer: PeerId| {
            let hash = self.best_candidate(peer)?;
            let queue = self.peers.get(&peer)?;
            let link = queue.link(&hash)?;
            Some(LinkKey::new(&self.jobs, link))
        };

        idle(b)
            .cmp(&idle(a))
            .then_with(|| match (key(a), key(b)) {
                (Some(a), Some(b)) => a.cmp(&b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then(a.cmp(&b))
    }

    fn start_connect(&mut self, peer: PeerId) {
        info!(%peer, "connecting to peer");
        self.set_state(peer, PeerState::Connecting { conn: None });
        self.network.connect(peer);
    }

    fn start_transfer(&mut self, peer: PeerId, conn: ConnectionId) -> bool {
        let Some(hash) = self.best_candidate(peer) else {
            return false;
        };
        let Some(job) = self.jobs.get_mut(&hash) else {
            return false;
        };

        // a list may change between attempts, it is always fetched in one go.
        if job.is_list && job.have > 0 {
            debug!(%peer, "discarding partially downloaded file list");
            job.have = 0;
            job.size = 0;
            job.hasher = TreeHasher::new();
            drop(job.partial.take());
            match File::create(&job.partial_path) {
                Ok(file) => job.partial = Some(file),
                Err(e) => {
                    self.set_error(&hash, JobError::io(ErrorKind::PartialIo, &e));
                    return false;
                }
            }
        }

        job.active = true;
        let request = TransferRequest {
            hash,
            is_list: job.is_list,
            offset: job.have,
            want_block_hashes: !job.is_list && !job.has_block_hashes,
        };
        info!(%peer, "downloading {}", job.destination.display());

        self.set_state(peer, PeerState::Active { conn, link: hash });
        self.network.download(peer, conn, request);
        true
    }

    /// The transport has an established, idle connection to the peer.
    pub fn connected(&mut self, peer: PeerId, conn: ConnectionId) {
        let Some(queue) = self.peers.get(&peer) else {
            return;
        };
        match queue.state {
            PeerState::NotConnected | PeerState::Connecting { .. } => {
                self.set_state(peer, PeerState::Idle { conn })
            }
            other => warn!(%peer, "unexpected connection while {}", other.name()),
        }
    }

    /// The transport has a half-open connection for a peer we are connecting to.
    pub fn connecting(&mut self, peer: PeerId, conn: ConnectionId) {
        if let Some(queue) = self.peers.get_mut(&peer) {
            if let PeerState::Connecting { conn: slot } = &mut queue.state {
                *slot = Some(conn);
            }
        }
    }

    /// Connecting failed or the connection dropped, whatever state the peer was in.
    pub fn connection_lost(&mut self, peer: PeerId) {
        match self.peers.get(&peer).map(|queue| queue.state) {
            None | Some(PeerState::Waiting { .. }) => {}
            Some(_) => {
                info!(%peer, "connection lost, retrying later");
                self.set_state(peer, PeerState::waiting())
            }
        }
    }

    /// A transfer ended, complete or not, and the connection is idle again.
    pub fn transfer_finished(&mut self, peer: PeerId) {
        match self.peers.get(&peer).map(|queue| queue.state) {
            Some(PeerState::Active { conn, .. }) => self.set_state(peer, PeerState::Idle { conn }),
            Some(other) => debug!(%peer, "transfer finished while {}", other.name()),
            None => {}
        }
    }

    /// A peer came online, or with None, a hub session was established and any peer may
    /// have.
    pub fn peer_joined(&mut self, peer: Option<PeerId>) {
        if peer.map_or(true, |peer| self.peers.contains_key(&peer)) {
            self.request_rescan();
        }
    }
}
