use super::job::{Job, Priority};
use crate::config::RECONNECT_DELAY;
use crate::error::JobError;
use crate::network::ConnectionId;
use crate::peer_id::PeerId;
use crate::tth::TreeHash;
use std::cmp::{Ordering, Reverse};
use std::collections::HashMap;
use std::path::Path;
use tokio::time::Instant;

/// Connection state of a peer we want something from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    NotConnected,
    /// a connection was requested. `conn` is known once the transport has a half-open one.
    Connecting { conn: Option<ConnectionId> },
    Idle { conn: ConnectionId },
    /// transferring the job `link`.
    Active { conn: ConnectionId, link: TreeHash },
    /// the last connection failed, may not be retried before `until`.
    Waiting { until: Instant },
}

impl PeerState {
    pub fn waiting() -> Self {
        Self::Waiting {
            until: Instant::now() + RECONNECT_DELAY,
        }
    }

    pub fn conn(&self) -> Option<ConnectionId> {
        match *self {
            Self::Connecting { conn } => conn,
            Self::Idle { conn } | Self::Active { conn, .. } => Some(conn),
            Self::NotConnected | Self::Waiting { .. } => None,
        }
    }

    pub fn active_link(&self) -> Option<TreeHash> {
        match *self {
            Self::Active { link, .. } => Some(link),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::NotConnected => "not connected",
            Self::Connecting { .. } => "connecting",
            Self::Idle { .. } => "idle",
            Self::Active { .. } => "active",
            Self::Waiting { .. } => "waiting",
        }
    }
}

/// One peer's side of a job association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerLink {
    pub hash: TreeHash,
    /// overrides the job for this peer only, e.g. the peer does not have the file.
    pub error: Option<JobError>,
}

/// A peer with queued work, its connection state and what to fetch from it, best first.
#[derive(Debug)]
pub struct PeerQueue {
    pub(crate) id: PeerId,
    pub(crate) state: PeerState,
    pub(crate) queue: Vec<PeerLink>,
}

impl PeerQueue {
    pub(crate) fn new(id: PeerId) -> Self {
        Self {
            id,
            state: PeerState::NotConnected,
            queue: Vec::new(),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn links(&self) -> &[PeerLink] {
        &self.queue
    }

    pub fn link(&self, hash: &TreeHash) -> Option<&PeerLink> {
        self.queue.iter().find(|link| link.hash == *hash)
    }

    pub(crate) fn link_mut(&mut self, hash: &TreeHash) -> Option<&mut PeerLink> {
        self.queue.iter_mut().find(|link| link.hash == *hash)
    }

    /// keeps `queue` in [`LinkKey`] order.
    pub(crate) fn sort(&mut self, jobs: &HashMap<TreeHash, Job>) {
        self.queue.sort_by(|a, b| compare_links(jobs, a, b));
    }
}

/// Sort key of a link inside a peer's queue. Smaller is fetched first:
/// enabled before disabled, lists before files, high priority before low, then by
/// destination. Two links of one peer never compare equal, the hash settles the rest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct LinkKey<'a> {
    disabled: bool,
    regular_file: bool,
    priority: Reverse<Priority>,
    destination: &'a Path,
    hash: TreeHash,
}

impl<'a> LinkKey<'a> {
    pub(crate) fn new(jobs: &'a HashMap<TreeHash, Job>, link: &PeerLink) -> Self {
        match jobs.get(&link.hash) {
            Some(job) => Self {
                disabled: link.error.is_some() || !job.is_enabled(),
                regular_file: !job.is_list,
                priority: Reverse(job.priority),
                destination: &job.destination,
                hash: link.hash,
            },
            None => Self {
                disabled: true,
                regular_file: true,
                priority: Reverse(Priority::Error),
                destination: Path::new(""),
                hash: link.hash,
            },
        }
    }

    pub(crate) fn is_disabled(&self) -> bool {
        self.disabled
    }
}

pub(crate) fn compare_links(
    jobs: &HashMap<TreeHash, Job>,
    a: &PeerLink,
    b: &PeerLink,
) -> Ordering {
    LinkKey::new(jobs, a).cmp(&LinkKey::new(jobs, b))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorKind;
    use crate::queue::job::ListRequest;
    use rstest::{fixture, rstest};

    fn file(name: &str, priority: Priority) -> Job {
        let mut job = Job::new_file(
            TreeHash::tiger(name.as_bytes()),
            100,
            format!("/dl/{name}").into(),
            format!("/inc/{name}").into(),
        );
        job.priority = priority;
        job
    }

    #[fixture]
    fn jobs() -> HashMap<TreeHash, Job> {
        let list = Job::new_list(
            PeerId::new(1),
            "/fl/1.xml.bz2".into(),
            "/inc/list".into(),
            ListRequest::default(),
        );
        let mut done = file("done", Priority::VeryHigh);
        done.have = done.size;

        [
            file("b", Priority::Medium),
            file("a", Priority::Medium),
            file("high", Priority::High),
            file("off", Priority::Off),
            file("broken", Priority::Error),
            done,
            list,
        ]
        .into_iter()
        .map(|job| (job.hash, job))
        .collect()
    }

    fn link(name: &str) -> PeerLink {
        PeerLink {
            hash: TreeHash::tiger(name.as_bytes()),
            error: None,
        }
    }

    #[rstest]
    fn test_queue_order(jobs: HashMap<TreeHash, Job>) {
        let list_hash = PeerId::new(1).list_hash();
        let mut failed = link("high");
        failed.error = Some(ErrorKind::PeerMissingFile.into());

        let mut peer = PeerQueue::new(PeerId::new(1));
        peer.queue = vec![
            link("off"),
            link("a"),
            failed,
            link("done"),
            link("b"),
            PeerLink {
                hash: list_hash,
                error: None,
            },
            link("broken"),
        ];
        peer.sort(&jobs);

        let order: Vec<_> = peer
            .queue
            .iter()
            .map(|link| jobs[&link.hash].destination.clone())
            .collect();
        let expected: Vec<std::path::PathBuf> = [
            "/fl/1.xml.bz2",
            "/dl/a",
            "/dl/b",
            // disabled, ordered among themselves by priority then destination
            "/dl/done",
            "/dl/high",
            "/dl/off",
            "/dl/broken",
        ]
        .into_iter()
        .map(Into::into)
        .collect();
        assert_eq!(order, expected);
    }

    #[rstest]
    fn test_comparator_is_strict_total_order(jobs: HashMap<TreeHash, Job>) {
        let links: Vec<_> = jobs
            .keys()
            .map(|hash| PeerLink {
                hash: *hash,
                error: None,
            })
            .collect();

        for a in &links {
            assert_eq!(compare_links(&jobs, a, a), Ordering::Equal);
            for b in &links {
                if a == b {
                    continue;
                }
                let ab = compare_links(&jobs, a, b);
                assert_ne!(ab, Ordering::Equal);
                assert_eq!(ab, compare_links(&jobs, b, a).reverse());
                for c in &links {
                    if compare_links(&jobs, b, c) == ab {
                        assert_eq!(compare_links(&jobs, a, c), ab);
                    }
                }
            }
        }
    }

    #[rstest]
    fn test_same_destination_settled_by_hash() {
        let mut jobs = HashMap::new();
        for seed in ["x", "y"] {
            let mut job = file(seed, Priority::Medium);
            job.destination = "/dl/same".into();
            jobs.insert(job.hash, job);
        }

        assert_ne!(compare_links(&jobs, &link("x"), &link("y")), Ordering::Equal);
    }
}
