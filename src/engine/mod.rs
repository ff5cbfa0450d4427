//! The event loop owning a [`DownloadQueue`](crate::queue::DownloadQueue), and the handle
//! everyone else talks to it through.

mod engine;
mod engine_handle;

pub use engine::Engine;
pub use engine_handle::EngineHandle;

use crate::error::JobError;
use crate::network::ConnectionId;
use crate::peer_id::PeerId;
use crate::queue::{FileEntry, JobSnapshot, ListRequest, MatchResult, Priority};
use crate::transfer::{ReceiveReport, Receiver};
use crate::tth::TreeHash;
use std::path::PathBuf;
use tokio::sync::oneshot;

/// name predicate of [`DownloadQueue::enqueue_tree`](crate::queue::DownloadQueue::enqueue_tree).
pub type ExcludeFn = Box<dyn Fn(&str) -> bool + Send>;

/// What the engine can be asked to do. Requests carry a reply channel, notifications from the
/// transport do not.
pub(crate) enum Command {
    EnqueueFile {
        peer: PeerId,
        hash: TreeHash,
        size: u64,
        destination: PathBuf,
        reply: oneshot::Sender<bool>,
    },
    EnqueueList {
        peer: PeerId,
        request: ListRequest,
    },
    EnqueueTree {
        peer: PeerId,
        entry: FileEntry,
        base: Option<PathBuf>,
        exclude: ExcludeFn,
        reply: oneshot::Sender<usize>,
    },
    MatchFile {
        peer: PeerId,
        hash: TreeHash,
        reply: oneshot::Sender<MatchResult>,
    },
    MatchTree {
        peer: PeerId,
        entry: FileEntry,
        reply: oneshot::Sender<(usize, usize)>,
    },
    Remove(TreeHash),
    SetPriority {
        hash: TreeHash,
        priority: Priority,
    },
    SetPeerError {
        peer: PeerId,
        hash: Option<TreeHash>,
        error: JobError,
    },
    RemovePeer {
        peer: PeerId,
        hash: Option<TreeHash>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<JobSnapshot>>,
    },
    Sweep {
        reply: oneshot::Sender<(usize, usize)>,
    },

    PeerJoined(Option<PeerId>),
    Connecting {
        peer: PeerId,
        conn: ConnectionId,
    },
    Connected {
        peer: PeerId,
        conn: ConnectionId,
    },
    ConnectionLost(PeerId),
    TransferFinished(PeerId),
    BlockHashes {
        peer: PeerId,
        hash: TreeHash,
        hashes: Vec<TreeHash>,
    },
    LearnListSize {
        hash: TreeHash,
        size: u64,
    },
    BindReceiver {
        peer: PeerId,
        hash: TreeHash,
        reply: oneshot::Sender<Option<Receiver>>,
    },
    ReceiveDone(ReceiveReport),
}
