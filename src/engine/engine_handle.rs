use super::{Command, ExcludeFn};
use crate::error::JobError;
use crate::network::ConnectionId;
use crate::peer_id::PeerId;
use crate::queue::{FileEntry, JobSnapshot, ListRequest, MatchResult, Priority};
use crate::transfer::{ReceiveReport, Receiver};
use crate::tth::TreeHash;
use anyhow::Context;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

const ENGINE_GONE: &str = "download engine has shut down";

/// Cheap to clone. Every call is processed by the engine in the order it was sent.
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::Sender<Command>,
    shutdown_token: CancellationToken,
}

impl EngineHandle {
    pub(super) fn new(command_tx: mpsc::Sender<Command>, shutdown_token: CancellationToken) -> Self {
        Self {
            command_tx,
            shutdown_token,
        }
    }

    async fn send(&self, command: Command) -> anyhow::Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| anyhow::anyhow!(ENGINE_GONE))
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> anyhow::Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(command(reply)).await?;
        rx.await.context(ENGINE_GONE)
    }

    /// Stops the engine. The queue is shut down before the engine's task returns.
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }

    pub async fn enqueue_file(
        &self,
        peer: PeerId,
        hash: TreeHash,
        size: u64,
        destination: impl Into<PathBuf>,
    ) -> anyhow::Result<bool> {
        let destination = destination.into();
        self.request(|reply| Command::EnqueueFile {
            peer,
            hash,
            size,
            destination,
            reply,
        })
        .await
    }

    pub async fn enqueue_list(&self, peer: PeerId, request: ListRequest) -> anyhow::Result<()> {
        self.send(Command::EnqueueList { peer, request }).await
    }

    pub async fn enqueue_tree(
        &self,
        peer: PeerId,
        entry: FileEntry,
        base: Option<PathBuf>,
        exclude: ExcludeFn,
    ) -> anyhow::Result<usize> {
        self.request(|reply| Command::EnqueueTree {
            peer,
            entry,
            base,
            exclude,
            reply,
        })
        .await
    }

    pub async fn match_file(&self, peer: PeerId, hash: TreeHash) -> anyhow::Result<MatchResult> {
        self.request(|reply| Command::MatchFile { peer, hash, reply })
            .await
    }

    pub async fn match_tree(&self, peer: PeerId, entry: FileEntry) -> anyhow::Result<(usize, usize)> {
        self.request(|reply| Command::MatchTree { peer, entry, reply })
            .await
    }

    pub async fn remove(&self, hash: TreeHash) -> anyhow::Result<()> {
        self.send(Command::Remove(hash)).await
    }

    pub async fn set_priority(&self, hash: TreeHash, priority: Priority) -> anyhow::Result<()> {
        self.send(Command::SetPriority { hash, priority }).await
    }

    pub async fn set_peer_error(
        &self,
        peer: PeerId,
        hash: Option<TreeHash>,
        error: JobError,
    ) -> anyhow::Result<()> {
        self.send(Command::SetPeerError { peer, hash, error }).await
    }

    pub async fn remove_peer(&self, peer: PeerId, hash: Option<TreeHash>) -> anyhow::Result<()> {
        self.send(Command::RemovePeer { peer, hash }).await
    }

    /// all jobs, ordered by destination.
    pub async fn snapshot(&self) -> anyhow::Result<Vec<JobSnapshot>> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Runs the periodic cleanup now. Returns the number of partial files and file lists
    /// deleted.
    pub async fn sweep(&self) -> anyhow::Result<(usize, usize)> {
        self.request(|reply| Command::Sweep { reply }).await
    }

    pub async fn peer_joined(&self, peer: Option<PeerId>) -> anyhow::Result<()> {
        self.send(Command::PeerJoined(peer)).await
    }

    pub async fn connecting(&self, peer: PeerId, conn: ConnectionId) -> anyhow::Result<()> {
        self.send(Command::Connecting { peer, conn }).await
    }

    pub async fn connected(&self, peer: PeerId, conn: ConnectionId) -> anyhow::Result<()> {
        self.send(Command::Connected { peer, conn }).await
    }

    pub async fn connection_lost(&self, peer: PeerId) -> anyhow::Result<()> {
        self.send(Command::ConnectionLost(peer)).await
    }

    pub async fn transfer_finished(&self, peer: PeerId) -> anyhow::Result<()> {
        self.send(Command::TransferFinished(peer)).await
    }

    pub async fn block_hashes(
        &self,
        peer: PeerId,
        hash: TreeHash,
        hashes: Vec<TreeHash>,
    ) -> anyhow::Result<()> {
        self.send(Command::BlockHashes { peer, hash, hashes }).await
    }

    pub async fn learn_list_size(&self, hash: TreeHash, size: u64) -> anyhow::Result<()> {
        self.send(Command::LearnListSize { hash, size }).await
    }

    /// a receiver for the transfer `peer` is running for `hash`, see
    /// [`DownloadQueue::bind_receiver`](crate::queue::DownloadQueue::bind_receiver).
    pub async fn bind_receiver(
        &self,
        peer: PeerId,
        hash: TreeHash,
    ) -> anyhow::Result<Option<Receiver>> {
        self.request(|reply| Command::BindReceiver { peer, hash, reply })
            .await
    }

    pub async fn receive_done(&self, report: ReceiveReport) -> anyhow::Result<()> {
        self.send(Command::ReceiveDone(report)).await
    }

    /// [`EngineHandle::receive_done`] for receivers running on a plain thread. Must not be
    /// called from async code.
    pub fn receive_done_blocking(&self, report: ReceiveReport) -> anyhow::Result<()> {
        self.command_tx
            .blocking_send(Command::ReceiveDone(report))
            .map_err(|_| anyhow::anyhow!(ENGINE_GONE))
    }
}
