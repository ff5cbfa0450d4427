use super::{Command, EngineHandle};
use crate::config::SWEEP_INTERVAL;
use crate::prelude::*;
use crate::queue::DownloadQueue;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// Runs a [`DownloadQueue`] on its own task: commands, the rescan and reconnect timers and
/// the periodic sweep all go through one loop, one at a time.
pub struct Engine {
    queue: DownloadQueue,
    command_rx: mpsc::Receiver<Command>,
    shutdown_token: CancellationToken,
}

impl Engine {
    const COMMAND_BUFFER_SIZE: usize = 128;

    /// Spawns the loop. It runs until [`EngineHandle::shutdown`] is called or every handle is
    /// dropped, then shuts the queue down.
    pub fn start(queue: DownloadQueue) -> (EngineHandle, JoinHandle<anyhow::Result<()>>) {
        let (command_tx, command_rx) = mpsc::channel(Self::COMMAND_BUFFER_SIZE);
        let shutdown_token = CancellationToken::new();

        let engine = Self {
            queue,
            command_rx,
            shutdown_token: shutdown_token.clone(),
        };
        let join = tokio::spawn(engine.run());

        (EngineHandle::new(command_tx, shutdown_token), join)
    }

    #[instrument("download engine", skip_all)]
    async fn run(mut self) -> anyhow::Result<()> {
        let mut sweep = time::interval_at(Instant::now() + SWEEP_INTERVAL, SWEEP_INTERVAL);

        loop {
            let deadline = self.queue.next_deadline();

            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    info!("received shutdown signal, stopping download engine");
                    break;
                }

                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle(command),
                    None => {
                        info!("all handles dropped, stopping download engine");
                        break;
                    }
                },

                _ = sleep_until(deadline) => self.queue.tick(),

                _ = sweep.tick() => {
                    let (partials, lists) = self.queue.sweep();
                    debug!(partials, lists, "periodic sweep done");
                }
            }
        }

        self.queue.shutdown()
    }

    fn handle(&mut self, command: Command) {
        let queue = &mut self.queue;
        match command {
            Command::EnqueueFile {
                peer,
                hash,
                size,
                destination,
                reply,
            } => {
                let _ = reply.send(queue.enqueue_file(peer, hash, size, destination));
            }
            Command::EnqueueList { peer, request } => {
                queue.enqueue_list(peer, request.select, request.open, request.match_queue)
            }
            Command::EnqueueTree {
                peer,
                entry,
                base,
                exclude,
                reply,
            } => {
                let added = queue.enqueue_tree(peer, &entry, base.as_deref(), &*exclude);
                let _ = reply.send(added);
            }
            Command::MatchFile { peer, hash, reply } => {
                let _ = reply.send(queue.match_file(peer, &hash));
            }
            Command::MatchTree { peer, entry, reply } => {
                let _ = reply.send(queue.match_tree(peer, &entry));
            }
            Command::Remove(hash) => queue.remove(&hash),
            Command::SetPriority { hash, priority } => queue.set_priority(&hash, priority),
            Command::SetPeerError { peer, hash, error } => queue.set_peer_error(peer, hash, error),
            Command::RemovePeer { peer, hash } => queue.remove_peer(peer, hash),
            Command::Snapshot { reply } => {
                let _ = reply.send(queue.snapshot());
            }
            Command::Sweep { reply } => {
                let _ = reply.send(queue.sweep());
            }

            Command::PeerJoined(peer) => queue.peer_joined(peer),
            Command::Connecting { peer, conn } => queue.connecting(peer, conn),
            Command::Connected { peer, conn } => queue.connected(peer, conn),
            Command::ConnectionLost(peer) => queue.connection_lost(peer),
            Command::TransferFinished(peer) => queue.transfer_finished(peer),
            Command::BlockHashes { peer, hash, hashes } => {
                queue.set_block_hashes(peer, &hash, hashes)
            }
            Command::LearnListSize { hash, size } => queue.learn_list_size(&hash, size),
            Command::BindReceiver { peer, hash, reply } => {
                let receiver = queue.bind_receiver(peer, &hash);
                if let Err(Some(receiver)) = reply.send(receiver) {
                    // nobody is waiting for it, unbind right away
                    queue.receive_done(receiver.finish());
                }
            }
            Command::ReceiveDone(report) => queue.receive_done(report),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
