use crate::error::JobError;
use crate::peer_id::PeerId;
use crate::prelude::*;
use crate::tth::TreeHash;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Notifications for whoever presents the queue to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    JobAdded(TreeHash),
    JobRemoved(TreeHash),
    JobUpdated(TreeHash),
    LinkAdded {
        hash: TreeHash,
        peer: PeerId,
    },
    LinkRemoved {
        hash: TreeHash,
        peer: PeerId,
    },
    LinkUpdated {
        hash: TreeHash,
        peer: PeerId,
    },
    /// a job (peer = None) or one peer's link to it failed.
    Error {
        hash: TreeHash,
        peer: Option<PeerId>,
        error: JobError,
    },
    /// a file list finished downloading and should be handed to the list browser.
    ListReady {
        peer: PeerId,
        path: PathBuf,
        select: Option<String>,
        open: bool,
        match_queue: bool,
    },
}

/// Fire-and-forget sender of [`QueueEvent`]s. A dropped receiver is not an error.
#[derive(Debug, Clone, Default)]
pub struct Events {
    tx: Option<mpsc::UnboundedSender<QueueEvent>>,
}

impl Events {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<QueueEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// discards every event.
    pub fn none() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: QueueEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(e) = tx.send(event) {
            trace!("no listener for queue event {:?}", e.0);
        }
    }
}
