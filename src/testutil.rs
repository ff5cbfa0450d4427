use crate::config::QueueConfig;
use crate::events::{Events, QueueEvent};
use crate::network::{ChannelNetwork, NetworkRequest};
use crate::peer_id::PeerId;
use crate::queue::DownloadQueue;
use crate::store::MemoryStore;
use crate::tth::TreeHash;
use rstest::fixture;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

/// A queue over a scratch data directory, recording what it asks of the network and tells
/// the UI.
pub struct Harness {
    pub queue: DownloadQueue,
    pub store: Arc<MemoryStore>,
    pub net: ChannelNetwork,
    pub requests: UnboundedReceiver<NetworkRequest>,
    pub events: UnboundedReceiver<QueueEvent>,
    pub dir: TempDir,
}

impl Harness {
    /// queues a file named `name` whose hash is derived from the name.
    pub fn enqueue(&mut self, peer: PeerId, name: &str, size: u64) -> TreeHash {
        let hash = TreeHash::tiger(name.as_bytes());
        self.enqueue_hash(peer, hash, name, size);
        hash
    }

    pub fn enqueue_hash(&mut self, peer: PeerId, hash: TreeHash, name: &str, size: u64) {
        assert!(self.queue.enqueue_file(peer, hash, size, name));
    }

    /// drains the network requests made so far.
    pub fn requests(&mut self) -> Vec<NetworkRequest> {
        std::iter::from_fn(|| self.requests.try_recv().ok()).collect()
    }

    /// drains the events emitted so far.
    pub fn events(&mut self) -> Vec<QueueEvent> {
        std::iter::from_fn(|| self.events.try_recv().ok()).collect()
    }
}

pub fn config(dir: &TempDir) -> QueueConfig {
    let config = QueueConfig::from_data_dir(dir.path());
    config.create_dirs().unwrap();
    config
}

#[fixture]
pub fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let (net, requests) = ChannelNetwork::new();
    let (events, events_rx) = Events::channel();
    let queue = DownloadQueue::new(config(&dir), store.clone(), Box::new(net.clone()), events);

    Harness {
        queue,
        store,
        net,
        requests,
        events: events_rx,
        dir,
    }
}
