use crate::peer_id::PeerId;
use crate::prelude::*;
use crate::tth::TreeHash;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Opaque handle of an established peer connection, issued by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// What the transport should fetch over an idle connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub hash: TreeHash,
    pub is_list: bool,
    /// first byte wanted, everything before it is already on disk and verified.
    pub offset: u64,
    /// the block hash list has to be fetched (and handed to the queue) before any content.
    pub want_block_hashes: bool,
}

/// Transport and hub session as seen by the queue.
///
/// Calls are made from the queue's event loop and must not block; the outcome comes back
/// through the queue's callbacks (`connected`, `connection_lost`, `transfer_finished`, ...).
pub trait PeerNetwork: Send {
    /// whether the peer is currently reachable through some hub.
    fn is_online(&self, peer: PeerId) -> bool;
    fn connect(&mut self, peer: PeerId);
    fn download(&mut self, peer: PeerId, conn: ConnectionId, request: TransferRequest);
    fn disconnect(&mut self, peer: PeerId, conn: ConnectionId);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkRequest {
    Connect(PeerId),
    Download {
        peer: PeerId,
        conn: ConnectionId,
        request: TransferRequest,
    },
    Disconnect {
        peer: PeerId,
        conn: ConnectionId,
    },
}

/// A [`PeerNetwork`] that forwards every request over a channel to the task owning the
/// actual connections. Presence is shared with the hub sessions through `online`.
#[derive(Debug, Clone)]
pub struct ChannelNetwork {
    tx: mpsc::UnboundedSender<NetworkRequest>,
    online: Arc<RwLock<HashSet<PeerId>>>,
}

impl ChannelNetwork {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NetworkRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let network = Self {
            tx,
            online: Arc::default(),
        };
        (network, rx)
    }

    pub fn presence(&self) -> Arc<RwLock<HashSet<PeerId>>> {
        Arc::clone(&self.online)
    }

    pub fn set_online(&self, peer: PeerId, online: bool) {
        let mut peers = self.online.write();
        if online {
            peers.insert(peer);
        } else {
            peers.remove(&peer);
        }
    }

    fn send(&self, request: NetworkRequest) {
        if self.tx.send(request).is_err() {
            warn!("network task is gone, dropping request");
        }
    }
}

impl PeerNetwork for ChannelNetwork {
    fn is_online(&self, peer: PeerId) -> bool {
        self.online.read().contains(&peer)
    }

    fn connect(&mut self, peer: PeerId) {
        self.send(NetworkRequest::Connect(peer));
    }

    fn download(&mut self, peer: PeerId, conn: ConnectionId, request: TransferRequest) {
        self.send(NetworkRequest::Download {
            peer,
            conn,
            request,
        });
    }

    fn disconnect(&mut self, peer: PeerId, conn: ConnectionId) {
        self.send(NetworkRequest::Disconnect { peer, conn });
    }
}

/// No hub, no peers. Lets the queue be inspected and edited without a network.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineNetwork;

impl PeerNetwork for OfflineNetwork {
    fn is_online(&self, _peer: PeerId) -> bool {
        false
    }

    fn connect(&mut self, peer: PeerId) {
        debug!(%peer, "offline, not connecting");
    }

    fn download(&mut self, peer: PeerId, _conn: ConnectionId, request: TransferRequest) {
        debug!(%peer, hash = %request.hash, "offline, not downloading");
    }

    fn disconnect(&mut self, _peer: PeerId, _conn: ConnectionId) {}
}
