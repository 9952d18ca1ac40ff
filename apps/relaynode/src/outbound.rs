//! Outbound, untrusted Bitcoin P2P peers added by operator command
//! (spec.md §6 `o`/`o-`). These are ordinary untrusted peers from C4's point
//! of view — the same [`relay_controller::UntrustedHandler`] is attached —
//! the only thing special about them is that *we* dialed out, and that a
//! lost connection is retried once a second until the operator marks the
//! address for removal (spec.md §3: "three sets each for relay-peer and
//! outbound-P2P addresses representing {connected, waiting-to-reconnect,
//! marked-for-permanent-removal}").
//!
//! Shaped after this workspace's own `relay_sidechannel::RelayPeerClient`,
//! whose reconnect/mark-for-removal discipline is identical.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bitcoin::network::constants::Magic;
use relay_controller::UntrustedHandler;
use relay_net::listener;
use tokio::time::sleep;
use tracing::{info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundPeerState {
    Connected,
    WaitingOnReconnection,
    MarkedForRemoval,
}

pub struct OutboundPeer {
    pub addr: SocketAddr,
    handler: Arc<UntrustedHandler>,
    magic: Magic,
    marked_for_disconnect: AtomicBool,
    connected: AtomicBool,
}

impl OutboundPeer {
    pub fn spawn(addr: SocketAddr, magic: Magic, handler: Arc<UntrustedHandler>) -> Arc<Self> {
        let peer = Arc::new(Self {
            addr,
            handler,
            magic,
            marked_for_disconnect: AtomicBool::new(false),
            connected: AtomicBool::new(false),
        });

        let task = peer.clone();
        tokio::spawn(async move { task.run().await });
        peer
    }

    pub fn state(&self) -> OutboundPeerState {
        if self.marked_for_disconnect.load(Ordering::SeqCst) {
            OutboundPeerState::MarkedForRemoval
        } else if self.connected.load(Ordering::SeqCst) {
            OutboundPeerState::Connected
        } else {
            OutboundPeerState::WaitingOnReconnection
        }
    }

    /// spec.md §6 `o-<host>:<port>`: "mark outbound peer for removal after
    /// next disconnect" — does not force the current session closed.
    pub fn mark_for_removal(&self) {
        self.marked_for_disconnect.store(true, Ordering::SeqCst);
    }

    async fn run(self: Arc<Self>) {
        loop {
            if self.marked_for_disconnect.load(Ordering::SeqCst) {
                return;
            }

            match listener::connect(self.addr, self.magic, self.handler.clone()).await {
                Ok(handle) => {
                    self.connected.store(true, Ordering::SeqCst);
                    info!(addr = %self.addr, "outbound peer connected");
                    handle.send(crate::version::outbound_version(self.addr, 0)).await;
                    handle.wait_disconnected().await;
                    self.connected.store(false, Ordering::SeqCst);
                    info!(addr = %self.addr, "outbound peer disconnected");
                }
                Err(err) => {
                    warn!(addr = %self.addr, %err, "outbound peer connect failed");
                }
            }

            if self.marked_for_disconnect.load(Ordering::SeqCst) {
                return;
            }
            sleep(RECONNECT_DELAY).await;
        }
    }
}

/// The node's set of outbound P2P peers, keyed by remote address.
#[derive(Default)]
pub struct OutboundRegistry {
    peers: std::sync::Mutex<std::collections::HashMap<SocketAddr, Arc<OutboundPeer>>>,
}

impl OutboundRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.peers.lock().expect("outbound registry mutex poisoned").contains_key(addr)
    }

    /// Adds `addr`, returning `false` without spawning anything if it was
    /// already present (spec.md §6: duplicate commands are an error, not a
    /// silent no-op).
    pub fn add(&self, addr: SocketAddr, magic: Magic, handler: Arc<UntrustedHandler>) -> bool {
        let mut peers = self.peers.lock().expect("outbound registry mutex poisoned");
        if peers.contains_key(&addr) {
            return false;
        }
        peers.insert(addr, OutboundPeer::spawn(addr, magic, handler));
        true
    }

    pub fn mark_for_removal(&self, addr: &SocketAddr) -> bool {
        match self.peers.lock().expect("outbound registry mutex poisoned").get(addr) {
            Some(peer) => {
                peer.mark_for_removal();
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> Vec<Arc<OutboundPeer>> {
        self.peers
            .lock()
            .expect("outbound registry mutex poisoned")
            .values()
            .cloned()
            .collect()
    }
}
