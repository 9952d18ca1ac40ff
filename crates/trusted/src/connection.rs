use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::network::constants::Magic;
use bitcoin::network::message::NetworkMessage;
use bitcoin::network::message_blockdata::GetHeadersMessage;
use bitcoin::hashes::Hash as _;
use bitcoin::BlockHash;
use relay_net::{listener, PeerEventHandler, PeerGroup, PeerHandle};
use relay_pool::ObjectPool;
use relay_types::HeaderChainStore;
use relaylog::RelayLog;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::acceptance::AcceptanceHandler;

/// 1-second reconnect delay, per spec.md §4.5/§5/§9 throughout.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Shared dependencies every trusted connection's inbound acceptance
/// handler needs. One instance is built by the dispatcher (C7) and handed
/// to every [`TrustedPeerConnection`] it spawns.
pub struct TrustedDeps {
    pub block_pool: Arc<ObjectPool<bitcoin::Block>>,
    pub tx_pool: Arc<ObjectPool<bitcoin::Transaction>>,
    pub blocks_clients: Arc<PeerGroup>,
    pub txn_clients: Arc<PeerGroup>,
    pub relay_clients: Arc<PeerGroup>,
    /// Joined by every trusted peer's outbound session (spec.md §4.5:
    /// "joins the trustedOutboundPeers group so pool.provideObject reaches
    /// it").
    pub trusted_outbound: Arc<PeerGroup>,
    pub header_store: Arc<dyn HeaderChainStore>,
    pub relay_log: Arc<RelayLog>,
    pub magic: Magic,
}

/// Advisory-only connection status for the TUI (spec.md §9: "a
/// reimplementation should either keep them advisory... or derive them from
/// a single consistent state per connection — do not strengthen the
/// contract silently"). Nothing in this crate's logic branches on this
/// value; it exists purely to be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    PartiallyUp,
    FullyUp,
    Disconnected,
}

pub struct TrustedPeerConnection {
    pub addr: SocketAddr,
    deps: Arc<TrustedDeps>,
    inbound: Mutex<Option<PeerHandle>>,
    outbound: Mutex<Option<PeerHandle>>,
    closed_permanently: AtomicBool,
    /// Notified whenever `disconnect_permanently`/`force_disconnect` wants
    /// the run loop to wake immediately instead of waiting out a sleep.
    wake: Arc<tokio::sync::Notify>,
}

impl TrustedPeerConnection {
    pub fn spawn(addr: SocketAddr, deps: Arc<TrustedDeps>) -> Arc<Self> {
        let conn = Arc::new(Self {
            addr,
            deps,
            inbound: Mutex::new(None),
            outbound: Mutex::new(None),
            closed_permanently: AtomicBool::new(false),
            wake: Arc::new(tokio::sync::Notify::new()),
        });

        let task_conn = conn.clone();
        tokio::spawn(async move { task_conn.run().await });

        conn
    }

    /// Advisory status snapshot (spec.md §9) — never consulted for control
    /// flow, only for the TUI status panel.
    pub fn status(&self) -> ConnectionStatus {
        if self.closed_permanently.load(Ordering::SeqCst) {
            return ConnectionStatus::Disconnected;
        }
        let in_up = self.inbound.lock().expect("mutex poisoned").is_some();
        let out_up = self.outbound.lock().expect("mutex poisoned").is_some();
        match (in_up, out_up) {
            (true, true) => ConnectionStatus::FullyUp,
            (true, false) | (false, true) => ConnectionStatus::PartiallyUp,
            (false, false) => ConnectionStatus::Connecting,
        }
    }

    /// Idle → Connecting → PartiallyUp → FullyUp → Disconnected →
    /// Scheduled-Reconnect → Connecting ... (spec.md §4.5).
    async fn run(self: Arc<Self>) {
        loop {
            if self.closed_permanently.load(Ordering::SeqCst) {
                return;
            }

            self.connect_until_both_up().await;
            if self.closed_permanently.load(Ordering::SeqCst) {
                return;
            }

            self.wait_for_either_to_drop().await;
            self.close_both().await;

            if self.closed_permanently.load(Ordering::SeqCst) {
                return;
            }

            info!(addr = %self.addr, "trusted peer disconnected, reconnecting in 1s");
            tokio::select! {
                _ = sleep(RECONNECT_DELAY) => {}
                _ = self.wake.notified() => {}
            }
        }
    }

    /// Connecting/PartiallyUp phase: keeps retrying whichever half is still
    /// down, once a second, until both sockets are up or the connection is
    /// permanently removed.
    async fn connect_until_both_up(&self) {
        loop {
            if self.closed_permanently.load(Ordering::SeqCst) {
                return;
            }

            let need_inbound = self.inbound.lock().expect("mutex poisoned").is_none();
            let need_outbound = self.outbound.lock().expect("mutex poisoned").is_none();
            if !need_inbound && !need_outbound {
                return;
            }

            if need_inbound {
                match self.dial_inbound().await {
                    Ok(handle) => *self.inbound.lock().expect("mutex poisoned") = Some(handle),
                    Err(err) => warn!(addr = %self.addr, %err, "trusted inbound connect failed"),
                }
            }
            if need_outbound {
                match self.dial_outbound().await {
                    Ok(handle) => *self.outbound.lock().expect("mutex poisoned") = Some(handle),
                    Err(err) => warn!(addr = %self.addr, %err, "trusted outbound connect failed"),
                }
            }

            let still_missing = self.inbound.lock().expect("mutex poisoned").is_none()
                || self.outbound.lock().expect("mutex poisoned").is_none();
            if still_missing {
                tokio::select! {
                    _ = sleep(RECONNECT_DELAY) => {}
                    _ = self.wake.notified() => {}
                }
            }
        }
    }

    async fn dial_inbound(&self) -> Result<PeerHandle, relay_net::Error> {
        let handler = Arc::new(AcceptanceHandler { deps: self.deps.clone() });
        listener::connect(self.addr, self.deps.magic, handler).await
    }

    async fn dial_outbound(&self) -> Result<PeerHandle, relay_net::Error> {
        let handle = listener::connect(self.addr, self.deps.magic, Arc::new(NoopHandler)).await?;
        self.deps.trusted_outbound.add(handle.clone());

        // Headers-only download with unlimited range, so we track the tip
        // (spec.md §4.5): empty locator + zero stop-hash asks for as many
        // headers as the validator will give us.
        handle
            .send(NetworkMessage::GetHeaders(GetHeadersMessage::new(
                vec![],
                BlockHash::all_zeros(),
            )))
            .await;

        Ok(handle)
    }

    async fn wait_for_either_to_drop(&self) {
        let in_handle = self.inbound.lock().expect("mutex poisoned").clone();
        let out_handle = self.outbound.lock().expect("mutex poisoned").clone();

        match (in_handle, out_handle) {
            (Some(in_h), Some(out_h)) => {
                tokio::select! {
                    _ = in_h.wait_disconnected() => {}
                    _ = out_h.wait_disconnected() => {}
                }
            }
            (Some(h), None) | (None, Some(h)) => h.wait_disconnected().await,
            (None, None) => {}
        }
    }

    async fn close_both(&self) {
        let in_handle = self.inbound.lock().expect("mutex poisoned").take();
        let out_handle = self.outbound.lock().expect("mutex poisoned").take();
        if let Some(h) = in_handle {
            h.disconnect();
        }
        if let Some(h) = out_handle {
            h.disconnect();
        }
    }

    /// Forces a reconnect cycle without permanently removing the
    /// connection — used for the relay-peer header-drift resync (spec.md
    /// §4.6, §8 scenario 6).
    pub async fn force_disconnect(&self) {
        self.close_both().await;
        self.wake.notify_waiters();
    }

    /// spec.md §4.5: `disconnectPermanently()` sets the flag, closes both,
    /// and removes the entry from the trusted map (the removal itself is
    /// the registry's job; this only handles the flag and the sockets).
    pub fn disconnect_permanently(&self) {
        self.closed_permanently.store(true, Ordering::SeqCst);
        if let Some(h) = self.inbound.lock().expect("mutex poisoned").take() {
            h.disconnect();
        }
        if let Some(h) = self.outbound.lock().expect("mutex poisoned").take() {
            h.disconnect();
        }
        self.wake.notify_waiters();
    }
}

/// The outbound session's handler: it exists only to push data out and
/// drive the chain download, so it ignores everything it reads (spec.md
/// §4.5: "the outbound session is driven by the chain-download logic which
/// must not be entangled with acceptance detection").
struct NoopHandler;

#[async_trait]
impl PeerEventHandler for NoopHandler {
    async fn on_message(&self, _peer: &PeerHandle, _message: NetworkMessage) {}
}
