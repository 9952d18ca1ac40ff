//! The relay-peer client (spec.md C6): an outbound link to another
//! instance of this system over the compact relay-protocol side channel.
//!
//! The wire framing of that side channel is an external collaborator
//! (spec.md §1: "its framing is opaque here — only its receive callbacks
//! matter"), so this crate defines it as a trait ([`SidechannelTransport`])
//! and provides a minimal stand-in ([`transport::BitcoinWireTransport`])
//! so the workspace builds and its tests run without a live sibling relay
//! node. Everything downstream of a received event — forwarding to trusted
//! validators, broadcasting to clients, logging first-seen, and resyncing
//! on header drift — is this spec's real logic and lives in [`RelayPeerClient`].

mod transport;

pub use transport::{BitcoinWireTransport, Error as SidechannelError, SidechannelEvent, SidechannelSession, SidechannelTransport};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bitcoin::hashes::Hash as _;
use relay_net::PeerGroup;
use relay_pool::ObjectPool;
use relay_trusted::TrustedRegistry;
use relay_types::{HeaderChainStore, SourceTag};
use relaylog::RelayLog;
use tokio::time::sleep;
use tracing::{info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Everything a relay-peer client needs besides the transport itself.
pub struct RelayPeerDeps {
    pub block_pool: Arc<ObjectPool<bitcoin::Block>>,
    /// Broadcast to client P2P peers once a block is deemed good.
    pub blocks_clients: Arc<PeerGroup>,
    /// Echoed back out to our own inbound relay-protocol clients.
    pub relay_clients: Arc<PeerGroup>,
    /// Joined by trusted outbound sessions; `provide_object` pushes here.
    pub trusted_outbound: Arc<PeerGroup>,
    pub trusted_registry: Arc<TrustedRegistry>,
    pub header_store: Arc<dyn HeaderChainStore>,
    pub relay_log: Arc<RelayLog>,
}

/// Advisory connection state for the TUI (spec.md §3: "three sets each for
/// relay-peer and outbound-P2P addresses representing {connected,
/// waiting-to-reconnect, marked-for-permanent-removal}").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayPeerState {
    Connected,
    WaitingOnReconnection,
    MarkedForRemoval,
}

pub struct RelayPeerClient {
    pub addr: SocketAddr,
    deps: Arc<RelayPeerDeps>,
    transport: Arc<dyn SidechannelTransport>,
    marked_for_disconnect: AtomicBool,
    connected: AtomicBool,
    wake: tokio::sync::Notify,
}

impl RelayPeerClient {
    pub fn spawn(
        addr: SocketAddr,
        deps: Arc<RelayPeerDeps>,
        transport: Arc<dyn SidechannelTransport>,
    ) -> Arc<Self> {
        let client = Arc::new(Self {
            addr,
            deps,
            transport,
            marked_for_disconnect: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            wake: tokio::sync::Notify::new(),
        });

        let task = client.clone();
        tokio::spawn(async move { task.run().await });
        client
    }

    pub fn state(&self) -> RelayPeerState {
        if self.marked_for_disconnect.load(Ordering::SeqCst) {
            RelayPeerState::MarkedForRemoval
        } else if self.connected.load(Ordering::SeqCst) {
            RelayPeerState::Connected
        } else {
            RelayPeerState::WaitingOnReconnection
        }
    }

    /// spec.md §6: `r-<host>` — "mark relay peer for removal after next
    /// disconnect". Unlike a trusted peer, this doesn't force an immediate
    /// close; the existing session runs to completion.
    pub fn mark_for_removal(&self) {
        self.marked_for_disconnect.store(true, Ordering::SeqCst);
    }

    async fn run(self: Arc<Self>) {
        loop {
            if self.marked_for_disconnect.load(Ordering::SeqCst) {
                return;
            }

            let mut session = match self.transport.connect(self.addr).await {
                Ok(session) => session,
                Err(err) => {
                    warn!(addr = %self.addr, %err, "relay peer connect failed");
                    self.connected.store(false, Ordering::SeqCst);
                    tokio::select! {
                        _ = sleep(RECONNECT_DELAY) => {}
                        _ = self.wake.notified() => {}
                    }
                    continue;
                }
            };

            self.connected.store(true, Ordering::SeqCst);
            info!(addr = %self.addr, "relay peer connection opened");

            while let Some(event) = session.recv().await {
                self.handle_event(event, session.drain_stats()).await;
            }

            self.connected.store(false, Ordering::SeqCst);
            info!(addr = %self.addr, "relay peer connection closed");

            if self.marked_for_disconnect.load(Ordering::SeqCst) {
                return;
            }

            tokio::select! {
                _ = sleep(RECONNECT_DELAY) => {}
                _ = self.wake.notified() => {}
            }
        }
    }

    async fn handle_event(&self, event: SidechannelEvent, stats_lines: Vec<String>) {
        match event {
            // Transactions are never shipped on the side channel (spec.md
            // §4.6); a header-only announcement carries no relay action
            // either, since the client never tracks headers on its own.
            SidechannelEvent::BlockHeader(_) | SidechannelEvent::Transaction(_) => {}
            SidechannelEvent::Block(block) => self.receive_block(block, stats_lines).await,
        }
    }

    /// spec.md §4.6 `receiveBlock`.
    async fn receive_block(&self, block: bitcoin::Block, stats_lines: Vec<String>) {
        let hash = block.block_hash().to_byte_array();

        self.deps.relay_clients.relay_object(&block).await;
        self.deps.block_pool.provide_object(block.clone(), &self.deps.trusted_outbound).await;
        self.deps.block_pool.inv_good(&self.deps.blocks_clients, hash).await;

        let rdns = relaylog::resolve_ptr(self.addr.ip()).await;
        if let Err(err) = self
            .deps
            .relay_log
            .log_first_seen(hash, SourceTag::RelayPeer, self.addr.ip(), rdns.as_deref(), &stats_lines)
            .await
        {
            warn!(%err, "failed to write relay log");
        }

        if !self.deps.header_store.has_header(&hash) {
            if let Err(err) = self.deps.header_store.try_add_header(&block) {
                warn!(
                    addr = %self.addr, %err, hash = %relay_types::short_hex(&hash),
                    "relay peer header drift detected, resyncing trusted peers",
                );
                self.deps.trusted_registry.force_disconnect_all().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use bitcoin::blockdata::constants::genesis_block;
    use bitcoin::Network;
    use relay_net::PeerGroup;
    use relay_types::{HeaderChainError, InMemoryHeaderStore};

    use super::*;

    struct OneShotTransport {
        block: StdMutex<Option<bitcoin::Block>>,
    }

    struct OneShotSession {
        block: Option<bitcoin::Block>,
    }

    #[async_trait]
    impl SidechannelTransport for OneShotTransport {
        async fn connect(
            &self,
            _addr: SocketAddr,
        ) -> Result<Box<dyn SidechannelSession>, transport::Error> {
            let block = self.block.lock().unwrap().take();
            Ok(Box::new(OneShotSession { block }))
        }
    }

    #[async_trait]
    impl SidechannelSession for OneShotSession {
        async fn recv(&mut self) -> Option<SidechannelEvent> {
            self.block.take().map(SidechannelEvent::Block)
        }

        fn drain_stats(&mut self) -> Vec<String> {
            vec!["peers=3 blocks=1".to_string()]
        }
    }

    struct AlwaysRejects;
    impl HeaderChainStore for AlwaysRejects {
        fn has_header(&self, _hash: &relay_types::Hash32) -> bool {
            false
        }
        fn try_add_header(&self, _block: &bitcoin::Block) -> Result<(), HeaderChainError> {
            Err(HeaderChainError::Disconnected)
        }
        fn tip_height(&self) -> u64 {
            0
        }
    }

    fn temp_log_path() -> std::path::PathBuf {
        use std::time::{SystemTime, UNIX_EPOCH};
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        std::env::temp_dir().join(format!("sidechannel-test-{nanos}.log"))
    }

    // Scenario 6: header rejection on a relay-peer-sourced block must
    // force every trusted peer to disconnect and reconnect.
    #[tokio::test]
    async fn header_drift_triggers_trusted_resync() {
        let path = temp_log_path();
        let relay_log = Arc::new(RelayLog::open(&path).await.unwrap());
        let registry = Arc::new(TrustedRegistry::new());

        let deps = Arc::new(RelayPeerDeps {
            block_pool: ObjectPool::for_blocks(),
            blocks_clients: PeerGroup::new().into(),
            relay_clients: PeerGroup::new().into(),
            trusted_outbound: PeerGroup::new().into(),
            trusted_registry: registry,
            header_store: Arc::new(AlwaysRejects),
            relay_log,
        });

        let addr: SocketAddr = "127.0.0.1:8336".parse().unwrap();
        let transport = Arc::new(OneShotTransport {
            block: StdMutex::new(Some(genesis_block(Network::Bitcoin))),
        });
        let client = RelayPeerClient {
            addr,
            deps,
            transport,
            marked_for_disconnect: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            wake: tokio::sync::Notify::new(),
        };

        client
            .receive_block(genesis_block(Network::Bitcoin), vec!["stats".into()])
            .await;

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn header_accept_does_not_touch_trusted_registry() {
        let path = temp_log_path();
        let relay_log = Arc::new(RelayLog::open(&path).await.unwrap());
        let registry = Arc::new(TrustedRegistry::new());

        let block = genesis_block(Network::Bitcoin);
        let genesis_hash = {
            use bitcoin::hashes::Hash as _;
            block.block_hash().to_byte_array()
        };

        let deps = Arc::new(RelayPeerDeps {
            block_pool: ObjectPool::for_blocks(),
            blocks_clients: PeerGroup::new().into(),
            relay_clients: PeerGroup::new().into(),
            trusted_outbound: PeerGroup::new().into(),
            trusted_registry: registry,
            header_store: Arc::new(InMemoryHeaderStore::new(genesis_hash)),
            relay_log,
        });

        let addr: SocketAddr = "127.0.0.1:8336".parse().unwrap();
        let transport: Arc<dyn SidechannelTransport> = Arc::new(OneShotTransport {
            block: StdMutex::new(None),
        });
        let client = RelayPeerClient {
            addr,
            deps,
            transport,
            marked_for_disconnect: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            wake: tokio::sync::Notify::new(),
        };

        client.receive_block(block, vec![]).await;
        let _ = std::fs::remove_file(&path);
    }
}
