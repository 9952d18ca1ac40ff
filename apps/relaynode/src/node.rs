//! The dispatcher (spec.md C7): owns the three listening sockets, the
//! trusted/outbound/relay peer registries, the two object pools, the peer
//! groups they all fan out through, and the operator command / stats-panel
//! surface. `Node::new`/`run`/`shutdown` follow a `TaskTracker` +
//! `CancellationToken` shutdown discipline with one `spawn_*` method per
//! service: the pools, controller, trusted registry, and sidechannel client
//! each get their own listener/dial task tracked the same way.

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;

use bitcoin::blockdata::constants::genesis_block;
use bitcoin::hashes::Hash as _;
use bitcoin::network::constants::Magic;
use event_bus::EventBus;
use relay_controller::UntrustedHandler;
use relay_net::{listener, PeerEventHandler, PeerGroup};
use relay_pool::ObjectPool;
use relay_sidechannel::{BitcoinWireTransport, RelayPeerDeps, RelayPeerState, SidechannelTransport};
use relay_trusted::{ConnectionStatus, TrustedDeps, TrustedRegistry};
use relay_types::{HeaderChainStore, InMemoryHeaderStore};
use relaylog::RelayLog;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::config::RelayNodeConfig;
use crate::events::LogLineEvent;
use crate::outbound::{OutboundPeerState, OutboundRegistry};
use crate::relay_registry::RelayRegistry;
use crate::tui::Command;
use crate::version;

pub struct Node {
    config: RelayNodeConfig,
    magic: Magic,
    event_bus: EventBus,

    block_pool: Arc<ObjectPool<bitcoin::Block>>,
    tx_pool: Arc<ObjectPool<bitcoin::Transaction>>,

    blocks_clients: Arc<PeerGroup>,
    txn_clients: Arc<PeerGroup>,
    relay_clients: Arc<PeerGroup>,
    trusted_outbound: Arc<PeerGroup>,

    header_store: Arc<dyn HeaderChainStore>,
    relay_log: Arc<RelayLog>,

    untrusted_handler: Arc<UntrustedHandler>,
    trusted_registry: Arc<TrustedRegistry>,
    outbound_registry: Arc<OutboundRegistry>,
    relay_registry: Arc<RelayRegistry>,
    sidechannel_transport: Arc<dyn SidechannelTransport>,

    cancellation: CancellationToken,
    pub(crate) task_tracker: TaskTracker,
}

impl Node {
    pub async fn new(config: RelayNodeConfig) -> eyre::Result<Self> {
        let network = config.network()?;
        let magic = network.magic();

        let genesis_hash = genesis_block(network).block_hash().to_byte_array();
        let header_store: Arc<dyn HeaderChainStore> = Arc::new(InMemoryHeaderStore::new(genesis_hash));
        let relay_log = Arc::new(RelayLog::open(&config.relay_log_path).await?);

        let block_pool = ObjectPool::<bitcoin::Block>::for_blocks();
        let tx_pool = ObjectPool::<bitcoin::Transaction>::for_transactions();

        let blocks_clients = Arc::new(PeerGroup::new());
        let txn_clients = Arc::new(PeerGroup::new());
        let relay_clients = Arc::new(PeerGroup::new());
        let trusted_outbound = Arc::new(PeerGroup::new());

        let untrusted_handler = Arc::new(UntrustedHandler {
            block_pool: block_pool.clone(),
            tx_pool: tx_pool.clone(),
            trusted_outbound: trusted_outbound.clone(),
            blocks_clients: blocks_clients.clone(),
            relay_clients: relay_clients.clone(),
            header_store: header_store.clone(),
            relay_log: relay_log.clone(),
        });

        let event_bus = Self::init_event_bus();

        Ok(Self {
            config,
            magic,
            event_bus,
            block_pool,
            tx_pool,
            blocks_clients,
            txn_clients,
            relay_clients,
            trusted_outbound,
            header_store,
            relay_log,
            untrusted_handler,
            trusted_registry: Arc::new(TrustedRegistry::new()),
            outbound_registry: Arc::new(OutboundRegistry::new()),
            relay_registry: Arc::new(RelayRegistry::new()),
            sidechannel_transport: Arc::new(BitcoinWireTransport::new(magic)),
            cancellation: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        })
    }

    fn init_event_bus() -> EventBus {
        let mut bus = EventBus::default();
        bus.register::<LogLineEvent>(Some(crate::events::LOG_QUEUE_CHANNEL_SIZE));
        bus
    }

    pub fn log_queue(&self) -> event_bus::Receiver<LogLineEvent> {
        self.event_bus.subscribe::<LogLineEvent>()
    }

    pub fn event_bus(&self) -> EventBus {
        self.event_bus.clone()
    }

    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    fn trusted_deps(&self) -> Arc<TrustedDeps> {
        Arc::new(TrustedDeps {
            block_pool: self.block_pool.clone(),
            tx_pool: self.tx_pool.clone(),
            blocks_clients: self.blocks_clients.clone(),
            txn_clients: self.txn_clients.clone(),
            relay_clients: self.relay_clients.clone(),
            trusted_outbound: self.trusted_outbound.clone(),
            header_store: self.header_store.clone(),
            relay_log: self.relay_log.clone(),
            magic: self.magic,
        })
    }

    fn relay_peer_deps(&self) -> Arc<RelayPeerDeps> {
        Arc::new(RelayPeerDeps {
            block_pool: self.block_pool.clone(),
            blocks_clients: self.blocks_clients.clone(),
            relay_clients: self.relay_clients.clone(),
            trusted_outbound: self.trusted_outbound.clone(),
            trusted_registry: self.trusted_registry.clone(),
            header_store: self.header_store.clone(),
            relay_log: self.relay_log.clone(),
        })
    }

    /// Binds the three listening sockets (spec.md §4.7/§6) and dials
    /// whatever trusted/outbound/relay peers the config file names at
    /// startup, as though the operator had typed the equivalent `t`/`o`/`r`
    /// commands before the stdin loop started.
    pub async fn run(self: &Arc<Self>) -> eyre::Result<()> {
        self.spawn_blocks_listener().await?;
        self.spawn_blocks_and_tx_listener().await?;
        self.spawn_relay_protocol_listener().await?;

        for addr in self.config.peers.trusted_addrs()? {
            self.add_trusted(addr);
        }
        for addr in self.config.peers.outbound_addrs()? {
            self.add_outbound(addr);
        }
        for ip in self.config.peers.relay_addrs()? {
            self.add_relay(ip);
        }

        self.task_tracker.close();
        Ok(())
    }

    /// Preflight bind-and-drop so a startup bind failure (address already in
    /// use, permission denied) is fatal and surfaces before the process
    /// looks like it's running (spec.md §7). The real, long-lived bind
    /// happens inside `listener::listen` once spawned.
    fn check_bindable(addr: SocketAddr) -> eyre::Result<()> {
        std::net::TcpListener::bind(addr)?;
        Ok(())
    }

    async fn spawn_blocks_listener(self: &Arc<Self>) -> eyre::Result<()> {
        let addr = self.config.listen.blocks_addr()?;
        Self::check_bindable(addr)?;

        let node = self.clone();
        let handler = self.untrusted_handler.clone() as Arc<dyn PeerEventHandler>;
        let shutdown = self.cancellation.clone();

        self.task_tracker.spawn(async move {
            let blocks_clients = node.blocks_clients.clone();
            if let Err(err) = listener::listen(addr, node.magic, handler, shutdown, move |peer| {
                let peer_for_version = peer.clone();
                let version_msg = version::inbound_version(peer_for_version.addr, 0);
                tokio::spawn(async move { peer_for_version.send(version_msg).await });
                blocks_clients.add(peer);
            })
            .await
            {
                error!(%err, %addr, "blocks listener exited");
            }
        });

        info!(%addr, "blocks-only port listening");
        Ok(())
    }

    async fn spawn_blocks_and_tx_listener(self: &Arc<Self>) -> eyre::Result<()> {
        let addr = self.config.listen.blocks_and_tx_addr()?;
        Self::check_bindable(addr)?;

        let node = self.clone();
        let handler = self.untrusted_handler.clone() as Arc<dyn PeerEventHandler>;
        let shutdown = self.cancellation.clone();

        self.task_tracker.spawn(async move {
            let blocks_clients = node.blocks_clients.clone();
            let txn_clients = node.txn_clients.clone();
            if let Err(err) = listener::listen(addr, node.magic, handler, shutdown, move |peer| {
                let peer_for_version = peer.clone();
                let version_msg = version::inbound_version(peer_for_version.addr, 0);
                tokio::spawn(async move { peer_for_version.send(version_msg).await });
                // Blocks-first (spec.md §4.7): so it cannot receive its own
                // relayed block back before it's also subscribed for
                // transactions.
                blocks_clients.add(peer.clone());
                txn_clients.add(peer);
            })
            .await
            {
                error!(%err, %addr, "blocks+tx listener exited");
            }
        });

        info!(%addr, "blocks+tx port listening");
        Ok(())
    }

    async fn spawn_relay_protocol_listener(self: &Arc<Self>) -> eyre::Result<()> {
        let addr = self.config.listen.relay_protocol_addr()?;
        Self::check_bindable(addr)?;

        let node = self.clone();
        let handler = self.untrusted_handler.clone() as Arc<dyn PeerEventHandler>;
        let shutdown = self.cancellation.clone();

        self.task_tracker.spawn(async move {
            let relay_clients = node.relay_clients.clone();
            if let Err(err) = listener::listen(addr, node.magic, handler, shutdown, move |peer| {
                let peer_for_version = peer.clone();
                let version_msg = version::inbound_version(peer_for_version.addr, 0);
                tokio::spawn(async move { peer_for_version.send(version_msg).await });
                relay_clients.add(peer);
            })
            .await
            {
                error!(%err, %addr, "relay-protocol listener exited");
            }
        });

        info!(%addr, "relay-protocol port listening");
        Ok(())
    }

    fn add_trusted(&self, addr: SocketAddr) {
        if self.trusted_registry.contains(&addr.ip()) {
            self.log_operator_error(&format!("trusted peer {addr} already present"));
            return;
        }
        self.trusted_registry.add(addr, self.trusted_deps());
        info!(%addr, "trusted peer added");
    }

    fn add_outbound(&self, addr: SocketAddr) {
        if !self.outbound_registry.add(addr, self.magic, self.untrusted_handler.clone()) {
            self.log_operator_error(&format!("outbound peer {addr} already present"));
        } else {
            info!(%addr, "outbound peer added");
        }
    }

    fn add_relay(&self, ip: std::net::IpAddr) {
        if !self
            .relay_registry
            .add(ip, self.relay_peer_deps(), self.sidechannel_transport.clone())
        {
            self.log_operator_error(&format!("relay peer {ip} already present"));
        } else {
            info!(%ip, "relay peer added");
        }
    }

    /// spec.md §6: dispatches a single parsed operator command.
    pub async fn apply_operator_command(&self, command: Command) {
        match command {
            Command::Quit => unreachable!("Quit is handled by the caller before dispatch"),
            Command::AddTrusted(addr) => self.add_trusted(addr),
            Command::RemoveTrusted(addr) => {
                if self.trusted_registry.contains(&addr.ip()) {
                    self.trusted_registry.remove_permanently(&addr.ip());
                    info!(%addr, "trusted peer removed");
                } else {
                    self.log_operator_error(&format!("no trusted peer at {addr}"));
                }
            }
            Command::AddOutbound(addr) => self.add_outbound(addr),
            Command::RemoveOutbound(addr) => {
                if !self.outbound_registry.mark_for_removal(&addr) {
                    self.log_operator_error(&format!("no outbound peer at {addr}"));
                } else {
                    info!(%addr, "outbound peer marked for removal");
                }
            }
            Command::AddRelay(ip) => self.add_relay(ip),
            Command::RemoveRelay(ip) => {
                if !self.relay_registry.mark_for_removal(&ip) {
                    self.log_operator_error(&format!("no relay peer at {ip}"));
                } else {
                    info!(%ip, "relay peer marked for removal");
                }
            }
        }
    }

    /// spec.md §6: "invalid/duplicate commands print an error line into the
    /// TUI".
    pub fn log_operator_error(&self, message: &str) {
        warn!(%message, "operator command rejected");
    }

    /// Renders the status panel spec.md §4.7 describes: every trusted
    /// peer's dual-connection status, every relay/outbound peer's
    /// connection state, client counts, and chain height.
    pub async fn render_status_panel(&self) -> String {
        let mut panel = String::new();
        let _ = writeln!(panel, "── relaynode status ──");
        let _ = writeln!(panel, "chain height: {}", self.header_store.tip_height());
        let _ = writeln!(
            panel,
            "clients: blocks={} blocks+tx={} relay={}",
            self.blocks_clients.len(),
            self.txn_clients.len(),
            self.relay_clients.len(),
        );

        let _ = writeln!(panel, "trusted peers:");
        for conn in self.trusted_registry.snapshot() {
            let status = match conn.status() {
                ConnectionStatus::Idle => "idle",
                ConnectionStatus::Connecting => "connecting",
                ConnectionStatus::PartiallyUp => "partially up",
                ConnectionStatus::FullyUp => "fully connected",
                ConnectionStatus::Disconnected => "disconnected",
            };
            let _ = writeln!(panel, "  {} [{status}]", conn.addr);
        }

        let _ = writeln!(panel, "outbound peers:");
        for peer in self.outbound_registry.snapshot() {
            let status = match peer.state() {
                OutboundPeerState::Connected => "connected",
                OutboundPeerState::WaitingOnReconnection => "waiting to reconnect",
                OutboundPeerState::MarkedForRemoval => "marked for removal",
            };
            let _ = writeln!(panel, "  {} [{status}]", peer.addr);
        }

        let _ = writeln!(panel, "relay peers:");
        for client in self.relay_registry.snapshot() {
            let status = match client.state() {
                RelayPeerState::Connected => "connected",
                RelayPeerState::WaitingOnReconnection => "waiting to reconnect",
                RelayPeerState::MarkedForRemoval => "marked for removal",
            };
            let _ = writeln!(panel, "  {} [{status}]", client.addr);
        }

        panel
    }

    pub async fn shutdown(&self) {
        info!("shutting down node");
        self.cancellation.cancel();

        tokio::select! {
            _ = self.task_tracker.wait() => {}
            _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => {
                warn!("shutdown timeout reached, exiting");
            }
        }
    }
}
