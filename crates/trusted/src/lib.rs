//! Dual-socket management of one trusted validator (spec.md C5).
//!
//! Each trusted peer gets two simultaneous sessions: an inbound session
//! that only ever listens for acceptance signals, and an outbound session
//! that pushes unvetted data via [`relay_pool::ObjectPool::provide_object`]
//! and drives a headers-only chain download. The two are deliberately not
//! entangled — see spec.md §4.5 for why — but they share fate: a disconnect
//! on either forces the other closed and schedules a joint reconnect.

mod acceptance;
mod connection;

pub use acceptance::AcceptanceHandler;
pub use connection::{ConnectionStatus, TrustedDeps, TrustedPeerConnection};

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

/// The node's set of trusted validators, keyed by remote IP address (spec.md
/// §3: "Node state: a set of TrustedPeerConnection keyed by remote IP
/// address").
#[derive(Default)]
pub struct TrustedRegistry {
    connections: Mutex<HashMap<IpAddr, Arc<TrustedPeerConnection>>>,
}

impl TrustedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a trusted validator at `addr` and starts its connection loop.
    /// A duplicate add (same IP already present) is a no-op, returning the
    /// existing connection instead of spawning a second one.
    pub fn add(
        self: &Arc<Self>,
        addr: std::net::SocketAddr,
        deps: Arc<TrustedDeps>,
    ) -> Arc<TrustedPeerConnection> {
        let ip = addr.ip();
        let mut connections = self.connections.lock().expect("trusted registry mutex poisoned");
        if let Some(existing) = connections.get(&ip) {
            return existing.clone();
        }

        let conn = TrustedPeerConnection::spawn(addr, deps);
        connections.insert(ip, conn.clone());
        conn
    }

    /// Permanently removes the trusted validator at `ip`, closing both of
    /// its sockets and cancelling any pending reconnect.
    pub fn remove_permanently(&self, ip: &IpAddr) {
        let removed = self.connections.lock().expect("trusted registry mutex poisoned").remove(ip);
        if let Some(conn) = removed {
            conn.disconnect_permanently();
        }
    }

    pub fn get(&self, ip: &IpAddr) -> Option<Arc<TrustedPeerConnection>> {
        self.connections.lock().expect("trusted registry mutex poisoned").get(ip).cloned()
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.connections.lock().expect("trusted registry mutex poisoned").contains_key(ip)
    }

    /// Snapshot of every trusted connection, for the TUI status panel and
    /// for the relay-peer header-drift resync (spec.md §4.6: "force-
    /// disconnect every trusted peer").
    pub fn snapshot(&self) -> Vec<Arc<TrustedPeerConnection>> {
        self.connections
            .lock()
            .expect("trusted registry mutex poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Forces every trusted peer to tear down and reconnect, without
    /// removing them from the registry. Used by the relay-peer client when
    /// its header-chain add fails (spec.md §4.6 / §8 scenario 6).
    pub async fn force_disconnect_all(&self) {
        for conn in self.snapshot() {
            conn.force_disconnect().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddr};

    use relay_net::PeerGroup;
    use relay_types::InMemoryHeaderStore;

    use super::*;

    async fn deps() -> Arc<TrustedDeps> {
        Arc::new(TrustedDeps {
            block_pool: relay_pool::ObjectPool::for_blocks(),
            tx_pool: relay_pool::ObjectPool::for_transactions(),
            blocks_clients: PeerGroup::new().into(),
            txn_clients: PeerGroup::new().into(),
            relay_clients: PeerGroup::new().into(),
            trusted_outbound: PeerGroup::new().into(),
            header_store: Arc::new(InMemoryHeaderStore::new([0u8; 32])),
            relay_log: Arc::new(
                relaylog::RelayLog::open(temp_log_path()).await.expect("open relay log"),
            ),
            magic: bitcoin::Network::Bitcoin.magic(),
        })
    }

    fn temp_log_path() -> std::path::PathBuf {
        use std::time::{SystemTime, UNIX_EPOCH};
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        std::env::temp_dir().join(format!("trusted-registry-test-{nanos}.log"))
    }

    // spec.md §3: the trusted map is keyed by remote IP address — a second
    // `add` for an address sharing that IP must not spawn a second
    // connection, it returns the existing one.
    #[tokio::test]
    async fn add_is_idempotent_per_ip() {
        let registry = Arc::new(TrustedRegistry::new());
        let ip = Ipv4Addr::new(10, 1, 2, 3);
        let first = registry.add(SocketAddr::new(ip.into(), 8333), deps().await);
        let second = registry.add(SocketAddr::new(ip.into(), 9999), deps().await);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.snapshot().len(), 1);
        first.disconnect_permanently();
    }

    #[tokio::test]
    async fn remove_permanently_closes_and_drops_from_registry() {
        let registry = Arc::new(TrustedRegistry::new());
        let ip = Ipv4Addr::new(10, 1, 2, 4);
        let conn = registry.add(SocketAddr::new(ip.into(), 8333), deps().await);
        assert!(registry.contains(&ip.into()));

        registry.remove_permanently(&ip.into());

        assert!(!registry.contains(&ip.into()));
        assert_eq!(conn.status(), ConnectionStatus::Disconnected);
    }
}
