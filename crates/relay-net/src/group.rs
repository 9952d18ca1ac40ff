use std::net::SocketAddr;
use std::sync::Mutex;

use relay_types::{RelayObject, ToNetworkMessage};
use tracing::debug;

use crate::peer::PeerHandle;

/// A set of connected peers, fanned out to as a unit (spec.md C2).
///
/// Membership is a plain `Mutex<Vec<_>>` rather than a concurrent map: groups
/// are small (tens of peers, not thousands) and every operation either scans
/// the whole group (`relay_object`) or mutates it outright (`add`/`remove`),
/// so a lock held for the duration of each call is simpler than anything
/// lock-free and no slower in practice.
#[derive(Default)]
pub struct PeerGroup {
    peers: Mutex<Vec<PeerHandle>>,
}

impl PeerGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `peer` to the group and spawns a small task that removes it
    /// again once the connection disconnects, whatever the cause. This is
    /// the only path by which membership shrinks.
    pub fn add(self: &std::sync::Arc<Self>, peer: PeerHandle) {
        self.peers.lock().expect("peer group mutex poisoned").push(peer.clone());

        let group = self.clone();
        tokio::spawn(async move {
            peer.wait_disconnected().await;
            group.remove(peer.addr);
        });
    }

    pub fn remove(&self, addr: SocketAddr) {
        let mut peers = self.peers.lock().expect("peer group mutex poisoned");
        if let Some(pos) = peers.iter().position(|p| p.addr == addr) {
            peers.swap_remove(pos);
            debug!(%addr, "peer left group");
        }
    }

    pub fn len(&self) -> usize {
        self.peers.lock().expect("peer group mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of current membership. Taken under the lock and then
    /// released immediately — every caller in this crate only ever iterates
    /// a snapshot, never the live vector, so a peer disconnecting mid-fan-out
    /// is simply relayed to one extra time at worst (spec.md's P3: relay
    /// fan-out tolerates a peer leaving mid-broadcast).
    pub fn snapshot(&self) -> Vec<PeerHandle> {
        self.peers.lock().expect("peer group mutex poisoned").clone()
    }

    pub fn find(&self, addr: SocketAddr) -> Option<PeerHandle> {
        self.peers
            .lock()
            .expect("peer group mutex poisoned")
            .iter()
            .find(|p| p.addr == addr)
            .cloned()
    }

    /// Fans `object` out to every member (spec.md §4.2 / P3): each peer's own
    /// inventory set decides whether it actually gets sent anything.
    pub async fn relay_object<T: RelayObject + ToNetworkMessage>(&self, object: &T) {
        for peer in self.snapshot() {
            peer.maybe_relay(object).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;

    use bitcoin::blockdata::constants::genesis_block;
    use bitcoin::Network;

    use super::*;

    fn group() -> Arc<PeerGroup> {
        Arc::new(PeerGroup::new())
    }

    #[test]
    fn starts_empty() {
        assert!(group().is_empty());
    }

    #[tokio::test]
    async fn add_registers_member_and_remove_drops_it() {
        let group = group();
        let peer = PeerHandle::for_test(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 18444),
            "",
        );
        group.add(peer.clone());
        assert_eq!(group.len(), 1);

        group.remove(peer.addr);
        assert!(group.is_empty());
    }

    // P7: a second relay to the same peer for an object already in its
    // inventory (because the first relay marked it there) is a no-op — the
    // peer's own inventory tracker is what `relay_object` relies on.
    #[tokio::test]
    async fn relay_object_marks_peer_inventory_so_it_is_not_reannounced() {
        let group = group();
        let peer = PeerHandle::for_test(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 18444),
            "",
        );
        group.add(peer.clone());

        let block = genesis_block(Network::Bitcoin);
        group.relay_object(&block).await;

        assert!(peer.inventory_contains(block.inventory_item()));
    }
}
