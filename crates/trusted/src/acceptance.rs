//! The trusted-peer acceptance handler: a [`relay_net::PeerEventHandler`]
//! distinct from `relay-controller`'s untrusted handler, installed only on
//! a trusted validator's *inbound* session (spec.md §4.5). Everything it
//! observes is, by definition, something a trusted validator has accepted —
//! that's the one warrant this whole system trusts.

use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::hashes::Hash as _;
use bitcoin::network::message::NetworkMessage;
use bitcoin::network::message_blockdata::Inventory;
use bitcoin::{Block, Transaction};
use relay_net::{PeerEventHandler, PeerHandle};
use relay_types::{Hash32, InvKind, InventoryItem, SourceTag};
use tracing::warn;

use crate::connection::TrustedDeps;

pub struct AcceptanceHandler {
    pub deps: Arc<TrustedDeps>,
}

impl AcceptanceHandler {
    /// spec.md §4.5: split an `inv` into items already known to our pools
    /// (queued for broadcast) and items still unknown (requested via
    /// `getdata`; they'll re-enter through the bare block/tx branch once
    /// served).
    async fn handle_inv(&self, peer: &PeerHandle, items: Vec<Inventory>) {
        let mut getdata = Vec::new();
        let mut blocks_good = Vec::new();
        let mut tx_good = Vec::new();

        for wire_item in &items {
            let Some(item) = InventoryItem::from_wire(wire_item) else {
                continue;
            };
            match item.kind {
                InvKind::Block => {
                    if self.deps.block_pool.should_request_inv(&item.hash) {
                        getdata.push(item.to_wire());
                    } else {
                        blocks_good.push(item.hash);
                    }
                }
                InvKind::Transaction => {
                    if self.deps.tx_pool.should_request_inv(&item.hash) {
                        getdata.push(item.to_wire());
                    } else {
                        tx_good.push(item.hash);
                    }
                }
            }
        }

        if !getdata.is_empty() {
            peer.send(NetworkMessage::GetData(getdata)).await;
        }

        let peer_addr = peer.addr;
        let deps = self.deps.clone();
        tokio::spawn(async move {
            for hash in blocks_good {
                if let Some(block) = deps.block_pool.get_object(&hash) {
                    deps.relay_clients.relay_object(&block).await;
                }
                deps.block_pool.inv_good(&deps.blocks_clients, hash).await;
                log_first_seen(&deps, hash, peer_addr).await;
            }
            for hash in tx_good {
                if let Some(tx) = deps.tx_pool.get_object(&hash) {
                    deps.relay_clients.relay_object(&tx).await;
                }
                deps.tx_pool.inv_good(&deps.txn_clients, hash).await;
                // No log entry: C8 logs blocks only (spec.md §8 scenario 2).
            }
        });
    }

    /// spec.md §4.5: a bare block received directly on the inbound session,
    /// not preceded by an `inv`.
    async fn handle_block(&self, block: Block) {
        let hash = block.block_hash().to_byte_array();

        self.deps.relay_clients.relay_object(&block).await;
        self.deps.block_pool.provide_object(block.clone(), &self.deps.trusted_outbound).await;
        self.deps.block_pool.inv_good(&self.deps.blocks_clients, hash).await;

        if !self.deps.header_store.has_header(&hash) {
            if let Err(err) = self.deps.header_store.try_add_header(&block) {
                warn!(%err, hash = %relay_types::short_hex(&hash), "trusted inbound header rejected");
            }
        }
    }

    /// spec.md §4.5: a bare transaction received directly on the inbound
    /// session.
    async fn handle_tx(&self, tx: Transaction) {
        let hash = tx.txid().to_byte_array();

        self.deps.relay_clients.relay_object(&tx).await;
        self.deps.tx_pool.provide_object(tx.clone(), &self.deps.trusted_outbound).await;
        self.deps.tx_pool.inv_good(&self.deps.txn_clients, hash).await;
    }
}

async fn log_first_seen(deps: &TrustedDeps, hash: Hash32, peer_addr: std::net::SocketAddr) {
    let rdns = relaylog::resolve_ptr(peer_addr.ip()).await;
    if let Err(err) = deps
        .relay_log
        .log_first_seen(hash, SourceTag::TrustedInv, peer_addr.ip(), rdns.as_deref(), &[])
        .await
    {
        warn!(%err, "failed to write relay log");
    }
}

#[async_trait]
impl PeerEventHandler for AcceptanceHandler {
    async fn on_message(&self, peer: &PeerHandle, message: NetworkMessage) {
        match message {
            NetworkMessage::Inv(items) => self.handle_inv(peer, items).await,
            NetworkMessage::Block(block) => self.handle_block(block).await,
            NetworkMessage::Tx(tx) => self.handle_tx(tx).await,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::time::{SystemTime, UNIX_EPOCH};

    use bitcoin::blockdata::constants::genesis_block;
    use bitcoin::hashes::Hash as _;
    use bitcoin::network::message_blockdata::Inventory;
    use bitcoin::Network;
    use relay_pool::ObjectPool;
    use relay_types::InMemoryHeaderStore;

    use super::*;

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 8333)
    }

    fn temp_log_path() -> std::path::PathBuf {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        std::env::temp_dir().join(format!("trusted-acceptance-test-{nanos}.log"))
    }

    async fn deps() -> (Arc<TrustedDeps>, std::path::PathBuf) {
        let path = temp_log_path();
        let relay_log = Arc::new(relaylog::RelayLog::open(&path).await.unwrap());
        let block = genesis_block(Network::Bitcoin);
        let genesis_hash = block.block_hash().to_byte_array();
        let deps = Arc::new(TrustedDeps {
            block_pool: ObjectPool::for_blocks(),
            tx_pool: ObjectPool::for_transactions(),
            blocks_clients: relay_net::PeerGroup::new().into(),
            txn_clients: relay_net::PeerGroup::new().into(),
            relay_clients: relay_net::PeerGroup::new().into(),
            trusted_outbound: relay_net::PeerGroup::new().into(),
            header_store: Arc::new(InMemoryHeaderStore::new(genesis_hash)),
            relay_log,
            magic: bitcoin::Network::Bitcoin.magic(),
        });
        (deps, path)
    }

    // spec.md §4.5: an inv item our pool doesn't already know becomes a
    // getdata entry, never an immediate broadcast.
    #[tokio::test]
    async fn unknown_inv_item_produces_getdata_not_broadcast() {
        let (deps, path) = deps().await;
        let handler = AcceptanceHandler { deps: deps.clone() };
        let peer = PeerHandle::for_test(addr(), "");

        let hash = [7u8; 32];
        handler
            .handle_inv(&peer, vec![Inventory::Block(bitcoin::BlockHash::from_byte_array(hash))])
            .await;

        // Nothing was cached or relayed by a bare inv announcement: the
        // pool still wants it.
        assert!(deps.block_pool.should_request_inv(&hash));
        let _ = std::fs::remove_file(&path);
    }

    // spec.md §4.5 scenario 2: an inv item already known to our pool
    // (because we already cached it, e.g. via provide_object) fires
    // inv_good instead of getdata, promoting it to `relayed`.
    #[tokio::test]
    async fn known_inv_item_promotes_via_inv_good() {
        let (deps, path) = deps().await;
        let handler = AcceptanceHandler { deps: deps.clone() };
        let peer = PeerHandle::for_test(addr(), "");

        let tx = bitcoin::Transaction {
            version: 2,
            lock_time: bitcoin::absolute::LockTime::ZERO,
            input: vec![],
            output: vec![],
        };
        let hash = tx.txid().to_byte_array();
        deps.tx_pool.provide_object(tx, &deps.trusted_outbound).await;
        assert!(!deps.tx_pool.should_request_inv(&hash));

        handler
            .handle_inv(&peer, vec![Inventory::Transaction(bitcoin::Txid::from_byte_array(hash))])
            .await;

        // Give the spawned fan-out task a chance to run.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(!deps.tx_pool.should_request_inv(&hash));
        let _ = std::fs::remove_file(&path);
    }

    // A bare block on the inbound session is trusted acceptance: it must
    // reach relay clients and the header store, without waiting for an inv.
    #[tokio::test]
    async fn bare_block_on_inbound_is_relayed_and_added_to_header_store() {
        let (deps, path) = deps().await;
        let handler = AcceptanceHandler { deps: deps.clone() };

        let block = genesis_block(Network::Bitcoin);
        let hash = block.block_hash().to_byte_array();
        // genesis is already the store's tip, so adding it again is a no-op
        // header-wise; what matters is that inv_good fires and the object
        // is no longer pending in `objects`.
        handler.handle_block(block).await;

        assert!(!deps.block_pool.should_request_inv(&hash));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn bare_tx_on_inbound_is_provided_and_promoted() {
        let (deps, path) = deps().await;
        let handler = AcceptanceHandler { deps: deps.clone() };

        let tx = bitcoin::Transaction {
            version: 2,
            lock_time: bitcoin::absolute::LockTime::ZERO,
            input: vec![],
            output: vec![],
        };
        let hash = tx.txid().to_byte_array();
        handler.handle_tx(tx).await;

        assert!(!deps.tx_pool.should_request_inv(&hash));
        let _ = std::fs::remove_file(&path);
    }
}
