use std::sync::Mutex;

use bitcoin::network::message::NetworkMessage;
use relay_types::{BoundedFifoSet, InventoryItem, RelayObject};

/// Capacity from spec.md §3/§8 (P1): "a bounded insertion-ordered set of
/// InventoryItem, capacity 500, eviction FIFO".
pub const CAPACITY: usize = 500;

/// Per-peer bounded set of inventory items known to that peer (spec.md C1).
///
/// Two things feed it: the pre-receive hook (`observe_inbound`), which
/// records whatever the peer announced to us, and `maybe_relay`, which
/// records whatever we announced to the peer. Either way, once an item is
/// in the set we never send it to this peer again.
pub struct PeerInventory {
    items: Mutex<BoundedFifoSet<InventoryItem>>,
}

impl PeerInventory {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(BoundedFifoSet::new(CAPACITY)),
        }
    }

    /// Records that this peer already has `item`. Returns `true` if this
    /// was new information.
    pub fn insert(&self, item: InventoryItem) -> bool {
        self.items.lock().expect("inventory mutex poisoned").insert(item)
    }

    pub fn contains(&self, item: &InventoryItem) -> bool {
        self.items
            .lock()
            .expect("inventory mutex poisoned")
            .contains(item)
    }

    /// The pre-receive hook described in spec.md §4.1: inspects every
    /// inbound message and auto-populates the set so we never re-announce
    /// what the peer just offered us. `inv` messages enter all their items;
    /// a bare block or tx enters a single derived item. All other message
    /// kinds are untouched.
    pub fn observe_inbound(&self, message: &NetworkMessage) {
        match message {
            NetworkMessage::Inv(inv) => {
                for item in inv {
                    if let Some(item) = InventoryItem::from_wire(item) {
                        self.insert(item);
                    }
                }
            }
            NetworkMessage::Block(block) => {
                self.insert(block.inventory_item());
            }
            NetworkMessage::Tx(tx) => {
                self.insert(tx.inventory_item());
            }
            _ => {}
        }
    }
}

impl Default for PeerInventory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_at_500_entries() {
        let tracker = PeerInventory::new();
        for i in 0..600u32 {
            let mut hash = [0u8; 32];
            hash[..4].copy_from_slice(&i.to_le_bytes());
            tracker.insert(InventoryItem::block(hash));
        }

        let count = tracker.items.lock().unwrap().len();
        assert_eq!(count, CAPACITY);
    }

    #[test]
    fn insert_is_idempotent_and_reports_novelty() {
        let tracker = PeerInventory::new();
        let item = InventoryItem::block([7u8; 32]);
        assert!(tracker.insert(item));
        assert!(!tracker.insert(item));
    }
}
