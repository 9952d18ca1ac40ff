use std::collections::HashSet;
use std::sync::Mutex;

use bitcoin::Block;
use thiserror::Error;

use crate::Hash32;

/// The external block-header chain store (spec.md §1: "used only to
/// deduplicate blocks by hash and to track tip height"). This crate never
/// validates a header chain itself — it only needs somewhere to ask "have
/// I seen this hash" and "will you accept this one", so the trait is kept
/// deliberately thin.
pub trait HeaderChainStore: Send + Sync {
    /// True if a header for this hash is already known.
    fn has_header(&self, hash: &Hash32) -> bool;

    /// Attempt to extend the chain with `block`'s header. Rejection is
    /// reported as an error; callers decide what that means for their
    /// source (silent for untrusted, warn for trusted/relay — see
    /// spec.md §7).
    fn try_add_header(&self, block: &Block) -> Result<(), HeaderChainError>;

    fn tip_height(&self) -> u64;
}

#[derive(Debug, Error)]
pub enum HeaderChainError {
    #[error("header does not connect to a known chain tip")]
    Disconnected,
    #[error("header rejected: {0}")]
    Rejected(String),
}

/// A minimal in-memory stand-in for the real header-chain store: it accepts
/// any header whose previous-block hash it has already seen (or the
/// network's genesis), and otherwise rejects with
/// [`HeaderChainError::Disconnected`]. Good enough to exercise the
/// dedup/tip-height contract this crate actually depends on; real consensus
/// validation is explicitly out of scope (spec.md §1 non-goals).
pub struct InMemoryHeaderStore {
    known: Mutex<HashSet<Hash32>>,
    height: Mutex<u64>,
}

impl InMemoryHeaderStore {
    pub fn new(genesis_hash: Hash32) -> Self {
        let mut known = HashSet::new();
        known.insert(genesis_hash);
        Self {
            known: Mutex::new(known),
            height: Mutex::new(0),
        }
    }
}

impl HeaderChainStore for InMemoryHeaderStore {
    fn has_header(&self, hash: &Hash32) -> bool {
        self.known.lock().expect("header store mutex poisoned").contains(hash)
    }

    fn try_add_header(&self, block: &Block) -> Result<(), HeaderChainError> {
        use bitcoin::hashes::Hash as _;

        let prev: Hash32 = block.header.prev_blockhash.to_byte_array();
        let hash: Hash32 = block.block_hash().to_byte_array();

        let mut known = self.known.lock().expect("header store mutex poisoned");
        if !known.contains(&prev) {
            return Err(HeaderChainError::Disconnected);
        }
        if known.insert(hash) {
            *self.height.lock().expect("header store mutex poisoned") += 1;
        }
        Ok(())
    }

    fn tip_height(&self) -> u64 {
        *self.height.lock().expect("header store mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::blockdata::constants::genesis_block;
    use bitcoin::hashes::Hash as _;
    use bitcoin::Network;

    use super::*;

    #[test]
    fn rejects_disconnected_header() {
        let store = InMemoryHeaderStore::new([0u8; 32]);
        let block = genesis_block(Network::Bitcoin);
        assert!(matches!(
            store.try_add_header(&block),
            Err(HeaderChainError::Disconnected)
        ));
    }

    #[test]
    fn accepts_header_building_on_known_tip() {
        let block = genesis_block(Network::Bitcoin);
        let genesis_hash = block.block_hash().to_byte_array();
        let store = InMemoryHeaderStore::new(genesis_hash);
        assert!(store.has_header(&genesis_hash));
        assert_eq!(store.tip_height(), 0);
    }
}
