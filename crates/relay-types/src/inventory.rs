use bitcoin::hashes::Hash as _;
use bitcoin::network::message_blockdata::Inventory as WireInventory;
use bitcoin::{Block, BlockHash, Transaction, Txid};

use crate::Hash32;

/// Kind of object an [`InventoryItem`] announces, per the Bitcoin wire
/// `inv` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvKind {
    Block,
    Transaction,
}

/// `(kind, hash)` — announces availability of a block or transaction.
/// Equality is structural on both fields, matching spec.md's data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InventoryItem {
    pub kind: InvKind,
    pub hash: Hash32,
}

impl InventoryItem {
    pub fn block(hash: Hash32) -> Self {
        Self {
            kind: InvKind::Block,
            hash,
        }
    }

    pub fn transaction(hash: Hash32) -> Self {
        Self {
            kind: InvKind::Transaction,
            hash,
        }
    }

    /// Converts a wire `inv`/`getdata` entry into our internal
    /// representation, collapsing the witness variants into the same kind
    /// (we never distinguish segwit-flagged announcements from plain ones —
    /// both identify the same object). Anything else (`Error`, filtered
    /// variants) has no meaning here and is dropped.
    pub fn from_wire(inv: &WireInventory) -> Option<Self> {
        match inv {
            WireInventory::Block(hash) | WireInventory::WitnessBlock(hash) => {
                Some(Self::block(hash.to_byte_array()))
            }
            WireInventory::Transaction(txid) | WireInventory::WitnessTransaction(txid) => {
                Some(Self::transaction(txid.to_byte_array()))
            }
            _ => None,
        }
    }

    /// The inverse of [`InventoryItem::from_wire`], used when building
    /// `getdata` replies.
    pub fn to_wire(self) -> WireInventory {
        match self.kind {
            InvKind::Block => WireInventory::Block(BlockHash::from_byte_array(self.hash)),
            InvKind::Transaction => {
                WireInventory::Transaction(Txid::from_byte_array(self.hash))
            }
        }
    }
}

/// Anything that can live in a [`pool::ObjectPool`](../relay_pool) or be
/// fanned out through a peer group: a block or a transaction. The pool and
/// the peer groups are written once, generic over this trait, rather than
/// duplicated per object kind — spec.md's `ObjectPool<T> where T ∈ {Block,
/// Transaction}` is literally this.
pub trait RelayObject: Clone + Send + Sync + 'static {
    const KIND: InvKind;

    fn object_hash(&self) -> Hash32;

    fn inventory_item(&self) -> InventoryItem {
        InventoryItem {
            kind: Self::KIND,
            hash: self.object_hash(),
        }
    }
}

impl RelayObject for Block {
    const KIND: InvKind = InvKind::Block;

    fn object_hash(&self) -> Hash32 {
        self.block_hash().to_byte_array()
    }
}

impl RelayObject for Transaction {
    const KIND: InvKind = InvKind::Transaction;

    fn object_hash(&self) -> Hash32 {
        self.txid().to_byte_array()
    }
}
