//! Shared data model for the relay node: inventory items, the generic
//! [`RelayObject`] trait that lets the object pool and peer groups be
//! written once and instantiated for both blocks and transactions, and the
//! small set of tags used when logging and rendering peer state.

pub mod fifo;
pub mod header_store;
pub mod inventory;
pub mod source;
pub mod verify;
pub mod wire;

pub use fifo::BoundedFifoSet;
pub use header_store::{HeaderChainError, HeaderChainStore, InMemoryHeaderStore};
pub use inventory::{InvKind, InventoryItem, RelayObject};
pub use source::SourceTag;
pub use verify::{verify_structural, StructuralVerifyError};
pub use wire::ToNetworkMessage;

/// A 32-byte double-SHA256 hash, used for both block and transaction ids.
///
/// `bitcoin::BlockHash`/`bitcoin::Txid` already carry this, but the pool and
/// inventory tracker are generic over `T: RelayObject` and only need the raw
/// bytes, so [`RelayObject::hash`] normalizes to this type.
pub type Hash32 = [u8; 32];

/// Renders a hash the way the relay log and TUI do: short, hex, no newtype
/// ceremony.
pub fn short_hex(hash: &Hash32) -> String {
    hex::encode(hash)
}
