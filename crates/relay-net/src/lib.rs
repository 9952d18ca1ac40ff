//! Peer connection lifecycle for the relay node.
//!
//! This crate owns everything spec.md calls "C1" and "C2": a bounded,
//! FIFO-evicting inventory tracker per peer (so we never re-announce an
//! object a peer already told us about), and a peer group that fans a
//! block or transaction out to every member while skipping peers that
//! already have it.
//!
//! Wire framing is provided by the `bitcoin` crate's consensus encode/decode
//! (the external wire-protocol codec spec.md treats as out of scope); this
//! crate only drives the TCP connection and the per-message dispatch hook.

pub mod error;
pub mod group;
pub mod listener;
pub mod peer;
pub mod tracker;

pub use error::Error;
pub use group::PeerGroup;
pub use peer::{PeerEventHandler, PeerHandle};
pub use tracker::PeerInventory;
