use thiserror::Error;

/// Errors surfaced by the connection layer's bind/connect calls. Per-message
/// decode failures and send failures are handled inline in `peer.rs` (the
/// peer is dropped or the send is swallowed) and never reach this type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
