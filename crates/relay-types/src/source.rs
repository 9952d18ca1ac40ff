use std::fmt;

/// How a block was first observed, for the relay log line
/// (spec.md §4.4, §4.5, §4.6, §8 scenarios 1-3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTag {
    /// Unvetted P2P peer, block header accepted by the chain store directly.
    P2pSpv,
    /// Relay-protocol client, same acceptance path as `P2pSpv`.
    RelaySpv,
    /// Accepted because a trusted validator announced it in an `inv`.
    TrustedInv,
    /// Shipped to us over the compact relay-protocol side channel.
    RelayPeer,
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::P2pSpv => "p2p SPV",
            Self::RelaySpv => "relay SPV",
            Self::TrustedInv => "trusted inv",
            Self::RelayPeer => "relay peer",
        };
        f.write_str(s)
    }
}
