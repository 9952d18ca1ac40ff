//! Builds the `version` message each listening/outbound socket sends on
//! connect, tagged per spec.md §6:
//!
//! - inbound (both P2P ports and the relay-protocol port): advertises
//!   `NODE_NETWORK` with subversion `"/<codec-default>:RelayNode:<version>/"`.
//! - outbound Bitcoin P2P: subversion additionally tagged
//!   `"OutboundRelayNode - bitcoin-peering@..."`.
//!
//! The handshake itself (version/verack exchange) belongs to the external
//! wire-protocol codec this spec treats as opaque (spec.md §1); this node
//! only needs to *advertise itself* correctly, which is why this is a
//! message builder rather than a state machine.

use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use bitcoin::network::address::Address;
use bitcoin::network::constants::ServiceFlags;
use bitcoin::network::message::NetworkMessage;
use bitcoin::network::message_network::VersionMessage;

const CODEC_DEFAULT_USER_AGENT: &str = "/Satoshi:25.0.0/";
const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

fn subversion(suffix: Option<&str>) -> String {
    match suffix {
        Some(suffix) => format!("{CODEC_DEFAULT_USER_AGENT}RelayNode:{PKG_VERSION}/{suffix}"),
        None => format!("{CODEC_DEFAULT_USER_AGENT}RelayNode:{PKG_VERSION}/"),
    }
}

fn version_message(local: SocketAddr, remote: SocketAddr, user_agent: String, start_height: i32) -> NetworkMessage {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    let services = ServiceFlags::NETWORK;
    let nonce = fastrand::u64(..);

    let version = VersionMessage::new(
        services,
        timestamp,
        Address::new(&remote, services),
        Address::new(&local, services),
        nonce,
        user_agent,
        start_height,
    );

    NetworkMessage::Version(version)
}

/// Unconnectable placeholder for our own listen address when we don't know
/// (or don't care about) what the peer sees us as — the `version` message's
/// `receiver`/`sender` addresses are advisory and no logic here depends on
/// them being dialable.
fn unspecified() -> SocketAddr {
    "0.0.0.0:0".parse().expect("valid socket addr")
}

/// Version message for a peer accepted on one of our listening sockets.
pub fn inbound_version(remote: SocketAddr, start_height: i32) -> NetworkMessage {
    version_message(unspecified(), remote, subversion(None), start_height)
}

/// Version message for a peer we dialed out to over plain Bitcoin P2P
/// (spec.md §6: "subversion additionally tagged `OutboundRelayNode -
/// bitcoin-peering@...`").
pub fn outbound_version(remote: SocketAddr, start_height: i32) -> NetworkMessage {
    version_message(
        unspecified(),
        remote,
        subversion(Some("OutboundRelayNode - bitcoin-peering@relaynode")),
        start_height,
    )
}
