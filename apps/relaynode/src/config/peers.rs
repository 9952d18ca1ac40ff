use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

use eyre::{Context, OptionExt};
use serde::Deserialize;

/// Relay-protocol peers always dial port 8336 (spec.md §6: "port fixed at
/// 8336").
pub const RELAY_PROTOCOL_PORT: u16 = 8336;

/// Peers to dial at startup, before the operator issues a single `t`/`o`/`r`
/// command (spec.md §6 says peers are "added by operator command"; this
/// config section is the ambient equivalent of typing those same commands
/// into stdin before the process has a TTY attached to script them).
#[derive(Deserialize, Clone, Default)]
pub struct PeersConfig {
    #[serde(default)]
    pub trusted: Vec<String>,
    #[serde(default)]
    pub outbound: Vec<String>,
    #[serde(default)]
    pub relay: Vec<String>,
}

impl PeersConfig {
    pub fn trusted_addrs(&self) -> eyre::Result<Vec<SocketAddr>> {
        self.trusted.iter().map(|s| resolve(s)).collect()
    }

    pub fn outbound_addrs(&self) -> eyre::Result<Vec<SocketAddr>> {
        self.outbound.iter().map(|s| resolve(s)).collect()
    }

    pub fn relay_addrs(&self) -> eyre::Result<Vec<IpAddr>> {
        self.relay
            .iter()
            .map(|s| {
                s.parse::<IpAddr>()
                    .wrap_err_with(|| format!("failed to parse relay peer address {s}"))
            })
            .collect()
    }
}

fn resolve(address: &str) -> eyre::Result<SocketAddr> {
    address
        .to_socket_addrs()
        .wrap_err_with(|| format!("failed to resolve peer address {address}"))?
        .next()
        .ok_or_eyre("no address found in peer address")
}

pub fn relay_peer_socket(ip: IpAddr) -> SocketAddr {
    SocketAddr::new(ip, RELAY_PROTOCOL_PORT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_peer_socket_always_uses_port_8336() {
        let ip: IpAddr = "203.0.113.7".parse().unwrap();
        assert_eq!(relay_peer_socket(ip), "203.0.113.7:8336".parse().unwrap());
    }

    #[test]
    fn trusted_and_outbound_addrs_resolve_literal_socket_addrs() {
        let peers = PeersConfig {
            trusted: vec!["10.0.0.1:8333".to_string()],
            outbound: vec!["10.0.0.2:8333".to_string()],
            relay: vec!["10.0.0.3".to_string()],
        };

        assert_eq!(peers.trusted_addrs().unwrap(), vec!["10.0.0.1:8333".parse().unwrap()]);
        assert_eq!(peers.outbound_addrs().unwrap(), vec!["10.0.0.2:8333".parse().unwrap()]);
        assert_eq!(
            peers.relay_addrs().unwrap(),
            vec!["10.0.0.3".parse::<IpAddr>().unwrap()]
        );
    }

    #[test]
    fn relay_addrs_rejects_a_socket_addr_with_a_port() {
        let peers = PeersConfig {
            trusted: vec![],
            outbound: vec![],
            relay: vec!["10.0.0.3:8336".to_string()],
        };
        assert!(peers.relay_addrs().is_err());
    }
}
