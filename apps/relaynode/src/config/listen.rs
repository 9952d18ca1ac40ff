use std::net::{SocketAddr, ToSocketAddrs};

use eyre::{Context, OptionExt};
use serde::Deserialize;

/// The three listening sockets spec.md §6 calls out, with its documented
/// defaults (8334 blocks-only, 8335 blocks+tx, 8336 relay-protocol).
#[derive(Deserialize, Clone)]
pub struct ListenConfig {
    #[serde(default = "default_blocks_address")]
    pub blocks_address: String,
    #[serde(default = "default_blocks_and_tx_address")]
    pub blocks_and_tx_address: String,
    #[serde(default = "default_relay_protocol_address")]
    pub relay_protocol_address: String,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            blocks_address: default_blocks_address(),
            blocks_and_tx_address: default_blocks_and_tx_address(),
            relay_protocol_address: default_relay_protocol_address(),
        }
    }
}

impl ListenConfig {
    pub fn blocks_addr(&self) -> eyre::Result<SocketAddr> {
        resolve(&self.blocks_address)
    }

    pub fn blocks_and_tx_addr(&self) -> eyre::Result<SocketAddr> {
        resolve(&self.blocks_and_tx_address)
    }

    pub fn relay_protocol_addr(&self) -> eyre::Result<SocketAddr> {
        resolve(&self.relay_protocol_address)
    }
}

fn resolve(address: &str) -> eyre::Result<SocketAddr> {
    address
        .to_socket_addrs()
        .wrap_err_with(|| format!("failed to resolve listen address {address}"))?
        .next()
        .ok_or_eyre("no address found in listen address")
}

fn default_blocks_address() -> String {
    "0.0.0.0:8334".to_string()
}

fn default_blocks_and_tx_address() -> String {
    "0.0.0.0:8335".to_string()
}

fn default_relay_protocol_address() -> String {
    "0.0.0.0:8336".to_string()
}
