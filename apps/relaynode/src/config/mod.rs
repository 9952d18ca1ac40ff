mod listen;
mod logger;
mod peers;

pub use listen::ListenConfig;
pub use logger::LoggerConfig;
pub use peers::{relay_peer_socket, PeersConfig, RELAY_PROTOCOL_PORT};

use std::path::PathBuf;
use std::str::FromStr;

use config::Config;
use serde::Deserialize;

/// Top-level configuration, loaded from a single TOML file (spec.md §6:
/// "no environment variables, no persisted configuration" — about runtime
/// peer state, not about how the binary is told which ports to open; see
/// SPEC_FULL.md §6). One file per concern: listen addresses, peer lists,
/// and logging each get their own submodule and config type.
#[derive(Deserialize, Clone)]
pub struct RelayNodeConfig {
    #[serde(default = "default_network")]
    pub network: String,

    #[serde(default)]
    pub listen: ListenConfig,

    #[serde(default)]
    pub peers: PeersConfig,

    #[serde(default)]
    pub logger: LoggerConfig,

    #[serde(default = "default_log_path")]
    pub relay_log_path: PathBuf,
}

fn default_network() -> String {
    "bitcoin".to_string()
}

fn default_log_path() -> PathBuf {
    PathBuf::from("blockrelay.log")
}

impl RelayNodeConfig {
    pub fn from_path(path: PathBuf) -> eyre::Result<Self> {
        let config = Config::builder()
            .add_source(config::File::from(path))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn network(&self) -> eyre::Result<bitcoin::Network> {
        bitcoin::Network::from_str(&self.network)
            .map_err(|_| eyre::eyre!("unrecognized network {:?}", self.network))
    }
}
