//! Keeps the node's relay-protocol peers (spec.md §6 `r`/`r-`) in a map
//! keyed by IP, mirroring [`relay_trusted::TrustedRegistry`]'s shape —
//! `relay_sidechannel::RelayPeerClient` already implements the
//! connect/reconnect/mark-for-removal state machine itself; this registry
//! only tracks "one client per address" and exposes a snapshot for the TUI.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use relay_sidechannel::{RelayPeerClient, RelayPeerDeps, SidechannelTransport};

use crate::config::relay_peer_socket;

#[derive(Default)]
pub struct RelayRegistry {
    clients: Mutex<HashMap<IpAddr, Arc<RelayPeerClient>>>,
}

impl RelayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.clients.lock().expect("relay registry mutex poisoned").contains_key(ip)
    }

    pub fn add(
        &self,
        ip: IpAddr,
        deps: Arc<RelayPeerDeps>,
        transport: Arc<dyn SidechannelTransport>,
    ) -> bool {
        let mut clients = self.clients.lock().expect("relay registry mutex poisoned");
        if clients.contains_key(&ip) {
            return false;
        }
        let client = RelayPeerClient::spawn(relay_peer_socket(ip), deps, transport);
        clients.insert(ip, client);
        true
    }

    pub fn mark_for_removal(&self, ip: &IpAddr) -> bool {
        match self.clients.lock().expect("relay registry mutex poisoned").get(ip) {
            Some(client) => {
                client.mark_for_removal();
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> Vec<Arc<RelayPeerClient>> {
        self.clients
            .lock()
            .expect("relay registry mutex poisoned")
            .values()
            .cloned()
            .collect()
    }
}
