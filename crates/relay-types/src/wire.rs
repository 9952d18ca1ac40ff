use bitcoin::network::message::NetworkMessage;
use bitcoin::{Block, Transaction};

/// Converts a [`RelayObject`](crate::RelayObject) into the wire message that
/// announces it in full (as opposed to an `inv`/`getdata` reference to it).
///
/// A local trait rather than a blanket `Into<NetworkMessage>` impl, since
/// both `NetworkMessage` and `Block`/`Transaction` are foreign types.
pub trait ToNetworkMessage {
    fn to_network_message(&self) -> NetworkMessage;
}

impl ToNetworkMessage for Block {
    fn to_network_message(&self) -> NetworkMessage {
        NetworkMessage::Block(self.clone())
    }
}

impl ToNetworkMessage for Transaction {
    fn to_network_message(&self) -> NetworkMessage {
        NetworkMessage::Tx(self.clone())
    }
}
