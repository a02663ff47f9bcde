pub mod channel;
pub mod tcp;

use crate::chord::types::NodeId;
use crate::error::{ChordError, NetworkError};
use crate::network::messages::{ChordMessage, Envelope};
use async_trait::async_trait;
use std::collections::HashMap;

pub use channel::ChannelTransport;
pub use tcp::TcpTransport;

/// Addressed, reliable delivery between ring members.
///
/// `recv` returns messages from any sender, one at a time. A closed inbox or
/// a frame that could not be read comes back as an error.
#[async_trait]
pub trait Transport: Send {
    fn local_id(&self) -> NodeId;

    async fn send(&mut self, to: NodeId, message: ChordMessage) -> Result<(), NetworkError>;

    async fn recv(&mut self) -> Result<Envelope, NetworkError>;
}

/// Read-only `NodeId -> address` mapping, fixed before any traffic.
#[derive(Clone, Debug)]
pub struct AddressBook<A> {
    addresses: HashMap<NodeId, A>,
}

impl<A> AddressBook<A> {
    pub fn address_of(&self, id: NodeId) -> Result<&A, ChordError> {
        self.addresses.get(&id).ok_or(ChordError::UnmappedNode(id))
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

impl<A> FromIterator<(NodeId, A)> for AddressBook<A> {
    fn from_iter<I: IntoIterator<Item = (NodeId, A)>>(iter: I) -> Self {
        Self {
            addresses: iter.into_iter().collect(),
        }
    }
}
