use crate::chord::types::NodeId;
use crate::error::NetworkError;
use crate::network::messages::{ChordMessage, Envelope};
use crate::network::transport::{AddressBook, Transport};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

pub type Inbox = mpsc::UnboundedSender<Envelope>;

/// In-process transport: every node owns an unbounded inbox and the shared
/// address book maps each member to its inbox sender.
pub struct ChannelTransport {
    local_id: NodeId,
    book: Arc<AddressBook<Inbox>>,
    inbox: mpsc::UnboundedReceiver<Envelope>,
}

impl ChannelTransport {
    /// One connected transport per identifier, in the order given.
    pub fn mesh(ids: &[NodeId]) -> Vec<ChannelTransport> {
        // One inbox per member; the senders go into the shared book
        let (senders, receivers): (Vec<_>, Vec<_>) =
            ids.iter().map(|_| mpsc::unbounded_channel()).unzip();
        let book: Arc<AddressBook<Inbox>> =
            Arc::new(ids.iter().copied().zip(senders).collect());
        ids.iter()
            .copied()
            .zip(receivers)
            .map(|(local_id, inbox)| ChannelTransport {
                local_id,
                book: Arc::clone(&book),
                inbox,
            })
            .collect()
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    fn local_id(&self) -> NodeId {
        self.local_id
    }

    async fn send(&mut self, to: NodeId, message: ChordMessage) -> Result<(), NetworkError> {
        let inbox = self.book.address_of(to)?;
        inbox
            .send(Envelope::new(self.local_id, message))
            .map_err(|_| NetworkError::PeerUnreachable(format!("inbox of node {} is closed", to)))
    }

    async fn recv(&mut self) -> Result<Envelope, NetworkError> {
        self.inbox
            .recv()
            .await
            .ok_or(NetworkError::InboxClosed(self.local_id))
    }
}
