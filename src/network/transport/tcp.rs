use crate::chord::types::NodeId;
use crate::error::NetworkError;
use crate::network::messages::wire::{read_frame, write_frame, Frame};
use crate::network::messages::{ChordMessage, Envelope};
use crate::network::transport::{AddressBook, Transport};
use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::sleep;
use tokio_stream::wrappers::TcpListenerStream;

const CONNECTION_RETRY_DELAY: Duration = Duration::from_millis(250);
const MAX_CONNECTION_RETRIES: u32 = 40;

/// What the listener hands to the service loop: a message, or the reason a
/// connection stopped producing them.
type Delivery = Result<Envelope, NetworkError>;

/// One process per node. Inbound connections are drained by a listener task
/// into a local inbox; outbound connections are opened lazily and reused.
pub struct TcpTransport {
    local_id: NodeId,
    book: Arc<AddressBook<SocketAddr>>,
    self_tx: mpsc::UnboundedSender<Delivery>,
    inbox: mpsc::UnboundedReceiver<Delivery>,
    connections: HashMap<NodeId, TcpStream>,
    listener_handle: JoinHandle<()>,
}

impl TcpTransport {
    /// Binds the address mapped to `local_id` and starts accepting peers.
    pub async fn bind(
        local_id: NodeId,
        book: Arc<AddressBook<SocketAddr>>,
    ) -> Result<Self, NetworkError> {
        let addr = *book.address_of(local_id)?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| NetworkError::BindFailed {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        info!("Node {} listening on {}", local_id, addr);
        Ok(Self::from_listener(local_id, book, listener))
    }

    /// Uses an already bound listener. Must be called inside a tokio runtime.
    pub fn from_listener(
        local_id: NodeId,
        book: Arc<AddressBook<SocketAddr>>,
        listener: TcpListener,
    ) -> Self {
        let (self_tx, inbox) = mpsc::unbounded_channel();
        let listener_handle = tokio::spawn(accept_loop(local_id, listener, self_tx.clone()));
        Self {
            local_id,
            book,
            self_tx,
            inbox,
            connections: HashMap::new(),
            listener_handle,
        }
    }

    async fn connect(&self, to: NodeId) -> Result<TcpStream, NetworkError> {
        let addr = *self.book.address_of(to)?;
        let mut attempt = 0;
        loop {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    stream
                        .set_nodelay(true)
                        .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
                    debug!("Node {} connected to {} at {}", self.local_id, to, addr);
                    return Ok(stream);
                }
                Err(e) if attempt + 1 < MAX_CONNECTION_RETRIES => {
                    // the peer's process may not be listening yet
                    attempt += 1;
                    debug!("Connect to {} at {} failed (attempt {}): {}", to, addr, attempt, e);
                    sleep(CONNECTION_RETRY_DELAY).await;
                }
                Err(e) => {
                    return Err(NetworkError::ConnectionFailed(format!(
                        "node {} at {}: {}",
                        to, addr, e
                    )))
                }
            }
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.listener_handle.abort();
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn local_id(&self) -> NodeId {
        self.local_id
    }

    async fn send(&mut self, to: NodeId, message: ChordMessage) -> Result<(), NetworkError> {
        let envelope = Envelope::new(self.local_id, message);
        if to == self.local_id {
            // loopback skips the socket
            return self
                .self_tx
                .send(Ok(envelope))
                .map_err(|_| NetworkError::InboxClosed(self.local_id));
        }

        // Encode before touching the network
        let frame = Frame::from(&envelope);

        // Open the outbound stream on first use
        if !self.connections.contains_key(&to) {
            let stream = self.connect(to).await?;
            self.connections.insert(to, stream);
        }
        let stream = self
            .connections
            .get_mut(&to)
            .ok_or_else(|| NetworkError::PeerUnreachable(to.to_string()))?;

        // A failed write leaves the stream unusable, so forget it
        if let Err(e) = write_frame(stream, &frame).await {
            self.connections.remove(&to);
            return Err(NetworkError::PeerUnreachable(format!("node {}: {}", to, e)));
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Envelope, NetworkError> {
        match self.inbox.recv().await {
            Some(delivery) => delivery,
            None => Err(NetworkError::InboxClosed(self.local_id)),
        }
    }
}

async fn accept_loop(
    local_id: NodeId,
    listener: TcpListener,
    inbox: mpsc::UnboundedSender<Delivery>,
) {
    // Readers live in the set so aborting this task tears them down too.
    let mut readers = JoinSet::new();
    let mut incoming = TcpListenerStream::new(listener);
    loop {
        tokio::select! {
            accepted = incoming.next() => match accepted {
                Some(Ok(stream)) => {
                    readers.spawn(read_connection(local_id, stream, inbox.clone()));
                }
                Some(Err(e)) => warn!("Node {}: accept failed: {}", local_id, e),
                None => break,
            },
            Some(_) = readers.join_next(), if !readers.is_empty() => {}
        }
    }
}

/// Forwards every frame of one inbound connection. A frame that cannot be
/// read or decoded is passed on as an error, since the message it carried
/// is lost and the service loop could otherwise wait for it forever.
async fn read_connection(
    local_id: NodeId,
    mut stream: TcpStream,
    inbox: mpsc::UnboundedSender<Delivery>,
) {
    loop {
        let delivery = match read_frame(&mut stream).await {
            Ok(Some(frame)) => Envelope::try_from(frame).map_err(NetworkError::from),
            Ok(None) => break,
            Err(e) => Err(NetworkError::from(e)),
        };
        let failed = delivery.is_err();
        if let Err(e) = &delivery {
            error!("Node {}: unreadable frame: {}", local_id, e);
        }
        if inbox.send(delivery).is_err() || failed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chord::lookup::LookupMessage;
    use crate::error::MessageError;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn frames_cross_the_socket() {
        let la = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let lb = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let book: Arc<AddressBook<SocketAddr>> = Arc::new(
            [
                (NodeId(1), la.local_addr().unwrap()),
                (NodeId(4), lb.local_addr().unwrap()),
            ]
            .into_iter()
            .collect(),
        );
        let mut a = TcpTransport::from_listener(NodeId(1), Arc::clone(&book), la);
        let mut b = TcpTransport::from_listener(NodeId(4), book, lb);

        let request = ChordMessage::LookupRequest(LookupMessage {
            initiator: NodeId(1),
            key: NodeId(3),
            path: vec![NodeId(1)],
        });
        a.send(NodeId(4), request.clone()).await.unwrap();
        a.send(NodeId(1), ChordMessage::Done).await.unwrap();

        assert_eq!(b.recv().await.unwrap(), Envelope::new(NodeId(1), request));
        assert_eq!(
            a.recv().await.unwrap(),
            Envelope::new(NodeId(1), ChordMessage::Done)
        );
    }

    #[tokio::test]
    async fn garbage_frame_surfaces_as_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let book: Arc<AddressBook<SocketAddr>> = Arc::new([(NodeId(1), addr)].into_iter().collect());
        let mut transport = TcpTransport::from_listener(NodeId(1), book, listener);

        let mut raw = TcpStream::connect(addr).await.unwrap();
        raw.write_all(&[0, 0, 0, 3, 0xff, 0xff, 0xff]).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), transport.recv())
            .await
            .expect("error never reached the inbox");
        assert!(matches!(
            result,
            Err(NetworkError::Message(MessageError::DeserializationFailed(_)))
        ));
    }

    #[tokio::test]
    async fn truncated_prefix_surfaces_as_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let book: Arc<AddressBook<SocketAddr>> = Arc::new([(NodeId(1), addr)].into_iter().collect());
        let mut transport = TcpTransport::from_listener(NodeId(1), book, listener);

        let mut raw = TcpStream::connect(addr).await.unwrap();
        raw.write_all(&[0, 0]).await.unwrap();
        drop(raw);

        let result = tokio::time::timeout(Duration::from_secs(5), transport.recv())
            .await
            .expect("error never reached the inbox");
        assert!(matches!(
            result,
            Err(NetworkError::Message(MessageError::TruncatedPrefix { received: 2 }))
        ));
    }
}
