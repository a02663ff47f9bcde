use crate::chord::actor::{ChordActor, NodeOutcome, ReportSink};
use crate::chord::ring::Ring;
use crate::chord::types::NodeId;
use crate::config::RingConfig;
use crate::error::{ChordRingError, NetworkError};
use crate::network::transport::{ChannelTransport, TcpTransport, Transport};
use log::{error, info};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::Instrument;

/// A single ring member bound to its transport and its local lookups.
pub struct ChordPeer<T> {
    actor: ChordActor<T>,
}

impl<T: Transport> ChordPeer<T> {
    pub fn new(ring: Arc<Ring>, transport: T, lookups: Vec<NodeId>) -> Result<Self, ChordRingError> {
        let actor = ChordActor::new(ring, transport, lookups)?;
        Ok(Self { actor })
    }

    /// Streams this peer's lookup reports to `sink` as they complete.
    #[must_use]
    pub fn with_report_sink(self, sink: ReportSink) -> Self {
        Self {
            actor: self.actor.with_report_sink(sink),
        }
    }

    pub fn id(&self) -> NodeId {
        self.actor.id()
    }

    /// Runs the service loop until every member has signalled completion.
    pub async fn run(self) -> Result<NodeOutcome, ChordRingError> {
        let id = self.id();
        self.actor
            .run()
            .instrument(tracing::info_span!("node", id = id.as_u64()))
            .await
    }
}

/// Runs every member of `config` as a task in this process, connected by
/// in-memory channels. Outcomes come back in rank order.
pub async fn run_local_ring(config: &RingConfig) -> Result<Vec<NodeOutcome>, ChordRingError> {
    spawn_local_ring(config, None).await
}

/// Like [`run_local_ring`], and every member also streams its reports to
/// `sink` as they complete.
pub async fn run_local_ring_reporting(
    config: &RingConfig,
    sink: ReportSink,
) -> Result<Vec<NodeOutcome>, ChordRingError> {
    spawn_local_ring(config, Some(sink)).await
}

async fn spawn_local_ring(
    config: &RingConfig,
    sink: Option<ReportSink>,
) -> Result<Vec<NodeOutcome>, ChordRingError> {
    // Validate everything before any node starts
    config.validate()?;
    let ring = Arc::new(config.ring()?);
    let lookups = config.lookups()?;
    let ids: Vec<NodeId> = lookups.iter().map(|(id, _)| *id).collect();
    info!("Starting local ring of {} nodes", ids.len());

    // Wire one peer per member into the shared channel mesh
    let mut peers = Vec::with_capacity(ids.len());
    for (transport, (_, keys)) in ChannelTransport::mesh(&ids).into_iter().zip(lookups) {
        let peer = ChordPeer::new(Arc::clone(&ring), transport, keys)?;
        peers.push(match &sink {
            Some(sink) => peer.with_report_sink(sink.clone()),
            None => peer,
        });
    }
    drop(sink);

    // Spawn every peer, tagged with its rank
    let mut tasks = JoinSet::new();
    for (rank, peer) in peers.into_iter().enumerate() {
        tasks.spawn(async move { (rank, peer.run().await) });
    }

    // Collect outcomes, stopping everyone at the first failure
    let mut outcomes: Vec<Option<NodeOutcome>> = vec![None; ids.len()];
    while let Some(joined) = tasks.join_next().await {
        let (rank, result) = joined.map_err(|e| NetworkError::TaskFailed(e.to_string()))?;
        match result {
            Ok(outcome) => outcomes[rank] = Some(outcome),
            Err(e) => {
                error!("Node {} failed: {}", ids[rank], e);
                tasks.abort_all();
                return Err(e);
            }
        }
    }

    outcomes
        .into_iter()
        .zip(&ids)
        .map(|(outcome, id)| {
            outcome.ok_or_else(|| {
                ChordRingError::from(NetworkError::TaskFailed(format!("node {} never finished", id)))
            })
        })
        .collect()
}

/// Runs the member `id` of `config` over TCP. Every other member is expected
/// to be started the same way, from its own process.
pub async fn run_tcp_node(config: &RingConfig, id: NodeId) -> Result<NodeOutcome, ChordRingError> {
    start_tcp_node(config, id, None).await
}

/// Like [`run_tcp_node`], streaming reports to `sink` as they complete.
pub async fn run_tcp_node_reporting(
    config: &RingConfig,
    id: NodeId,
    sink: ReportSink,
) -> Result<NodeOutcome, ChordRingError> {
    start_tcp_node(config, id, Some(sink)).await
}

async fn start_tcp_node(
    config: &RingConfig,
    id: NodeId,
    sink: Option<ReportSink>,
) -> Result<NodeOutcome, ChordRingError> {
    config.validate()?;
    let ring = Arc::new(config.ring()?);
    let book = Arc::new(config.address_book()?);
    let keys = config
        .lookups()?
        .into_iter()
        .find(|(member, _)| *member == id)
        .map(|(_, keys)| keys)
        .unwrap_or_default();
    // Reject a non-member before binding anything.
    ring.node(id)?;

    // Bind our own address, then serve until every member is done
    let transport = TcpTransport::bind(id, book).await?;
    let peer = ChordPeer::new(ring, transport, keys)?;
    match sink {
        Some(sink) => peer.with_report_sink(sink).run().await,
        None => peer.run().await,
    }
}
