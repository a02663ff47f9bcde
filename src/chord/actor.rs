use crate::chord::lookup::{handle_lookup_request, Dispatch, LookupMessage, LookupReport};
use crate::chord::ring::Ring;
use crate::chord::types::{NodeId, NodeState};
use crate::error::{ChordError, ChordRingError, NetworkError};
use crate::network::messages::{ChordMessage, Envelope};
use crate::network::transport::Transport;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Receives each finished lookup the moment its reply arrives, so output
/// does not depend on how the rest of the run ends.
pub type ReportSink = mpsc::UnboundedSender<LookupReport>;

/// What a node observed over its lifetime.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeOutcome {
    pub id: NodeId,
    /// Replies to this node's own lookups, in arrival order.
    pub reports: Vec<LookupReport>,
    /// Lookup requests this node processed, its own included.
    pub requests_handled: usize,
    /// Requests this node passed on to another member.
    pub forwarded: usize,
}

/// The per-node service loop. Processes one message at a time until a
/// termination marker has arrived from every member.
pub struct ChordActor<T> {
    ring: Arc<Ring>,
    node: NodeState,
    transport: T,
    lookups: Vec<NodeId>,
    outstanding: usize,
    done_sent: bool,
    done_from: HashSet<NodeId>,
    report_sink: Option<ReportSink>,
    outcome: NodeOutcome,
}

impl<T: Transport> ChordActor<T> {
    pub fn new(ring: Arc<Ring>, transport: T, lookups: Vec<NodeId>) -> Result<Self, ChordError> {
        let id = transport.local_id();
        let node = ring.node(id)?.clone();
        let space = ring.membership().space();
        for key in &lookups {
            space.check(key.as_u64())?;
        }
        Ok(Self {
            ring,
            node,
            transport,
            lookups,
            outstanding: 0,
            done_sent: false,
            done_from: HashSet::new(),
            report_sink: None,
            outcome: NodeOutcome {
                id,
                ..NodeOutcome::default()
            },
        })
    }

    #[must_use]
    pub fn with_report_sink(mut self, sink: ReportSink) -> Self {
        self.report_sink = Some(sink);
        self
    }

    pub fn id(&self) -> NodeId {
        self.node.id
    }

    pub async fn run(mut self) -> Result<NodeOutcome, ChordRingError> {
        info!(
            "Node {} starting with {} lookups (successor {}, predecessor {})",
            self.node.id,
            self.lookups.len(),
            self.node.successor,
            self.node.predecessor
        );
        // Seed the inbox with our own lookups; an idle node is done at once
        self.initiate_lookups().await?;
        self.broadcast_done_if_complete().await?;

        // Serve until every member, this one included, has sent its marker
        while self.done_from.len() < self.ring.len() {
            let envelope = self.transport.recv().await?;
            self.handle_envelope(envelope).await?;
            self.broadcast_done_if_complete().await?;
        }

        info!(
            "Node {} done: {} replies, {} requests handled, {} forwarded",
            self.node.id,
            self.outcome.reports.len(),
            self.outcome.requests_handled,
            self.outcome.forwarded
        );
        Ok(self.outcome)
    }

    /// Every local lookup enters through this node's own inbox, so the
    /// initiator is always the first hop on the path.
    async fn initiate_lookups(&mut self) -> Result<(), NetworkError> {
        let lookups = std::mem::take(&mut self.lookups);
        self.outstanding = lookups.len();
        for key in lookups {
            debug!("Node {}: initiating lookup for key {}", self.node.id, key);
            let message = LookupMessage::new(self.node.id, key);
            self.transport
                .send(self.node.id, ChordMessage::LookupRequest(message))
                .await?;
        }
        Ok(())
    }

    async fn handle_envelope(&mut self, envelope: Envelope) -> Result<(), ChordRingError> {
        debug!(
            "Node {}: received {} from {}",
            self.node.id,
            envelope.message.kind(),
            envelope.from
        );
        match envelope.message {
            ChordMessage::LookupRequest(message) => self.handle_request(message).await?,
            ChordMessage::LookupReply(message) => self.handle_reply(message)?,
            ChordMessage::Done => self.handle_done(envelope.from),
        }
        Ok(())
    }

    async fn handle_request(&mut self, message: LookupMessage) -> Result<(), ChordRingError> {
        self.outcome.requests_handled += 1;
        match handle_lookup_request(&self.node, self.ring.len(), message)? {
            Dispatch::Reply { to, message } => {
                self.transport
                    .send(to, ChordMessage::LookupReply(message))
                    .await?;
            }
            Dispatch::Forward { to, message } => {
                self.outcome.forwarded += 1;
                self.transport
                    .send(to, ChordMessage::LookupRequest(message))
                    .await?;
            }
        }
        Ok(())
    }

    fn handle_reply(&mut self, message: LookupMessage) -> Result<(), ChordError> {
        if message.initiator != self.node.id {
            return Err(ChordError::MisdeliveredReply {
                key: message.key,
                node: self.node.id,
                initiator: message.initiator,
            });
        }
        if self.outstanding == 0 {
            return Err(ChordError::UnexpectedReply { key: message.key });
        }
        self.outstanding -= 1;
        let report = LookupReport::from(message);
        info!("Node {}: {}", self.node.id, report);
        let sink_closed = self
            .report_sink
            .as_ref()
            .is_some_and(|sink| sink.send(report.clone()).is_err());
        if sink_closed {
            warn!("Node {}: report sink closed, keeping reports locally", self.node.id);
            self.report_sink = None;
        }
        self.outcome.reports.push(report);
        Ok(())
    }

    fn handle_done(&mut self, from: NodeId) {
        if !self.done_from.insert(from) {
            warn!("Node {}: duplicate termination marker from {}", self.node.id, from);
            return;
        }
        debug!(
            "Node {}: {}/{} termination markers",
            self.node.id,
            self.done_from.len(),
            self.ring.len()
        );
    }

    /// Sends one marker to every member, this node included, the first time
    /// no replies are outstanding.
    async fn broadcast_done_if_complete(&mut self) -> Result<(), NetworkError> {
        if self.done_sent || self.outstanding > 0 {
            return Ok(());
        }
        self.done_sent = true;
        debug!("Node {}: all replies received, broadcasting done", self.node.id);
        let members = self.ring.membership().ids().to_vec();
        for member in members {
            self.transport.send(member, ChordMessage::Done).await?;
        }
        Ok(())
    }
}
