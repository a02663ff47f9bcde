use crate::chord::types::{NodeId, NodeState};
use crate::error::ChordError;
use log::debug;
use std::fmt;

/// An in-flight lookup. Whoever holds the value owns it; forwarding moves it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LookupMessage {
    pub initiator: NodeId,
    pub key: NodeId,
    pub path: Vec<NodeId>,
}

impl LookupMessage {
    pub fn new(initiator: NodeId, key: NodeId) -> Self {
        Self {
            initiator,
            key,
            path: Vec::new(),
        }
    }

    /// Records that `node` handled the message. Visiting a node twice, or
    /// more nodes than the ring has, means routing stopped making progress.
    fn visit(&mut self, node: NodeId, member_count: usize) -> Result<(), ChordError> {
        if self.path.contains(&node) {
            return Err(ChordError::RoutingLoop {
                key: self.key,
                node,
            });
        }
        if self.path.len() >= member_count {
            return Err(ChordError::PathOverflow {
                key: self.key,
                limit: member_count,
            });
        }
        self.path.push(node);
        Ok(())
    }
}

/// Outcome of one processing step at the node holding the message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// The successor owns the key; the finished message goes to the initiator.
    Reply { to: NodeId, message: LookupMessage },
    /// The lookup continues at `to`.
    Forward { to: NodeId, message: LookupMessage },
}

impl Dispatch {
    pub fn destination(&self) -> NodeId {
        match self {
            Dispatch::Reply { to, .. } | Dispatch::Forward { to, .. } => *to,
        }
    }
}

/// Runs the lookup state machine for one hop at `node`.
pub fn handle_lookup_request(
    node: &NodeState,
    member_count: usize,
    mut message: LookupMessage,
) -> Result<Dispatch, ChordError> {
    message.visit(node.id, member_count)?;

    if node.successor_owns(message.key) {
        message.path.push(node.successor);
        debug!(
            "Node {}: key {} owned by successor {}, replying to {}",
            node.id, message.key, node.successor, message.initiator
        );
        return Ok(Dispatch::Reply {
            to: message.initiator,
            message,
        });
    }

    let next = node.closest_preceding_finger(message.key);
    debug!("Node {}: forwarding key {} to {}", node.id, message.key, next);
    Ok(Dispatch::Forward { to: next, message })
}

/// The printed result of a completed lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LookupReport {
    pub key: NodeId,
    pub path: Vec<NodeId>,
}

impl LookupReport {
    pub fn owner(&self) -> Option<NodeId> {
        self.path.last().copied()
    }

    /// Number of node-to-node sends before the reply, initiator excluded.
    pub fn hops(&self) -> usize {
        self.path.len().saturating_sub(2)
    }
}

impl From<LookupMessage> for LookupReport {
    fn from(message: LookupMessage) -> Self {
        Self {
            key: message.key,
            path: message.path,
        }
    }
}

/// Renders a path as `a -> b -> c`.
pub fn render_path(path: &[NodeId]) -> String {
    path.iter()
        .map(NodeId::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl fmt::Display for LookupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lookup {}: {}", self.key, render_path(&self.path))
    }
}
