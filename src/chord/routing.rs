use crate::chord::types::{Membership, NodeId, NodeState};
use crate::error::ChordError;
use log::trace;

/// One routing shortcut: the first member at or after `start`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Finger {
    pub start: NodeId,
    pub node: NodeId,
}

/// M shortcuts for a single node. Entry `i` points at the member nearest
/// `(owner + 2^i) mod 2^M`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FingerTable {
    owner: NodeId,
    entries: Vec<Finger>,
}

impl FingerTable {
    pub fn build(membership: &Membership, owner: NodeId) -> Result<Self, ChordError> {
        if membership.is_empty() {
            return Err(ChordError::EmptyMembership);
        }
        let space = membership.space();
        let entries = (0..space.bits())
            .map(|i| {
                let start = space.finger_start(owner, i);
                Finger {
                    start,
                    node: membership.find_successor(start),
                }
            })
            .collect();
        Ok(Self { owner, entries })
    }

    pub fn owner(&self) -> NodeId {
        self.owner
    }

    pub fn entries(&self) -> &[Finger] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl NodeState {
    /// Next hop towards `key`: the longest-reach finger strictly inside
    /// `(self.id, key)`, otherwise the successor.
    ///
    /// Fingers pointing back at this node or landing exactly on `key` are
    /// skipped; neither moves the lookup strictly closer. The successor
    /// fallback always advances, so forwarding cannot cycle.
    pub fn closest_preceding_finger(&self, key: NodeId) -> NodeId {
        for finger in self.finger_table.entries().iter().rev() {
            if finger.node == self.id || finger.node == key {
                continue;
            }
            if finger.node.is_strictly_between(&self.id, &key) {
                trace!("Node {}: finger {} precedes key {}", self.id, finger.node, key);
                return finger.node;
            }
        }
        self.successor
    }
}
