use crate::chord::lookup::{handle_lookup_request, Dispatch, LookupMessage, LookupReport};
use crate::chord::types::{Membership, NodeId, NodeState};
use crate::error::ChordError;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Static routing state for every member, built once after ring formation
/// and shared read-only by all nodes.
#[derive(Debug)]
pub struct Ring {
    membership: Arc<Membership>,
    nodes: BTreeMap<NodeId, NodeState>,
}

impl Ring {
    pub fn new(membership: Membership) -> Result<Self, ChordError> {
        // Build every member's successor, predecessor and finger table
        let nodes = membership
            .ids()
            .iter()
            .map(|id| NodeState::new(&membership, *id).map(|state| (*id, state)))
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(Self {
            membership: Arc::new(membership),
            nodes,
        })
    }

    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    pub fn len(&self) -> usize {
        self.membership.len()
    }

    pub fn is_empty(&self) -> bool {
        self.membership.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Result<&NodeState, ChordError> {
        self.nodes.get(&id).ok_or(ChordError::NotAMember(id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeState> {
        self.nodes.values()
    }

    /// Drives a lookup hop by hop without any messaging. Produces the same
    /// path the distributed loop would report for this initiator and key.
    pub fn trace(&self, initiator: NodeId, key: NodeId) -> Result<LookupReport, ChordError> {
        self.membership.space().check(key.0)?;

        // The initiator handles its own request first, like the loop does
        let mut holder = initiator;
        let mut message = LookupMessage::new(initiator, key);
        loop {
            match handle_lookup_request(self.node(holder)?, self.len(), message)? {
                Dispatch::Reply { message, .. } => return Ok(message.into()),
                // Hand the message to the next hop
                Dispatch::Forward { to, message: next } => {
                    holder = to;
                    message = next;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chord::types::IdSpace;

    fn ring(bits: u32, raw: &[u64]) -> Ring {
        let membership =
            Membership::new(IdSpace::new(bits).unwrap(), raw.iter().copied().map(NodeId)).unwrap();
        Ring::new(membership).unwrap()
    }

    fn path(raw: &[u64]) -> Vec<NodeId> {
        raw.iter().copied().map(NodeId).collect()
    }

    #[test]
    fn key_ten_from_node_one_ends_at_fourteen() {
        let ring = ring(4, &[1, 4, 9, 14]);
        let report = ring.trace(NodeId(1), NodeId(10)).unwrap();
        assert_eq!(report.path, path(&[1, 9, 14]));
        assert_eq!(report.to_string(), "Lookup 10: 1 -> 9 -> 14");
    }

    #[test]
    fn key_owned_by_initiator_goes_around() {
        let ring = ring(4, &[1, 4, 9, 14]);
        let report = ring.trace(NodeId(1), NodeId(1)).unwrap();
        assert_eq!(report.owner(), Some(NodeId(1)));
        assert_eq!(report.path, path(&[1, 9, 14, 1]));
    }

    #[test]
    fn key_in_wrap_gap_resolves_to_smallest_member() {
        let ring = ring(4, &[1, 4, 9, 14]);
        let report = ring.trace(NodeId(4), NodeId(15)).unwrap();
        assert_eq!(report.owner(), Some(NodeId(1)));
        assert_eq!(report.path, path(&[4, 14, 1]));
    }

    #[test]
    fn single_member_answers_itself() {
        let ring = ring(4, &[5]);
        let report = ring.trace(NodeId(5), NodeId(0)).unwrap();
        assert_eq!(report.to_string(), "Lookup 0: 5 -> 5");
    }

    #[test]
    fn trace_rejects_out_of_range_keys() {
        let ring = ring(4, &[1, 4]);
        assert!(matches!(
            ring.trace(NodeId(1), NodeId(16)),
            Err(ChordError::OutOfRange { .. })
        ));
        assert_eq!(
            ring.trace(NodeId(2), NodeId(3)),
            Err(ChordError::NotAMember(NodeId(2)))
        );
    }

    #[test]
    fn every_lookup_reaches_the_true_owner() {
        let ring = ring(5, &[0, 3, 7, 12, 18, 25, 31]);
        for initiator in ring.membership().ids() {
            for key in 0..32 {
                let report = ring.trace(*initiator, NodeId(key)).unwrap();
                assert_eq!(
                    report.owner(),
                    Some(ring.membership().find_successor(NodeId(key)))
                );
                assert!(report.path.len() <= ring.len() + 1);
            }
        }
    }
}
