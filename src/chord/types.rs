use crate::chord::routing::FingerTable;
use crate::chord::MAX_ID_BITS;
use crate::error::ChordError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// NodeId represents a position on the identifier circle. Lookup keys live in
/// the same space, so the same type names both.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        NodeId(id)
    }
}

impl NodeId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Clockwise membership in `(start, end]`.
    ///
    /// When `start == end` the interval covers the whole circle, which makes
    /// "does my successor own this key" always true on a one-node ring.
    pub fn is_between(&self, start: &NodeId, end: &NodeId) -> bool {
        let (x, a, b) = (self.0, start.0, end.0);
        if a < b {
            x > a && x <= b
        } else if a > b {
            x > a || x <= b
        } else {
            true
        }
    }

    /// Clockwise membership in the open interval `(start, end)`.
    pub fn is_strictly_between(&self, start: &NodeId, end: &NodeId) -> bool {
        self != end && self.is_between(start, end)
    }
}

/// The identifier circle `[0, 2^bits)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdSpace {
    bits: u32,
}

impl IdSpace {
    pub fn new(bits: u32) -> Result<Self, ChordError> {
        if bits == 0 || bits > MAX_ID_BITS {
            return Err(ChordError::InvalidBits {
                bits,
                max: MAX_ID_BITS,
            });
        }
        Ok(Self { bits })
    }

    /// Number of finger table entries (M).
    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn ring_size(&self) -> u64 {
        1u64 << self.bits
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.0 < self.ring_size()
    }

    pub fn check(&self, id: u64) -> Result<NodeId, ChordError> {
        let id = NodeId(id);
        if self.contains(id) {
            Ok(id)
        } else {
            Err(ChordError::OutOfRange {
                id: id.0,
                ring_size: self.ring_size(),
            })
        }
    }

    /// `start` of finger `index`: `(id + 2^index) mod 2^bits`.
    pub fn finger_start(&self, id: NodeId, index: u32) -> NodeId {
        NodeId((id.0 + (1u64 << index)) % self.ring_size())
    }

    /// Hashes an arbitrary key name onto the circle.
    pub fn hash_key(&self, key: &[u8]) -> NodeId {
        let digest = Sha256::digest(key);
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        NodeId(u64::from_be_bytes(prefix) & (self.ring_size() - 1))
    }
}

/// The fixed member set in ring order. Built once, never mutated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Membership {
    space: IdSpace,
    sorted_ids: Vec<NodeId>,
}

impl Membership {
    pub fn new<I>(space: IdSpace, ids: I) -> Result<Self, ChordError>
    where
        I: IntoIterator<Item = NodeId>,
    {
        let mut sorted_ids: Vec<NodeId> = ids.into_iter().collect();
        if sorted_ids.is_empty() {
            return Err(ChordError::EmptyMembership);
        }
        for id in &sorted_ids {
            space.check(id.0)?;
        }
        sorted_ids.sort_unstable();
        if let Some(pair) = sorted_ids.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(ChordError::DuplicateNode(pair[0]));
        }
        Ok(Self { space, sorted_ids })
    }

    pub fn space(&self) -> IdSpace {
        self.space
    }

    pub fn len(&self) -> usize {
        self.sorted_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted_ids.is_empty()
    }

    pub fn ids(&self) -> &[NodeId] {
        &self.sorted_ids
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.sorted_ids.binary_search(&id).is_ok()
    }

    fn position(&self, id: NodeId) -> Result<usize, ChordError> {
        self.sorted_ids
            .binary_search(&id)
            .map_err(|_| ChordError::NotAMember(id))
    }

    pub fn successor_of(&self, id: NodeId) -> Result<NodeId, ChordError> {
        let pos = self.position(id)?;
        Ok(self.sorted_ids[(pos + 1) % self.len()])
    }

    pub fn predecessor_of(&self, id: NodeId) -> Result<NodeId, ChordError> {
        let pos = self.position(id)?;
        Ok(self.sorted_ids[(pos + self.len() - 1) % self.len()])
    }

    /// Smallest member `>= key`, wrapping to the smallest member overall.
    /// Only existing members are candidates, never free positions.
    pub fn find_successor(&self, key: NodeId) -> NodeId {
        let pos = self.sorted_ids.partition_point(|id| *id < key);
        self.sorted_ids
            .get(pos)
            .copied()
            .unwrap_or(self.sorted_ids[0])
    }
}

/// Per-node routing state: identity, ring neighbours and finger table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeState {
    pub id: NodeId,
    pub successor: NodeId,
    pub predecessor: NodeId,
    pub finger_table: FingerTable,
}

impl NodeState {
    pub fn new(membership: &Membership, id: NodeId) -> Result<Self, ChordError> {
        Ok(Self {
            id,
            successor: membership.successor_of(id)?,
            predecessor: membership.predecessor_of(id)?,
            finger_table: FingerTable::build(membership, id)?,
        })
    }

    /// Whether this node's successor is responsible for `key`.
    pub fn successor_owns(&self, key: NodeId) -> bool {
        key.is_between(&self.id, &self.successor)
    }
}
