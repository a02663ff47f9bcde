use crate::chord::types::NodeId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChordRingError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Chord protocol error: {0}")]
    Chord(#[from] ChordError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),
}

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),

    #[error("Failed to bind listener on {addr}: {reason}")]
    BindFailed { addr: String, reason: String },

    #[error("Inbox closed for node {0}")]
    InboxClosed(NodeId),

    #[error("Node task failed: {0}")]
    TaskFailed(String),

    #[error(transparent)]
    Chord(#[from] ChordError),

    #[error(transparent)]
    Message(#[from] MessageError),
}

/// Setup and routing failures. None of these are transient: each one points
/// at a misconfigured ring or a routing defect.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChordError {
    #[error("Ring has no members")]
    EmptyMembership,

    #[error("Duplicate node identifier {0}")]
    DuplicateNode(NodeId),

    #[error("Identifier {id} is outside the ring of size {ring_size}")]
    OutOfRange { id: u64, ring_size: u64 },

    #[error("Identifier width must be between 1 and {max} bits, got {bits}")]
    InvalidBits { bits: u32, max: u32 },

    #[error("Node {0} is not a ring member")]
    NotAMember(NodeId),

    #[error("No address mapped for node {0}")]
    UnmappedNode(NodeId),

    #[error("Lookup for key {key} revisited node {node}; routing made no progress")]
    RoutingLoop { key: NodeId, node: NodeId },

    #[error("Lookup for key {key} exceeded {limit} visited nodes")]
    PathOverflow { key: NodeId, limit: usize },

    #[error("Unexpected reply for key {key}: no lookups outstanding")]
    UnexpectedReply { key: NodeId },

    #[error("Reply for key {key} delivered to {node}, but it was initiated by {initiator}")]
    MisdeliveredReply {
        key: NodeId,
        node: NodeId,
        initiator: NodeId,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Input directory {0} contains no in<rank>.txt files")]
    NoInputs(String),

    #[error("Missing input file for rank {0}")]
    MissingRank(usize),

    #[error("Cannot place {nodes} nodes on a ring of size {ring_size}")]
    TooManyNodes { nodes: usize, ring_size: u64 },

    #[error("Node {0} has no address configured")]
    MissingAddress(NodeId),

    #[error("Invalid address for node {id}: {reason}")]
    InvalidAddress { id: NodeId, reason: String },

    #[error(transparent)]
    Chord(#[from] ChordError),
}

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("Failed to serialize message: {0}")]
    SerializationFailed(String),

    #[error("Failed to deserialize message: {0}")]
    DeserializationFailed(String),

    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    #[error("Frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("Connection closed inside a length prefix after {received} of 4 bytes")]
    TruncatedPrefix { received: usize },

    #[error("Stream error: {0}")]
    Io(#[from] std::io::Error),
}
