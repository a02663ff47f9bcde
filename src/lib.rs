//! Static-membership Chord ring.
//!
//! Every member builds a finger table once, then runs a service loop that
//! forwards lookups through the closest preceding finger until the key's
//! owner is found, replies to the initiator, and shuts down once every member
//! has broadcast a termination marker.

pub mod chord;
pub mod config;
pub mod error;
pub mod network;

pub use chord::actor::{ChordActor, NodeOutcome, ReportSink};
pub use chord::lookup::{LookupMessage, LookupReport};
pub use chord::ring::Ring;
pub use chord::types::{IdSpace, Membership, NodeId, NodeState};
pub use config::{LookupKey, NodeConfig, RingConfig};
pub use error::ChordRingError;
pub use network::node::{
    run_local_ring, run_local_ring_reporting, run_tcp_node, run_tcp_node_reporting, ChordPeer,
};
