pub mod conversions;
pub mod wire;

use crate::chord::lookup::LookupMessage;
use crate::chord::types::NodeId;

/// The three message kinds nodes exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChordMessage {
    LookupRequest(LookupMessage),
    LookupReply(LookupMessage),
    /// Termination marker: the sender has every reply it was waiting for.
    Done,
}

impl ChordMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ChordMessage::LookupRequest(_) => "lookup-request",
            ChordMessage::LookupReply(_) => "lookup-reply",
            ChordMessage::Done => "done",
        }
    }
}

/// A message together with the node that sent it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub from: NodeId,
    pub message: ChordMessage,
}

impl Envelope {
    pub fn new(from: NodeId, message: ChordMessage) -> Self {
        Self { from, message }
    }
}
