use crate::chord::lookup::LookupMessage;
use crate::chord::types::NodeId;
use crate::error::MessageError;
use crate::network::messages::wire::{Frame, FrameKind, LookupFrame};
use crate::network::messages::{ChordMessage, Envelope};

impl From<&LookupMessage> for LookupFrame {
    fn from(message: &LookupMessage) -> Self {
        LookupFrame {
            initiator: message.initiator.as_u64(),
            key: message.key.as_u64(),
            path: message.path.iter().map(NodeId::as_u64).collect(),
        }
    }
}

impl From<LookupFrame> for LookupMessage {
    fn from(frame: LookupFrame) -> Self {
        LookupMessage {
            initiator: NodeId(frame.initiator),
            key: NodeId(frame.key),
            path: frame.path.into_iter().map(NodeId).collect(),
        }
    }
}

impl From<&Envelope> for Frame {
    fn from(envelope: &Envelope) -> Self {
        let (kind, lookup): (FrameKind, Option<LookupFrame>) = match &envelope.message {
            ChordMessage::LookupRequest(m) => (FrameKind::LookupRequest, Some(m.into())),
            ChordMessage::LookupReply(m) => (FrameKind::LookupReply, Some(m.into())),
            ChordMessage::Done => (FrameKind::Done, None),
        };
        Frame {
            sender: envelope.from.as_u64(),
            kind: kind as i32,
            lookup,
        }
    }
}

impl TryFrom<Frame> for Envelope {
    type Error = MessageError;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        // Reject kinds this build does not know
        let kind = FrameKind::try_from(frame.kind)
            .map_err(|_| MessageError::InvalidFormat(format!("unknown frame kind {}", frame.kind)))?;
        let lookup = |frame: Frame| {
            frame
                .lookup
                .map(LookupMessage::from)
                .ok_or_else(|| MessageError::InvalidFormat("lookup frame without payload".into()))
        };
        let from = NodeId(frame.sender);

        // Requests and replies must carry a lookup; markers carry nothing
        let message = match kind {
            FrameKind::LookupRequest => ChordMessage::LookupRequest(lookup(frame)?),
            FrameKind::LookupReply => ChordMessage::LookupReply(lookup(frame)?),
            FrameKind::Done => ChordMessage::Done,
            FrameKind::Unspecified => {
                return Err(MessageError::InvalidFormat("frame kind not set".into()))
            }
        };
        Ok(Envelope { from, message })
    }
}
