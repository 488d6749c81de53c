use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::SignalingError;
use crate::peer::types::{CallId, IceCandidate, SdpPayload};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CallRef {
    pub call_id: CallId,
}

impl From<CallId> for CallRef {
    fn from(call_id: CallId) -> Self {
        Self { call_id }
    }
}

/// Events the matching server pushes to us.
///
/// Frames look like `{"event": "chat-start", "data": "<partner>"}`; unit
/// events carry no `data`. `call-rejected` and `call-ended` may come with or
/// without the call they refer to.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum InboundEvent {
    Waiting,
    ChatStart(String),
    ReceiveMessage(String),
    PartnerDisconnected,
    OnlineCount(u64),
    CallIncoming(CallRef),
    CallConnected(CallRef),
    CallRejected(Option<CallRef>),
    CallEnded(Option<CallRef>),
    Offer(SdpPayload),
    Answer(SdpPayload),
    IceCandidate(IceCandidate),
}

impl InboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::Waiting => "waiting",
            InboundEvent::ChatStart(_) => "chat-start",
            InboundEvent::ReceiveMessage(_) => "receive-message",
            InboundEvent::PartnerDisconnected => "partner-disconnected",
            InboundEvent::OnlineCount(_) => "online-count",
            InboundEvent::CallIncoming(_) => "call-incoming",
            InboundEvent::CallConnected(_) => "call-connected",
            InboundEvent::CallRejected(_) => "call-rejected",
            InboundEvent::CallEnded(_) => "call-ended",
            InboundEvent::Offer(_) => "offer",
            InboundEvent::Answer(_) => "answer",
            InboundEvent::IceCandidate(_) => "ice-candidate",
        }
    }
}

/// Events we push to the matching server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundEvent {
    SetInterests(BTreeSet<String>),
    SendMessage(String),
    DisconnectPartner,
    CallRequest(CallRef),
    CallAccepted(CallRef),
    CallRejected(CallRef),
    CallEnded(CallRef),
    Offer(SdpPayload),
    Answer(SdpPayload),
    IceCandidate(IceCandidate),
}

pub fn encode(event: &OutboundEvent) -> Result<String, SignalingError> {
    Ok(serde_json::to_string(event)?)
}

pub fn decode(frame: &str) -> Result<InboundEvent, serde_json::Error> {
    serde_json::from_str(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_events_parse_without_data() {
        assert_eq!(decode(r#"{"event":"waiting"}"#).unwrap(), InboundEvent::Waiting);
        assert_eq!(
            decode(r#"{"event":"partner-disconnected"}"#).unwrap(),
            InboundEvent::PartnerDisconnected
        );
        assert_eq!(decode(r#"{"event":"call-ended"}"#).unwrap(), InboundEvent::CallEnded(None));
    }

    #[test]
    fn unknown_event_is_an_error() {
        assert!(decode(r#"{"event":"typing"}"#).is_err());
        assert!(decode("not json").is_err());
    }

    #[test]
    fn names_match_wire_tags() {
        let ev = InboundEvent::OnlineCount(3);
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], ev.name());
    }
}
