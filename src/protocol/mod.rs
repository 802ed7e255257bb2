//! Gateway wire protocol.
//!
//! Every transport message carries exactly one JSON [`Envelope`]:
//!
//! ```json
//! { "op": 10, "d": { "heartbeat_interval": 41250 }, "s": null, "t": null }
//! ```
//!
//! `op` selects the meaning of the payload `d`; `s` and `t` are only populated on dispatches.

pub mod error;
pub mod request;
pub mod response;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use self::error::ProtocolError;
pub use self::request::{ConnectionProperties, Identify, Intents, Resume};
pub use self::response::{Hello, InvalidSession, Ready};

/// Event name of the dispatch that opens a session.
pub const READY_EVENT: &str = "READY";

/// Gateway opcode.
///
/// Values the client does not know are preserved as [`OpCode::Other`] so that an unrecognized
/// opcode can be logged and skipped instead of failing the whole frame.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum OpCode {
    /// An application event, forwarded to the delegate
    Dispatch,
    /// Liveness ping. Sent periodically by the client; when received it is a request for an
    /// immediate acknowledgment.
    Heartbeat,
    /// Starts a new session
    Identify,
    /// Continues a previous session after a reconnect
    Resume,
    /// Peer asks the client to reconnect
    Reconnect,
    /// The session is no longer valid
    InvalidSession,
    /// First message after the transport opens, carries the heartbeat interval
    Hello,
    /// Acknowledges a heartbeat
    HeartbeatAck,
    /// Any opcode this client does not understand
    Other(u16),
}

impl From<u16> for OpCode {
    fn from(value: u16) -> Self {
        match value {
            0 => Self::Dispatch,
            1 => Self::Heartbeat,
            2 => Self::Identify,
            6 => Self::Resume,
            7 => Self::Reconnect,
            9 => Self::InvalidSession,
            10 => Self::Hello,
            11 => Self::HeartbeatAck,
            other => Self::Other(other),
        }
    }
}

impl From<OpCode> for u16 {
    fn from(op: OpCode) -> Self {
        match op {
            OpCode::Dispatch => 0,
            OpCode::Heartbeat => 1,
            OpCode::Identify => 2,
            OpCode::Resume => 6,
            OpCode::Reconnect => 7,
            OpCode::InvalidSession => 9,
            OpCode::Hello => 10,
            OpCode::HeartbeatAck => 11,
            OpCode::Other(other) => other,
        }
    }
}

/// A single gateway frame.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Opcode
    pub op: OpCode,
    /// Opcode-specific payload
    #[serde(default)]
    pub d: Option<Value>,
    /// Sequence number, only present on dispatches
    #[serde(default)]
    pub s: Option<u64>,
    /// Event name, only present on dispatches
    #[serde(default)]
    pub t: Option<String>,
}

impl Envelope {
    #[must_use]
    pub fn new(op: OpCode, d: Option<Value>) -> Self {
        Self {
            op,
            d,
            s: None,
            t: None,
        }
    }

    #[must_use]
    pub fn with_sequence(mut self, s: Option<u64>) -> Self {
        self.s = s;
        self
    }

    #[must_use]
    pub fn with_event(mut self, t: Option<String>) -> Self {
        self.t = t;
        self
    }

    /// Decode one frame received from the transport.
    pub fn from_slice(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes).map_err(ProtocolError::Decode)?)
    }

    /// Encode this frame as UTF-8 JSON text.
    pub fn to_text(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn unknown_opcode_is_preserved() {
        let envelope = Envelope::from_slice(br#"{"op":42,"d":null}"#).unwrap();

        assert_eq!(envelope.op, OpCode::Other(42));
        assert_eq!(u16::from(envelope.op), 42);
    }

    #[test]
    fn opcode_beyond_u8_keeps_its_value() {
        let envelope = Envelope::from_slice(br#"{"op":300}"#).unwrap();

        assert_eq!(envelope.op, OpCode::Other(300));
        assert_eq!(envelope.to_text().unwrap(), r#"{"op":300,"d":null,"s":null,"t":null}"#);
    }

    #[test]
    fn dispatch_fields_should_deserialize() {
        let envelope = Envelope::from_slice(
            br#"{"op":0,"d":{"content":"hi"},"s":7,"t":"MESSAGE_CREATE"}"#,
        )
        .unwrap();

        assert_eq!(envelope.op, OpCode::Dispatch);
        assert_eq!(envelope.s, Some(7));
        assert_eq!(envelope.t.as_deref(), Some("MESSAGE_CREATE"));
        assert_eq!(envelope.d, Some(json!({ "content": "hi" })));
    }

    #[test]
    fn missing_optional_fields_default_to_none() {
        let envelope = Envelope::from_slice(br#"{"op":11}"#).unwrap();

        assert_eq!(envelope.op, OpCode::HeartbeatAck);
        assert!(envelope.d.is_none(), "d should default to None");
        assert!(envelope.s.is_none(), "s should default to None");
        assert!(envelope.t.is_none(), "t should default to None");
    }

    #[test]
    fn heartbeat_should_serialize_with_all_keys() {
        let text = Envelope::new(OpCode::Heartbeat, Some(json!(12)))
            .to_text()
            .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value, json!({ "op": 1, "d": 12, "s": null, "t": null }));
    }

    #[test]
    fn missing_opcode_is_a_decode_error() {
        let err = Envelope::from_slice(br#"{"d":{}}"#).unwrap_err();

        assert_eq!(err.kind(), crate::error::Kind::Protocol);
        assert!(
            matches!(err.downcast_ref::<ProtocolError>(), Some(ProtocolError::Decode(_))),
            "got {err:?}"
        );
    }
}
