use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{Envelope, ProtocolError};

fn payload<T: DeserializeOwned>(envelope: &Envelope) -> Result<T, ProtocolError> {
    let data = envelope
        .d
        .clone()
        .ok_or(ProtocolError::MissingPayload(envelope.op))?;

    serde_json::from_value(data).map_err(|source| ProtocolError::InvalidPayload {
        op: envelope.op,
        source,
    })
}

/// Payload of [`OpCode::Hello`](super::OpCode::Hello).
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Hello {
    /// Requested heartbeat cadence in milliseconds
    pub heartbeat_interval: u64,
}

impl Hello {
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, ProtocolError> {
        payload(envelope)
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval)
    }
}

/// Payload of the `READY` dispatch that opens a session.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Ready {
    pub session_id: String,
}

impl Ready {
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, ProtocolError> {
        payload(envelope)
    }
}

/// Payload of [`OpCode::InvalidSession`](super::OpCode::InvalidSession): whether the session may still be resumed.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvalidSession {
    pub resumable: bool,
}

impl InvalidSession {
    /// A missing or malformed flag is read as "not resumable".
    #[must_use]
    pub fn from_envelope(envelope: &Envelope) -> Self {
        Self {
            resumable: envelope
                .d
                .as_ref()
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false),
        }
    }
}
