#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

use super::OpCode;

/// Gateway protocol error variants.
///
/// These never tear down a connection on their own: the gateway logs them and falls back to a
/// safe default.
#[non_exhaustive]
#[derive(Debug)]
pub enum ProtocolError {
    /// Frame was not a valid envelope
    Decode(serde_json::Error),
    /// Payload of a known opcode was missing a required field or had the wrong shape
    InvalidPayload {
        /// Opcode whose payload was rejected
        op: OpCode,
        /// Underlying decoding error
        source: serde_json::Error,
    },
    /// Opcode requires a payload but `d` was null or absent
    MissingPayload(OpCode),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "Failed to decode gateway frame: {e}"),
            Self::InvalidPayload { op, source } => {
                write!(f, "Invalid payload for opcode {}: {source}", u16::from(*op))
            }
            Self::MissingPayload(op) => {
                write!(f, "Missing payload for opcode {}", u16::from(*op))
            }
        }
    }
}

impl StdError for ProtocolError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Decode(e) | Self::InvalidPayload { source: e, .. } => Some(e),
            Self::MissingPayload(_) => None,
        }
    }
}

impl From<ProtocolError> for crate::error::Error {
    fn from(e: ProtocolError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::Protocol, e)
    }
}
