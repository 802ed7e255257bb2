//! Transport layer.
//!
//! The raw socket is abstracted behind the [`Transport`] trait so the connection logic can run
//! over any bidirectional message socket. [`TransportSocket`] owns one transport and drives the
//! connect-retry loop around it.
//!
//! # Architecture
//!
//! - [`Transport`]: the raw primitive (`open`, `write`, `close`) plus events pushed into an
//!   [`EventSink`]
//! - [`TransportSocket`]: connection state, backoff-driven retries, ordered event delivery to a
//!   [`SocketDelegate`]
//! - `TungsteniteTransport` (feature `ws`): a [`Transport`] over `tokio-tungstenite`

#![expect(
    clippy::module_name_repetitions,
    reason = "Transport types include the module name for clarity when used outside this module"
)]

pub mod error;
pub mod socket;
#[cfg(feature = "ws")]
pub mod tungstenite;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::Result;
use crate::endpoint::Endpoint;

pub use error::TransportError;
pub use socket::{ConnectionState, SocketDelegate, TransportSocket};
#[cfg(feature = "ws")]
pub use tungstenite::TungsteniteTransport;

/// Something that happened on an open transport.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// One complete inbound message
    Message(Vec<u8>),
    /// The peer or the network closed the connection
    Closed(Option<String>),
    /// The transport failed; the connection is unusable
    Error(String),
}

/// Where a [`Transport`] reports events for the connection it just opened.
///
/// Sending never blocks, so it is safe to call from any I/O callback. Once the connection
/// generation that owns the sink is superseded the events are silently discarded.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl EventSink {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns `false` if nobody listens for this connection anymore.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn message<B: Into<Vec<u8>>>(&self, bytes: B) -> bool {
        self.emit(TransportEvent::Message(bytes.into()))
    }

    pub fn closed(&self, reason: Option<String>) -> bool {
        self.emit(TransportEvent::Closed(reason))
    }

    pub fn error<S: Into<String>>(&self, detail: S) -> bool {
        self.emit(TransportEvent::Error(detail.into()))
    }

    /// Whether the receiving side has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Raw bidirectional message socket.
///
/// Implementations do not retry and do not interpret payloads; both are handled by
/// [`TransportSocket`].
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opens a connection to `endpoint`, returning whether it succeeded.
    ///
    /// Every event of the new connection must be pushed into `events` until it closes.
    async fn open(&self, endpoint: &Endpoint, events: EventSink) -> bool;

    /// Writes one complete text message.
    async fn write(&self, text: String) -> Result<()>;

    /// Closes the current connection, if any. Must be safe to call at any time.
    async fn close(&self);
}
