//! Gateway protocol state machine.
//!
//! [`GatewayConnection`] sits on top of a [`TransportSocket`] and turns an open transport into a
//! live gateway session:
//!
//! ```text
//! Idle -> Connecting -> AwaitingHello -> Identifying -> Steady
//!   ^         ^                                          |
//!   |         +------------ transport lost --------------+
//!   +------------------- disconnect() -------------------+
//! ```
//!
//! Transport failures are retried behind the caller's back for as long as it wants a connection;
//! the [`Delegate`] only hears about connections being established, closed, failing, and about
//! application messages.
//!
//! # Example
//!
//! ```ignore
//! let endpoint = Endpoint::parse("wss://gateway.example/v1")?;
//! let config = Config::builder().identify(Identify::new(token)).build();
//! let gateway = GatewayConnection::new(endpoint, TungsteniteTransport::new(), MyDelegate, config);
//!
//! gateway.connect();
//! // ...
//! gateway.send_opcode_message(OpCode::Dispatch, Some(payload), None, None).await;
//! gateway.dispose().await;
//! ```

#![expect(
    clippy::module_name_repetitions,
    reason = "GatewayConnection reads better than Connection when imported alongside transport types"
)]

mod heartbeat;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use strum_macros::Display;
use tokio::sync::watch;
use tokio::time::Instant;

use self::heartbeat::{Beat, HeartbeatMonitor};
use crate::Result;
use crate::config::Config;
use crate::endpoint::EndpointResolver;
use crate::protocol::{Envelope, Hello, InvalidSession, OpCode, READY_EVENT, Ready};
use crate::token::Token;
use crate::transport::{ConnectionState, SocketDelegate, Transport, TransportSocket};

/// Application-facing callbacks.
///
/// Callbacks run on the connection's event task and must not block. Every method defaults to a
/// no-op.
pub trait Delegate: Send + Sync + 'static {
    /// The transport is open; the handshake is about to start.
    fn on_connection_established(&self) {}

    /// A previously established connection went away.
    fn on_connection_closed(&self) {}

    /// A connection attempt failed and will be retried.
    fn on_connection_failed(&self) {}

    /// Dispatch, Reconnect and `InvalidSession` frames.
    fn on_message(&self, _envelope: Envelope) {}
}

impl Delegate for () {}

/// Protocol phase of a [`GatewayConnection`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Phase {
    /// No connection wanted
    Idle,
    /// Retry loop is running
    Connecting,
    /// Transport is open, waiting for Hello
    AwaitingHello,
    /// Identify or Resume sent, waiting for the session to come up
    Identifying,
    /// Session is live and heartbeats are flowing
    Steady,
}

#[derive(Debug)]
struct Session {
    id: String,
}

struct ProtocolState {
    intent: bool,
    heartbeat: HeartbeatMonitor,
    session: Option<Session>,
    sequence: Option<u64>,
    resume_next: bool,
}

struct Inner<T> {
    config: Config,
    resolver: Arc<dyn EndpointResolver>,
    socket: TransportSocket<T>,
    delegate: Arc<dyn Delegate>,
    state: Mutex<ProtocolState>,
    phase_tx: watch::Sender<Phase>,
}

/// A resilient connection to a gateway.
///
/// Cloning is cheap and every clone drives the same connection. Call [`Self::dispose`] to cancel
/// all background work when done.
pub struct GatewayConnection<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for GatewayConnection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> GatewayConnection<T> {
    /// Create a new, idle connection. Nothing happens until [`Self::connect`] is called.
    pub fn new<R, D>(resolver: R, transport: T, delegate: D, config: Config) -> Self
    where
        R: EndpointResolver,
        D: Delegate,
    {
        let socket = TransportSocket::new(transport, &config.reconnect);
        let (phase_tx, _) = watch::channel(Phase::Idle);

        Self {
            inner: Arc::new(Inner {
                config,
                resolver: Arc::new(resolver),
                socket,
                delegate: Arc::new(delegate),
                state: Mutex::new(ProtocolState {
                    intent: false,
                    heartbeat: HeartbeatMonitor::new(),
                    session: None,
                    sequence: None,
                    resume_next: false,
                }),
                phase_tx,
            }),
        }
    }

    fn protocol(&self) -> MutexGuard<'_, ProtocolState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: Phase) {
        let previous = self.inner.phase_tx.send_replace(phase);

        #[cfg(feature = "tracing")]
        if previous != phase {
            tracing::debug!(from = %previous, to = %phase, "Gateway phase changed");
        }
        #[cfg(not(feature = "tracing"))]
        let _ = previous;
    }

    /// Start connecting in the background.
    ///
    /// Returns `false` without doing anything if a connection is already wanted (connecting or
    /// connected) or the connection has been disposed.
    pub fn connect(&self) -> bool {
        let token = {
            let mut state = self.protocol();
            if state.intent {
                return false;
            }

            state.intent = true;
            let token = self.begin_generation(&state);
            if token.is_none() {
                state.intent = false;
            }
            token
        };

        let Some(token) = token else {
            return false;
        };
        self.spawn_connect_loop(token);
        true
    }

    /// Rotates the socket's attempt token if a connection is still wanted.
    ///
    /// Takes the protocol state so that it can only be called under the protocol lock: a
    /// concurrent `disconnect` either clears intent first or invalidates the returned token.
    fn begin_generation(&self, state: &ProtocolState) -> Option<Token> {
        if !state.intent {
            return None;
        }

        let token = self.inner.socket.begin_attempt()?;
        self.set_phase(Phase::Connecting);
        Some(token)
    }

    fn spawn_connect_loop(&self, token: Token) {
        let this = self.clone();
        tokio::spawn(async move {
            let events: Arc<dyn SocketDelegate> = Arc::new(SocketEvents(this.clone()));
            this.inner
                .socket
                .connect(this.inner.resolver.as_ref(), token, events)
                .await;
        });
    }

    /// Stop wanting a connection and tear the current one down.
    ///
    /// Invalidates the retry loop and the heartbeat monitor immediately, so no further attempt or
    /// heartbeat happens afterwards. The session is forgotten; the next [`Self::connect`] will
    /// identify from scratch.
    pub async fn disconnect(&self) {
        {
            let mut state = self.protocol();
            state.intent = false;
            state.heartbeat.stop();
            state.session = None;
            state.sequence = None;
            state.resume_next = false;
        }

        let was_connected = self.inner.socket.disconnect().await;
        self.set_phase(Phase::Idle);

        if was_connected {
            self.inner.delegate.on_connection_closed();
        }
    }

    /// Cancel every pending retry and heartbeat and release the transport.
    ///
    /// The connection cannot be used afterwards.
    pub async fn dispose(&self) {
        {
            let mut state = self.protocol();
            state.intent = false;
            state.heartbeat.stop();
        }

        let was_connected = self.inner.socket.dispose().await;
        self.set_phase(Phase::Idle);

        if was_connected {
            self.inner.delegate.on_connection_closed();
        }
    }

    /// Send a `{op, d, s, t}` envelope.
    ///
    /// Returns `false` if the transport is not connected or the write failed.
    pub async fn send_opcode_message(
        &self,
        op: OpCode,
        d: Option<Value>,
        s: Option<u64>,
        t: Option<String>,
    ) -> bool {
        self.send(&Envelope::new(op, d).with_sequence(s).with_event(t))
            .await
    }

    /// Send a prepared envelope. Returns `false` if it could not be written.
    pub async fn send(&self, envelope: &Envelope) -> bool {
        if !self.inner.socket.state().is_connected() {
            return false;
        }

        match envelope.to_text() {
            Ok(text) => self.inner.socket.write(text).await,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Unable to encode envelope: {e:?}");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                false
            }
        }
    }

    /// Get the current transport state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.socket.state()
    }

    /// Subscribe to transport state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.socket.state_receiver()
    }

    /// Get the current protocol phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        *self.inner.phase_tx.borrow()
    }

    /// Subscribe to protocol phase changes.
    #[must_use]
    pub fn phase_receiver(&self) -> watch::Receiver<Phase> {
        self.inner.phase_tx.subscribe()
    }

    /// Whether the caller currently wants a connection.
    #[must_use]
    pub fn wants_connection(&self) -> bool {
        self.protocol().intent
    }

    /// Heartbeat interval of the running monitor, if any.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.protocol().heartbeat.interval()
    }

    /// When the last heartbeat acknowledgment arrived.
    #[must_use]
    pub fn last_ack(&self) -> Option<Instant> {
        self.protocol().heartbeat.last_ack()
    }

    /// Identifier of the current session, once `READY` has been received.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.protocol().session.as_ref().map(|s| s.id.clone())
    }

    /// Last dispatch sequence number seen.
    #[must_use]
    pub fn sequence(&self) -> Option<u64> {
        self.protocol().sequence
    }

    /// The socket this connection drives.
    #[must_use]
    pub fn socket(&self) -> &TransportSocket<T> {
        &self.inner.socket
    }

    /// Starts a heartbeat monitor generation, retiring any previous one.
    fn start_heartbeat(&self, interval: Duration) -> Result<()> {
        let token = self
            .protocol()
            .heartbeat
            .start(interval, self.inner.config.heartbeat_floor)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(?interval, "Starting heartbeat monitor");

        tokio::spawn(self.clone().heartbeat_loop(token, interval));
        Ok(())
    }

    async fn heartbeat_loop(self, token: Token, interval: Duration) {
        loop {
            if !token.sleep(interval).await {
                return;
            }

            let (beat, sequence) = {
                let mut state = self.protocol();
                (state.heartbeat.beat(&token, Instant::now()), state.sequence)
            };

            match beat {
                Beat::Superseded => return,
                Beat::AckOverdue => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        ?interval,
                        "No heartbeat acknowledgment within interval, reconnecting"
                    );
                    self.force_reconnect().await;
                    return;
                }
                Beat::Send => {
                    let heartbeat = Envelope::new(OpCode::Heartbeat, sequence.map(Value::from));
                    let sent = self.send(&heartbeat).await;

                    #[cfg(feature = "tracing")]
                    if !sent {
                        tracing::debug!("Heartbeat could not be written");
                    }
                    #[cfg(not(feature = "tracing"))]
                    let _ = sent;
                }
            }
        }
    }

    /// Drops the current connection and, if a connection is still wanted, starts a new retry
    /// loop. The session is kept so that the next Hello can resume it.
    async fn force_reconnect(&self) {
        {
            let mut state = self.protocol();
            state.heartbeat.stop();
            if !state.intent {
                return;
            }
            state.resume_next = state.session.is_some();
        }

        let was_connected = self.inner.socket.disconnect().await;
        if was_connected {
            self.inner.delegate.on_connection_closed();
        }

        let token = {
            let state = self.protocol();
            let token = self.begin_generation(&state);
            if token.is_none() {
                self.set_phase(Phase::Idle);
            }
            token
        };

        if let Some(token) = token {
            self.spawn_connect_loop(token);
        }
    }

    async fn handle_message(&self, bytes: &[u8]) {
        let envelope = match Envelope::from_slice(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Failed to parse gateway frame");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                return;
            }
        };

        #[cfg(feature = "tracing")]
        tracing::trace!(?envelope, "Received gateway frame");

        match envelope.op {
            OpCode::Hello => self.handle_hello(&envelope).await,
            OpCode::Heartbeat => {
                self.send(&Envelope::new(OpCode::HeartbeatAck, None)).await;
            }
            OpCode::HeartbeatAck => {
                self.protocol().heartbeat.record_ack(Instant::now());
                if self.phase() == Phase::Identifying {
                    self.set_phase(Phase::Steady);
                }
            }
            OpCode::Dispatch => {
                self.handle_dispatch(&envelope);
                self.inner.delegate.on_message(envelope);
            }
            OpCode::Reconnect => {
                self.inner.delegate.on_message(envelope);
                self.force_reconnect().await;
            }
            OpCode::InvalidSession => {
                let invalid = InvalidSession::from_envelope(&envelope);
                if !invalid.resumable {
                    let mut state = self.protocol();
                    state.session = None;
                    state.sequence = None;
                }
                self.inner.delegate.on_message(envelope);
                self.force_reconnect().await;
            }
            op => {
                #[cfg(feature = "tracing")]
                tracing::warn!(op = u16::from(op), "Ignoring unexpected opcode");
                #[cfg(not(feature = "tracing"))]
                let _ = op;
            }
        }
    }

    async fn handle_hello(&self, envelope: &Envelope) {
        match Hello::from_envelope(envelope) {
            Ok(hello) => {
                if let Err(e) = self.start_heartbeat(hello.interval()) {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Refusing to start heartbeat: {e}");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                }
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Hello without a usable heartbeat interval");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }

        let handshake = {
            let mut state = self.protocol();
            let resume = std::mem::take(&mut state.resume_next);

            match (&state.session, resume) {
                (Some(session), true) => serde_json::to_value(
                    self.inner
                        .config
                        .identify
                        .resume(session.id.clone(), state.sequence),
                )
                .map(|d| Envelope::new(OpCode::Resume, Some(d))),
                _ => serde_json::to_value(&self.inner.config.identify)
                    .map(|d| Envelope::new(OpCode::Identify, Some(d))),
            }
        };

        match handshake {
            Ok(handshake) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(op = u16::from(handshake.op), "Sending handshake");

                self.set_phase(Phase::Identifying);
                self.send(&handshake).await;
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Unable to encode handshake: {e:?}");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }

    fn handle_dispatch(&self, envelope: &Envelope) {
        {
            let mut state = self.protocol();
            if let Some(s) = envelope.s {
                state.sequence = Some(state.sequence.map_or(s, |current| current.max(s)));
            }

            if envelope.t.as_deref() == Some(READY_EVENT) {
                match Ready::from_envelope(envelope) {
                    Ok(ready) => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(session_id = %ready.session_id, "Session ready");
                        state.session = Some(Session {
                            id: ready.session_id,
                        });
                    }
                    Err(e) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(error = %e, "READY without a session id, resume disabled");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &e;
                    }
                }
            }
        }

        if self.phase() == Phase::Identifying {
            self.set_phase(Phase::Steady);
        }
    }

    fn handle_established(&self) {
        {
            let state = self.protocol();
            if !state.intent {
                #[cfg(feature = "tracing")]
                tracing::debug!("Ignoring connection established after disconnect");
                return;
            }
            self.set_phase(Phase::AwaitingHello);
        }

        self.inner.delegate.on_connection_established();
    }

    fn handle_closed(&self, reason: Option<String>) {
        #[cfg(feature = "tracing")]
        tracing::info!(?reason, "Gateway connection lost");
        #[cfg(not(feature = "tracing"))]
        let _ = reason;

        let token = {
            let mut state = self.protocol();
            state.heartbeat.stop();
            state.resume_next = state.session.is_some();

            let token = self.begin_generation(&state);
            if token.is_none() {
                self.set_phase(Phase::Idle);
            }
            token
        };

        self.inner.delegate.on_connection_closed();

        if let Some(token) = token {
            self.spawn_connect_loop(token);
        }
    }
}

/// Routes socket callbacks into the protocol state machine.
struct SocketEvents<T>(GatewayConnection<T>);

#[async_trait]
impl<T: Transport> SocketDelegate for SocketEvents<T> {
    async fn on_established(&self) {
        self.0.handle_established();
    }

    async fn on_failed(&self) {
        self.0.inner.delegate.on_connection_failed();
    }

    async fn on_message(&self, bytes: Vec<u8>) {
        self.0.handle_message(&bytes).await;
    }

    async fn on_closed(&self, reason: Option<String>) {
        self.0.handle_closed(reason);
    }
}
