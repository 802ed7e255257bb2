#![expect(
    clippy::module_name_repetitions,
    reason = "Socket types expose their domain in the name for clarity"
)]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use strum_macros::Display;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::{EventSink, Transport, TransportEvent};
use crate::backoff::BackoffPolicy;
use crate::config::ReconnectConfig;
use crate::endpoint::EndpointResolver;
use crate::token::{Token, TokenSlot};

/// Lifecycle of the underlying transport.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Attempting to open the transport
    Connecting,
    /// Transport is open
    Connected,
    /// Closing the transport on request
    Disconnecting,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Receives the outcome of connection attempts and the events of the open connection.
///
/// Callbacks for one connection generation are delivered in the order they happened, one at a
/// time. Nothing is delivered for a generation once its token has been invalidated.
#[async_trait]
pub trait SocketDelegate: Send + Sync + 'static {
    async fn on_established(&self);
    async fn on_failed(&self);
    async fn on_message(&self, bytes: Vec<u8>);
    async fn on_closed(&self, reason: Option<String>);
}

struct Attempts {
    token: TokenSlot,
    backoff: BackoffPolicy,
}

struct Shared<T> {
    transport: T,
    state_tx: watch::Sender<ConnectionState>,
    attempts: Mutex<Attempts>,
    disposed: CancellationToken,
}

impl<T> Shared<T> {
    fn attempts(&self) -> MutexGuard<'_, Attempts> {
        self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);

        #[cfg(feature = "tracing")]
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Transport state changed");
        }
        #[cfg(not(feature = "tracing"))]
        let _ = previous;
    }

    fn is_current(&self, token: &Token) -> bool {
        !self.disposed.is_cancelled() && self.attempts().token.is_current(token)
    }

    /// Retires `token` after its connection ended on its own.
    ///
    /// Returns `false` if the token had already been superseded, in which case nothing changes.
    fn release(&self, token: &Token) -> bool {
        let mut attempts = self.attempts();
        if self.disposed.is_cancelled() || !attempts.token.is_current(token) {
            return false;
        }

        attempts.token.clear();
        drop(attempts);

        self.set_state(ConnectionState::Disconnected);
        true
    }
}

/// Owns one [`Transport`] and the retry loop around it.
///
/// Cloning is cheap and every clone refers to the same socket.
pub struct TransportSocket<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for TransportSocket<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Transport> TransportSocket<T> {
    #[must_use]
    pub fn new(transport: T, reconnect: &ReconnectConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let disposed = CancellationToken::new();

        Self {
            shared: Arc::new(Shared {
                transport,
                state_tx,
                attempts: Mutex::new(Attempts {
                    token: TokenSlot::new(disposed.clone()),
                    backoff: BackoffPolicy::new(reconnect),
                }),
                disposed,
            }),
        }
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Delay the retry loop will wait before its next attempt.
    #[must_use]
    pub fn next_attempt_delay(&self) -> Duration {
        self.shared.attempts().backoff.time_to_next_attempt()
    }

    /// Consecutive failed attempts since the last success or reset.
    #[must_use]
    pub fn failed_attempts(&self) -> u32 {
        self.shared.attempts().backoff.attempts()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.is_cancelled()
    }

    /// Whether `token` is the generation this socket currently serves.
    #[must_use]
    pub fn is_current(&self, token: &Token) -> bool {
        self.shared.is_current(token)
    }

    /// Invalidates any attempt in flight and returns the token for a new one.
    ///
    /// The new generation starts from the idle backoff baseline. Returns `None` once the socket
    /// has been disposed.
    pub fn begin_attempt(&self) -> Option<Token> {
        if self.is_disposed() {
            return None;
        }

        let mut attempts = self.shared.attempts();
        attempts.backoff.reset_to_idle();
        Some(attempts.token.rotate())
    }

    fn delay_if_current(&self, token: &Token) -> Option<Duration> {
        let attempts = self.shared.attempts();
        if self.is_disposed() || !attempts.token.is_current(token) {
            return None;
        }

        Some(attempts.backoff.time_to_next_attempt())
    }

    /// Connect-retry loop.
    ///
    /// Waits out the backoff delay, resolves an endpoint and opens the transport, repeating on
    /// failure until an attempt succeeds (`true`), or `token` is superseded or the socket is
    /// disposed (`false`). The token is rechecked every time the loop resumes, so a superseded
    /// loop never completes a stale connection.
    pub async fn connect(
        &self,
        resolver: &dyn EndpointResolver,
        token: Token,
        delegate: Arc<dyn SocketDelegate>,
    ) -> bool {
        loop {
            let Some(delay) = self.delay_if_current(&token) else {
                return false;
            };

            if !delay.is_zero() {
                #[cfg(feature = "tracing")]
                tracing::debug!(?delay, "Waiting before next connection attempt");
            }

            if !token.sleep(delay).await || !self.is_current(&token) {
                #[cfg(feature = "tracing")]
                tracing::debug!("Connection attempt superseded while waiting");
                return false;
            }

            self.shared.set_state(ConnectionState::Connecting);

            let (sink, events) = EventSink::channel();
            let opened = match resolver.resolve().await {
                Ok(endpoint) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(%endpoint, "Opening transport");

                    self.shared.transport.open(&endpoint, sink).await
                }
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Unable to resolve gateway endpoint: {e:?}");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                    false
                }
            };

            let Some(attempts) = self.settle_attempt(&token, opened) else {
                if opened {
                    self.shared.transport.close().await;
                }

                #[cfg(feature = "tracing")]
                tracing::debug!(opened, "Discarding superseded connection attempt");
                return false;
            };

            if opened {
                delegate.on_established().await;
                tokio::spawn(Self::pump(
                    Arc::clone(&self.shared),
                    events,
                    token,
                    delegate,
                ));
                return true;
            }

            #[cfg(feature = "tracing")]
            tracing::warn!(attempts, "Unable to connect");
            #[cfg(not(feature = "tracing"))]
            let _ = attempts;

            delegate.on_failed().await;
        }
    }

    /// Records the outcome of an attempt if `token` is still current.
    ///
    /// The currency check, the backoff update and the state change happen under one lock, so a
    /// concurrent `disconnect` either supersedes the attempt before it settles or finds it
    /// `Connected` and closes it. Returns the failed attempt count, or `None` if superseded.
    fn settle_attempt(&self, token: &Token, opened: bool) -> Option<u32> {
        let mut attempts = self.shared.attempts();
        if self.is_disposed() || !attempts.token.is_current(token) {
            return None;
        }

        if opened {
            attempts.backoff.mark_success();
            self.shared.set_state(ConnectionState::Connected);
        } else {
            attempts.backoff.mark_failure();
            self.shared.set_state(ConnectionState::Disconnected);
        }
        Some(attempts.backoff.attempts())
    }

    /// Forwards the events of one connection generation to the delegate until it ends.
    async fn pump(
        shared: Arc<Shared<T>>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        token: Token,
        delegate: Arc<dyn SocketDelegate>,
    ) {
        loop {
            let event = tokio::select! {
                biased;

                () = token.cancelled() => return,
                event = events.recv() => event,
            };

            let reason = match event {
                Some(TransportEvent::Message(bytes)) => {
                    delegate.on_message(bytes).await;
                    continue;
                }
                Some(TransportEvent::Closed(reason)) => reason,
                Some(TransportEvent::Error(detail)) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(%detail, "Transport error, closing connection");

                    if shared.is_current(&token) {
                        shared.transport.close().await;
                    }
                    Some(detail)
                }
                None => None,
            };

            if shared.release(&token) {
                #[cfg(feature = "tracing")]
                tracing::debug!(?reason, "Transport closed");

                delegate.on_closed(reason).await;
            }
            return;
        }
    }

    /// Writes one text message.
    ///
    /// Returns `false` without touching the transport if it is not currently connected, or if
    /// the write itself failed.
    pub async fn write(&self, text: String) -> bool {
        if !self.state().is_connected() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Dropping write, transport is not connected");
            return false;
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(%text, "Sending message");

        match self.shared.transport.write(text).await {
            Ok(()) => true,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Unable to write message: {e:?}");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                false
            }
        }
    }

    /// Invalidates the current attempt and closes the transport if it is open or opening.
    ///
    /// Idempotent. Returns whether an open connection was closed. Does nothing once disposed.
    pub async fn disconnect(&self) -> bool {
        if self.is_disposed() {
            return false;
        }

        {
            let mut attempts = self.shared.attempts();
            attempts.token.clear();
            attempts.backoff.reset_to_idle();
        }

        self.close_transport().await
    }

    /// Cancels every pending attempt and timer, then releases the transport.
    ///
    /// Returns whether an open connection was closed.
    pub async fn dispose(&self) -> bool {
        if self.is_disposed() {
            return false;
        }

        self.shared.attempts().token.clear();
        self.shared.disposed.cancel();

        self.close_transport().await
    }

    async fn close_transport(&self) -> bool {
        let previous = self.state();

        if matches!(
            previous,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            self.shared.set_state(ConnectionState::Disconnecting);
            self.shared.transport.close().await;
        }
        self.shared.set_state(ConnectionState::Disconnected);

        previous.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use tokio::sync::Notify;
    use tokio::sync::mpsc::UnboundedSender;

    use super::*;
    use crate::Result;
    use crate::endpoint::Endpoint;

    #[derive(Default)]
    struct Script {
        outcomes: VecDeque<bool>,
        opens: usize,
        closes: usize,
        writes: Vec<String>,
        sink: Option<EventSink>,
        /// Holds `open` until notified.
        gate: Option<Arc<Notify>>,
    }

    #[derive(Clone, Default)]
    struct ScriptedTransport(Arc<Mutex<Script>>);

    impl ScriptedTransport {
        fn script(&self) -> MutexGuard<'_, Script> {
            self.0.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn open(&self, _endpoint: &Endpoint, events: EventSink) -> bool {
            let gate = self.script().gate.clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }

            let mut script = self.script();
            script.opens += 1;
            let opened = script.outcomes.pop_front().unwrap_or(true);
            if opened {
                script.sink = Some(events);
            }
            opened
        }

        async fn write(&self, text: String) -> Result<()> {
            self.script().writes.push(text);
            Ok(())
        }

        async fn close(&self) {
            let mut script = self.script();
            script.closes += 1;
            script.sink = None;
        }
    }

    #[derive(Debug, PartialEq, Eq)]
    enum Seen {
        Established,
        Failed,
        Message(Vec<u8>),
        Closed(Option<String>),
    }

    struct Recorder(UnboundedSender<Seen>);

    #[async_trait]
    impl SocketDelegate for Recorder {
        async fn on_established(&self) {
            drop(self.0.send(Seen::Established));
        }

        async fn on_failed(&self) {
            drop(self.0.send(Seen::Failed));
        }

        async fn on_message(&self, bytes: Vec<u8>) {
            drop(self.0.send(Seen::Message(bytes)));
        }

        async fn on_closed(&self, reason: Option<String>) {
            drop(self.0.send(Seen::Closed(reason)));
        }
    }

    fn recorder() -> (Arc<dyn SocketDelegate>, mpsc::UnboundedReceiver<Seen>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Recorder(tx)), rx)
    }

    fn endpoint() -> Endpoint {
        Endpoint::parse("wss://gateway.example/v1").unwrap()
    }

    fn reconnect(idle_delay: Duration) -> ReconnectConfig {
        ReconnectConfig::builder()
            .idle_delay(idle_delay)
            .jitter(Duration::ZERO)
            .build()
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_attempt_never_opens() {
        let transport = ScriptedTransport::default();
        let socket = TransportSocket::new(transport.clone(), &reconnect(Duration::from_millis(100)));
        let (delegate, _seen) = recorder();

        let stale = socket.begin_attempt().unwrap();
        let first = tokio::spawn({
            let socket = socket.clone();
            let delegate = Arc::clone(&delegate);
            async move { socket.connect(&endpoint(), stale, delegate).await }
        });
        settle().await;

        let fresh = socket.begin_attempt().unwrap();
        let second = tokio::spawn({
            let socket = socket.clone();
            async move { socket.connect(&endpoint(), fresh, delegate).await }
        });

        tokio::time::advance(Duration::from_millis(100)).await;
        settle().await;

        assert!(!first.await.unwrap(), "stale loop must give up");
        assert!(second.await.unwrap(), "fresh loop should connect");
        assert_eq!(transport.script().opens, 1);
        assert_eq!(socket.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_superseded_while_opening_is_discarded() {
        let gate = Arc::new(Notify::new());
        let transport = ScriptedTransport::default();
        transport.script().gate = Some(Arc::clone(&gate));
        let socket = TransportSocket::new(transport.clone(), &reconnect(Duration::ZERO));
        let (delegate, mut seen) = recorder();

        let token = socket.begin_attempt().unwrap();
        let attempt = tokio::spawn({
            let socket = socket.clone();
            async move { socket.connect(&endpoint(), token, delegate).await }
        });
        settle().await;
        assert_eq!(socket.state(), ConnectionState::Connecting);

        assert!(!socket.disconnect().await, "nothing was open yet");
        let closes = transport.script().closes;

        gate.notify_one();
        assert!(!attempt.await.unwrap(), "superseded attempt must not connect");

        let script = transport.script();
        assert_eq!(script.opens, 1);
        assert_eq!(script.closes, closes + 1, "late transport should be closed");
        assert!(script.sink.is_none(), "late transport should be released");
        drop(script);

        assert_eq!(socket.state(), ConnectionState::Disconnected);
        assert!(seen.try_recv().is_err(), "no events from a superseded attempt");
    }

    #[tokio::test(start_paused = true)]
    async fn events_are_delivered_in_order() {
        let transport = ScriptedTransport::default();
        transport.script().outcomes.push_back(false);
        let socket = TransportSocket::new(transport.clone(), &reconnect(Duration::ZERO));
        let (delegate, mut seen) = recorder();

        let token = socket.begin_attempt().unwrap();
        tokio::spawn({
            let socket = socket.clone();
            async move { socket.connect(&endpoint(), token, delegate).await }
        });
        settle().await;
        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;

        let sink = transport.script().sink.clone().unwrap();
        sink.message("one");
        sink.message("two");
        sink.closed(Some("bye".to_owned()));
        settle().await;

        assert_eq!(seen.recv().await, Some(Seen::Failed));
        assert_eq!(seen.recv().await, Some(Seen::Established));
        assert_eq!(seen.recv().await, Some(Seen::Message(b"one".to_vec())));
        assert_eq!(seen.recv().await, Some(Seen::Message(b"two".to_vec())));
        assert_eq!(seen.recv().await, Some(Seen::Closed(Some("bye".to_owned()))));
        assert_eq!(socket.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn events_after_disconnect_are_dropped() {
        let transport = ScriptedTransport::default();
        let socket = TransportSocket::new(transport.clone(), &reconnect(Duration::ZERO));
        let (delegate, mut seen) = recorder();

        let token = socket.begin_attempt().unwrap();
        assert!(socket.connect(&endpoint(), token, delegate).await, "should connect");
        let sink = transport.script().sink.clone().unwrap();

        assert!(socket.disconnect().await, "open connection should be closed");
        sink.message("late");
        sink.closed(None);
        settle().await;

        assert_eq!(seen.recv().await, Some(Seen::Established));
        assert!(seen.try_recv().is_err(), "nothing after disconnect");
        assert_eq!(socket.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn write_requires_open_transport() {
        let transport = ScriptedTransport::default();
        let socket = TransportSocket::new(transport.clone(), &reconnect(Duration::ZERO));
        let (delegate, _seen) = recorder();

        assert!(!socket.write("early".to_owned()).await, "not connected yet");

        let token = socket.begin_attempt().unwrap();
        socket.connect(&endpoint(), token, delegate).await;

        assert!(socket.write("hello".to_owned()).await, "connected");
        assert_eq!(transport.script().writes, vec!["hello".to_owned()]);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_refuses_new_attempts() {
        let transport = ScriptedTransport::default();
        let socket = TransportSocket::new(transport, &reconnect(Duration::ZERO));

        assert!(!socket.dispose().await, "nothing was connected");
        assert!(socket.is_disposed(), "socket should be disposed");
        assert!(socket.begin_attempt().is_none(), "no attempts after dispose");
    }
}
