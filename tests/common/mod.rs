#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Helpers are shared between test binaries that each use a subset"
)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gateway_client::config::{Config, ReconnectConfig};
use gateway_client::endpoint::Endpoint;
use gateway_client::gateway::{Delegate, GatewayConnection};
use gateway_client::protocol::{Envelope, Identify, OpCode};
use gateway_client::transport::{EventSink, Transport, TransportError};
use serde_json::{Value, json};
use tokio::time::Instant;

pub const TOKEN: &str = "token";
pub const ENDPOINT: &str = "wss://gateway.example/v1";
pub const HEARTBEAT_INTERVAL_MS: u64 = 41_250;

#[derive(Default)]
struct MockState {
    outcomes: VecDeque<bool>,
    opens: Vec<Instant>,
    writes: Vec<String>,
    closes: usize,
    sink: Option<EventSink>,
}

/// Scripted in-memory transport.
///
/// Opens succeed unless an outcome was scripted with [`MockTransport::script`]. Every open, write
/// and close is recorded, and inbound frames are injected with [`MockTransport::push`].
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Queue the results of the next open attempts.
    pub fn script<I: IntoIterator<Item = bool>>(&self, outcomes: I) {
        self.state.lock().unwrap().outcomes.extend(outcomes);
    }

    pub fn opens(&self) -> Vec<Instant> {
        self.state.lock().unwrap().opens.clone()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().opens.len()
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    /// Every frame written so far, decoded.
    pub fn writes(&self) -> Vec<Envelope> {
        self.state
            .lock()
            .unwrap()
            .writes
            .iter()
            .map(|text| Envelope::from_slice(text.as_bytes()).unwrap())
            .collect()
    }

    pub fn writes_with_op(&self, op: OpCode) -> Vec<Envelope> {
        self.writes().into_iter().filter(|e| e.op == op).collect()
    }

    /// Deliver a JSON frame on the open connection.
    pub fn push(&self, frame: Value) -> bool {
        self.push_raw(frame.to_string().into_bytes())
    }

    pub fn push_raw(&self, bytes: Vec<u8>) -> bool {
        let state = self.state.lock().unwrap();
        state.sink.as_ref().is_some_and(|sink| sink.message(bytes))
    }

    /// Simulate the peer closing the connection.
    pub fn close_remote(&self, reason: Option<&str>) -> bool {
        let sink = self.state.lock().unwrap().sink.take();
        sink.is_some_and(|sink| sink.closed(reason.map(str::to_owned)))
    }

    /// Simulate a transport failure on the open connection.
    pub fn fail_remote(&self, detail: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.sink.as_ref().is_some_and(|sink| sink.error(detail))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, _endpoint: &Endpoint, events: EventSink) -> bool {
        let mut state = self.state.lock().unwrap();
        state.opens.push(Instant::now());

        let opened = state.outcomes.pop_front().unwrap_or(true);
        if opened {
            state.sink = Some(events);
        }
        opened
    }

    async fn write(&self, text: String) -> gateway_client::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.sink.is_none() {
            return Err(TransportError::NotConnected.into());
        }

        state.writes.push(text);
        Ok(())
    }

    async fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closes += 1;
        state.sink = None;
    }
}

#[derive(Default)]
struct Recorded {
    established: AtomicUsize,
    closed: AtomicUsize,
    failed: AtomicUsize,
    messages: Mutex<Vec<Envelope>>,
}

/// Delegate that counts every callback.
#[derive(Clone, Default)]
pub struct RecordingDelegate {
    recorded: Arc<Recorded>,
}

impl RecordingDelegate {
    pub fn established(&self) -> usize {
        self.recorded.established.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.recorded.closed.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.recorded.failed.load(Ordering::SeqCst)
    }

    pub fn messages(&self) -> Vec<Envelope> {
        self.recorded.messages.lock().unwrap().clone()
    }
}

impl Delegate for RecordingDelegate {
    fn on_connection_established(&self) {
        self.recorded.established.fetch_add(1, Ordering::SeqCst);
    }

    fn on_connection_closed(&self) {
        self.recorded.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_connection_failed(&self) {
        self.recorded.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_message(&self, envelope: Envelope) {
        self.recorded.messages.lock().unwrap().push(envelope);
    }
}

/// Reconnect settings without jitter so that attempt times are exact.
#[must_use]
pub fn reconnect_config() -> ReconnectConfig {
    ReconnectConfig::builder()
        .jitter(Duration::ZERO)
        .seed(7)
        .build()
}

pub fn config(reconnect: ReconnectConfig) -> Config {
    Config::builder()
        .identify(Identify::new(TOKEN))
        .reconnect(reconnect)
        .build()
}

pub fn gateway(
    transport: &MockTransport,
    delegate: &RecordingDelegate,
    reconnect: ReconnectConfig,
) -> GatewayConnection<MockTransport> {
    GatewayConnection::new(
        Endpoint::parse(ENDPOINT).unwrap(),
        transport.clone(),
        delegate.clone(),
        config(reconnect),
    )
}

/// Let spawned tasks run without moving the paused clock.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// Advance the paused clock, then let every woken task run.
pub async fn advance(duration: Duration) {
    tokio::time::advance(duration).await;
    settle().await;
}

pub fn hello(interval_ms: u64) -> Value {
    json!({ "op": 10, "d": { "heartbeat_interval": interval_ms } })
}

pub fn ready(session_id: &str, seq: u64) -> Value {
    json!({ "op": 0, "t": "READY", "s": seq, "d": { "session_id": session_id } })
}

/// Connect and wait until the transport is open.
pub async fn connected(
    transport: &MockTransport,
    delegate: &RecordingDelegate,
) -> GatewayConnection<MockTransport> {
    let gateway = gateway(transport, delegate, reconnect_config());
    assert!(gateway.connect(), "connect should start the retry loop");
    settle().await;
    gateway
}
