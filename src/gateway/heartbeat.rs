use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::error::Error;
use crate::token::{Token, TokenSlot};

/// What the heartbeat loop should do when its interval elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Beat {
    /// Send a heartbeat now
    Send,
    /// The previous heartbeat was never acknowledged, the connection is presumed dead
    AckOverdue,
    /// A newer monitor (or none) owns the heartbeat, exit silently
    Superseded,
}

/// Heartbeat bookkeeping for one gateway connection.
///
/// The loop itself lives in the gateway; this holds the negotiated interval, the acknowledgment
/// watchdog and the monitor token.
#[derive(Debug)]
pub(crate) struct HeartbeatMonitor {
    interval: Option<Duration>,
    last_sent: Option<Instant>,
    last_ack: Option<Instant>,
    tokens: TokenSlot,
}

impl HeartbeatMonitor {
    pub(crate) fn new() -> Self {
        Self {
            interval: None,
            last_sent: None,
            last_ack: None,
            tokens: TokenSlot::new(CancellationToken::new()),
        }
    }

    /// Starts a new monitor generation, retiring any previous one.
    ///
    /// Fails without starting if `interval` is below `floor`.
    pub(crate) fn start(&mut self, interval: Duration, floor: Duration) -> Result<Token> {
        self.stop();

        if interval < floor {
            return Err(Error::heartbeat_interval_too_short(interval, floor));
        }

        self.interval = Some(interval);
        self.last_sent = None;
        self.last_ack = None;
        Ok(self.tokens.rotate())
    }

    pub(crate) fn stop(&mut self) {
        self.tokens.clear();
        self.interval = None;
    }

    pub(crate) fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub(crate) fn last_ack(&self) -> Option<Instant> {
        self.last_ack
    }

    pub(crate) fn record_ack(&mut self, now: Instant) {
        self.last_ack = Some(now);
    }

    /// Decides what the loop holding `token` does once its interval has elapsed at `now`.
    ///
    /// Records `now` as the send time when the answer is [`Beat::Send`].
    pub(crate) fn beat(&mut self, token: &Token, now: Instant) -> Beat {
        if !self.tokens.is_current(token) {
            return Beat::Superseded;
        }

        if let Some(sent) = self.last_sent
            && self.last_ack.is_none_or(|ack| ack < sent)
        {
            return Beat::AckOverdue;
        }

        self.last_sent = Some(now);
        Beat::Send
    }
}
