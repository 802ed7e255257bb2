//! Generation tokens used to cancel superseded asynchronous work.
//!
//! Every cancellable loop in this crate (the connect-retry loop, the heartbeat monitor and the
//! per-connection event pump) captures a [`Token`] when it starts. The owner keeps the current
//! token in a [`TokenSlot`]; rotating or clearing the slot cancels the old token, so a loop
//! parked on a timer wakes immediately and, on resumption, sees that it is no longer current and
//! exits without further side effects.

use std::fmt;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Opaque generation marker.
///
/// Two tokens are equal only if they were produced by the same call to [`TokenSlot::rotate`].
#[derive(Clone)]
pub struct Token {
    id: Uuid,
    cancel: CancellationToken,
}

impl Token {
    fn child_of(parent: &CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            cancel: parent.child_token(),
        }
    }

    /// Whether this token has been superseded, cleared, or its owner disposed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes once the token has been invalidated.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Sleeps for `duration` unless the token is invalidated first.
    ///
    /// Returns `true` if the full duration elapsed and the token is still live.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(duration) => !self.is_cancelled(),
        }
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Token {}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Holds the single current [`Token`] for one kind of cancellable work.
#[derive(Debug)]
pub(crate) struct TokenSlot {
    parent: CancellationToken,
    current: Option<Token>,
}

impl TokenSlot {
    /// Creates an empty slot whose tokens are all cancelled when `parent` is.
    pub(crate) fn new(parent: CancellationToken) -> Self {
        Self {
            parent,
            current: None,
        }
    }

    /// Invalidates the current token (if any) and installs a fresh one.
    pub(crate) fn rotate(&mut self) -> Token {
        self.clear();
        let token = Token::child_of(&self.parent);
        self.current = Some(token.clone());
        token
    }

    /// Invalidates the current token, leaving the slot empty.
    pub(crate) fn clear(&mut self) {
        if let Some(old) = self.current.take() {
            old.cancel.cancel();
        }
    }

    pub(crate) fn is_current(&self, token: &Token) -> bool {
        !token.is_cancelled() && self.current.as_ref() == Some(token)
    }
}
