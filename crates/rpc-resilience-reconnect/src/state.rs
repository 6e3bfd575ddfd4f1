//! Connectivity state tracking for the reconnect protocol.
//!
//! The state lives in a `watch` channel, which gives it a reader/writer lock
//! of its own. Call paths read it to decide whether to fail fast without ever
//! touching the lock that guards the underlying client.

use rpc_resilience_core::{ConnectError, ConnectionUnavailable};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Connection state information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection; nothing is being attempted yet
    Disconnected,

    /// Bounded connect attempts are in progress
    Connecting,

    /// Connected and serving calls
    Connected,

    /// Bounded attempts were exhausted; a background task keeps retrying
    Recovering,

    /// Shut down; no further reconnection will happen
    Closed,
}

impl ConnectionState {
    /// Returns `true` only for [`ConnectionState::Connected`].
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// States in which nobody should wait for the client lock.
    fn turns_away_waiters(self) -> bool {
        matches!(self, ConnectionState::Recovering | ConnectionState::Closed)
    }
}

/// Outcome of arming the reconnect protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Arm {
    /// The failing connection is still installed; a reconnect is needed.
    Armed,
    /// Another caller already replaced the failing connection.
    Repaired,
    /// The endpoint was shut down.
    Closed,
}

#[derive(Debug, Clone)]
struct Snapshot {
    state: ConnectionState,
    generation: u64,
    attempts: u32,
    last_error: Option<Arc<ConnectError>>,
    last_connected: Option<Instant>,
}

/// Shared connectivity state of a reconnecting endpoint.
///
/// Besides the [`ConnectionState`], it tracks a *generation* number that is
/// bumped every time a new client is installed. A caller that saw a call fail
/// remembers the generation it used; if the generation has moved on by the
/// time it gets to reconnect, somebody else already repaired the connection.
#[derive(Clone)]
pub struct ReconnectState {
    inner: Arc<watch::Sender<Snapshot>>,
}

impl ReconnectState {
    /// Generation before any client has been installed.
    pub const INITIAL_GENERATION: u64 = 0;

    /// Create a new, disconnected state
    pub fn new() -> Self {
        Self {
            inner: Arc::new(watch::Sender::new(Snapshot {
                state: ConnectionState::Disconnected,
                generation: Self::INITIAL_GENERATION,
                attempts: 0,
                last_error: None,
                last_connected: None,
            })),
        }
    }

    /// Get the current connection state
    pub fn state(&self) -> ConnectionState {
        self.inner.borrow().state
    }

    /// Returns `true` if calls can currently be served.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Returns `true` if calls currently fail fast.
    pub fn is_disconnected(&self) -> bool {
        !self.is_connected()
    }

    /// Returns `true` once the endpoint has been shut down.
    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Number of clients installed so far.
    pub fn generation(&self) -> u64 {
        self.inner.borrow().generation
    }

    /// Failed connect attempts since the last successful connection.
    pub fn attempts(&self) -> u32 {
        self.inner.borrow().attempts
    }

    /// The most recent connect failure, if any.
    pub fn last_error(&self) -> Option<Arc<ConnectError>> {
        self.inner.borrow().last_error.clone()
    }

    /// Time since the last successful connection.
    pub fn time_since_connected(&self) -> Option<Duration> {
        self.inner.borrow().last_connected.map(|at| at.elapsed())
    }

    /// The error handed to callers that find no connection.
    pub fn unavailable(&self) -> ConnectionUnavailable {
        ConnectionUnavailable::with_cause(self.last_error())
    }

    /// Waits until the state is [`ConnectionState::Connected`].
    ///
    /// Fails once the state is [`ConnectionState::Closed`].
    pub async fn wait_connected(&self) -> Result<(), ConnectionUnavailable> {
        let mut rx = self.inner.subscribe();
        let state = match rx
            .wait_for(|s| matches!(s.state, ConnectionState::Connected | ConnectionState::Closed))
            .await
        {
            Ok(snapshot) => snapshot.state,
            Err(_) => ConnectionState::Closed,
        };

        if state.is_connected() {
            Ok(())
        } else {
            Err(self.unavailable())
        }
    }

    /// Resolves once waiting for the client lock is pointless.
    pub(crate) async fn turned_away(&self) {
        let mut rx = self.inner.subscribe();
        let _ = rx.wait_for(|s| s.state.turns_away_waiters()).await;
    }

    /// Resolves once the endpoint is shut down.
    pub(crate) async fn closed(&self) {
        let mut rx = self.inner.subscribe();
        let _ = rx.wait_for(|s| s.state == ConnectionState::Closed).await;
    }

    /// Marks the connection as lost by a caller that used `observed`.
    pub(crate) fn arm(&self, observed: u64) -> Arm {
        let mut outcome = Arm::Armed;
        self.inner.send_if_modified(|s| {
            if s.state == ConnectionState::Closed {
                outcome = Arm::Closed;
                return false;
            }
            if s.generation != observed {
                outcome = Arm::Repaired;
                return false;
            }
            if s.state == ConnectionState::Connected {
                s.state = ConnectionState::Disconnected;
                return true;
            }
            false
        });
        outcome
    }

    pub(crate) fn mark_connecting(&self) {
        self.transition(ConnectionState::Connecting);
    }

    pub(crate) fn mark_recovering(&self) {
        self.transition(ConnectionState::Recovering);
    }

    /// Records a failed connect attempt, returning the failures since the last success.
    pub(crate) fn record_failure(&self, error: Arc<ConnectError>) -> u32 {
        let mut attempts = 0;
        self.inner.send_modify(|s| {
            s.attempts = s.attempts.saturating_add(1);
            s.last_error = Some(error);
            attempts = s.attempts;
        });
        attempts
    }

    /// Marks a new client as installed.
    ///
    /// Returns the number of failed attempts that preceded it, or `None` if
    /// the endpoint was closed in the meantime.
    pub(crate) fn mark_connected(&self) -> Option<u32> {
        let mut failed = None;
        self.inner.send_if_modified(|s| {
            if s.state == ConnectionState::Closed {
                return false;
            }
            failed = Some(s.attempts);
            s.state = ConnectionState::Connected;
            s.generation += 1;
            s.attempts = 0;
            s.last_error = None;
            s.last_connected = Some(Instant::now());
            true
        });
        failed
    }

    /// Moves to [`ConnectionState::Closed`]. Returns `false` if already closed.
    pub(crate) fn close(&self) -> bool {
        self.inner.send_if_modified(|s| {
            if s.state == ConnectionState::Closed {
                return false;
            }
            s.state = ConnectionState::Closed;
            true
        })
    }

    fn transition(&self, to: ConnectionState) {
        self.inner.send_if_modified(|s| {
            if s.state == ConnectionState::Closed || s.state == to {
                return false;
            }
            s.state = to;
            true
        });
    }
}

impl Default for ReconnectState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReconnectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.inner.borrow();
        f.debug_struct("ReconnectState")
            .field("state", &snapshot.state)
            .field("generation", &snapshot.generation)
            .field("attempts", &snapshot.attempts)
            .finish()
    }
}
