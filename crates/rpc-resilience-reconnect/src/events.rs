use rpc_resilience_core::ConnectError;
use rpc_resilience_core::events::EndpointEvent;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Which stage of the reconnect protocol made a connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectPhase {
    /// Fixed number of attempts made on behalf of the caller that triggered the reconnect.
    Bounded,
    /// Unlimited attempts made by the background recovery task.
    Background,
}

impl ConnectPhase {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectPhase::Bounded => "bounded",
            ConnectPhase::Background => "background",
        }
    }
}

impl fmt::Display for ConnectPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The call path a call came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// `call`: the caller waits for the reply.
    Sync,
    /// `go_call`: the reply is delivered on a completion channel.
    Async,
}

impl CallKind {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Sync => "sync",
            CallKind::Async => "async",
        }
    }
}

/// Events emitted by the reconnecting endpoint.
#[derive(Debug, Clone)]
pub enum ReconnectEvent {
    /// A single connection attempt failed.
    ConnectAttemptFailed {
        endpoint_name: String,
        timestamp: Instant,
        attempt: u32,
        phase: ConnectPhase,
        error: Arc<ConnectError>,
    },
    /// A connection was installed during the bounded phase.
    Connected {
        endpoint_name: String,
        timestamp: Instant,
        failed_attempts: u32,
    },
    /// All bounded attempts failed; background recovery has started.
    Exhausted {
        endpoint_name: String,
        timestamp: Instant,
        attempts: u32,
        error: Option<Arc<ConnectError>>,
    },
    /// Background recovery installed a connection.
    Recovered {
        endpoint_name: String,
        timestamp: Instant,
        failed_attempts: u32,
    },
    /// A call reported that the connection was lost.
    ConnectionLost {
        endpoint_name: String,
        timestamp: Instant,
        error: String,
    },
    /// A call failed fast because no connection was available.
    CallRejected {
        endpoint_name: String,
        timestamp: Instant,
        kind: CallKind,
    },
    /// The endpoint was shut down; reconnection has stopped for good.
    Shutdown {
        endpoint_name: String,
        timestamp: Instant,
    },
}

impl EndpointEvent for ReconnectEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ReconnectEvent::ConnectAttemptFailed { .. } => "connect_attempt_failed",
            ReconnectEvent::Connected { .. } => "connected",
            ReconnectEvent::Exhausted { .. } => "exhausted",
            ReconnectEvent::Recovered { .. } => "recovered",
            ReconnectEvent::ConnectionLost { .. } => "connection_lost",
            ReconnectEvent::CallRejected { .. } => "call_rejected",
            ReconnectEvent::Shutdown { .. } => "shutdown",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            ReconnectEvent::ConnectAttemptFailed { timestamp, .. }
            | ReconnectEvent::Connected { timestamp, .. }
            | ReconnectEvent::Exhausted { timestamp, .. }
            | ReconnectEvent::Recovered { timestamp, .. }
            | ReconnectEvent::ConnectionLost { timestamp, .. }
            | ReconnectEvent::CallRejected { timestamp, .. }
            | ReconnectEvent::Shutdown { timestamp, .. } => *timestamp,
        }
    }

    fn endpoint_name(&self) -> &str {
        match self {
            ReconnectEvent::ConnectAttemptFailed { endpoint_name, .. }
            | ReconnectEvent::Connected { endpoint_name, .. }
            | ReconnectEvent::Exhausted { endpoint_name, .. }
            | ReconnectEvent::Recovered { endpoint_name, .. }
            | ReconnectEvent::ConnectionLost { endpoint_name, .. }
            | ReconnectEvent::CallRejected { endpoint_name, .. }
            | ReconnectEvent::Shutdown { endpoint_name, .. } => endpoint_name,
        }
    }
}
