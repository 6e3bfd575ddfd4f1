//! Reconnecting wrapper for RPC endpoints.
//!
//! [`ReconnectingEndpoint`] wraps a [`ReconnectableEndpoint`] and keeps it
//! usable across connection loss:
//!
//! - **Fail fast**: while disconnected, calls return
//!   [`ConnectionUnavailable`](rpc_resilience_core::ConnectionUnavailable)
//!   immediately instead of queuing.
//! - **Bounded reconnection**: the caller that notices a lost connection
//!   makes a fixed number of connect attempts, sleeping a fixed interval
//!   between failures.
//! - **Background recovery**: once those attempts are used up, a background
//!   task keeps trying until it succeeds or the endpoint is shut down.
//! - **Transparent retry**: calls that hit a lost connection are re-issued
//!   against the repaired one.
//! - **Event system**: connect attempts, exhaustion, recovery and rejected
//!   calls are reported to registered listeners.
//!
//! # Examples
//!
//! ```rust
//! use rpc_resilience_reconnect::ReconnectConfig;
//! use std::time::Duration;
//!
//! let config = ReconnectConfig::builder()
//!     .name("kv-store")
//!     .retry_interval(Duration::from_millis(200))
//!     .connect_attempts(3)
//!     .on_exhausted(|attempts| {
//!         eprintln!("gave up after {} attempts, recovering in background", attempts);
//!     })
//!     .on_recovered(|failed| {
//!         eprintln!("recovered after {} failed attempts", failed);
//!     })
//!     .build();
//!
//! assert_eq!(config.name(), "kv-store");
//! ```
//!
//! The endpoint is then created with
//! [`ReconnectingEndpoint::with_config`], or with
//! [`ReconnectingEndpoint::wrap`] for the defaults.
//!
//! # Feature Flags
//!
//! - `metrics`: emit counters and a connectivity gauge through the `metrics` crate
//! - `tracing`: structured logging through the `tracing` crate

mod config;
mod endpoint;
mod events;
mod service;
mod state;

pub use config::{
    DEFAULT_CONNECT_ATTEMPTS, DEFAULT_RETRY_INTERVAL, ReconnectConfig, ReconnectConfigBuilder,
    ReconnectPredicate,
};
pub use endpoint::ReconnectableEndpoint;
pub use events::{CallKind, ConnectPhase, ReconnectEvent};
pub use service::{ReconnectingEndpoint, WrapError};
pub use state::{ConnectionState, ReconnectState};
