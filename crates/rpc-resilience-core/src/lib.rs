//! Core infrastructure for rpc-resilience.
//!
//! This crate defines the pieces every endpoint wrapper builds on:
//! - [`Endpoint`]: the capability set for issuing remote calls
//! - [`Call`] and [`PendingCall`]: the records exchanged by asynchronous calls
//! - [`CallError`], [`ConnectError`] and [`ConnectionUnavailable`]: the error taxonomy
//! - An event system for observability

pub mod call;
pub mod endpoint;
pub mod error;
pub mod events;

pub use call::{Call, DEFAULT_DONE_CAPACITY, DoneReceiver, DoneSender, PendingCall};
pub use endpoint::Endpoint;
pub use error::{CallError, ConnectError, ConnectionUnavailable};
pub use events::{EndpointEvent, EventListener, EventListeners};
