//! Records exchanged by asynchronous calls.
//!
//! [`Endpoint::go_call`](crate::Endpoint::go_call) hands back a [`PendingCall`]
//! right away and later delivers exactly one completed [`Call`] on the
//! completion channel.

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::CallError;

/// Buffer size of completion channels allocated when the caller supplies none.
pub const DEFAULT_DONE_CAPACITY: usize = 10;

/// Sending half of a completion channel.
pub type DoneSender<Req, Resp> = mpsc::Sender<Call<Req, Resp>>;

/// Receiving half of a completion channel.
pub type DoneReceiver<Req, Resp> = mpsc::Receiver<Call<Req, Resp>>;

/// A completed asynchronous call.
#[derive(Debug)]
pub struct Call<Req, Resp> {
    method: Arc<str>,
    args: Req,
    result: Result<Resp, CallError>,
}

impl<Req, Resp> Call<Req, Resp> {
    /// Creates a completed call record.
    pub fn new(method: Arc<str>, args: Req, result: Result<Resp, CallError>) -> Self {
        Self {
            method,
            args,
            result,
        }
    }

    /// Name of the remote method that was invoked.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Arguments the call was issued with.
    pub fn args(&self) -> &Req {
        &self.args
    }

    /// Outcome of the call.
    pub fn result(&self) -> &Result<Resp, CallError> {
        &self.result
    }

    /// Returns the error, if the call failed.
    pub fn error(&self) -> Option<&CallError> {
        self.result.as_ref().err()
    }

    /// Replaces the outcome of the call.
    pub fn set_result(&mut self, result: Result<Resp, CallError>) {
        self.result = result;
    }

    /// Consumes the record, returning the outcome.
    pub fn into_result(self) -> Result<Resp, CallError> {
        self.result
    }

    /// Consumes the record, returning arguments and outcome.
    pub fn into_parts(self) -> (Req, Result<Resp, CallError>) {
        (self.args, self.result)
    }
}

/// Handle for an asynchronous call that has been issued but may not have completed.
///
/// If the caller passed its own completion channel to `go_call`, the completed
/// [`Call`] arrives there and this handle only carries the call metadata. If
/// the caller passed `None`, the handle owns the receiving half of the channel
/// that was allocated on its behalf; use [`wait`](Self::wait) or
/// [`take_receiver`](Self::take_receiver) to collect the completion.
#[derive(Debug)]
pub struct PendingCall<Req, Resp> {
    method: Arc<str>,
    args: Req,
    done: Option<DoneReceiver<Req, Resp>>,
}

impl<Req, Resp> PendingCall<Req, Resp> {
    /// Creates a handle whose completion goes to a caller-owned channel.
    pub fn new(method: Arc<str>, args: Req) -> Self {
        Self {
            method,
            args,
            done: None,
        }
    }

    /// Creates a handle that owns the receiving half of its completion channel.
    pub fn with_receiver(method: Arc<str>, args: Req, done: DoneReceiver<Req, Resp>) -> Self {
        Self {
            method,
            args,
            done: Some(done),
        }
    }

    /// Resolves the completion channel for a `go_call`.
    ///
    /// Returns the sender to complete on, and the receiver to hand back to the
    /// caller if one had to be allocated with `default_capacity`.
    pub fn channel(
        done: Option<DoneSender<Req, Resp>>,
        default_capacity: usize,
    ) -> (DoneSender<Req, Resp>, Option<DoneReceiver<Req, Resp>>) {
        match done {
            Some(done) => (done, None),
            None => {
                let (tx, rx) = mpsc::channel(default_capacity.max(1));
                (tx, Some(rx))
            }
        }
    }

    /// Name of the remote method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Arguments the call was issued with.
    pub fn args(&self) -> &Req {
        &self.args
    }

    /// Returns `true` if this handle owns its completion channel.
    pub fn owns_receiver(&self) -> bool {
        self.done.is_some()
    }

    /// Takes the receiving half of the completion channel, if this handle owns it.
    pub fn take_receiver(&mut self) -> Option<DoneReceiver<Req, Resp>> {
        self.done.take()
    }

    /// Waits for the completed call.
    ///
    /// Returns `None` when the completion was routed to a caller-supplied
    /// channel, or if the completing side went away without delivering.
    pub async fn wait(mut self) -> Option<Call<Req, Resp>> {
        match self.done.as_mut() {
            Some(done) => done.recv().await,
            None => None,
        }
    }
}
