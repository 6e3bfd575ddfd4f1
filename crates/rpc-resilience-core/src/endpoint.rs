//! The capability set for issuing remote calls.

use futures::future::BoxFuture;

use crate::call::{DoneSender, PendingCall};
use crate::error::CallError;

/// A remote method that can be called synchronously or asynchronously.
///
/// An `Endpoint` is bound to a single remote method. Anything implementing
/// this trait can be wrapped by a resilience wrapper, and the wrapper exposes
/// the same trait so it can stand in wherever a raw connection is expected.
///
/// # Examples
///
/// ```rust
/// use futures::future::BoxFuture;
/// use rpc_resilience_core::{Call, CallError, DEFAULT_DONE_CAPACITY, DoneSender, Endpoint, PendingCall};
/// use std::sync::Arc;
///
/// struct Double {
///     method: Arc<str>,
/// }
///
/// impl Endpoint for Double {
///     type Request = u64;
///     type Response = u64;
///
///     fn method_name(&self) -> &str {
///         &self.method
///     }
///
///     fn call(&self, args: u64) -> BoxFuture<'_, Result<u64, CallError>> {
///         Box::pin(async move { Ok(args * 2) })
///     }
///
///     fn go_call(&self, args: u64, done: Option<DoneSender<u64, u64>>) -> PendingCall<u64, u64> {
///         let (done, receiver) = PendingCall::channel(done, DEFAULT_DONE_CAPACITY);
///         let method = Arc::clone(&self.method);
///         let call = Call::new(Arc::clone(&method), args, Ok(args * 2));
///         tokio::spawn(async move {
///             let _ = done.send(call).await;
///         });
///         match receiver {
///             Some(rx) => PendingCall::with_receiver(method, args, rx),
///             None => PendingCall::new(method, args),
///         }
///     }
/// }
/// ```
pub trait Endpoint: Send + Sync {
    /// Argument type of the remote method.
    type Request: Clone + Send + Sync + 'static;

    /// Reply type of the remote method.
    type Response: Send + 'static;

    /// Returns the fully qualified name of the remote method, e.g. `"Arith.Multiply"`.
    fn method_name(&self) -> &str;

    /// Calls the remote method and waits for the reply.
    fn call(&self, args: Self::Request) -> BoxFuture<'_, Result<Self::Response, CallError>>;

    /// Issues the remote call without waiting for it.
    ///
    /// Exactly one [`Call`](crate::Call) is delivered on `done` once the call
    /// completes. When `done` is `None`, a channel with
    /// [`DEFAULT_DONE_CAPACITY`](crate::DEFAULT_DONE_CAPACITY) slots is
    /// allocated and handed back inside the returned [`PendingCall`].
    ///
    /// Implementations must not wait; any waiting happens on spawned tasks.
    fn go_call(
        &self,
        args: Self::Request,
        done: Option<DoneSender<Self::Request, Self::Response>>,
    ) -> PendingCall<Self::Request, Self::Response>;
}
