use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use rpc_resilience_core::{
    Call, CallError, ConnectError, ConnectionUnavailable, DoneReceiver, DoneSender, Endpoint,
    PendingCall,
};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock, mpsc};
use tokio::task::JoinHandle;
use tower::Service;

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

use crate::config::ReconnectConfig;
use crate::endpoint::ReconnectableEndpoint;
use crate::events::{CallKind, ConnectPhase, ReconnectEvent};
use crate::state::{Arm, ConnectionState, ReconnectState};

/// An endpoint that transparently survives the loss of its connection.
///
/// While disconnected, every call fails immediately with
/// [`ConnectionUnavailable`]. A call that finds its connection lost (server
/// shutdown, end of stream, unexpected end of stream) triggers reconnection:
///
/// 1. Up to `connect_attempts` connection attempts are made on behalf of that
///    caller, sleeping `retry_interval` between failures. Concurrent triggers
///    are serialized; a trigger that finds the connection already repaired
///    returns immediately.
/// 2. If every attempt fails, the triggering caller gets
///    [`ConnectionUnavailable`] and a background task keeps trying every
///    `retry_interval` until a connection is installed or the endpoint is
///    shut down.
///
/// After a successful reconnect, [`call`](Self::call) re-issues the call
/// against the new connection; [`go_call`](Self::go_call) re-issues it once.
///
/// Clones share the same connection and state.
pub struct ReconnectingEndpoint<F> {
    shared: Arc<Shared<F>>,
}

impl<F> Clone for ReconnectingEndpoint<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F> fmt::Debug for ReconnectingEndpoint<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectingEndpoint")
            .field("method", &self.shared.method)
            .field("state", &self.shared.connector.state)
            .finish()
    }
}

/// Error returned when the initial connection cannot be established.
///
/// The endpoint is handed back regardless: a background task keeps trying to
/// connect, so it becomes usable once that task succeeds.
#[derive(thiserror::Error)]
#[error("initial connection failed: {source}")]
pub struct WrapError<F> {
    endpoint: ReconnectingEndpoint<F>,
    source: ConnectionUnavailable,
}

impl<F> WrapError<F> {
    /// The endpoint, still recovering in the background.
    pub fn endpoint(&self) -> &ReconnectingEndpoint<F> {
        &self.endpoint
    }

    /// Takes the endpoint, still recovering in the background.
    pub fn into_endpoint(self) -> ReconnectingEndpoint<F> {
        self.endpoint
    }

    /// The connection failure.
    pub fn error(&self) -> &ConnectionUnavailable {
        &self.source
    }
}

impl<F> fmt::Debug for WrapError<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrapError")
            .field("endpoint", &self.endpoint)
            .field("source", &self.source)
            .finish()
    }
}

struct Shared<F> {
    connector: Connector<F>,
    method: Arc<str>,
    recovery: Mutex<Option<JoinHandle<()>>>,
}

/// Everything the reconnect protocol touches.
///
/// Kept apart from [`Shared`] so the background task does not keep the
/// endpoint alive.
struct Connector<F> {
    client: Arc<RwLock<F>>,
    state: ReconnectState,
    config: Arc<ReconnectConfig>,
}

impl<F> Clone for Connector<F> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            state: self.state.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

/// A delegated asynchronous call: its completion channel and the generation
/// of the connection it went out on.
type Issued<F> = (
    DoneReceiver<<F as Endpoint>::Request, <F as Endpoint>::Response>,
    u64,
);

enum Reconnect<F> {
    /// A usable connection is installed.
    Ready,
    /// Gave up without connecting: the endpoint is recovering or closed.
    Rejected,
    /// Bounded attempts used up; the write guard is handed to background recovery.
    Exhausted(OwnedRwLockWriteGuard<F>),
}

impl<F> Connector<F>
where
    F: ReconnectableEndpoint,
{
    fn name(&self) -> &str {
        self.config.name()
    }

    /// Waits for shared access to the client.
    ///
    /// Gives up as soon as the state says no connection is coming.
    async fn read(&self) -> Result<OwnedRwLockReadGuard<F>, ConnectionUnavailable> {
        tokio::select! {
            biased;
            () = self.state.turned_away() => Err(self.state.unavailable()),
            guard = Arc::clone(&self.client).read_owned() => Ok(guard),
        }
    }

    /// Bounded phase of the reconnect protocol, triggered by a caller that
    /// saw the connection of generation `observed` fail.
    async fn bounded(&self, observed: u64) -> Reconnect<F> {
        match self.state.arm(observed) {
            Arm::Repaired => return Reconnect::Ready,
            Arm::Closed => return Reconnect::Rejected,
            Arm::Armed => {
                #[cfg(feature = "metrics")]
                gauge!("reconnect_connected", "reconnect" => self.name().to_string()).set(0.0);
            }
        }

        let mut guard = tokio::select! {
            biased;
            () = self.state.turned_away() => return Reconnect::Rejected,
            guard = Arc::clone(&self.client).write_owned() => guard,
        };

        // Someone else holding the lock may have fixed things already
        if self.state.generation() != observed {
            return Reconnect::Ready;
        }
        if self.state.is_closed() {
            return Reconnect::Rejected;
        }

        self.state.mark_connecting();

        let max_attempts = self.config.connect_attempts().max(1);
        for attempt in 1..=max_attempts {
            // Shutdown interrupts both the dial and the sleep after it
            let result = tokio::select! {
                biased;
                () = self.state.closed() => return Reconnect::Rejected,
                result = guard.new_underlying_client() => result,
            };
            match result {
                Ok(client) => {
                    return if self.install(&mut guard, client, ConnectPhase::Bounded) {
                        Reconnect::Ready
                    } else {
                        Reconnect::Rejected
                    };
                }
                Err(error) => self.attempt_failed(error, ConnectPhase::Bounded),
            }

            if attempt < max_attempts {
                tokio::select! {
                    biased;
                    () = self.state.closed() => return Reconnect::Rejected,
                    () = tokio::time::sleep(self.config.retry_interval()) => {}
                }
            }
        }

        self.state.mark_recovering();

        let event = ReconnectEvent::Exhausted {
            endpoint_name: self.name().to_string(),
            timestamp: Instant::now(),
            attempts: max_attempts,
            error: self.state.last_error(),
        };
        self.config.emit(&event);

        #[cfg(feature = "tracing")]
        tracing::error!(
            endpoint = self.name(),
            attempts = max_attempts,
            error = ?self.state.last_error(),
            "connect attempts exhausted, recovering in background"
        );

        #[cfg(feature = "metrics")]
        counter!("reconnect_exhausted_total", "reconnect" => self.name().to_string()).increment(1);

        Reconnect::Exhausted(guard)
    }

    /// Background phase: retries every `retry_interval` until a client is
    /// installed or the endpoint closes. Holds the write guard throughout.
    async fn recover(self, mut guard: OwnedRwLockWriteGuard<F>) {
        loop {
            tokio::time::sleep(self.config.retry_interval()).await;
            if self.state.is_closed() {
                return;
            }

            let result = guard.new_underlying_client().await;
            match result {
                Ok(client) => {
                    self.install(&mut guard, client, ConnectPhase::Background);
                    return;
                }
                Err(error) => self.attempt_failed(error, ConnectPhase::Background),
            }
        }
    }

    /// Installs a fresh client. Returns `false` if the endpoint closed meanwhile.
    fn install(&self, endpoint: &mut F, client: F::Client, phase: ConnectPhase) -> bool {
        if self.state.is_closed() {
            return false;
        }
        endpoint.set_underlying_client(client);

        let Some(failed_attempts) = self.state.mark_connected() else {
            return false;
        };

        let event = match phase {
            ConnectPhase::Bounded => ReconnectEvent::Connected {
                endpoint_name: self.name().to_string(),
                timestamp: Instant::now(),
                failed_attempts,
            },
            ConnectPhase::Background => ReconnectEvent::Recovered {
                endpoint_name: self.name().to_string(),
                timestamp: Instant::now(),
                failed_attempts,
            },
        };
        self.config.emit(&event);

        #[cfg(feature = "tracing")]
        tracing::info!(
            endpoint = self.name(),
            phase = phase.as_str(),
            failed_attempts,
            generation = self.state.generation(),
            "connected"
        );

        #[cfg(feature = "metrics")]
        {
            counter!(
                "reconnect_connect_attempts_total",
                "reconnect" => self.name().to_string(),
                "result" => "success",
                "phase" => phase.as_str()
            )
            .increment(1);
            gauge!("reconnect_connected", "reconnect" => self.name().to_string()).set(1.0);
        }

        true
    }

    fn attempt_failed(&self, error: ConnectError, phase: ConnectPhase) {
        let error = Arc::new(error);
        let attempt = self.state.record_failure(Arc::clone(&error));

        #[cfg(feature = "tracing")]
        tracing::warn!(
            endpoint = self.name(),
            phase = phase.as_str(),
            attempt,
            error = %error,
            "connect attempt failed"
        );

        #[cfg(feature = "metrics")]
        counter!(
            "reconnect_connect_attempts_total",
            "reconnect" => self.name().to_string(),
            "result" => "failure",
            "phase" => phase.as_str()
        )
        .increment(1);

        let event = ReconnectEvent::ConnectAttemptFailed {
            endpoint_name: self.name().to_string(),
            timestamp: Instant::now(),
            attempt,
            phase,
            error,
        };
        self.config.emit(&event);
    }
}

impl<F> Shared<F>
where
    F: ReconnectableEndpoint,
{
    fn state(&self) -> &ReconnectState {
        &self.connector.state
    }

    fn config(&self) -> &ReconnectConfig {
        &self.connector.config
    }

    /// Runs the reconnect protocol on behalf of a caller that used generation `observed`.
    async fn reconnect(&self, observed: u64) -> Result<(), ConnectionUnavailable> {
        match self.connector.bounded(observed).await {
            Reconnect::Ready => Ok(()),
            Reconnect::Rejected => Err(self.state().unavailable()),
            Reconnect::Exhausted(guard) => {
                let unavailable = self.state().unavailable();
                self.spawn_recovery(guard);
                Err(unavailable)
            }
        }
    }

    fn spawn_recovery(&self, guard: OwnedRwLockWriteGuard<F>) {
        let task = tokio::spawn(self.connector.clone().recover(guard));

        let mut slot = self.recovery.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(task);

        // Lost a race with shutdown
        if self.state().is_closed() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }

    async fn call(self: Arc<Self>, args: F::Request) -> Result<F::Response, CallError> {
        loop {
            if self.state().is_disconnected() {
                return Err(self.reject(CallKind::Sync));
            }

            let guard = match self.connector.read().await {
                Ok(guard) => guard,
                Err(_) => return Err(self.reject(CallKind::Sync)),
            };
            let observed = self.state().generation();
            let result = guard.call(args.clone()).await;
            drop(guard);

            match result {
                Err(error) if self.config().should_reconnect(&error) => {
                    self.connection_lost(&error);
                    if let Err(unavailable) = self.reconnect(observed).await {
                        let result = Err(CallError::from(unavailable));
                        self.record_call(CallKind::Sync, &result);
                        return result;
                    }
                }
                result => {
                    self.record_call(CallKind::Sync, &result);
                    return result;
                }
            }
        }
    }

    fn go_call(
        self: &Arc<Self>,
        args: F::Request,
        done: Option<DoneSender<F::Request, F::Response>>,
    ) -> PendingCall<F::Request, F::Response> {
        let (done, receiver) = PendingCall::channel(done, self.config().done_capacity());
        let pending = match receiver {
            Some(receiver) => {
                PendingCall::with_receiver(Arc::clone(&self.method), args.clone(), receiver)
            }
            None => PendingCall::new(Arc::clone(&self.method), args.clone()),
        };

        if self.state().is_disconnected() {
            let error = self.reject(CallKind::Async);
            let call = Call::new(Arc::clone(&self.method), args, Err(error));
            tokio::spawn(deliver(done, call));
            return pending;
        }

        // Hand the call over right away when the lock is free, so calls from
        // one task reach the client in order. Otherwise wait for it in the task.
        let issued = match Arc::clone(&self.connector.client).try_read_owned() {
            Ok(guard) => Some(self.dispatch(&guard, args.clone(), done.max_capacity())),
            Err(_) => None,
        };
        tokio::spawn(Arc::clone(self).complete(args, done, issued));

        pending
    }

    /// Drives an asynchronous call to its single completion.
    async fn complete(
        self: Arc<Self>,
        args: F::Request,
        done: DoneSender<F::Request, F::Response>,
        issued: Option<Issued<F>>,
    ) {
        let capacity = done.max_capacity();

        let issued = match issued {
            Some(issued) => Ok(issued),
            None => self.issue(args.clone(), capacity).await,
        };

        let result = match issued {
            Ok((rx, observed)) => match settle(rx).await {
                Err(error) if self.config().should_reconnect(&error) => {
                    self.connection_lost(&error);
                    match self.reconnect(observed).await {
                        // One re-issue against the repaired connection, whatever it yields
                        Ok(()) => match self.issue(args.clone(), capacity).await {
                            Ok((rx, _)) => settle(rx).await,
                            Err(unavailable) => Err(unavailable.into()),
                        },
                        Err(unavailable) => Err(unavailable.into()),
                    }
                }
                result => result,
            },
            Err(unavailable) => Err(unavailable.into()),
        };

        self.record_call(CallKind::Async, &result);
        deliver(done, Call::new(Arc::clone(&self.method), args, result)).await;
    }

    /// Waits for the client lock, then delegates one asynchronous call.
    async fn issue(
        &self,
        args: F::Request,
        capacity: usize,
    ) -> Result<Issued<F>, ConnectionUnavailable> {
        let guard = self.connector.read().await?;
        Ok(self.dispatch(&guard, args, capacity))
    }

    /// Delegates one asynchronous call to `client`; the caller holds its read lock.
    fn dispatch(&self, client: &F, args: F::Request, capacity: usize) -> Issued<F> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let observed = self.state().generation();
        let _pending = client.go_call(args, Some(tx));
        (rx, observed)
    }

    fn reject(&self, kind: CallKind) -> CallError {
        let event = ReconnectEvent::CallRejected {
            endpoint_name: self.config().name().to_string(),
            timestamp: Instant::now(),
            kind,
        };
        self.config().emit(&event);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            endpoint = self.config().name(),
            kind = kind.as_str(),
            state = ?self.state().state(),
            "call rejected, no connection"
        );

        #[cfg(feature = "metrics")]
        counter!(
            "reconnect_calls_total",
            "reconnect" => self.config().name().to_string(),
            "kind" => kind.as_str(),
            "result" => "rejected"
        )
        .increment(1);

        self.state().unavailable().into()
    }

    fn connection_lost(&self, error: &CallError) {
        let event = ReconnectEvent::ConnectionLost {
            endpoint_name: self.config().name().to_string(),
            timestamp: Instant::now(),
            error: error.to_string(),
        };
        self.config().emit(&event);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            endpoint = self.config().name(),
            error = %error,
            "connection lost, reconnecting"
        );

        #[cfg(feature = "metrics")]
        counter!(
            "reconnect_connection_lost_total",
            "reconnect" => self.config().name().to_string()
        )
        .increment(1);
    }

    #[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
    fn record_call<T>(&self, kind: CallKind, result: &Result<T, CallError>) {
        #[cfg(feature = "metrics")]
        {
            let outcome = match result {
                Ok(_) => "success",
                Err(CallError::Unavailable(_)) => "rejected",
                Err(_) => "failure",
            };
            counter!(
                "reconnect_calls_total",
                "reconnect" => self.config().name().to_string(),
                "kind" => kind.as_str(),
                "result" => outcome
            )
            .increment(1);
        }
    }

    fn shutdown(&self) {
        if !self.state().close() {
            return;
        }

        if let Some(task) = self
            .recovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }

        let event = ReconnectEvent::Shutdown {
            endpoint_name: self.config().name().to_string(),
            timestamp: Instant::now(),
        };
        self.config().emit(&event);

        #[cfg(feature = "tracing")]
        tracing::info!(endpoint = self.config().name(), "endpoint shut down");

        #[cfg(feature = "metrics")]
        gauge!("reconnect_connected", "reconnect" => self.config().name().to_string()).set(0.0);
    }
}

impl<F> Drop for Shared<F> {
    fn drop(&mut self) {
        self.connector.state.close();
        if let Some(task) = self
            .recovery
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

/// Waits for the completion of a delegated call.
async fn settle<Req, Resp>(mut rx: DoneReceiver<Req, Resp>) -> Result<Resp, CallError> {
    match rx.recv().await {
        Some(call) => call.into_result(),
        // The client went away without completing the call
        None => Err(CallError::Shutdown),
    }
}

/// Hands a completed call to its completion channel.
async fn deliver<Req, Resp>(done: DoneSender<Req, Resp>, call: Call<Req, Resp>) {
    if done.send(call).await.is_err() {
        #[cfg(feature = "tracing")]
        tracing::debug!("completion channel closed, dropping result");
    }
}

impl<F> ReconnectingEndpoint<F>
where
    F: ReconnectableEndpoint,
{
    /// Wraps `factory`, connecting it right away.
    ///
    /// Uses the default configuration with the given `retry_interval`.
    ///
    /// # Errors
    ///
    /// Fails if every bounded connect attempt fails. The error still carries
    /// the endpoint, which keeps trying to connect in the background.
    pub async fn wrap(factory: F, retry_interval: Duration) -> Result<Self, WrapError<F>> {
        let config = ReconnectConfig::builder()
            .retry_interval(retry_interval)
            .build();
        Self::with_config(factory, config).await
    }

    /// Wraps `factory` with a custom configuration, connecting it right away.
    ///
    /// # Errors
    ///
    /// Same as [`wrap`](Self::wrap).
    pub async fn with_config(factory: F, mut config: ReconnectConfig) -> Result<Self, WrapError<F>> {
        let method: Arc<str> = Arc::from(factory.method_name());
        if config.name.is_none() {
            config.name = Some(method.to_string());
        }

        let shared = Arc::new(Shared {
            connector: Connector {
                client: Arc::new(RwLock::new(factory)),
                state: ReconnectState::new(),
                config: Arc::new(config),
            },
            method,
            recovery: Mutex::new(None),
        });

        #[cfg(feature = "tracing")]
        tracing::debug!(
            endpoint = shared.config().name(),
            retry_interval = ?shared.config().retry_interval(),
            connect_attempts = shared.config().connect_attempts(),
            "connecting endpoint"
        );

        let endpoint = Self { shared };
        match endpoint
            .shared
            .reconnect(ReconnectState::INITIAL_GENERATION)
            .await
        {
            Ok(()) => Ok(endpoint),
            Err(source) => Err(WrapError { endpoint, source }),
        }
    }

    /// Invokes the remote method and waits for its reply.
    ///
    /// Fails fast with [`CallError::Unavailable`] while disconnected. A lost
    /// connection is repaired and the call re-issued until it yields
    /// something other than a lost connection, or reconnecting fails.
    pub async fn call(&self, args: F::Request) -> Result<F::Response, CallError> {
        Arc::clone(&self.shared).call(args).await
    }

    /// Issues the remote method without waiting.
    ///
    /// Exactly one [`Call`] is delivered on `done`, or on a channel allocated
    /// with the configured `done_capacity` and owned by the returned handle
    /// if `done` is `None`.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn go_call(
        &self,
        args: F::Request,
        done: Option<DoneSender<F::Request, F::Response>>,
    ) -> PendingCall<F::Request, F::Response> {
        self.shared.go_call(args, done)
    }

    /// Stops reconnecting for good.
    ///
    /// Background recovery is cancelled and every later call fails with
    /// [`CallError::Unavailable`]. Calling it again does nothing.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    /// Name of the wrapped remote method.
    pub fn method_name(&self) -> &str {
        &self.shared.method
    }

    /// Shared connectivity state.
    pub fn state(&self) -> &ReconnectState {
        self.shared.state()
    }

    /// Current connectivity state.
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state().state()
    }

    /// Returns `true` while calls are served by a live connection.
    pub fn is_connected(&self) -> bool {
        self.shared.state().is_connected()
    }

    /// Returns `true` while calls fail fast.
    pub fn is_disconnected(&self) -> bool {
        self.shared.state().is_disconnected()
    }

    /// Number of connections installed so far.
    pub fn generation(&self) -> u64 {
        self.shared.state().generation()
    }

    /// Waits until a connection is installed. Fails once shut down.
    pub async fn wait_connected(&self) -> Result<(), ConnectionUnavailable> {
        self.shared.state().wait_connected().await
    }

    /// The configuration this endpoint was wrapped with.
    pub fn config(&self) -> &ReconnectConfig {
        self.shared.config()
    }
}

impl<F> Endpoint for ReconnectingEndpoint<F>
where
    F: ReconnectableEndpoint,
{
    type Request = F::Request;
    type Response = F::Response;

    fn method_name(&self) -> &str {
        &self.shared.method
    }

    fn call(&self, args: Self::Request) -> BoxFuture<'_, Result<Self::Response, CallError>> {
        Box::pin(Arc::clone(&self.shared).call(args))
    }

    fn go_call(
        &self,
        args: Self::Request,
        done: Option<DoneSender<Self::Request, Self::Response>>,
    ) -> PendingCall<Self::Request, Self::Response> {
        self.shared.go_call(args, done)
    }
}

impl<F> Service<F::Request> for ReconnectingEndpoint<F>
where
    F: ReconnectableEndpoint,
{
    type Response = F::Response;
    type Error = CallError;
    type Future = BoxFuture<'static, Result<F::Response, CallError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Readiness is decided per call: disconnected calls fail fast
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, args: F::Request) -> Self::Future {
        Box::pin(Arc::clone(&self.shared).call(args))
    }
}
