use crate::events::{CallKind, ReconnectEvent};
use rpc_resilience_core::events::{EventListener, EventListeners};
use rpc_resilience_core::{CallError, ConnectError, DEFAULT_DONE_CAPACITY};
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "metrics")]
use metrics::{describe_counter, describe_gauge};
#[cfg(feature = "metrics")]
use std::sync::Once;

#[cfg(feature = "metrics")]
static METRICS_INIT: Once = Once::new();

/// Determines whether a call error should trigger reconnection.
///
/// By default only the connection-lost kinds (shutdown, end of stream,
/// unexpected end of stream) trigger reconnection.
pub type ReconnectPredicate = Arc<dyn Fn(&CallError) -> bool + Send + Sync>;

/// Default fixed delay between failed connect attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Default number of connect attempts made before falling back to background recovery.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 3;

/// Configuration for reconnection behavior.
pub struct ReconnectConfig {
    /// Instance name used in events, logs and metric labels.
    /// Falls back to the wrapped endpoint's method name.
    pub(crate) name: Option<String>,

    /// Fixed delay between failed connect attempts.
    pub(crate) retry_interval: Duration,

    /// Connect attempts made synchronously before background recovery takes over.
    pub(crate) connect_attempts: u32,

    /// Capacity of completion channels allocated on behalf of callers.
    pub(crate) done_capacity: usize,

    /// Predicate to determine which call errors trigger reconnection.
    /// None means the connection-lost kinds (default).
    pub(crate) reconnect_predicate: Option<ReconnectPredicate>,

    pub(crate) event_listeners: EventListeners<ReconnectEvent>,
}

impl Clone for ReconnectConfig {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            retry_interval: self.retry_interval,
            connect_attempts: self.connect_attempts,
            done_capacity: self.done_capacity,
            reconnect_predicate: self.reconnect_predicate.clone(),
            event_listeners: self.event_listeners.clone(),
        }
    }
}

impl std::fmt::Debug for ReconnectConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectConfig")
            .field("name", &self.name())
            .field("retry_interval", &self.retry_interval)
            .field("connect_attempts", &self.connect_attempts)
            .field("done_capacity", &self.done_capacity)
            .field("reconnect_predicate", &self.reconnect_predicate.is_some())
            .field("event_listeners", &self.event_listeners.len())
            .finish()
    }
}

impl ReconnectConfig {
    /// Creates a new builder for configuring reconnection behavior.
    pub fn builder() -> ReconnectConfigBuilder {
        #[cfg(feature = "metrics")]
        {
            METRICS_INIT.call_once(|| {
                describe_counter!(
                    "reconnect_connect_attempts_total",
                    "Total number of connection attempts, by phase and result"
                );
                describe_counter!(
                    "reconnect_exhausted_total",
                    "Total number of times the bounded connect attempts were used up"
                );
                describe_counter!(
                    "reconnect_calls_total",
                    "Total number of calls through the reconnecting endpoint, by kind and result"
                );
                describe_counter!(
                    "reconnect_connection_lost_total",
                    "Total number of calls that reported a lost connection"
                );
                describe_gauge!(
                    "reconnect_connected",
                    "Whether the endpoint currently has a live connection (1) or not (0)"
                );
            });
        }
        ReconnectConfigBuilder::new()
    }

    /// Returns the instance name.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }

    /// Returns the fixed delay between failed connect attempts.
    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    /// Returns the number of bounded connect attempts.
    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts
    }

    /// Returns the capacity of completion channels allocated on behalf of callers.
    pub fn done_capacity(&self) -> usize {
        self.done_capacity
    }

    /// Checks if the given call error should trigger reconnection.
    pub fn should_reconnect(&self, error: &CallError) -> bool {
        match &self.reconnect_predicate {
            Some(predicate) => predicate(error),
            None => error.is_connection_lost(),
        }
    }

    pub(crate) fn emit(&self, event: &ReconnectEvent) {
        self.event_listeners.emit(event);
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfigBuilder::new().build()
    }
}

/// Builder for constructing a `ReconnectConfig`.
pub struct ReconnectConfigBuilder {
    name: Option<String>,
    retry_interval: Duration,
    connect_attempts: u32,
    done_capacity: usize,
    reconnect_predicate: Option<ReconnectPredicate>,
    event_listeners: EventListeners<ReconnectEvent>,
}

impl std::fmt::Debug for ReconnectConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectConfigBuilder")
            .field("name", &self.name)
            .field("retry_interval", &self.retry_interval)
            .field("connect_attempts", &self.connect_attempts)
            .field("done_capacity", &self.done_capacity)
            .field("reconnect_predicate", &self.reconnect_predicate.is_some())
            .field("event_listeners", &self.event_listeners.len())
            .finish()
    }
}

impl ReconnectConfigBuilder {
    /// Creates a new builder with default settings.
    ///
    /// Defaults:
    /// - retry_interval: 100ms
    /// - connect_attempts: 3
    /// - done_capacity: 10
    /// - name: the wrapped endpoint's method name
    pub fn new() -> Self {
        Self {
            name: None,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            done_capacity: DEFAULT_DONE_CAPACITY,
            reconnect_predicate: None,
            event_listeners: EventListeners::new(),
        }
    }

    /// Sets the name for this instance (used in events, logs and metrics).
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the fixed delay between failed connect attempts.
    ///
    /// The same delay is used by the bounded attempts and by background recovery.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use rpc_resilience_reconnect::ReconnectConfig;
    ///
    /// let config = ReconnectConfig::builder()
    ///     .retry_interval(Duration::from_millis(250))
    ///     .build();
    /// assert_eq!(config.retry_interval(), Duration::from_millis(250));
    /// ```
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Sets how many connect attempts are made before background recovery takes over.
    ///
    /// Values below 1 are raised to 1.
    pub fn connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = attempts.max(1);
        self
    }

    /// Sets the capacity of completion channels allocated when `go_call` is
    /// given no channel.
    pub fn done_capacity(mut self, capacity: usize) -> Self {
        self.done_capacity = capacity.max(1);
        self
    }

    /// Sets a predicate to determine which call errors trigger reconnection.
    ///
    /// # Examples
    ///
    /// ```
    /// use rpc_resilience_core::CallError;
    /// use rpc_resilience_reconnect::ReconnectConfig;
    ///
    /// // Also treat raw I/O failures as a lost connection
    /// let config = ReconnectConfig::builder()
    ///     .reconnect_predicate(|error| {
    ///         error.is_connection_lost() || matches!(error, CallError::Io(_))
    ///     })
    ///     .build();
    ///
    /// assert!(config.should_reconnect(&CallError::Eof));
    /// assert!(!config.should_reconnect(&CallError::Server("bad args".into())));
    /// ```
    pub fn reconnect_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CallError) -> bool + Send + Sync + 'static,
    {
        self.reconnect_predicate = Some(Arc::new(predicate));
        self
    }

    /// Restores the default predicate: only connection-lost errors trigger reconnection.
    pub fn connection_lost_only(mut self) -> Self {
        self.reconnect_predicate = None;
        self
    }

    /// Registers a listener for every reconnect event.
    pub fn add_listener<L>(mut self, listener: L) -> Self
    where
        L: EventListener<ReconnectEvent> + 'static,
    {
        self.event_listeners.add(listener);
        self
    }

    /// Registers a callback invoked whenever a connect attempt fails.
    ///
    /// # Callback Signature
    /// `Fn(u32, &ConnectError)` - the attempt number within the current
    /// reconnect and the failure.
    ///
    /// # Example
    ///
    /// ```rust
    /// use rpc_resilience_reconnect::ReconnectConfig;
    ///
    /// let config = ReconnectConfig::builder()
    ///     .on_connect_attempt(|attempt, error| {
    ///         println!("connect attempt {} failed: {}", attempt, error);
    ///     })
    ///     .build();
    /// ```
    pub fn on_connect_attempt<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, &ConnectError) + Send + Sync + 'static,
    {
        self.event_listeners.add(move |event: &ReconnectEvent| {
            if let ReconnectEvent::ConnectAttemptFailed { attempt, error, .. } = event {
                f(*attempt, error);
            }
        });
        self
    }

    /// Registers a callback invoked when the bounded attempts connect.
    ///
    /// The callback receives the number of failed attempts that preceded the success.
    pub fn on_connected<F>(mut self, f: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.event_listeners.add(move |event: &ReconnectEvent| {
            if let ReconnectEvent::Connected {
                failed_attempts, ..
            } = event
            {
                f(*failed_attempts);
            }
        });
        self
    }

    /// Registers a callback invoked when the bounded attempts are used up.
    pub fn on_exhausted<F>(mut self, f: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.event_listeners.add(move |event: &ReconnectEvent| {
            if let ReconnectEvent::Exhausted { attempts, .. } = event {
                f(*attempts);
            }
        });
        self
    }

    /// Registers a callback invoked when background recovery connects.
    pub fn on_recovered<F>(mut self, f: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.event_listeners.add(move |event: &ReconnectEvent| {
            if let ReconnectEvent::Recovered {
                failed_attempts, ..
            } = event
            {
                f(*failed_attempts);
            }
        });
        self
    }

    /// Registers a callback invoked when a call reports a lost connection.
    pub fn on_connection_lost<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.event_listeners.add(move |event: &ReconnectEvent| {
            if let ReconnectEvent::ConnectionLost { error, .. } = event {
                f(error);
            }
        });
        self
    }

    /// Registers a callback invoked when a call fails fast for lack of a connection.
    pub fn on_call_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn(CallKind) + Send + Sync + 'static,
    {
        self.event_listeners.add(move |event: &ReconnectEvent| {
            if let ReconnectEvent::CallRejected { kind, .. } = event {
                f(*kind);
            }
        });
        self
    }

    /// Builds the `ReconnectConfig`.
    pub fn build(self) -> ReconnectConfig {
        ReconnectConfig {
            name: self.name,
            retry_interval: self.retry_interval,
            connect_attempts: self.connect_attempts,
            done_capacity: self.done_capacity,
            reconnect_predicate: self.reconnect_predicate,
            event_listeners: self.event_listeners,
        }
    }
}

impl Default for ReconnectConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
