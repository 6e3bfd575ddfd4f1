//! Scriptable in-process endpoint shared by the integration test binaries.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use rpc_resilience_core::{
    Call, CallError, ConnectError, DEFAULT_DONE_CAPACITY, DoneSender, Endpoint, PendingCall,
};
use rpc_resilience_reconnect::ReconnectableEndpoint;
use tokio::time::Instant;

pub const METHOD: &str = "Kv.Get";

/// Reply of the mock endpoint: which client served the call, and the argument echoed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub client: u64,
    pub value: u64,
}

/// A call failure to inject, since `CallError` itself is not `Clone`.
#[derive(Debug, Clone)]
pub enum Fault {
    Shutdown,
    Eof,
    UnexpectedEof,
    Server(String),
}

impl Fault {
    fn into_error(self) -> CallError {
        match self {
            Fault::Shutdown => CallError::Shutdown,
            Fault::Eof => CallError::Eof,
            Fault::UnexpectedEof => CallError::UnexpectedEof,
            Fault::Server(message) => CallError::Server(message),
        }
    }
}

/// Knobs and counters shared between a test and its mock endpoint.
#[derive(Debug, Default)]
pub struct Control {
    connects: Mutex<VecDeque<bool>>,
    connect_by_default: AtomicBool,
    connect_delay: Mutex<Duration>,
    call_delay: Mutex<Duration>,
    faults: Mutex<VecDeque<Fault>>,
    dial_times: Mutex<Vec<Instant>>,
    issued: Mutex<Vec<u64>>,
    next_client: AtomicU64,
    severed_through: AtomicU64,
    installs: AtomicU32,
    calls: AtomicU32,
}

impl Control {
    /// Every connect attempt succeeds unless scripted otherwise.
    pub fn new() -> Arc<Self> {
        let control = Self::default();
        control.connect_by_default.store(true, Ordering::SeqCst);
        Arc::new(control)
    }

    /// Connect attempts follow `script` (`true` = success), then fail forever.
    pub fn scripted(script: &[bool]) -> Arc<Self> {
        let control = Self::default();
        control.script(script);
        Arc::new(control)
    }

    /// Appends outcomes for the next connect attempts.
    pub fn script(&self, script: &[bool]) {
        self.connects.lock().unwrap().extend(script.iter().copied());
    }

    /// Outcome of connect attempts once the script is used up.
    pub fn connect_by_default(&self, ok: bool) {
        self.connect_by_default.store(ok, Ordering::SeqCst);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = delay;
    }

    pub fn set_call_delay(&self, delay: Duration) {
        *self.call_delay.lock().unwrap() = delay;
    }

    /// Makes the next calls fail with the given faults, in order.
    pub fn inject(&self, faults: &[Fault]) {
        self.faults.lock().unwrap().extend(faults.iter().cloned());
    }

    /// Kills every client handed out so far: their calls fail with end of stream.
    pub fn sever(&self) {
        self.severed_through
            .store(self.next_client.load(Ordering::SeqCst), Ordering::SeqCst);
    }

    pub fn dials(&self) -> u32 {
        self.dial_times.lock().unwrap().len() as u32
    }

    pub fn dial_times(&self) -> Vec<Instant> {
        self.dial_times.lock().unwrap().clone()
    }

    /// Arguments of asynchronous calls, in the order the client received them.
    pub fn issued(&self) -> Vec<u64> {
        self.issued.lock().unwrap().clone()
    }

    pub fn installs(&self) -> u32 {
        self.installs.load(Ordering::SeqCst)
    }

    /// Calls that reached the underlying endpoint.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_connect(&self) -> bool {
        self.connects
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.connect_by_default.load(Ordering::SeqCst))
    }

    async fn respond(&self, client: Option<u64>, args: u64) -> Result<Reply, CallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.call_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let Some(client) = client else {
            return Err(CallError::Shutdown);
        };
        let fault = self.faults.lock().unwrap().pop_front();
        if let Some(fault) = fault {
            return Err(fault.into_error());
        }
        if client <= self.severed_through.load(Ordering::SeqCst) {
            return Err(CallError::Eof);
        }
        Ok(Reply {
            client,
            value: args,
        })
    }
}

/// A connection handed out by [`MockEndpoint::new_underlying_client`].
#[derive(Debug)]
pub struct MockClient {
    pub id: u64,
}

/// Endpoint whose connects and calls are driven by a [`Control`].
pub struct MockEndpoint {
    control: Arc<Control>,
    client: Option<u64>,
}

impl MockEndpoint {
    pub fn new(control: &Arc<Control>) -> Self {
        Self {
            control: Arc::clone(control),
            client: None,
        }
    }
}

impl Endpoint for MockEndpoint {
    type Request = u64;
    type Response = Reply;

    fn method_name(&self) -> &str {
        METHOD
    }

    fn call(&self, args: u64) -> BoxFuture<'_, Result<Reply, CallError>> {
        Box::pin(self.control.respond(self.client, args))
    }

    fn go_call(&self, args: u64, done: Option<DoneSender<u64, Reply>>) -> PendingCall<u64, Reply> {
        let (done, receiver) = PendingCall::channel(done, DEFAULT_DONE_CAPACITY);
        self.control.issued.lock().unwrap().push(args);
        let control = Arc::clone(&self.control);
        let client = self.client;
        tokio::spawn(async move {
            let result = control.respond(client, args).await;
            let _ = done.send(Call::new(METHOD.into(), args, result)).await;
        });
        match receiver {
            Some(receiver) => PendingCall::with_receiver(METHOD.into(), args, receiver),
            None => PendingCall::new(METHOD.into(), args),
        }
    }
}

impl ReconnectableEndpoint for MockEndpoint {
    type Client = MockClient;

    fn set_underlying_client(&mut self, client: MockClient) {
        self.control.installs.fetch_add(1, Ordering::SeqCst);
        self.client = Some(client.id);
    }

    fn new_underlying_client(&self) -> BoxFuture<'_, Result<MockClient, ConnectError>> {
        Box::pin(async move {
            self.control.dial_times.lock().unwrap().push(Instant::now());

            let delay = *self.control.connect_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            if self.control.next_connect() {
                let id = self.control.next_client.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(MockClient { id })
            } else {
                Err(ConnectError::Dial {
                    address: "127.0.0.1:7070".to_string(),
                    source: io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
                })
            }
        })
    }
}
