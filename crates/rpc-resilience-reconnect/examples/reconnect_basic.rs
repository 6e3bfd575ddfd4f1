//! Basic reconnection example with an in-process "server".
//!
//! Run with: cargo run --example reconnect_basic -p rpc-resilience-reconnect --features tracing
//!
//! The server is down when the endpoint is wrapped, so construction fails and
//! background recovery takes over. Once the server comes up the endpoint
//! reconnects; a later crash is repaired transparently inside a call.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use rpc_resilience_core::{
    Call, CallError, ConnectError, DoneSender, Endpoint, PendingCall, DEFAULT_DONE_CAPACITY,
};
use rpc_resilience_reconnect::{ReconnectConfig, ReconnectableEndpoint, ReconnectingEndpoint};

/// Shared view of the fake server.
#[derive(Default)]
struct Server {
    up: AtomicBool,
    // Connections with an id at or below this were killed by a crash
    crashed_through: AtomicU64,
    next_connection: AtomicU64,
}

impl Server {
    fn crash(&self) {
        self.crashed_through
            .store(self.next_connection.load(Ordering::SeqCst), Ordering::SeqCst);
    }

    fn answer(&self, connection: Option<u64>, args: &str) -> Result<String, CallError> {
        match connection {
            None => Err(CallError::Shutdown),
            Some(id) if id <= self.crashed_through.load(Ordering::SeqCst) => {
                Err(CallError::UnexpectedEof)
            }
            Some(id) => Ok(format!("echo({}) via connection #{}", args, id)),
        }
    }
}

struct EchoEndpoint {
    server: Arc<Server>,
    connection: Option<u64>,
}

impl Endpoint for EchoEndpoint {
    type Request = String;
    type Response = String;

    fn method_name(&self) -> &str {
        "Echo.Say"
    }

    fn call(&self, args: String) -> BoxFuture<'_, Result<String, CallError>> {
        let result = self.server.answer(self.connection, &args);
        Box::pin(async move { result })
    }

    fn go_call(
        &self,
        args: String,
        done: Option<DoneSender<String, String>>,
    ) -> PendingCall<String, String> {
        let (done, receiver) = PendingCall::channel(done, DEFAULT_DONE_CAPACITY);
        let result = self.server.answer(self.connection, &args);
        let _ = done.try_send(Call::new("Echo.Say".into(), args.clone(), result));
        match receiver {
            Some(receiver) => PendingCall::with_receiver("Echo.Say".into(), args, receiver),
            None => PendingCall::new("Echo.Say".into(), args),
        }
    }
}

impl ReconnectableEndpoint for EchoEndpoint {
    type Client = u64;

    fn set_underlying_client(&mut self, client: u64) {
        self.connection = Some(client);
    }

    fn new_underlying_client(&self) -> BoxFuture<'_, Result<u64, ConnectError>> {
        Box::pin(async move {
            if self.server.up.load(Ordering::SeqCst) {
                Ok(self.server.next_connection.fetch_add(1, Ordering::SeqCst) + 1)
            } else {
                Err(ConnectError::Dial {
                    address: "127.0.0.1:9000".to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        "connection refused",
                    ),
                })
            }
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    println!("Reconnecting Endpoint - Basic Example\n");

    let server = Arc::new(Server::default());
    let factory = EchoEndpoint {
        server: Arc::clone(&server),
        connection: None,
    };

    let config = ReconnectConfig::builder()
        .name("echo")
        .retry_interval(Duration::from_millis(200))
        .connect_attempts(3)
        .on_connect_attempt(|attempt, error| {
            println!("  connect attempt {} failed: {}", attempt, error);
        })
        .on_exhausted(|attempts| {
            println!("  gave up after {} attempts, recovering in the background", attempts);
        })
        .on_recovered(|failed| {
            println!("  recovered after {} failed attempts", failed);
        })
        .on_connection_lost(|error| {
            println!("  connection lost: {}", error);
        })
        .build();

    println!("Wrapping while the server is down...");
    let endpoint = match ReconnectingEndpoint::with_config(factory, config).await {
        Ok(endpoint) => endpoint,
        Err(error) => {
            println!("wrap failed: {}", error);
            error.into_endpoint()
        }
    };

    match endpoint.call("hello".to_string()).await {
        Ok(reply) => println!("unexpected reply: {}", reply),
        Err(error) => println!("call rejected fast: {}\n", error),
    }

    println!("Starting the server...");
    server.up.store(true, Ordering::SeqCst);
    endpoint.wait_connected().await?;
    println!("state: {:?}\n", endpoint.connection_state());

    let reply = endpoint.call("hello".to_string()).await?;
    println!("reply: {}\n", reply);

    println!("Crashing every open connection...");
    server.crash();
    let reply = endpoint.call("still there?".to_string()).await?;
    println!("reply: {}", reply);

    let call = endpoint
        .go_call("async".to_string(), None)
        .wait()
        .await
        .ok_or("completion channel closed")?;
    println!("async reply: {}\n", call.into_result()?);

    endpoint.shutdown();
    println!("state after shutdown: {:?}", endpoint.connection_state());

    Ok(())
}
