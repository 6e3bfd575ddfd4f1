use futures::future::BoxFuture;
use rpc_resilience_core::{ConnectError, Endpoint};

/// An [`Endpoint`] that can replace its underlying connection.
///
/// This is the one part of the system that talks to the network. The
/// reconnecting wrapper decides *when* to connect; implementations decide
/// *how* (dial, optional transport-security handshake, client setup).
///
/// The wrapper serializes access: [`set_underlying_client`] is only ever
/// called while no call is using the endpoint.
///
/// [`set_underlying_client`]: ReconnectableEndpoint::set_underlying_client
pub trait ReconnectableEndpoint: Endpoint + 'static {
    /// A live, call-capable connection.
    type Client: Send + 'static;

    /// Installs a freshly established connection.
    ///
    /// Implementations must close any previously installed client before
    /// adopting the new one.
    fn set_underlying_client(&mut self, client: Self::Client);

    /// Performs one connection attempt from scratch.
    ///
    /// Called repeatedly by the reconnect protocol; every invocation must be
    /// independent of the previous ones.
    fn new_underlying_client(&self) -> BoxFuture<'_, Result<Self::Client, ConnectError>>;
}
