//! Lifecycle handling for the HTTP server that fronts the router.

use crate::configuration::Configuration;
use crate::gateway::GatewayError;
use futures::channel::oneshot;
use futures::prelude::*;
use graph_gateway_core::prelude::graphql::*;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Factory for creating the http server that fronts the graph.
///
/// This trait enables us to test that the state machine starts and stops
/// servers correctly.
pub(crate) trait HttpServerFactory {
    type Future: Future<Output = Result<HttpServerHandle, GatewayError>> + Send;

    fn create<RS>(
        &self,
        service: RS,
        configuration: Arc<Configuration>,
        listener: Option<TcpListener>,
    ) -> Self::Future
    where
        RS: tower::Service<Request, Response = Response, Error = ()>
            + Clone
            + Send
            + Sync
            + 'static,
        <RS as tower::Service<Request>>::Future: Send;
}

/// A handle with with a client can shut down the server gracefully.
/// This will wait for all active requests to terminate, or return after a
/// timeout.
#[derive(derivative::Derivative)]
#[derivative(Debug)]
pub(crate) struct HttpServerHandle {
    /// Sender to use to notify of shutdown
    shutdown_sender: oneshot::Sender<()>,

    /// Future to wait on for graceful shutdown. Resolves to the listening
    /// socket so a follow-up server can reuse it.
    #[derivative(Debug = "ignore")]
    server_future: Pin<Box<dyn Future<Output = Result<TcpListener, GatewayError>> + Send>>,

    /// The listen address that the server is actually listening on.
    /// If the socket address specified port zero the OS will assign a random
    /// free port.
    listen_address: SocketAddr,
}

impl HttpServerHandle {
    pub(crate) fn new(
        shutdown_sender: oneshot::Sender<()>,
        server_future: Pin<Box<dyn Future<Output = Result<TcpListener, GatewayError>> + Send>>,
        listen_address: SocketAddr,
    ) -> Self {
        Self {
            shutdown_sender,
            server_future,
            listen_address,
        }
    }

    pub(crate) fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }

    pub(crate) async fn shutdown(self) -> Result<(), GatewayError> {
        if let Err(_err) = self.shutdown_sender.send(()) {
            tracing::error!("Failed to notify http thread of shutdown");
        };
        // the listening socket is dropped here, freeing the port
        self.server_future.await.map(|_listener| ())
    }

    /// Stop the server and start a replacement running `router`, handing the
    /// listening socket over so in-flight connections are the only casualty.
    pub(crate) async fn restart<RS, SF>(
        self,
        factory: &SF,
        router: RS,
        configuration: Arc<Configuration>,
    ) -> Result<Self, GatewayError>
    where
        SF: HttpServerFactory,
        RS: tower::Service<Request, Response = Response, Error = ()>
            + Clone
            + Send
            + Sync
            + 'static,
        <RS as tower::Service<Request>>::Future: Send,
    {
        if let Err(_err) = self.shutdown_sender.send(()) {
            tracing::error!("Failed to notify http thread of shutdown");
        };
        let listener = self.server_future.await?;
        tracing::info!("previous server is closed");

        let handle = factory
            .create(router, configuration, Some(listener))
            .await?;
        tracing::debug!("restarted on {}", handle.listen_address());

        Ok(handle)
    }
}
