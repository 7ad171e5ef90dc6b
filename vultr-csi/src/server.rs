//! gRPC front end serving the CSI services on one endpoint.
//!
//! [`NonBlockingServer::start`] binds the listener before returning, so a bad
//! or busy endpoint is reported to the caller instead of failing inside a
//! background task. Serving then runs on its own task until the shared
//! shutdown token is cancelled.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::net::{TcpListener, UnixListener};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{TcpListenerStream, UnixListenerStream};
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{error, info, warn};

use crate::controller::ControllerService;
use crate::csi::controller_server::ControllerServer;
use crate::csi::identity_server::IdentityServer;
use crate::csi::node_server::NodeServer;
use crate::identity::IdentityService;
use crate::node::NodeService;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("unsupported endpoint '{0}': expected unix:///path or tcp://host:port")]
    InvalidEndpoint(String),

    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("gRPC server failed: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("gRPC server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A listening endpoint parsed from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp(String),
}

impl Endpoint {
    pub fn parse(endpoint: &str) -> Result<Self, ServerError> {
        if let Some(path) = endpoint.strip_prefix("unix://") {
            // unix:///csi/csi.sock and unix:/csi/csi.sock both name /csi/csi.sock
            if path.is_empty() {
                return Err(ServerError::InvalidEndpoint(endpoint.to_string()));
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }
        if let Some(path) = endpoint.strip_prefix("unix:") {
            if !path.starts_with('/') {
                return Err(ServerError::InvalidEndpoint(endpoint.to_string()));
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }
        if let Some(addr) = endpoint.strip_prefix("tcp://")
            && !addr.is_empty()
        {
            return Ok(Endpoint::Tcp(addr.to_string()));
        }
        Err(ServerError::InvalidEndpoint(endpoint.to_string()))
    }
}

/// Remove a socket file left behind by a previous run.
fn remove_stale_socket(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            info!(path = %path.display(), "Removed stale socket");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// A running gRPC server.
pub struct NonBlockingServer {
    local_endpoint: String,
    local_addr: Option<SocketAddr>,
    socket_path: Option<PathBuf>,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<(), tonic::transport::Error>>,
}

impl NonBlockingServer {
    /// Bind `endpoint` and start serving the given services.
    ///
    /// The identity service is always registered; controller and node
    /// services only when provided. Cancelling `shutdown` stops accepting
    /// connections and drains in-flight calls.
    pub async fn start(
        endpoint: &str,
        identity: IdentityService,
        controller: Option<ControllerService>,
        node: Option<NodeService>,
        shutdown: CancellationToken,
    ) -> Result<Self, ServerError> {
        let parsed = Endpoint::parse(endpoint)?;
        let bind_error = |source: std::io::Error| ServerError::Bind {
            endpoint: endpoint.to_string(),
            source,
        };

        let router = Server::builder()
            .add_service(IdentityServer::new(identity))
            .add_optional_service(controller.map(ControllerServer::new))
            .add_optional_service(node.map(NodeServer::new));

        let signal = {
            let token = shutdown.clone();
            async move {
                token.cancelled().await;
                info!("Shutdown requested, draining connections...");
            }
        };

        let (local_endpoint, local_addr, socket_path, handle) = match parsed {
            Endpoint::Unix(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(bind_error)?;
                }
                remove_stale_socket(&path).map_err(bind_error)?;
                let listener = UnixListener::bind(&path).map_err(bind_error)?;
                let incoming = UnixListenerStream::new(listener);
                let handle = tokio::spawn(router.serve_with_incoming_shutdown(incoming, signal));
                (
                    format!("unix://{}", path.display()),
                    None,
                    Some(path),
                    handle,
                )
            }
            Endpoint::Tcp(addr) => {
                let listener = TcpListener::bind(&addr).await.map_err(bind_error)?;
                let local = listener.local_addr().map_err(bind_error)?;
                let incoming = TcpListenerStream::new(listener);
                let handle = tokio::spawn(router.serve_with_incoming_shutdown(incoming, signal));
                (format!("tcp://{}", local), Some(local), None, handle)
            }
        };

        info!(endpoint = %local_endpoint, "CSI server listening");

        Ok(Self {
            local_endpoint,
            local_addr,
            socket_path,
            shutdown,
            handle,
        })
    }

    /// The endpoint actually bound, with the resolved port for `tcp://…:0`.
    pub fn local_endpoint(&self) -> &str {
        &self.local_endpoint
    }

    /// Bound TCP address, if serving over TCP.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Request a graceful stop.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Block until the server has stopped.
    pub async fn wait(self) -> Result<(), ServerError> {
        let result = self.handle.await;

        if let Some(path) = &self.socket_path
            && let Err(e) = remove_stale_socket(path)
        {
            warn!(error = %e, path = %path.display(), "Could not remove socket");
        }

        match result {
            Ok(Ok(())) => {
                info!(endpoint = %self.local_endpoint, "CSI server stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(error = %e, "CSI server failed");
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Wait for shutdown signal (SIGTERM, SIGINT, or SIGHUP)
pub async fn shutdown_signal() {
    use signal::unix::{Signal, SignalKind};

    fn install(kind: SignalKind, name: &str) -> Option<Signal> {
        match signal::unix::signal(kind) {
            Ok(s) => Some(s),
            Err(e) => {
                error!("Failed to install {} handler: {}", name, e);
                None
            }
        }
    }

    // A handler that failed to install never fires.
    async fn recv(signal: Option<Signal>) {
        match signal {
            Some(mut s) => {
                s.recv().await;
            }
            None => std::future::pending().await,
        }
    }

    let sigterm = install(SignalKind::terminate(), "SIGTERM");
    let sigint = install(SignalKind::interrupt(), "SIGINT");
    let sighup = install(SignalKind::hangup(), "SIGHUP");

    tokio::select! {
        _ = recv(sigterm) => info!("Received SIGTERM"),
        _ = recv(sigint) => info!("Received SIGINT"),
        _ = recv(sighup) => info!("Received SIGHUP, shutting down"),
    }
}
