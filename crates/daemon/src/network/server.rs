//! TCP accept loop for the gateway.
//!
//! Connections are served strictly one at a time: the next connection is not
//! accepted until the current request has been answered and closed. This
//! keeps a single transfer buffer and one open file at most.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::http::serve_connection;
use super::NetworkStatusHandle;
use crate::config::Config;
use crate::files::Storage;
use crate::router::{ApiRouter, GatewaySettings};

/// Base URL clients should use to reach the gateway.
///
/// The port is omitted when it is 80.
pub fn format_server_url(ip: Option<IpAddr>, port: u16) -> String {
    match ip {
        None => "http://unknown".to_string(),
        Some(IpAddr::V6(ip)) if port == 80 => format!("http://[{}]", ip),
        Some(IpAddr::V6(ip)) => format!("http://[{}]:{}", ip, port),
        Some(ip) if port == 80 => format!("http://{}", ip),
        Some(ip) => format!("http://{}:{}", ip, port),
    }
}

/// The HTTP file server.
pub struct FileServer<S: Storage> {
    listener: TcpListener,
    local_addr: SocketAddr,
    router: ApiRouter<S>,
    read_timeout: Duration,
    shutdown: CancellationToken,
}

impl<S: Storage> FileServer<S> {
    /// Bind the listening socket described by `config`.
    pub async fn bind(
        config: &Config,
        storage: S,
        network: NetworkStatusHandle,
    ) -> io::Result<Self> {
        let bind_ip: IpAddr = config.server.bind_address.parse().map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid bind address: {}", config.server.bind_address),
            )
        })?;
        let listener = TcpListener::bind((bind_ip, config.server.port)).await?;
        let local_addr = listener.local_addr()?;

        let router = ApiRouter::new(storage, GatewaySettings::from_config(config), network);
        let server = Self {
            listener,
            local_addr,
            router,
            read_timeout: config.server.read_timeout(),
            shutdown: CancellationToken::new(),
        };
        info!(url = %server.server_url(), "HTTP file server listening");
        Ok(server)
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Bound port.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Whether [`stop`](Self::stop) has not been requested yet.
    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Base URL for clients.
    ///
    /// Prefers the station IP published by the network layer, then the bound
    /// address if it is a concrete one.
    pub fn server_url(&self) -> String {
        let ip = self.router.network().snapshot().ip.or_else(|| {
            let bound = self.local_addr.ip();
            (!bound.is_unspecified()).then_some(bound)
        });
        format_server_url(ip, self.port())
    }

    /// Token that stops [`run`](Self::run) when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Request shutdown. The request in progress, if any, completes first.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// The request router.
    pub fn router(&self) -> &ApiRouter<S> {
        &self.router
    }

    /// Accept and serve connections until stopped.
    pub async fn run(&mut self) -> io::Result<()> {
        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => self.serve(stream, peer).await,
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                }
            }
        }

        info!("HTTP file server stopped");
        Ok(())
    }

    async fn serve(&mut self, stream: TcpStream, peer: SocketAddr) {
        debug!(peer = %peer, "Connection accepted");
        let local_ip = stream.local_addr().ok().map(|addr| addr.ip());

        match serve_connection(stream, &mut self.router, self.read_timeout, local_ip).await {
            Ok(()) => {}
            Err(e) if e.is_parse() || e.is_parse_too_large() => {
                warn!(peer = %peer, error = %e, "Rejected malformed request");
            }
            Err(e) => {
                debug!(peer = %peer, error = %e, "Connection ended early");
            }
        }
    }
}
