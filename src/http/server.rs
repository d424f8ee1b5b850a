//! HTTP server wiring.

use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::middleware::protect;
use crate::error::{Result, WardenError};
use crate::jail::Jail;

/// HTTP server that serves a router behind a jail.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The jail guarding every route
    jail: Arc<Jail>,
    /// Routes to protect
    router: Router,
    /// How often to sweep stale jail state
    sweep_interval: Option<Duration>,
}

impl HttpServer {
    /// Create a new server for `router`.
    pub fn new(addr: SocketAddr, jail: Arc<Jail>, router: Router) -> Self {
        Self {
            addr,
            jail,
            router,
            sweep_interval: None,
        }
    }

    /// Periodically drop expired sentences and idle clients.
    pub fn with_sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_on(listener, signal).await
    }

    /// Serve on an already bound listener.
    pub async fn serve_on<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        let config = self.jail.config();
        info!(
            addr = %local_addr,
            allowed_requests = config.allowed_requests,
            window = ?config.window,
            cooloff = ?config.cooloff,
            proxied = config.proxied,
            silent = config.silent,
            peer_ip_only = config.peer_ip_only,
            deny_status = %config.deny_status,
            "Starting HTTP server"
        );

        let sweeper = self
            .sweep_interval
            .map(|interval| spawn_sweeper(self.jail.clone(), interval));

        let app = protect(self.router, self.jail);
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            WardenError::Io(e)
        });

        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        result
    }
}

/// Run [`Jail::sweep`] every `interval` until aborted.
fn spawn_sweeper(jail: Arc<Jail>, interval: Duration) -> JoinHandle<()> {
    info!(interval = ?interval, "Starting jail sweeper");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            jail.sweep();
        }
    })
}
