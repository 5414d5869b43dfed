//! RTMP server listener
//!
//! Handles TCP accept loop and spawns connection handlers.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::error::Result;
use crate::registry::{RegistryConfig, SourceRegistry};
use crate::server::config::ServerConfig;
use crate::server::connection::Connection;
use crate::server::connections::ConnectionSet;
use crate::server::hooks::{HookDispatcher, NoopHooks};

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// RTMP server
pub struct RtmpServer {
    config: Arc<ServerConfig>,
    hooks: Arc<dyn HookDispatcher>,
    registry: Arc<SourceRegistry>,
    connections: Arc<ConnectionSet>,
    next_session_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl RtmpServer {
    /// Create a new server that accepts every hook
    pub fn new(config: ServerConfig) -> Self {
        Self::with_registry_config(config, RegistryConfig::default())
    }

    /// Create a new server with custom registry configuration
    pub fn with_registry_config(config: ServerConfig, registry_config: RegistryConfig) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config: Arc::new(config),
            hooks: Arc::new(NoopHooks),
            registry: Arc::new(SourceRegistry::with_config(registry_config)),
            connections: Arc::new(ConnectionSet::new()),
            next_session_id: AtomicU64::new(1),
            connection_semaphore,
        }
    }

    /// Deliver lifecycle hooks to `hooks`
    pub fn with_hooks(mut self, hooks: impl HookDispatcher) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get a reference to the source registry
    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    /// Live connections
    pub fn connections(&self) -> &Arc<ConnectionSet> {
        &self.connections
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve_until(listener, shutdown).await
    }

    /// Accept on an already bound listener until `shutdown` resolves
    pub async fn serve_until<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(addr = %listener.local_addr()?, "RTMP server listening");

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        };

        self.shutdown().await;
        result
    }

    /// Stop all connections and retire all sources
    pub async fn shutdown(&self) {
        self.connections.shutdown();
        self.registry.shutdown().await;
        tracing::info!("Server shut down");
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr).await;
                }
                Err(e) => accept_error_backoff(&e).await,
            }
        }
    }

    async fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        // Configure socket
        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::warn!(error = %e, "Failed to set TCP_NODELAY");
            }
        }

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.connections.register(session_id, peer_addr).await;

        tracing::debug!(
            session_id = session_id,
            peer = %peer_addr,
            "New connection"
        );

        let connection = Connection::new(
            session_id,
            socket,
            peer_addr,
            Arc::clone(&self.config),
            Arc::clone(&self.registry),
            Arc::clone(&self.hooks),
            cancel,
        );
        let connections = Arc::clone(&self.connections);

        tokio::spawn(async move {
            // Held for the lifetime of the connection
            let _permit = permit;
            // Outcome is logged by the connection itself
            let _ = connection.run().await;
            connections.unregister(session_id).await;
        });
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}

async fn accept_error_backoff(error: &std::io::Error) {
    tracing::error!(error = %error, "Failed to accept connection");
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}
