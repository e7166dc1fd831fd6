//! Chat server listener
//!
//! Handles the TCP accept loop and spawns one supervisor task per connection.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::registry::SessionRegistry;
use crate::server::config::ServerConfig;
use crate::server::connection;
use crate::server::hub::Hub;
use crate::session::ConnectionId;
use crate::store::{SqliteStore, Store};

/// Chat server
pub struct ChatServer {
    config: ServerConfig,
    hub: Arc<Hub>,
    next_connection_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl ChatServer {
    /// Open the configured database and build a server on top of it
    pub async fn open(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let store = SqliteStore::connect(&config.database_url).await?;
        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// Create a server over an existing store
    pub fn with_store(config: ServerConfig, store: Arc<dyn Store>) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            hub: Arc::new(Hub::new(store, config.clone())),
            config,
            next_connection_id: AtomicU64::new(1),
            connection_semaphore,
        }
    }

    /// Shared state handed to every connection
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Get a reference to the session registry
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.hub.registry()
    }

    /// Run the server
    ///
    /// Accepts connections until the process exits.
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
        self.config.validate()?;
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, "Chat server listening");

        tokio::select! {
            _ = shutdown => {
                tracing::info!(online = self.registry().len(), "Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        }
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
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

        if let Err(e) = self.configure_socket(&socket) {
            tracing::error!(peer = %peer_addr, error = %e, "Failed to configure socket");
            return;
        }

        let id = self.next_id();
        tracing::debug!(connection = %id, peer = %peer_addr, "New connection");

        let hub = Arc::clone(&self.hub);
        tokio::spawn(async move {
            // Held for the lifetime of the connection
            let _permit = permit;
            connection::serve(hub, id, socket, Some(peer_addr)).await;
        });
    }

    /// Run a supervisor over any byte stream
    ///
    /// Used for transports that do not come from the TCP listener.
    pub fn spawn_session<S>(&self, stream: S, peer: Option<SocketAddr>) -> JoinHandle<()>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + 'static,
    {
        let id = self.next_id();
        tokio::spawn(connection::serve(Arc::clone(&self.hub), id, stream, peer))
    }

    fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed))
    }

    fn configure_socket(&self, socket: &TcpStream) -> std::io::Result<()> {
        if self.config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }
        Ok(())
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}
