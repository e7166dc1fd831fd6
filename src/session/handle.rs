//! Opaque connection handles
//!
//! The supervisor owns the transport. Everything else (registry, broadcast
//! engine, dispatcher) only sees a [`ConnectionHandle`]: an id, a shared
//! writer and a close flag.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};

/// Unique id of one accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Shared, cloneable reference to a live connection's write side
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    writer: Arc<Mutex<BoxedWriter>>,
    closed: Arc<watch::Sender<bool>>,
}

impl ConnectionHandle {
    /// Wrap the write half of a transport
    pub fn new<W>(id: ConnectionId, writer: W) -> Self
    where
        W: AsyncWrite + Send + 'static,
    {
        let (closed, _) = watch::channel(false);
        Self {
            id,
            writer: Arc::new(Mutex::new(Box::pin(writer))),
            closed: Arc::new(closed),
        }
    }

    /// Connection id
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Write one line (a trailing newline is appended) and flush
    ///
    /// Fails with `BrokenPipe` once the handle is closed, including when the
    /// close happens while this call waits for the writer or for a peer that
    /// stopped reading.
    pub async fn send_line(&self, line: &str) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::ErrorKind::BrokenPipe.into());
        }

        let write = async {
            let mut writer = self.writer.lock().await;
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        };

        tokio::select! {
            result = write => result,
            _ = self.closed() => Err(io::ErrorKind::BrokenPipe.into()),
        }
    }

    /// Mark the connection closed
    ///
    /// Wakes the owning supervisor's pending read; the supervisor then runs
    /// its cleanup and shuts the transport down.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the connection is closed
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // The sender lives inside `self`, so `wait_for` cannot observe a
        // dropped channel here.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Shut down the write side of the transport
    pub async fn shutdown(&self) {
        self.close();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
