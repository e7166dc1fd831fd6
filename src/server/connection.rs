//! Per-connection supervisor
//!
//! One task per accepted connection. It owns the read half of the transport,
//! hands the write half to a [`ConnectionHandle`] and feeds every inbound
//! line to the dispatcher:
//!
//! ```text
//!   greeting ──► auth loop (idle timeout) ──► command loop ──► cleanup
//!                    │                            │
//!                    └──── EOF / close / error ───┴──────────► cleanup
//! ```
//!
//! Cleanup always runs and always goes through [`Hub::disconnect`], so a
//! session that was already reaped by a failed broadcast is not announced
//! twice.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

use crate::error::{Error, Result};
use crate::protocol::reply;
use crate::server::dispatcher::{Dispatcher, Flow};
use crate::server::hub::Hub;
use crate::session::{ConnectionHandle, ConnectionId, SessionState};

/// Inbound line framing, bounded by `ServerConfig::max_line_length`
type LineReader<R> = FramedRead<R, LinesCodec>;

/// Result of waiting for the next line
enum Inbound {
    Line(String),
    /// Peer hung up or the handle was closed by someone else
    Closed,
    TimedOut,
}

/// Drive one connection until it ends
///
/// Never fails: transport errors end the session and are logged here.
pub async fn serve<S>(hub: Arc<Hub>, id: ConnectionId, stream: S, peer: Option<SocketAddr>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let handle = ConnectionHandle::new(id, writer);
    let mut lines = FramedRead::new(
        reader,
        LinesCodec::new_with_max_length(hub.config().max_line_length),
    );
    let mut dispatcher = Dispatcher::new(
        Arc::clone(&hub),
        handle.clone(),
        SessionState::new(id, peer),
    );

    tracing::debug!(connection = %id, peer = ?peer, "Connection opened");

    let auth_timeout = hub.config().auth_timeout;
    if let Err(e) = run(&mut dispatcher, &handle, &mut lines, auth_timeout).await {
        if e.is_disconnect() {
            tracing::debug!(connection = %id, error = %e, "Peer went away");
        } else {
            tracing::warn!(connection = %id, error = %e, "Connection error");
        }
    }

    hub.disconnect(id).await;
    handle.shutdown().await;

    tracing::debug!(
        connection = %id,
        user = dispatcher.username().unwrap_or("-"),
        duration = ?dispatcher.session().duration(),
        "Connection closed"
    );
}

async fn run<R>(
    dispatcher: &mut Dispatcher,
    handle: &ConnectionHandle,
    lines: &mut LineReader<R>,
    auth_timeout: Duration,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    dispatcher.reply(&reply::greeting()).await?;

    while !dispatcher.is_authenticated() {
        match next_inbound(lines, handle, Some(auth_timeout)).await? {
            Inbound::Line(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                dispatcher.login(&line).await?;
            }
            Inbound::Closed => return Ok(()),
            Inbound::TimedOut => {
                tracing::info!(connection = %handle.id(), "Login timed out");
                // Dropping the connection either way
                let _ = dispatcher
                    .reply(&reply::error("Login timed out, goodbye"))
                    .await;
                return Ok(());
            }
        }
    }

    loop {
        match next_inbound(lines, handle, None).await? {
            Inbound::Line(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                if dispatcher.dispatch(&line).await? == Flow::Exit {
                    return Ok(());
                }
            }
            Inbound::Closed | Inbound::TimedOut => return Ok(()),
        }
    }
}

/// Wait for the next line, the close flag or the idle limit
async fn next_inbound<R>(
    lines: &mut LineReader<R>,
    handle: &ConnectionHandle,
    limit: Option<Duration>,
) -> Result<Inbound>
where
    R: AsyncRead + Unpin,
{
    let max_length = lines.decoder().max_length();
    let read = async {
        let next = match limit {
            Some(limit) => match tokio::time::timeout(limit, lines.next()).await {
                Ok(next) => next,
                Err(_) => return Ok(Inbound::TimedOut),
            },
            None => lines.next().await,
        };
        match next {
            Some(line) => line.map(Inbound::Line),
            None => Ok(Inbound::Closed),
        }
    };

    tokio::select! {
        inbound = read => inbound.map_err(|e| match e {
            LinesCodecError::MaxLineLengthExceeded => Error::LineTooLong(max_length),
            LinesCodecError::Io(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                Error::InvalidUtf8
            }
            LinesCodecError::Io(e) => Error::Io(e),
        }),
        _ = handle.closed() => Ok(Inbound::Closed),
    }
}
