//! Per-connection handler.
//!
//! Each accepted connection gets its own task running [`handle_connection`].
//! The loop is strictly sequential: a chunk is read, answered, and only then
//! is the next chunk read.

use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::error::ConnectionError;
use crate::executor::{self, Executor};
use crate::protocol::{self, MAX_MESSAGE_SIZE};
use crate::shutdown::Shutdown;

/// How a connection loop ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed its write side (zero-length read).
    Eof,
    /// Peer reset the connection.
    Reset,
    /// Server is stopping.
    Shutdown,
}

/// Serve one connection until the peer leaves, the server stops, or an
/// unrecoverable error occurs.
///
/// The stream is consumed and closed on return, whichever path is taken.
pub async fn handle_connection<S>(
    mut stream: S,
    executor: Option<Arc<dyn Executor>>,
    mut shutdown: Shutdown,
) -> Result<CloseReason, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; MAX_MESSAGE_SIZE];

    loop {
        let n = tokio::select! {
            res = stream.read(&mut buf) => match res {
                Ok(n) => n,
                Err(e) if is_reset(&e) => {
                    trace!("Connection reset during read");
                    return Ok(CloseReason::Reset);
                }
                Err(e) => return Err(e.into()),
            },
            _ = shutdown.recv() => {
                debug!("Closing connection for shutdown");
                return Ok(CloseReason::Shutdown);
            }
        };

        if n == 0 {
            trace!("Connection closed by client");
            return Ok(CloseReason::Eof);
        }

        let request = protocol::decode(&buf[..n])?;
        debug!(request, "Received");

        let response = executor::respond(executor.as_ref(), request);
        match stream.write_all(&response).await {
            Ok(()) => {}
            Err(e) if is_reset(&e) => {
                trace!("Connection reset during write");
                return Ok(CloseReason::Reset);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn is_reset(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::ConnectionReset
}
