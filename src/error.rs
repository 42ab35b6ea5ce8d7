//! Error types for the acceptor and the connection handlers.

use std::str::Utf8Error;

pub type ServerResult<T> = Result<T, ServerError>;

/// Server failures.
///
/// `Resolve` and `Bind` are logged by `Server::start` and recorded as
/// `ServerState::BindFailed`; they do not end the process.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("cannot resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot bind {host}:{port}: {source}")]
    Bind {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("server already started")]
    AlreadyStarted,

    /// A server is single-use: once stopped it cannot be started again.
    #[error("server already stopped")]
    AlreadyStopped,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures that end a single connection abnormally.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("message is not valid UTF-8: {0}")]
    Decode(#[from] Utf8Error),
}
