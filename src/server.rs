//! TCP acceptor.
//!
//! Binds the listening socket, accepts connections and hands each one to
//! its own handler task. The acceptor never waits on a handler; handlers
//! are only tracked through the [`ConnectionRegistry`] so that [`Server::stop`]
//! can drain them.

use crate::config::Config;
use crate::connection;
use crate::error::{ServerError, ServerResult};
use crate::executor::Executor;
use crate::registry::ConnectionRegistry;
use crate::shutdown::ShutdownTrigger;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

/// Lifecycle of a [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Listening(SocketAddr),
    Stopped,
    BindFailed,
}

/// Server instance
pub struct Server {
    host: String,
    port: u16,
    backlog: i32,
    drain_timeout: Duration,
    /// Command engine; `None` runs the server in echo mode.
    executor: Option<Arc<dyn Executor>>,
    running: AtomicBool,
    state: watch::Sender<ServerState>,
    shutdown: ShutdownTrigger,
    registry: Arc<ConnectionRegistry>,
    connection_limit: Option<Arc<Semaphore>>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: &Config) -> Self {
        let (state, _) = watch::channel(ServerState::Idle);
        let connection_limit = match config.max_connections {
            0 => None,
            max => Some(Arc::new(Semaphore::new(max))),
        };

        Server {
            host: config.host.clone(),
            port: config.port,
            backlog: config.backlog,
            drain_timeout: config.drain_timeout,
            executor: None,
            running: AtomicBool::new(false),
            state,
            shutdown: ShutdownTrigger::new(),
            registry: ConnectionRegistry::new(),
            connection_limit,
        }
    }

    /// Install a command engine that answers in place of the echo ack.
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Bind, listen and accept connections until [`Server::stop`] is called.
    ///
    /// A bind failure is logged, the socket is closed and the state moves to
    /// [`ServerState::BindFailed`]; the accept loop never runs and `start`
    /// still returns `Ok`. A server is single-use: starting it again after
    /// [`Server::stop`] fails with [`ServerError::AlreadyStopped`].
    pub async fn start(&self) -> ServerResult<()> {
        self.mark_started()?;

        let listener = match self.bind().await {
            Ok(listener) => listener,
            Err(e) => {
                error!(error = %e, "Bind error");
                self.running.store(false, Ordering::Release);
                self.state.send_replace(ServerState::BindFailed);
                return Ok(());
            }
        };

        self.serve(listener).await
    }

    /// Ask a running server to stop accepting and close its connections.
    ///
    /// `start` returns once open connections have drained or the drain
    /// timeout has elapsed.
    pub fn stop(&self) {
        if self.shutdown.is_triggered() {
            return;
        }
        info!("Stopping server");
        self.running.store(false, Ordering::Release);
        self.shutdown.trigger();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Address actually bound, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self.state() {
            ServerState::Listening(addr) => Some(addr),
            _ => None,
        }
    }

    pub fn active_connections(&self) -> usize {
        self.registry.len()
    }

    async fn bind(&self) -> ServerResult<TcpListener> {
        let addr = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .and_then(|mut addrs| {
                addrs.next().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, "no addresses resolved")
                })
            })
            .map_err(|source| ServerError::Resolve {
                host: self.host.clone(),
                port: self.port,
                source,
            })?;

        create_listener(addr, self.backlog).map_err(|source| ServerError::Bind {
            host: self.host.clone(),
            port: self.port,
            source,
        })
    }

    fn mark_started(&self) -> ServerResult<()> {
        if self.shutdown.is_triggered() {
            return Err(ServerError::AlreadyStopped);
        }
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(ServerError::AlreadyStarted);
        }
        Ok(())
    }

    /// Accept on a bound listener until stopped, then drain.
    async fn serve<A: Accept>(&self, listener: A) -> ServerResult<()> {
        let addr = listener.local_addr()?;
        info!(addr = %addr, "DB listening on {}:{}", self.host, self.port);
        self.state.send_replace(ServerState::Listening(addr));

        self.accept_loop(&listener).await;
        drop(listener);

        self.drain().await;
        self.state.send_replace(ServerState::Stopped);
        info!("Server stopped");
        Ok(())
    }

    async fn accept_loop<A: Accept>(&self, listener: &A) {
        let mut shutdown = self.shutdown.subscribe();

        while self.is_running() {
            // Wait for a connection slot
            let permit = match &self.connection_limit {
                Some(limit) => tokio::select! {
                    permit = Arc::clone(limit).acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => break,
                    },
                    _ = shutdown.recv() => break,
                },
                None => None,
            };

            let accepted = tokio::select! {
                res = listener.accept() => res,
                _ = shutdown.recv() => break,
            };

            match accepted {
                Ok((stream, peer)) => self.spawn_handler(stream, peer, permit),
                Err(e) => {
                    error!(error = %e, "Accept error");
                }
            }
        }

        debug!("Accept loop exited");
    }

    fn spawn_handler<S>(&self, stream: S, peer: SocketAddr, permit: Option<OwnedSemaphorePermit>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let guard = self.registry.register(peer);
        let conn_id = guard.id();
        let executor = self.executor.clone();
        let shutdown = self.shutdown.subscribe();

        info!(
            conn_id,
            peer = %peer,
            active = self.registry.len(),
            "New connection established"
        );

        tokio::spawn(async move {
            let _guard = guard;
            let _permit = permit;

            match connection::handle_connection(stream, executor, shutdown).await {
                Ok(reason) => info!(conn_id, ?reason, "Connection closed"),
                Err(e) => warn!(conn_id, error = %e, "Connection terminated"),
            }
        });
    }

    async fn drain(&self) {
        if self.registry.is_empty() {
            return;
        }

        debug!(active = self.registry.len(), "Draining connections");
        if tokio::time::timeout(self.drain_timeout, self.registry.wait_drained())
            .await
            .is_err()
        {
            for (conn_id, info) in self.registry.connections() {
                warn!(
                    conn_id,
                    peer = %info.peer,
                    open_for_ms = info.accepted_at.elapsed().as_millis() as u64,
                    "Connection still open after drain timeout"
                );
            }
        }
    }
}

/// Source of connections for the accept loop.
pub trait Accept: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn accept(&self) -> impl Future<Output = io::Result<(Self::Stream, SocketAddr)>> + Send;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Accept for TcpListener {
    type Stream = TcpStream;

    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Create a TCP listener with SO_REUSEADDR so a restart can rebind at once.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    TcpListener::from_std(socket.into())
}
