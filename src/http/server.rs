//! Listener lifecycle: bind, serve, stop.
//!
//! `Server` is an unstarted listener that only holds its configuration.
//! `Server::start` binds the socket and returns a `RunningServer`, which is
//! meant to be shared (`Arc`) between the task that serves and whoever later
//! stops it: the signal handler in production, the test body in tests.
//!
//! Each accepted connection is driven by its own task on the multi-threaded
//! runtime, so a slow or broken peer never holds up the accept loop. Transport
//! failures on a connection end that connection only.

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::Router;
use axum_server::Handle;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::runtime::Runtime;
use tokio::sync::watch;

use crate::config::{ServerConfig, LISTEN_BACKLOG, STOP_TIMEOUT_MARGIN_SECS};
use crate::error::{BindError, ServeError, ShutdownError};
use crate::routes::create_router;

/// Observable lifecycle of a started server.
///
/// `Stopping` only exists while in-flight requests drain; it is part of the
/// transition from `Running` to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Running,
    Stopping,
    Stopped,
}

/// Ownership of the bound socket.
enum ListenerSlot {
    /// Bound, not yet handed to the accept loop
    Bound(TcpListener),
    /// Owned by a running accept loop
    Serving,
    /// Closed; nothing will accept on it again
    Released,
}

/// Build the multi-threaded runtime sized to the configured worker count.
pub fn build_runtime(config: &ServerConfig) -> io::Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers.max(1))
        .thread_name("upstream-worker")
        .enable_all()
        .build()
}

/// An unstarted listener.
pub struct Server {
    config: ServerConfig,
    router: Router,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            router: create_router(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_router(config: ServerConfig, router: Router) -> Self {
        Self { config, router }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the listening socket.
    ///
    /// Binding happens here rather than in `serve` so that an unusable address
    /// is reported before anything is announced to the operator.
    pub fn start(self) -> Result<RunningServer, BindError> {
        let addr = self.config.socket_addr()?;
        let listener = bind_listener(addr).map_err(|e| BindError::from_io(addr, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| BindError::from_io(addr, e))?;

        tracing::info!(
            %local_addr,
            workers = self.config.workers,
            grace_period = ?self.config.grace_period,
            "Listener bound"
        );

        let (state, _) = watch::channel(ServerState::Running);

        Ok(RunningServer {
            local_addr,
            grace_period: self.config.grace_period,
            router: self.router,
            handle: Handle::new(),
            listener: Mutex::new(ListenerSlot::Bound(listener)),
            state,
            failure: Mutex::new(None),
        })
    }
}

fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    // On Windows SO_REUSEADDR lets a second socket take over a bound port.
    #[cfg(unix)]
    socket.set_reuse_address(true)?;

    socket.set_nodelay(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}

/// A bound listener that can be served and stopped.
pub struct RunningServer {
    local_addr: SocketAddr,
    grace_period: Duration,
    router: Router,
    handle: Handle,
    listener: Mutex<ListenerSlot>,
    state: watch::Sender<ServerState>,
    failure: Mutex<Option<String>>,
}

impl RunningServer {
    /// Address the socket is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Number of connections currently open.
    pub fn connection_count(&self) -> usize {
        self.handle.connection_count()
    }

    /// Accept and handle connections until the server is stopped.
    ///
    /// Returns `Ok(())` immediately if the server was stopped before it ever
    /// served.
    pub async fn serve(&self) -> Result<(), ServeError> {
        let listener = {
            let mut slot = self.slot();
            match std::mem::replace(&mut *slot, ListenerSlot::Serving) {
                ListenerSlot::Bound(listener) => listener,
                ListenerSlot::Serving => return Err(ServeError::AlreadyServing),
                ListenerSlot::Released => {
                    *slot = ListenerSlot::Released;
                    return Ok(());
                }
            }
        };

        // Marks the server stopped however this future ends, including when
        // the task driving it is cancelled.
        let _guard = StopOnExit(self);

        tracing::info!(addr = %self.local_addr, "Serving requests");

        let result = axum_server::from_tcp(listener)
            .handle(self.handle.clone())
            .serve(
                self.router
                    .clone()
                    .into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await;

        match &result {
            Ok(()) => tracing::info!(addr = %self.local_addr, "Server stopped"),
            Err(e) => {
                tracing::error!(addr = %self.local_addr, error = %e, "Accept loop failed");
                *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(e.to_string());
            }
        }

        result.map_err(ServeError::from)
    }

    /// Stop accepting connections and wait for in-flight requests.
    ///
    /// Requests still running when the grace period ends are abandoned. Only
    /// the first call does any work; every call returns once the server is
    /// stopped, and calls after that return `Ok(())` straight away.
    pub async fn stop(&self) -> Result<(), ShutdownError> {
        let deadline = self
            .grace_period
            .saturating_add(Duration::from_secs(STOP_TIMEOUT_MARGIN_SECS));

        let initiated = self.state.send_if_modified(|state| {
            if *state == ServerState::Running {
                *state = ServerState::Stopping;
                true
            } else {
                false
            }
        });

        if initiated {
            let mut slot = self.slot();
            match std::mem::replace(&mut *slot, ListenerSlot::Released) {
                ListenerSlot::Bound(listener) => {
                    drop(listener);
                    drop(slot);
                    self.state.send_replace(ServerState::Stopped);
                    tracing::info!(addr = %self.local_addr, "Listener released before serving");
                    return Ok(());
                }
                ListenerSlot::Serving => {
                    *slot = ListenerSlot::Serving;
                    drop(slot);
                    tracing::info!(
                        addr = %self.local_addr,
                        connections = self.handle.connection_count(),
                        grace_period = ?self.grace_period,
                        "Stop requested, draining in-flight requests"
                    );
                    self.handle.graceful_shutdown(Some(self.grace_period));
                }
                // The accept loop already ended on its own
                ListenerSlot::Released => {}
            }
        }

        let mut rx = self.state.subscribe();
        let timed_out = tokio::time::timeout(deadline, rx.wait_for(|s| *s == ServerState::Stopped))
            .await
            .is_err();
        if timed_out {
            tracing::error!(addr = %self.local_addr, ?deadline, "Server did not stop in time");
            return Err(ShutdownError::Timeout(deadline));
        }

        if initiated {
            let failure = self
                .failure
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(message) = failure {
                return Err(ShutdownError::Serve(message));
            }
        }

        Ok(())
    }

    fn slot(&self) -> MutexGuard<'_, ListenerSlot> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct StopOnExit<'a>(&'a RunningServer);

impl Drop for StopOnExit<'_> {
    fn drop(&mut self) {
        *self.0.slot() = ListenerSlot::Released;
        self.0.state.send_replace(ServerState::Stopped);
    }
}
