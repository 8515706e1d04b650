//! Upstream: a concurrent liveness responder.
//!
//! Every HTTP request, whatever its method, path, headers or body, receives
//! `200 OK` with `Content-Type: text/plain` and the body `OK`. The listener
//! binds eagerly, serves on a runtime sized to the host's parallelism, and
//! stops gracefully on request or on SIGTERM/SIGINT.

pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod middleware;
pub mod routes;

pub use config::{AppConfig, ServerConfig};
pub use error::{BindError, ServeError, ShutdownError};
pub use self::http::{RunningServer, Server, ServerState};
