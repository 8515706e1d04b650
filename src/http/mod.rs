//! HTTP listener module.
//!
//! Provides the listener lifecycle (`Server` -> `RunningServer`) and the
//! signal handling that stops it:
//! - **Start**: binds the socket, failing fast on unusable addresses
//! - **Serve**: accepts connections on a multi-threaded runtime until stopped
//! - **Stop**: closes the socket and drains in-flight requests for a grace period
//! - SIGTERM/SIGINT trigger Stop

mod server;
mod shutdown;

pub use server::{build_runtime, RunningServer, Server, ServerState};
pub use shutdown::setup_shutdown_handler;
