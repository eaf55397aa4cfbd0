//! Unix socket server module.
//!
//! Accepts control connections and dispatches their requests.

mod connection;
mod listener;

pub use connection::handle_connection;
pub use listener::{ConnectionMetrics, SocketListener};
