//! Network Module
//!
//! TCP server and client handling.
//!
//! ## Architecture
//! - Single acceptor thread
//! - One thread per connection, bounded by `max_connections`
//! - Commands routed through the shared Dispatcher
//! - Pings are answered inline; an Execute runs with a disconnect watcher

mod connection;
mod server;

pub use connection::Connection;
pub use server::{Server, ShutdownHandle};
