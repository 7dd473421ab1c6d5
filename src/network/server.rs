//! TCP Server
//!
//! Accepts connections and runs each one on its own thread.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crate::config::Config;
use crate::error::{AgentError, Result};
use crate::handlers::Dispatcher;

use super::Connection;

/// TCP server for rdagent
pub struct Server {
    config: Config,
    dispatcher: Arc<Dispatcher>,
    listener: Option<TcpListener>,
    shutdown: Arc<AtomicBool>,
    active_connections: Arc<AtomicUsize>,
    next_client_id: u64,
}

/// Stops a running server from another thread
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    addr: Option<SocketAddr>,
}

impl ShutdownHandle {
    /// Signal the server to stop accepting connections
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
        // Wake the blocking accept
        if let Some(addr) = self.addr {
            let _ = TcpStream::connect(addr);
        }
    }
}

/// Decrements the active connection count when a connection thread ends
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Server {
    /// Create a new server with the given config
    pub fn new(config: Config) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(config.clone()));
        Self {
            config,
            dispatcher,
            listener: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            active_connections: Arc::new(AtomicUsize::new(0)),
            next_client_id: 0,
        }
    }

    /// Bind the listen address; returns the bound address
    pub fn bind(&mut self) -> Result<SocketAddr> {
        let listener = TcpListener::bind(&self.config.listen_addr).map_err(|e| {
            AgentError::Network(format!("Failed to bind {}: {}", self.config.listen_addr, e))
        })?;
        let addr = listener.local_addr()?;
        self.listener = Some(listener);
        Ok(addr)
    }

    /// Address the server is bound to, if bound
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Handle for stopping the server; call after `bind`
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
            addr: self.local_addr(),
        }
    }

    /// Start the server (blocking until shutdown)
    pub fn run(&mut self) -> Result<()> {
        if self.listener.is_none() {
            self.bind()?;
        }
        let listener = self
            .listener
            .take()
            .ok_or_else(|| AgentError::Network("Listener not bound".into()))?;
        let capabilities = self.dispatcher.capabilities();
        tracing::info!(
            addr = %listener.local_addr()?,
            version = %capabilities.version,
            platform = ?capabilities.platform,
            "Server listening"
        );

        for stream in listener.incoming() {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                    continue;
                }
            };
            self.spawn_connection(stream);
        }

        tracing::info!("Server stopped accepting connections");
        Ok(())
    }

    fn spawn_connection(&mut self, stream: TcpStream) {
        let active = self.active_connections.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard(Arc::clone(&self.active_connections));
        if active >= self.config.max_connections {
            tracing::warn!(
                max = self.config.max_connections,
                "Connection limit reached, rejecting client"
            );
            return;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;
        let dispatcher = Arc::clone(&self.dispatcher);
        let (read_ms, write_ms) = (self.config.read_timeout_ms, self.config.write_timeout_ms);

        let spawned = thread::Builder::new()
            .name(format!("client-{}", client_id))
            .spawn(move || {
                let _guard = guard;
                let result = Connection::new(client_id, stream, dispatcher).and_then(|mut conn| {
                    conn.set_timeouts(read_ms, write_ms)?;
                    conn.handle()
                });
                if let Err(e) = result {
                    tracing::warn!(client = client_id, error = %e, "Connection closed with error");
                }
            });
        if let Err(e) = spawned {
            tracing::warn!(client = client_id, error = %e, "Failed to spawn connection thread");
        }
    }
}
