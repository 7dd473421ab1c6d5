//! Connection Handler
//!
//! Handles individual client connections.

use std::io::{BufReader, BufWriter};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError};

use crate::error::{AgentError, Result};
use crate::handlers::{DispatchContext, Dispatcher};
use crate::process::{cancel_pair, CancelHandle};
use crate::protocol::{read_command, write_ping, write_response, Command, ReadOutcome};

/// Read timeout of a single disconnect peek
const PEEK_TIMEOUT: Duration = Duration::from_millis(1);

/// Handles a single client connection
pub struct Connection {
    /// Sequential id used in logs
    client_id: u64,

    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// TCP stream writer (buffered for efficiency)
    writer: BufWriter<TcpStream>,

    /// Shared command dispatcher
    dispatcher: Arc<Dispatcher>,

    /// Peer address for logging
    peer_addr: String,

    /// Read timeout restored after each execution
    read_timeout: Option<Duration>,
}

impl Connection {
    /// Create a new connection handler
    ///
    /// Sets up buffered I/O
    pub fn new(client_id: u64, stream: TcpStream, dispatcher: Arc<Dispatcher>) -> Result<Self> {
        // Get peer address for logging before we split the stream
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        // Clone stream for separate read/write handles
        let read_stream = stream.try_clone()?;
        let write_stream = stream;

        Ok(Self {
            client_id,
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(write_stream),
            dispatcher,
            peer_addr,
            read_timeout: None,
        })
    }

    /// Configure connection timeouts (0 = none)
    pub fn set_timeouts(&mut self, read_ms: u64, write_ms: u64) -> Result<()> {
        self.read_timeout = (read_ms > 0).then(|| Duration::from_millis(read_ms));
        self.reader.get_ref().set_read_timeout(self.read_timeout)?;
        if write_ms > 0 {
            self.writer
                .get_ref()
                .set_write_timeout(Some(Duration::from_millis(write_ms)))?;
        }
        Ok(())
    }

    /// Handle the connection (blocking until closed)
    ///
    /// Reads commands in a loop and sends at most one response per
    /// command, in order. Returns when the client disconnects; protocol
    /// errors close the connection and are returned.
    pub fn handle(&mut self) -> Result<()> {
        let client = self.client_id;
        tracing::info!(client, peer = %self.peer_addr, "Connection established");
        let max_message_size = self.dispatcher.config().max_message_size;

        loop {
            let command = match read_command(&mut self.reader, max_message_size) {
                Ok(ReadOutcome::Message(command)) => command,
                Ok(ReadOutcome::Ping) => {
                    tracing::trace!(client, "Ping");
                    write_ping(&mut self.writer)?;
                    continue;
                }
                Ok(ReadOutcome::Closed) => {
                    tracing::info!(client, "Client disconnected");
                    return Ok(());
                }
                Err(e) if e.is_disconnect() => {
                    tracing::info!(client, error = %e, "Connection reset by client");
                    return Ok(());
                }
                Err(AgentError::Io(ref e))
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    // Windows reports TimedOut instead of WouldBlock
                    tracing::info!(client, "Read timeout, closing connection");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(client, error = %e, "Protocol error, closing connection");
                    return Err(e);
                }
            };

            tracing::debug!(client, command = ?command.command_type(), "Command received");

            let response = match command {
                Command::Execute(_) => self.execute_watched(command),
                other => self.dispatcher.dispatch(other, &DispatchContext::default()),
            };

            // Commands like Deploy are not answered
            let Some(response) = response else {
                continue;
            };

            match write_response(&mut self.writer, &response) {
                Ok(bytes) => {
                    tracing::debug!(client, response = ?response.response_type(), bytes, "Response sent");
                }
                Err(e) if e.is_disconnect() => {
                    tracing::info!(client, error = %e, "Client disconnected before response could be sent");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(client, error = %e, "Error writing response");
                    return Err(e);
                }
            }
        }
    }

    /// Run an Execute command while watching for the client to go away
    fn execute_watched(&mut self, command: Command) -> Option<crate::protocol::Response> {
        let (cancel, token) = cancel_pair();
        let (done_tx, done_rx) = channel::bounded::<()>(1);

        let watcher = match self.reader.get_ref().try_clone() {
            Ok(stream) => Some(spawn_disconnect_watcher(
                self.client_id,
                stream,
                self.dispatcher.config().disconnect_poll(),
                cancel,
                done_rx,
            )),
            Err(e) => {
                tracing::warn!(client = self.client_id, error = %e, "Disconnect watcher unavailable");
                None
            }
        };

        let ctx = DispatchContext {
            cancel: token,
            observer: None,
        };
        let response = self.dispatcher.dispatch(command, &ctx);

        drop(done_tx);
        if let Some(watcher) = watcher {
            let _ = watcher.join();
        }
        if let Err(e) = self.reader.get_ref().set_read_timeout(self.read_timeout) {
            tracing::warn!(client = self.client_id, error = %e, "Failed to restore read timeout");
        }
        response
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}

/// Peek at the socket every `poll` until `done` closes; cancel if the peer left
fn spawn_disconnect_watcher(
    client: u64,
    stream: TcpStream,
    poll: Duration,
    cancel: CancelHandle,
    done: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match done.recv_timeout(poll) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => return,
        }
        if peer_closed(&stream) {
            tracing::warn!(client, "Client disconnected during execution, cancelling");
            cancel.cancel();
            return;
        }
    })
}

/// Non-consuming check for an orderly shutdown or reset by the peer
fn peer_closed(stream: &TcpStream) -> bool {
    if stream.set_read_timeout(Some(PEEK_TIMEOUT)).is_err() {
        return false;
    }
    let mut byte = [0u8; 1];
    match stream.peek(&mut byte) {
        Ok(0) => true,
        Ok(_) => false,
        Err(e) => !matches!(
            e.kind(),
            std::io::ErrorKind::WouldBlock
                | std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::Interrupted
        ),
    }
}
