//! Configuration for rdagent
//!
//! Centralized configuration with sensible defaults. Can be built in code
//! through [`ConfigBuilder`] or loaded from a JSON file.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

/// Main configuration for an rdagent server instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address
    pub listen_addr: String,

    /// Max concurrent client connections
    pub max_connections: usize,

    /// Connection read timeout (milliseconds, 0 = wait forever)
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds, 0 = wait forever)
    pub write_timeout_ms: u64,

    /// Largest frame accepted from a peer (bytes)
    pub max_message_size: usize,

    // -------------------------------------------------------------------------
    // Execution Configuration
    // -------------------------------------------------------------------------
    /// Serialize command execution across all connections
    pub exclusive_execution: bool,

    /// How often the connection checks for a vanished peer while a
    /// process is running (milliseconds)
    pub disconnect_poll_ms: u64,

    /// How long to wait for output pipes to close after killing a
    /// process tree (milliseconds)
    pub output_drain_ms: u64,

    /// Log captured output lines at debug level instead of trace
    pub verbose: bool,

    // -------------------------------------------------------------------------
    // Transfer Configuration
    // -------------------------------------------------------------------------
    /// Worker threads for file pack/unpack (0 = available parallelism)
    pub transfer_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9339".to_string(),
            max_connections: 64,
            read_timeout_ms: 0,
            write_timeout_ms: 30_000,
            max_message_size: 256 * 1024 * 1024, // 256 MB
            exclusive_execution: true,
            disconnect_poll_ms: 500,
            output_drain_ms: 2_000,
            verbose: false,
            transfer_workers: 0,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load a config from a JSON file; missing keys take default values
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)
            .map_err(|e| AgentError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(AgentError::Config("max_connections must be at least 1".into()));
        }
        if self.max_message_size < 5 {
            return Err(AgentError::Config(format!(
                "max_message_size {} cannot hold a message header",
                self.max_message_size
            )));
        }
        if self.disconnect_poll_ms == 0 {
            return Err(AgentError::Config("disconnect_poll_ms must be positive".into()));
        }
        Ok(())
    }

    /// Number of worker threads to use for a transfer of `jobs` files
    pub fn transfer_parallelism(&self, jobs: usize) -> usize {
        let workers = if self.transfer_workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.transfer_workers
        };
        workers.min(jobs).max(1)
    }

    pub fn disconnect_poll(&self) -> Duration {
        Duration::from_millis(self.disconnect_poll_ms)
    }

    pub fn output_drain(&self) -> Duration {
        Duration::from_millis(self.output_drain_ms)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Start from an existing config (e.g. one loaded from a file)
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    /// Set the largest accepted frame (in bytes)
    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.config.max_message_size = bytes;
        self
    }

    /// Serialize command execution across connections
    pub fn exclusive_execution(mut self, exclusive: bool) -> Self {
        self.config.exclusive_execution = exclusive;
        self
    }

    /// Set the peer disconnect check period (in milliseconds)
    pub fn disconnect_poll_ms(mut self, ms: u64) -> Self {
        self.config.disconnect_poll_ms = ms;
        self
    }

    /// Set the post-kill output drain window (in milliseconds)
    pub fn output_drain_ms(mut self, ms: u64) -> Self {
        self.config.output_drain_ms = ms;
        self
    }

    /// Log every captured output line at debug level
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    /// Set the number of transfer worker threads (0 = automatic)
    pub fn transfer_workers(mut self, workers: usize) -> Self {
        self.config.transfer_workers = workers;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
