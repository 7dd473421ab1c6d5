//! Handlers Module
//!
//! Routes each decoded command to the component that executes it and
//! builds the matching response.
//!
//! ## Concurrency
//! - One dispatcher is shared by every connection
//! - With `exclusive_execution`, commands from all connections run one at
//!   a time behind `execution_lock` (the process table and the target
//!   directories are host-wide)
//! - The capability descriptor is computed once and never changes

mod environment;
mod execute;
mod fetch;
mod files;

pub use environment::list_environment_variables;
pub use execute::execute;
pub use fetch::{fetch_metadata, fetch_result_range};
pub use files::{
    check_outdated_files, deploy, get_file, list_files, put_directory, put_file, send_file,
};

use crossbeam::channel::Sender;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::Config;
use crate::process::{CancelToken, OutputLine, Supervisor};
use crate::protocol::{CapabilityInfo, Command, Response};

/// Per-command inputs supplied by the connection
pub struct DispatchContext {
    /// Fires when the client goes away during an execution
    pub cancel: CancelToken,
    /// Receives captured output lines while a process runs
    pub observer: Option<Sender<OutputLine>>,
}

impl Default for DispatchContext {
    fn default() -> Self {
        Self {
            cancel: CancelToken::never(),
            observer: None,
        }
    }
}

/// Executes commands on behalf of every connection
pub struct Dispatcher {
    /// Server configuration
    config: Config,

    /// Descriptor reported to GetServerCapabilities
    capabilities: CapabilityInfo,

    /// Serializes command execution when `exclusive_execution` is set
    execution_lock: Mutex<()>,
}

impl Dispatcher {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            capabilities: CapabilityInfo::current(),
            execution_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn capabilities(&self) -> &CapabilityInfo {
        &self.capabilities
    }

    /// Execute a command
    ///
    /// Returns None for commands that are not answered (Deploy).
    pub fn dispatch(&self, command: Command, ctx: &DispatchContext) -> Option<Response> {
        let _guard = self
            .config
            .exclusive_execution
            .then(|| self.execution_lock.lock());
        debug!(command = ?command.command_type(), "Dispatching command");

        let workers = |jobs: usize| self.config.transfer_parallelism(jobs);
        let response = match command {
            Command::Execute(c) => execute(&c, &self.supervisor(ctx), &ctx.cancel),
            Command::FetchMetadata(c) => fetch_metadata(&c),
            Command::FetchResultRange(c) => fetch_result_range(&c),
            Command::Deploy(c) => {
                deploy(&c);
                return None;
            }
            Command::ListEnvironmentVariables => list_environment_variables(),
            Command::PutFile(c) => put_file(&c),
            Command::CheckOutdatedFiles(c) => check_outdated_files(&c),
            Command::ListFiles(c) => list_files(&c),
            Command::SendFile(c) => send_file(&c, workers(c.files.len())),
            Command::GetFile(c) => get_file(&c, workers(c.paths.len())),
            Command::PutDirectory(c) => put_directory(&c),
            Command::GetServerCapabilities => Response::GetServerCapabilities(self.capabilities.clone()),
        };
        Some(response)
    }

    fn supervisor(&self, ctx: &DispatchContext) -> Supervisor {
        let supervisor = Supervisor::new()
            .output_drain(self.config.output_drain())
            .verbose(self.config.verbose);
        match &ctx.observer {
            Some(observer) => supervisor.observer(observer.clone()),
            None => supervisor,
        }
    }
}
