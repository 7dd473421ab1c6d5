//! Process supervisor
//!
//! Runs one process to a terminal state. Output readers and an exit
//! waiter run on their own threads and report over channels; the
//! supervisor blocks in a single `select!` over output, exit, timeout and
//! cancellation.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use tracing::{debug, info, trace, warn};

use super::tree::{collect_tree, extend_with_group, platform_table, terminate_tree, ProcessTable};
use super::{format_process_tree, split_arguments, ProcessTreeItem};
use crate::protocol::ExecuteCommand;

/// Default wait for output pipes to close after a tree kill
const DEFAULT_OUTPUT_DRAIN: Duration = Duration::from_secs(2);

// =============================================================================
// Inputs
// =============================================================================

/// What to run and how
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    /// None = inherit the agent's directory
    pub working_directory: Option<PathBuf>,
    /// Set on top of the inherited environment
    pub environment: BTreeMap<String, String>,
    pub run_as_administrator: bool,
    pub wait_for_completion: bool,
    /// None = wait forever
    pub timeout: Option<Duration>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            wait_for_completion: true,
            ..Self::default()
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn wait_for_completion(mut self, wait: bool) -> Self {
        self.wait_for_completion = wait;
        self
    }

    pub fn run_as_administrator(mut self, elevated: bool) -> Self {
        self.run_as_administrator = elevated;
        self
    }

    /// Translate an Execute command; a non-positive timeout means none
    pub fn from_command(command: &ExecuteCommand) -> Self {
        let working_directory = (!command.working_directory.is_empty())
            .then(|| PathBuf::from(&command.working_directory));
        let timeout = (command.execution_timeout_secs > 0)
            .then(|| Duration::from_secs(command.execution_timeout_secs as u64));
        Self {
            program: command.executable.clone(),
            args: split_arguments(&command.arguments),
            working_directory,
            environment: command.environment.clone(),
            run_as_administrator: command.run_as_administrator,
            wait_for_completion: command.wait_for_completion,
            timeout,
        }
    }

    /// File name of the program, used as the root name of its tree
    fn display_name(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.clone())
    }
}

// =============================================================================
// Cancellation
// =============================================================================

/// Requests cancellation of a running execution
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Sender<()>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Observed by the supervisor; dropping every handle does not cancel
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: Receiver<()>,
}

impl CancelToken {
    /// A token that never fires
    pub fn never() -> Self {
        Self {
            rx: channel::never(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.try_recv().is_ok()
    }
}

/// Create a connected cancel handle and token
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = channel::bounded(1);
    (CancelHandle { tx }, CancelToken { rx })
}

// =============================================================================
// Outputs
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One captured line, published live to an observer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub line: String,
}

enum OutputEvent {
    Line(OutputLine),
    Closed(OutputStream),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    NotStarted,
    Running,
    Completed,
    TimedOut,
    Cancelled,
    CouldNotLaunch,
    Terminating,
    Terminated,
}

/// Terminal result of one execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed {
        exit_code: i32,
        stdout: String,
        stderr: String,
        elapsed: Duration,
    },
    CouldNotLaunch {
        message: String,
    },
    TimedOut {
        /// Processes killed, root first
        terminated: Vec<ProcessTreeItem>,
        stdout: String,
        stderr: String,
        elapsed: Duration,
    },
    Cancelled {
        terminated: Vec<ProcessTreeItem>,
        elapsed: Duration,
    },
}

#[derive(Default)]
struct Capture {
    stdout: String,
    stderr: String,
    open_streams: usize,
}

impl Capture {
    fn push(&mut self, line: &OutputLine) {
        let buf = match line.stream {
            OutputStream::Stdout => &mut self.stdout,
            OutputStream::Stderr => &mut self.stderr,
        };
        buf.push_str(&line.line);
        buf.push('\n');
    }
}

enum Trigger {
    TimedOut,
    Cancelled,
}

// =============================================================================
// Supervisor
// =============================================================================

/// Launches and supervises processes
pub struct Supervisor {
    table: Box<dyn ProcessTable>,
    output_drain: Duration,
    observer: Option<Sender<OutputLine>>,
    verbose: bool,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    /// Supervisor using the platform process table
    pub fn new() -> Self {
        Self::with_table(platform_table())
    }

    pub fn with_table(table: Box<dyn ProcessTable>) -> Self {
        Self {
            table,
            output_drain: DEFAULT_OUTPUT_DRAIN,
            observer: None,
            verbose: false,
        }
    }

    /// How long to wait for pipes to close after a tree kill
    pub fn output_drain(mut self, drain: Duration) -> Self {
        self.output_drain = drain;
        self
    }

    /// Publish every captured line to `observer`
    pub fn observer(mut self, observer: Sender<OutputLine>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Log captured lines at debug instead of trace
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Run `spec` to a terminal state
    ///
    /// Launch failures are reported as [`ExecutionOutcome::CouldNotLaunch`].
    pub fn run(&self, spec: &ProcessSpec, cancel: &CancelToken) -> ExecutionOutcome {
        let mut state = ExecutionState::NotStarted;
        let started = Instant::now();

        let mut child = match spawn(spec) {
            Ok(child) => child,
            Err(message) => {
                transition(&mut state, ExecutionState::CouldNotLaunch);
                warn!(program = %spec.program, error = %message, "Could not launch process");
                return ExecutionOutcome::CouldNotLaunch { message };
            }
        };
        let pid = child.id();
        transition(&mut state, ExecutionState::Running);
        info!(pid, program = %spec.program, args = ?spec.args, "Process started");

        if !spec.wait_for_completion {
            thread::spawn(move || {
                let status = child.wait();
                debug!(pid, ?status, "Detached process exited");
            });
            return ExecutionOutcome::Completed {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                elapsed: started.elapsed(),
            };
        }

        let (output_tx, mut output_rx) = channel::unbounded::<OutputEvent>();
        let mut capture = Capture::default();
        if let Some(stdout) = child.stdout.take() {
            capture.open_streams += 1;
            spawn_reader(stdout, OutputStream::Stdout, output_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            capture.open_streams += 1;
            spawn_reader(stderr, OutputStream::Stderr, output_tx.clone());
        }
        drop(output_tx);

        let (exit_tx, exit_rx) = channel::bounded::<std::io::Result<ExitStatus>>(1);
        thread::spawn(move || {
            let _ = exit_tx.send(child.wait());
        });

        let timeout = spec.timeout.map(channel::after).unwrap_or_else(channel::never);
        let mut cancel_rx = cancel.rx.clone();
        let mut exit_watch = exit_rx.clone();
        let mut exit_status: Option<std::io::Result<ExitStatus>> = None;

        // Exit alone does not finish the run: both pipes must close too
        let trigger = loop {
            if exit_status.is_some() && capture.open_streams == 0 {
                break None;
            }
            select! {
                recv(output_rx) -> event => match event {
                    Ok(event) => self.on_output(event, &mut capture),
                    Err(_) => {
                        capture.open_streams = 0;
                        output_rx = channel::never();
                    }
                },
                recv(exit_watch) -> status => {
                    exit_status = Some(status.unwrap_or_else(|_| {
                        Err(std::io::Error::new(std::io::ErrorKind::Other, "exit waiter vanished"))
                    }));
                    // The waiter hangs up right after reporting
                    exit_watch = channel::never();
                }
                recv(timeout) -> _ => break Some(Trigger::TimedOut),
                recv(cancel_rx) -> msg => {
                    if msg.is_ok() {
                        break Some(Trigger::Cancelled);
                    }
                    cancel_rx = channel::never();
                }
            }
        };

        let Some(trigger) = trigger else {
            return self.completed(&mut state, pid, exit_status, capture, started);
        };

        // The root may have exited while the trigger fired
        if exit_status.is_none() {
            if let Ok(status) = exit_rx.try_recv() {
                exit_status = Some(status);
            }
        }

        // A live root brings its tree; descendants it left behind keep its group
        let mut tree = if exit_status.is_none() {
            collect_tree(self.table.as_ref(), pid, &spec.display_name())
        } else {
            Vec::new()
        };
        extend_with_group(self.table.as_ref(), pid, &mut tree);

        if tree.is_empty() && matches!(trigger, Trigger::TimedOut) {
            // Root exited in time and nothing of its group is left
            self.drain_output(&mut output_rx, &mut capture);
            return self.completed(&mut state, pid, exit_status, capture, started);
        }

        transition(
            &mut state,
            match trigger {
                Trigger::TimedOut => ExecutionState::TimedOut,
                Trigger::Cancelled => ExecutionState::Cancelled,
            },
        );
        transition(&mut state, ExecutionState::Terminating);

        let terminated = if tree.is_empty() {
            Vec::new()
        } else {
            debug!(pid, "Terminating process tree:\n{}", format_process_tree(&tree));
            terminate_tree(&tree)
        };

        let reaped = exit_status.is_some() || exit_rx.recv_timeout(self.output_drain).is_ok();
        if !reaped {
            warn!(pid, "Process not reaped after termination");
        }
        self.drain_output(&mut output_rx, &mut capture);
        transition(&mut state, ExecutionState::Terminated);

        let elapsed = started.elapsed();
        match trigger {
            Trigger::TimedOut => {
                info!(pid, killed = terminated.len(), elapsed_ms = elapsed.as_millis() as u64, "Process timed out");
                ExecutionOutcome::TimedOut {
                    terminated,
                    stdout: capture.stdout,
                    stderr: capture.stderr,
                    elapsed,
                }
            }
            Trigger::Cancelled => {
                info!(pid, killed = terminated.len(), "Process cancelled");
                ExecutionOutcome::Cancelled {
                    terminated,
                    elapsed,
                }
            }
        }
    }

    fn on_output(&self, event: OutputEvent, capture: &mut Capture) {
        match event {
            OutputEvent::Line(line) => {
                if self.verbose {
                    debug!(stream = ?line.stream, "{}", line.line);
                } else {
                    trace!(stream = ?line.stream, "{}", line.line);
                }
                capture.push(&line);
                if let Some(observer) = &self.observer {
                    let _ = observer.send(line);
                }
            }
            OutputEvent::Closed(_) => {
                capture.open_streams = capture.open_streams.saturating_sub(1);
            }
        }
    }

    /// Collect remaining output until the pipes close or the drain window ends
    fn drain_output(&self, output_rx: &mut Receiver<OutputEvent>, capture: &mut Capture) {
        let deadline = channel::after(self.output_drain);
        while capture.open_streams > 0 {
            select! {
                recv(output_rx) -> event => match event {
                    Ok(event) => self.on_output(event, capture),
                    Err(_) => break,
                },
                recv(deadline) -> _ => {
                    warn!(open = capture.open_streams, "Output pipes still open after drain window");
                    break;
                }
            }
        }
    }

    fn completed(
        &self,
        state: &mut ExecutionState,
        pid: u32,
        exit_status: Option<std::io::Result<ExitStatus>>,
        capture: Capture,
        started: Instant,
    ) -> ExecutionOutcome {
        transition(state, ExecutionState::Completed);
        let exit_code = match exit_status {
            Some(Ok(status)) => exit_code(status),
            Some(Err(e)) => {
                warn!(pid, error = %e, "Failed to wait for process");
                -1
            }
            None => -1,
        };
        let elapsed = started.elapsed();
        info!(pid, exit_code, elapsed_ms = elapsed.as_millis() as u64, "Process exited");
        ExecutionOutcome::Completed {
            exit_code,
            stdout: capture.stdout,
            stderr: capture.stderr,
            elapsed,
        }
    }
}

fn transition(state: &mut ExecutionState, next: ExecutionState) {
    trace!(from = ?state, to = ?next, "Execution state");
    *state = next;
}

fn spawn(spec: &ProcessSpec) -> std::result::Result<Child, String> {
    let mut command = build_command(spec)?;
    command.stdin(Stdio::null());
    if spec.wait_for_completion {
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
    } else {
        // Nobody reads the pipes of a detached process
        command.stdout(Stdio::null()).stderr(Stdio::null());
    }
    if let Some(dir) = &spec.working_directory {
        command.current_dir(dir);
    }
    command.envs(&spec.environment);
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Root leads a new group so its orphans can still be found
        command.process_group(0);
    }
    command
        .spawn()
        .map_err(|e| format!("{}: {}", spec.program, e))
}

#[cfg(unix)]
fn build_command(spec: &ProcessSpec) -> std::result::Result<Command, String> {
    if spec.run_as_administrator {
        // Non-interactive: fails instead of prompting for a password
        let mut command = Command::new("sudo");
        command.arg("-n").arg(&spec.program).args(&spec.args);
        return Ok(command);
    }
    let mut command = Command::new(&spec.program);
    command.args(&spec.args);
    Ok(command)
}

#[cfg(not(unix))]
fn build_command(spec: &ProcessSpec) -> std::result::Result<Command, String> {
    if spec.run_as_administrator {
        return Err(format!(
            "{}: elevated execution is not supported by this agent",
            spec.program
        ));
    }
    let mut command = Command::new(&spec.program);
    command.args(&spec.args);
    Ok(command)
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// Forward lines of a pipe until it closes
fn spawn_reader<R: Read + Send + 'static>(pipe: R, stream: OutputStream, tx: Sender<OutputEvent>) {
    thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
                        buf.pop();
                    }
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    if tx.send(OutputEvent::Line(OutputLine { stream, line })).is_err() {
                        return;
                    }
                }
            }
        }
        let _ = tx.send(OutputEvent::Closed(stream));
    });
}
