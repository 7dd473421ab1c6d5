//! Execute handler

use crate::process::{CancelToken, ExecutionOutcome, ProcessSpec, Supervisor};
use crate::protocol::{
    ExecuteCommand, ExecutionCompletedResponse, ExecutionStatus, ExecutionTerminatedResponse,
    ExecutionTimedOutResponse, Response,
};

/// Run a process and report its terminal state
///
/// Timeouts answer with `ExecutionTimedOut`, cancellation with
/// `ExecutionTerminated`; both carry the killed process tree.
pub fn execute(command: &ExecuteCommand, supervisor: &Supervisor, cancel: &CancelToken) -> Response {
    let spec = ProcessSpec::from_command(command);
    match supervisor.run(&spec, cancel) {
        ExecutionOutcome::Completed {
            exit_code,
            stdout,
            stderr,
            elapsed,
        } => Response::ExecutionCompleted(ExecutionCompletedResponse {
            status: ExecutionStatus::Completed,
            exit_code,
            stdout,
            stderr,
            execution_time_ms: elapsed.as_millis() as i64,
        }),
        ExecutionOutcome::CouldNotLaunch { message } => {
            Response::ExecutionCompleted(ExecutionCompletedResponse::could_not_launch(message))
        }
        ExecutionOutcome::TimedOut {
            terminated,
            stdout,
            stderr,
            elapsed,
        } => Response::ExecutionTimedOut(ExecutionTimedOutResponse {
            process_tree: terminated,
            stdout,
            stderr,
            execution_time_ms: elapsed.as_millis() as i64,
        }),
        ExecutionOutcome::Cancelled { terminated, .. } => {
            Response::ExecutionTerminated(ExecutionTerminatedResponse {
                terminated_process_tree: terminated,
            })
        }
    }
}
