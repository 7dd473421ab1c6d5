//! Supervisor Tests
//!
//! Tests for timeouts, cancellation and detached execution.

#![cfg(unix)]

use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel;
use rdagent::process::{
    cancel_pair, CancelToken, ExecutionOutcome, OutputStream, ProcessSpec, Supervisor,
};

fn sh(script: &str) -> ProcessSpec {
    ProcessSpec::new("/bin/sh").args(["-c", script])
}

// =============================================================================
// Timeout Tests
// =============================================================================

#[test]
fn test_process_exceeding_timeout_is_killed() {
    let spec = sh("echo started; sleep 2").timeout(Duration::from_secs(1));
    let started = Instant::now();
    let outcome = Supervisor::new().run(&spec, &CancelToken::never());

    match outcome {
        ExecutionOutcome::TimedOut {
            terminated,
            stdout,
            elapsed,
            ..
        } => {
            assert_eq!(stdout, "started\n");
            assert!(!terminated.is_empty());
            assert_eq!(terminated[0].depth, 0);
            assert!(elapsed >= Duration::from_secs(1));
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_process_within_timeout_completes() {
    let spec = sh("sleep 2").timeout(Duration::from_secs(3));
    match Supervisor::new().run(&spec, &CancelToken::never()) {
        ExecutionOutcome::Completed { exit_code, .. } => assert_eq!(exit_code, 0),
        other => panic!("expected completion, got {:?}", other),
    }
}

#[test]
fn test_signal_exit_code() {
    match Supervisor::new().run(&sh("kill -9 $$"), &CancelToken::never()) {
        ExecutionOutcome::Completed { exit_code, .. } => assert_eq!(exit_code, 128 + 9),
        other => panic!("expected completion, got {:?}", other),
    }
}

// =============================================================================
// Cancellation Tests
// =============================================================================

#[test]
fn test_cancel_terminates_running_process() {
    let (handle, token) = cancel_pair();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        handle.cancel();
    });

    let started = Instant::now();
    let outcome = Supervisor::new().run(&sh("sleep 30"), &token);
    canceller.join().unwrap();

    match outcome {
        ExecutionOutcome::Cancelled { terminated, .. } => {
            assert!(!terminated.is_empty());
            assert_eq!(terminated[0].name, "sh");
            assert_eq!(terminated[0].depth, 0);
        }
        other => panic!("expected cancellation, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_dropped_handle_does_not_cancel() {
    let (handle, token) = cancel_pair();
    drop(handle);
    match Supervisor::new().run(&sh("sleep 0.2; echo done"), &token) {
        ExecutionOutcome::Completed { stdout, .. } => assert_eq!(stdout, "done\n"),
        other => panic!("expected completion, got {:?}", other),
    }
}

// =============================================================================
// Detached & Observer Tests
// =============================================================================

#[test]
fn test_fire_and_forget_returns_immediately() {
    let spec = sh("sleep 5").wait_for_completion(false);
    let started = Instant::now();
    match Supervisor::new().run(&spec, &CancelToken::never()) {
        ExecutionOutcome::Completed {
            exit_code,
            stdout,
            stderr,
            ..
        } => {
            assert_eq!(exit_code, 0);
            assert!(stdout.is_empty());
            assert!(stderr.is_empty());
        }
        other => panic!("expected completion, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_observer_receives_lines_live() {
    let (tx, rx) = channel::unbounded();
    let supervisor = Supervisor::new().observer(tx);
    let outcome = supervisor.run(&sh("echo one; echo two >&2"), &CancelToken::never());
    assert!(matches!(outcome, ExecutionOutcome::Completed { .. }));

    let lines: Vec<_> = rx.try_iter().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines
        .iter()
        .any(|l| l.stream == OutputStream::Stdout && l.line == "one"));
    assert!(lines
        .iter()
        .any(|l| l.stream == OutputStream::Stderr && l.line == "two"));
}

#[test]
fn test_environment_and_working_directory_are_applied() {
    let dir = tempfile::TempDir::new().unwrap();
    let spec = sh("echo \"$GREETING\"; pwd")
        .env("GREETING", "hi")
        .working_directory(dir.path());
    match Supervisor::new().run(&spec, &CancelToken::never()) {
        ExecutionOutcome::Completed { stdout, .. } => {
            let mut lines = stdout.lines();
            assert_eq!(lines.next(), Some("hi"));
            let cwd = std::fs::canonicalize(lines.next().unwrap()).unwrap();
            assert_eq!(cwd, std::fs::canonicalize(dir.path()).unwrap());
        }
        other => panic!("expected completion, got {:?}", other),
    }
}
