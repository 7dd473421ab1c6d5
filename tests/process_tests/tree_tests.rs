//! Process Tree Tests
//!
//! Tests for tree discovery and whole-tree termination.

use std::collections::HashMap;

use rdagent::process::{collect_tree, extend_with_group, ProcessEntry, ProcessTable};

/// In-memory table keyed by parent pid
struct FakeTable(HashMap<u32, Vec<ProcessEntry>>);

impl ProcessTable for FakeTable {
    fn list_children(&self, pid: u32) -> Vec<ProcessEntry> {
        self.0.get(&pid).cloned().unwrap_or_default()
    }
}

/// Table whose only knowledge is the members of one process group
struct GroupTable(Vec<ProcessEntry>);

impl ProcessTable for GroupTable {
    fn list_children(&self, _pid: u32) -> Vec<ProcessEntry> {
        Vec::new()
    }

    fn list_group(&self, _pgid: u32) -> Vec<ProcessEntry> {
        self.0.clone()
    }
}

fn entry(pid: u32, name: &str) -> ProcessEntry {
    ProcessEntry {
        pid,
        name: name.to_string(),
    }
}

// =============================================================================
// Discovery Tests
// =============================================================================

#[test]
fn test_tree_is_depth_first_with_depths() {
    let mut children = HashMap::new();
    children.insert(1, vec![entry(2, "make"), entry(5, "logger")]);
    children.insert(2, vec![entry(3, "cc"), entry(4, "ld")]);
    let tree = collect_tree(&FakeTable(children), 1, "build");

    let shape: Vec<(i32, &str, i32)> = tree
        .iter()
        .map(|item| (item.pid, item.name.as_str(), item.depth))
        .collect();
    assert_eq!(
        shape,
        vec![
            (1, "build", 0),
            (2, "make", 1),
            (3, "cc", 2),
            (4, "ld", 2),
            (5, "logger", 1),
        ]
    );
}

#[test]
fn test_cycles_and_duplicates_are_visited_once() {
    let mut children = HashMap::new();
    children.insert(1, vec![entry(2, "a"), entry(2, "a")]);
    children.insert(2, vec![entry(1, "root")]);
    let tree = collect_tree(&FakeTable(children), 1, "root");
    assert_eq!(tree.len(), 2);
}

#[test]
fn test_group_sweep_skips_leader_and_known_pids() {
    let table = GroupTable(vec![entry(40, "leader"), entry(42, "worker"), entry(41, "known")]);
    let mut tree = collect_tree(&table, 41, "known");
    extend_with_group(&table, 40, &mut tree);

    let shape: Vec<(i32, &str, i32)> = tree
        .iter()
        .map(|item| (item.pid, item.name.as_str(), item.depth))
        .collect();
    assert_eq!(shape, vec![(41, "known", 0), (42, "worker", 1)]);
}

// =============================================================================
// Live Termination Tests
// =============================================================================

#[cfg(target_os = "linux")]
#[test]
fn test_timeout_kills_every_descendant_once() {
    use std::time::Duration;

    use rdagent::process::{CancelToken, ExecutionOutcome, ProcessSpec, Supervisor};

    let spec = ProcessSpec::new("/bin/sh")
        .args(["-c", "sleep 30 & sleep 30 & sleep 30 & wait"])
        .timeout(Duration::from_secs(1));
    let outcome = Supervisor::new().run(&spec, &CancelToken::never());

    let ExecutionOutcome::TimedOut { terminated, .. } = outcome else {
        panic!("expected timeout, got {:?}", outcome);
    };
    assert_eq!(terminated.len(), 4, "tree: {:?}", terminated);
    assert_eq!(terminated[0].depth, 0);
    assert_eq!(terminated[0].name, "sh");

    let sleepers: Vec<_> = terminated[1..].iter().collect();
    assert!(sleepers.iter().all(|item| item.depth == 1 && item.name == "sleep"));

    let mut pids: Vec<i32> = terminated.iter().map(|item| item.pid).collect();
    pids.sort_unstable();
    pids.dedup();
    assert_eq!(pids.len(), 4);

    // Every killed pid is gone or a zombie awaiting its new parent
    std::thread::sleep(Duration::from_millis(200));
    for pid in &pids[..] {
        if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            let state = stat.rsplit(')').next().unwrap().trim_start().chars().next();
            assert_eq!(state, Some('Z'), "pid {} still running", pid);
        }
    }
}

#[cfg(target_os = "linux")]
#[test]
fn test_timeout_after_root_exit_kills_stragglers() {
    use std::time::Duration;

    use rdagent::process::{CancelToken, ExecutionOutcome, ProcessSpec, Supervisor};

    // The shell exits at once; its orphan keeps the output pipes open
    let spec = ProcessSpec::new("/bin/sh")
        .args(["-c", "sleep 7 & exit 0"])
        .timeout(Duration::from_secs(1));
    let outcome = Supervisor::new().run(&spec, &CancelToken::never());

    let ExecutionOutcome::TimedOut { terminated, elapsed, .. } = outcome else {
        panic!("expected timeout, got {:?}", outcome);
    };
    assert!(elapsed < Duration::from_secs(7));
    assert_eq!(terminated.len(), 1, "tree: {:?}", terminated);
    assert_eq!(terminated[0].name, "sleep");
    assert_eq!(terminated[0].depth, 1);

    std::thread::sleep(Duration::from_millis(200));
    let pid = terminated[0].pid;
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        let state = stat.rsplit(')').next().unwrap().trim_start().chars().next();
        assert_eq!(state, Some('Z'), "pid {} still running", pid);
    }
}
