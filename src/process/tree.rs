//! Process tree discovery and termination
//!
//! Discovery goes through [`ProcessTable`], a single "list children of
//! pid" query with one implementation per platform:
//! - Linux: `/proc/<pid>/stat` (parent pid, name, start time)
//! - Windows: a toolhelp snapshot plus process creation times
//! - elsewhere: no children are reported, only the root is killed
//!
//! A candidate child must not have started before its alleged parent,
//! which guards against a recycled pid being mistaken for a child.
//!
//! On unix the supervised root leads its own process group. Once the root
//! has exited its orphans are reparented and no longer show up as its
//! children, so they are found through [`ProcessTable::list_group`].

use std::collections::HashSet;

use tracing::{debug, warn};

use super::ProcessTreeItem;

/// A live process as seen by a [`ProcessTable`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
}

/// Parent-child view of the host process table
pub trait ProcessTable: Send + Sync {
    /// Live processes whose parent is `pid` and that started no earlier
    /// than it
    fn list_children(&self, pid: u32) -> Vec<ProcessEntry>;

    /// Live members of process group `pgid`, excluding its leader
    ///
    /// Tables that cannot see process groups report none.
    fn list_group(&self, _pgid: u32) -> Vec<ProcessEntry> {
        Vec::new()
    }
}

/// The process table of the current platform
pub fn platform_table() -> Box<dyn ProcessTable> {
    #[cfg(target_os = "linux")]
    {
        Box::new(linux::ProcFs)
    }
    #[cfg(windows)]
    {
        Box::new(windows::Toolhelp)
    }
    #[cfg(not(any(target_os = "linux", windows)))]
    {
        Box::new(RootOnly)
    }
}

/// Fallback table that never reports children
#[cfg(not(any(target_os = "linux", windows)))]
struct RootOnly;

#[cfg(not(any(target_os = "linux", windows)))]
impl ProcessTable for RootOnly {
    fn list_children(&self, _pid: u32) -> Vec<ProcessEntry> {
        Vec::new()
    }
}

/// Walk the tree below `root_pid` depth first, root first
///
/// Each pid appears at most once even if the table reports it twice.
pub fn collect_tree(table: &dyn ProcessTable, root_pid: u32, root_name: &str) -> Vec<ProcessTreeItem> {
    let mut tree = Vec::new();
    let mut seen = HashSet::new();
    let root = ProcessEntry {
        pid: root_pid,
        name: root_name.to_string(),
    };
    visit(table, root, 0, &mut seen, &mut tree);
    tree
}

/// Append the members of group `pgid` missing from `tree`, with their
/// descendants
///
/// Members are placed one level below the root they were orphaned from.
/// The leader itself is never added: by the time its group is swept it has
/// been reaped and its pid may belong to someone else.
pub fn extend_with_group(table: &dyn ProcessTable, pgid: u32, tree: &mut Vec<ProcessTreeItem>) {
    let mut seen: HashSet<u32> = tree.iter().map(|item| item.pid as u32).collect();
    seen.insert(pgid);
    let mut members = table.list_group(pgid);
    members.sort_by_key(|member| member.pid);
    for member in members {
        visit(table, member, 1, &mut seen, tree);
    }
}

fn visit(
    table: &dyn ProcessTable,
    entry: ProcessEntry,
    depth: i32,
    seen: &mut HashSet<u32>,
    tree: &mut Vec<ProcessTreeItem>,
) {
    if !seen.insert(entry.pid) {
        return;
    }
    let pid = entry.pid;
    tree.push(ProcessTreeItem::new(pid as i32, entry.name, depth));
    for child in table.list_children(pid) {
        visit(table, child, depth + 1, seen, tree);
    }
}

/// Kill every process of a tree, returning the ones that were killed
///
/// Processes that already exited or cannot be accessed are skipped.
pub fn terminate_tree(tree: &[ProcessTreeItem]) -> Vec<ProcessTreeItem> {
    let mut terminated = Vec::with_capacity(tree.len());
    for item in tree {
        if kill_process(item.pid as u32) {
            terminated.push(item.clone());
        } else {
            debug!(pid = item.pid, name = %item.name, "Process already gone");
        }
    }
    if terminated.len() != tree.len() {
        warn!(
            killed = terminated.len(),
            total = tree.len(),
            "Some processes of the tree could not be terminated"
        );
    }
    terminated
}

/// Forcefully kill one process by pid
#[cfg(unix)]
pub fn kill_process(pid: u32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    kill(Pid::from_raw(raw), Signal::SIGKILL).is_ok()
}

/// Forcefully kill one process by pid
#[cfg(windows)]
pub fn kill_process(pid: u32) -> bool {
    windows::terminate(pid)
}

#[cfg(not(any(unix, windows)))]
pub fn kill_process(_pid: u32) -> bool {
    false
}

#[cfg(target_os = "linux")]
mod linux {
    use std::fs;

    use super::{ProcessEntry, ProcessTable};

    /// Reads `/proc/<pid>/stat`
    pub(super) struct ProcFs;

    pub(super) struct StatLine {
        pub name: String,
        pub ppid: u32,
        pub pgrp: u32,
        /// Clock ticks after boot
        pub start_time: u64,
    }

    /// Parse a stat line: `pid (comm) state ppid ... starttime ...`
    ///
    /// comm may contain spaces and parentheses, so fields are counted from
    /// the last `)`.
    pub(super) fn parse_stat(line: &str) -> Option<StatLine> {
        let open = line.find('(')?;
        let close = line.rfind(')')?;
        let name = line.get(open + 1..close)?.to_string();
        let fields: Vec<&str> = line.get(close + 1..)?.split_whitespace().collect();
        // fields[0] is the state (field 3); starttime is field 22
        let ppid = fields.get(1)?.parse().ok()?;
        let pgrp = fields.get(2)?.parse().ok()?;
        let start_time = fields.get(19)?.parse().ok()?;
        Some(StatLine {
            name,
            ppid,
            pgrp,
            start_time,
        })
    }

    fn read_stat(pid: u32) -> Option<StatLine> {
        let line = fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
        parse_stat(&line)
    }

    /// Every live pid except `skip`, with its stat line
    fn scan(skip: u32) -> Vec<(u32, StatLine)> {
        let Ok(dir) = fs::read_dir("/proc") else {
            return Vec::new();
        };
        let mut processes: Vec<(u32, StatLine)> = dir
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
            .filter(|&candidate| candidate != skip)
            .filter_map(|candidate| Some((candidate, read_stat(candidate)?)))
            .collect();
        processes.sort_by_key(|(pid, _)| *pid);
        processes
    }

    impl ProcessTable for ProcFs {
        fn list_children(&self, pid: u32) -> Vec<ProcessEntry> {
            let Some(parent) = read_stat(pid) else {
                return Vec::new();
            };
            scan(pid)
                .into_iter()
                .filter(|(_, stat)| stat.ppid == pid && stat.start_time >= parent.start_time)
                .map(|(pid, stat)| ProcessEntry {
                    pid,
                    name: stat.name,
                })
                .collect()
        }

        fn list_group(&self, pgid: u32) -> Vec<ProcessEntry> {
            scan(pgid)
                .into_iter()
                .filter(|(_, stat)| stat.pgrp == pgid)
                .map(|(pid, stat)| ProcessEntry {
                    pid,
                    name: stat.name,
                })
                .collect()
        }
    }

}

#[cfg(windows)]
mod windows {
    use std::mem;

    use winapi::shared::minwindef::{FALSE, FILETIME};
    use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
    use winapi::um::processthreadsapi::{GetProcessTimes, OpenProcess, TerminateProcess};
    use winapi::um::tlhelp32::{
        CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
        TH32CS_SNAPPROCESS,
    };
    use winapi::um::winnt::{HANDLE, PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_TERMINATE};

    use super::{ProcessEntry, ProcessTable};

    /// Walks a toolhelp process snapshot
    pub(super) struct Toolhelp;

    /// Closes a handle on drop
    struct OwnedHandle(HANDLE);

    impl Drop for OwnedHandle {
        fn drop(&mut self) {
            // SAFETY: the handle was returned by a successful Win32 call and is closed once
            unsafe {
                CloseHandle(self.0);
            }
        }
    }

    fn open(pid: u32, access: u32) -> Option<OwnedHandle> {
        // SAFETY: OpenProcess has no memory preconditions; null means failure
        let handle = unsafe { OpenProcess(access, FALSE, pid) };
        (!handle.is_null()).then_some(OwnedHandle(handle))
    }

    /// Creation time in 100ns units since 1601
    fn start_time(pid: u32) -> Option<u64> {
        let handle = open(pid, PROCESS_QUERY_LIMITED_INFORMATION)?;
        let zero = FILETIME {
            dwLowDateTime: 0,
            dwHighDateTime: 0,
        };
        let (mut created, mut exited, mut kernel, mut user) = (zero, zero, zero, zero);
        // SAFETY: all out-pointers reference live stack values
        let ok = unsafe { GetProcessTimes(handle.0, &mut created, &mut exited, &mut kernel, &mut user) };
        (ok != 0).then(|| (u64::from(created.dwHighDateTime) << 32) | u64::from(created.dwLowDateTime))
    }

    fn snapshot() -> Vec<(u32, u32, String)> {
        let mut processes = Vec::new();
        // SAFETY: the snapshot handle is checked and closed by OwnedHandle
        unsafe {
            let raw = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0);
            if raw == INVALID_HANDLE_VALUE {
                return processes;
            }
            let snapshot = OwnedHandle(raw);
            let mut entry: PROCESSENTRY32W = mem::zeroed();
            entry.dwSize = mem::size_of::<PROCESSENTRY32W>() as u32;
            let mut more = Process32FirstW(snapshot.0, &mut entry);
            while more != 0 {
                let len = entry
                    .szExeFile
                    .iter()
                    .position(|&c| c == 0)
                    .unwrap_or(entry.szExeFile.len());
                let name = String::from_utf16_lossy(&entry.szExeFile[..len]);
                processes.push((entry.th32ProcessID, entry.th32ParentProcessID, name));
                more = Process32NextW(snapshot.0, &mut entry);
            }
        }
        processes
    }

    impl ProcessTable for Toolhelp {
        fn list_children(&self, pid: u32) -> Vec<ProcessEntry> {
            let Some(parent_start) = start_time(pid) else {
                return Vec::new();
            };
            snapshot()
                .into_iter()
                .filter(|(child, ppid, _)| *ppid == pid && *child != pid)
                .filter(|(child, _, _)| start_time(*child).map_or(false, |t| t > parent_start))
                .map(|(child, _, name)| ProcessEntry { pid: child, name })
                .collect()
        }
    }

    pub(super) fn terminate(pid: u32) -> bool {
        let Some(handle) = open(pid, PROCESS_TERMINATE) else {
            return false;
        };
        // SAFETY: handle is a live process handle with terminate access
        unsafe { TerminateProcess(handle.0, 1) != 0 }
    }
}
