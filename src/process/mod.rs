//! Process Module
//!
//! Supervised process execution.
//!
//! ## Lifecycle
//! ```text
//! NotStarted ──► Running ──► Completed
//!      │            │
//!      │            ├──► TimedOut ──┐
//!      │            └──► Cancelled ─┴─► Terminating ──► Terminated
//!      └──► CouldNotLaunch
//! ```
//! A timed out or cancelled process is never abandoned: its whole
//! descendant tree is discovered and killed before the outcome is
//! returned. Descendants still running after the root exited are swept
//! through the root's process group.

mod args;
mod supervisor;
mod tree;

pub use args::split_arguments;
pub use supervisor::{
    cancel_pair, CancelHandle, CancelToken, ExecutionOutcome, ExecutionState, OutputLine,
    OutputStream, ProcessSpec, Supervisor,
};
pub use tree::{
    collect_tree, extend_with_group, kill_process, platform_table, terminate_tree, ProcessEntry,
    ProcessTable,
};

use std::fmt::Write as _;

use serde::Serialize;

use crate::error::Result;
use crate::protocol::{WireReader, WireRecord, WireWriter};

/// One process of a tree, with its nesting level below the root
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ProcessTreeItem {
    pub pid: i32,
    pub name: String,
    /// 0 for the root
    pub depth: i32,
}

impl ProcessTreeItem {
    pub fn new(pid: i32, name: impl Into<String>, depth: i32) -> Self {
        Self {
            pid,
            name: name.into(),
            depth,
        }
    }
}

impl WireRecord for ProcessTreeItem {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.write_i32(self.pid);
        writer.write_string(&self.name)?;
        writer.write_i32(self.depth);
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            pid: reader.read_i32()?,
            name: reader.read_string()?,
            depth: reader.read_i32()?,
        })
    }
}

/// Render a tree one process per line, indented by depth
///
/// ```text
///  [100] sh
/// -- [101] sleep
/// ```
pub fn format_process_tree(tree: &[ProcessTreeItem]) -> String {
    let mut out = String::new();
    for item in tree {
        let indent = "-".repeat(item.depth.max(0) as usize * 2);
        let _ = writeln!(out, "{} [{}] {}", indent, item.pid, item.name);
    }
    out
}
