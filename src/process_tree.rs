//! Snapshots of a process and its transitive children, built on `sysinfo`.

use std::collections::HashMap;

use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};
use tracing::trace;

/// A refreshable view of the host's process table.
pub(crate) struct ProcessTree {
    system: System,
}

impl ProcessTree {
    pub(crate) fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Reloads the process table, memory included. Exited processes are dropped.
    pub(crate) fn refresh(&mut self) {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
    }

    /// Loaded by `refresh`, and neither a zombie nor a thread entry.
    fn is_live(&self, pid: Pid) -> bool {
        self.system.process(pid).is_some_and(|process| {
            process.thread_kind().is_none() && process.status() != ProcessStatus::Zombie
        })
    }

    /// Live descendants of `root` (excluding `root`), parents listed before their children.
    pub(crate) fn descendants(&self, root: u32) -> Vec<Pid> {
        let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
        for (pid, process) in self.system.processes() {
            if let Some(parent) = process.parent() {
                if self.is_live(*pid) {
                    children.entry(parent).or_default().push(*pid);
                }
            }
        }

        let mut found = Vec::new();
        let mut frontier = vec![Pid::from_u32(root)];
        while let Some(pid) = frontier.pop() {
            if let Some(kids) = children.get(&pid) {
                for kid in kids {
                    // pid reuse can produce cycles in a stale snapshot
                    if *kid != Pid::from_u32(root) && !found.contains(kid) {
                        found.push(*kid);
                        frontier.push(*kid);
                    }
                }
            }
        }
        found
    }

    /// Resident memory of `root` and its live descendants, `None` once `root` has ended.
    pub(crate) fn resident_bytes(&self, root: u32) -> Option<u64> {
        let root_pid = Pid::from_u32(root);
        if !self.is_live(root_pid) {
            return None;
        }
        let total = std::iter::once(root_pid)
            .chain(self.descendants(root))
            .filter_map(|pid| self.system.process(pid))
            .map(|process| process.memory())
            .sum();
        Some(total)
    }

    /// Kills every live descendant of `root`, deepest first. Returns how many were signalled.
    ///
    /// Processes that exit in the meantime are skipped silently.
    pub(crate) fn kill_descendants(&self, root: u32) -> usize {
        let mut killed = 0;
        for pid in self.descendants(root).into_iter().rev() {
            if let Some(process) = self.system.process(pid) {
                if process.kill() {
                    trace!("killed descendant {pid} of {root}");
                    killed += 1;
                }
            }
        }
        killed
    }
}

#[cfg(all(test, unix))]
mod process_tree_tests {
    use std::{process::Command, thread, time::Duration};

    use super::*;

    #[test]
    fn finds_and_kills_grandchildren() {
        let mut child = Command::new("sh")
            .args(["-c", "sleep 30 & sleep 30 & wait"])
            .spawn()
            .unwrap();
        thread::sleep(Duration::from_millis(300));

        let mut tree = ProcessTree::new();
        tree.refresh();
        let descendants = tree.descendants(child.id());
        assert!(descendants.len() >= 2, "{descendants:?}");
        assert!(tree.resident_bytes(child.id()).unwrap() > 0);

        assert!(tree.kill_descendants(child.id()) >= 2);
        child.kill().unwrap();
        child.wait().unwrap();

        thread::sleep(Duration::from_millis(100));
        tree.refresh();
        assert!(descendants.iter().all(|pid| !tree.is_live(*pid)));
        assert_eq!(tree.resident_bytes(child.id()), None);
    }
}
