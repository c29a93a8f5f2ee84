use std::{
    process::{Child, ExitStatus},
    sync::{Mutex, MutexGuard, PoisonError},
    thread,
    time::Duration,
};

use tracing::{debug, instrument, trace};

use crate::process_tree::ProcessTree;

/// Why a process tree was killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillReason {
    Timeout,
    MemoryExceeded,
}

#[derive(Debug)]
struct GateState {
    child: Child,
    exit_status: Option<ExitStatus>,
    reason: Option<KillReason>,
}

/// The single point through which a child process is reaped or killed.
///
/// Reaping and killing both happen under the same lock. A child that has not been reaped keeps
/// its pid, so a kill can never hit an unrelated process that reused it. Only the first kill
/// does anything, later ones (or kills after the exit) are no-ops.
///
/// On Unix the child is expected to lead its own process group (see
/// [`CommandExt::process_group`](std::os::unix::process::CommandExt::process_group)): background
/// processes it leaves behind are orphaned out of the process tree but stay in the group.
#[derive(Debug)]
pub struct KillGate {
    pid: u32,
    state: Mutex<GateState>,
}

impl KillGate {
    pub fn new(child: Child) -> Self {
        Self {
            pid: child.id(),
            state: Mutex::new(GateState {
                child,
                exit_status: None,
                reason: None,
            }),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        // every update leaves the state consistent, a panic elsewhere does not corrupt it
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reaps the child if it has exited.
    pub fn try_wait(&self) -> std::io::Result<Option<ExitStatus>> {
        let mut state = self.lock();
        if state.exit_status.is_none() {
            state.exit_status = state.child.try_wait()?;
        }
        Ok(state.exit_status)
    }

    /// Blocks until the child exits (naturally or killed), checking every `poll`.
    pub fn wait(&self, poll: Duration) -> std::io::Result<ExitStatus> {
        loop {
            if let Some(status) = self.try_wait()? {
                return Ok(status);
            }
            thread::sleep(poll);
        }
    }

    /// Kills the child and all its descendants, deepest first.
    ///
    /// Returns `false` when the child already exited or a kill already happened.
    #[instrument(skip(self), fields(pid = self.pid))]
    pub fn kill_tree(&self, reason: KillReason) -> bool {
        let mut state = self.lock();
        if state.exit_status.is_some() || state.reason.is_some() {
            trace!("kill ignored, process already exited or killed");
            return false;
        }
        state.reason = Some(reason);

        let mut tree = ProcessTree::new();
        tree.refresh();
        let descendants = tree.kill_descendants(self.pid);
        kill_group(self.pid);
        if let Err(e) = state.child.kill() {
            // the child exited between the last poll and now
            trace!("child kill failed: {e}");
        }
        debug!("killed process tree ({reason:?}, {descendants} descendants)");
        true
    }

    /// Kills the processes a reaped child left running.
    ///
    /// Does nothing until the child has been reaped.
    #[instrument(skip(self), fields(pid = self.pid))]
    pub fn kill_leftovers(&self) {
        let state = self.lock();
        if state.exit_status.is_none() {
            return;
        }
        if kill_group(self.pid) {
            debug!("killed processes left in the group");
        }
        #[cfg(not(unix))]
        {
            // without process groups, only parent links still point at the exited child
            let mut tree = ProcessTree::new();
            tree.refresh();
            let leftovers = tree.kill_descendants(self.pid);
            if leftovers > 0 {
                debug!("killed {leftovers} leftover processes");
            }
        }
    }

    pub fn reason(&self) -> Option<KillReason> {
        self.lock().reason
    }
}

impl Drop for KillGate {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.exit_status.is_none() {
            let mut tree = ProcessTree::new();
            tree.refresh();
            tree.kill_descendants(self.pid);
            let _ = state.child.kill();
            let _ = state.child.wait();
        }
        kill_group(self.pid);
    }
}

/// Sends `SIGKILL` to the process group led by `pgid`. Returns whether any process got it.
///
/// The id of a group is not handed out again while a member is alive, so this stays safe after
/// the leader was reaped.
#[cfg(unix)]
fn kill_group(pgid: u32) -> bool {
    match libc::pid_t::try_from(pgid) {
        // 0 and 1 would target the grader's own group and init
        Ok(pgid) if pgid > 1 => {
            // SAFETY: kill has no memory safety preconditions.
            unsafe { libc::kill(-pgid, libc::SIGKILL) == 0 }
        }
        _ => false,
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) -> bool {
    false
}
