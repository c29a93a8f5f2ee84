//! Memory ceilings for child processes.
//!
//! A [`MemoryLimiter`] enforces the memory limit of one run. Three strategies satisfy the same
//! contract, so the runner never needs to know which one is active:
//!
//! - [`PollingMemoryLimiter`]: a background thread sums the resident memory of the process tree
//!   and fires a callback on the first reading above the limit. Works everywhere and is the
//!   default, since per-process kernel ceilings interact badly with runtimes managing their own
//!   heap (JVM, .NET, V8).
//! - `RlimitMemoryLimiter` (Linux): caps the virtual address space of the child before `exec`.
//!   The kernel refuses allocations beyond it, no peak is reported.
//! - `JobObjectMemoryLimiter` (Windows): puts the child in a job object with a process memory
//!   ceiling and kill-on-close. Falls back to polling when the job cannot be set up.
//!
//! [`create_memory_limiter`] picks the implementation from a [`MemoryStrategy`] and the host OS.
//! That is the only place the OS is looked at.

use std::process::{Child, Command};

use crate::configuration::MemoryStrategy;

mod polling;
pub use polling::PollingMemoryLimiter;

#[cfg(target_os = "linux")]
mod rlimit;
#[cfg(target_os = "linux")]
pub use rlimit::RlimitMemoryLimiter;

#[cfg(windows)]
mod job_object;
#[cfg(windows)]
pub use job_object::JobObjectMemoryLimiter;

pub(crate) const BYTES_PER_MB: u64 = 1024 * 1024;

/// Invoked (at most once) from the monitoring thread when the limit is exceeded.
pub type ExceededCallback = Box<dyn Fn() + Send + 'static>;

/// Enforces the memory ceiling of one child process (and its descendants where supported).
///
/// The runner drives it in this order: [`apply_pre_exec`](Self::apply_pre_exec) on the command,
/// spawn, [`attach`](Self::attach), [`start_monitoring`](Self::start_monitoring), wait, then
/// [`stop_monitoring`](Self::stop_monitoring) on every exit path. Steps a strategy does not
/// need are no-ops.
pub trait MemoryLimiter: Send {
    fn name(&self) -> &'static str;

    fn limit_mb(&self) -> u64;

    /// Configures the command so the ceiling is in place before the program image loads.
    fn apply_pre_exec(&self, _command: &mut Command) {}

    /// Attaches to the freshly spawned child. Failures here are soft: the strategy degrades to
    /// another mechanism instead of failing the run.
    fn attach(&mut self, _child: &Child) {}

    /// Starts watching `pid`, `on_exceeded` fires the first time the limit is crossed.
    fn start_monitoring(&mut self, _pid: u32, _on_exceeded: ExceededCallback) -> anyhow::Result<()> {
        Ok(())
    }

    /// Stops the watch and releases OS resources. Idempotent.
    fn stop_monitoring(&mut self) {}

    /// Highest observed usage, when the mechanism can measure it.
    fn peak_memory_mb(&self) -> Option<u64> {
        None
    }

    /// Whether the process hit the ceiling without the callback being involved, as with kernel
    /// enforcement that makes allocations fail.
    fn limit_reached(&self) -> bool {
        false
    }
}

/// Builds the limiter for `strategy` on the current host.
pub fn create_memory_limiter(strategy: MemoryStrategy, limit_mb: u64) -> Box<dyn MemoryLimiter> {
    match strategy {
        MemoryStrategy::Polling => Box::new(PollingMemoryLimiter::new(limit_mb)),
        MemoryStrategy::Kernel => kernel_memory_limiter(limit_mb),
    }
}

#[cfg(target_os = "linux")]
fn kernel_memory_limiter(limit_mb: u64) -> Box<dyn MemoryLimiter> {
    Box::new(RlimitMemoryLimiter::new(limit_mb))
}

#[cfg(windows)]
fn kernel_memory_limiter(limit_mb: u64) -> Box<dyn MemoryLimiter> {
    Box::new(JobObjectMemoryLimiter::new(limit_mb))
}

#[cfg(not(any(target_os = "linux", windows)))]
fn kernel_memory_limiter(limit_mb: u64) -> Box<dyn MemoryLimiter> {
    tracing::debug!("no kernel memory limit on this platform, polling instead");
    Box::new(PollingMemoryLimiter::new(limit_mb))
}

#[cfg(test)]
mod memory_tests {
    use super::*;

    #[test]
    fn polling_is_the_default_everywhere() {
        let limiter = create_memory_limiter(MemoryStrategy::default(), 64);
        assert_eq!(limiter.name(), "polling");
        assert_eq!(limiter.limit_mb(), 64);
        assert_eq!(limiter.peak_memory_mb(), None);
        assert!(!limiter.limit_reached());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn kernel_strategy_uses_rlimit_on_linux() {
        let limiter = create_memory_limiter(MemoryStrategy::Kernel, 64);
        assert_eq!(limiter.name(), "rlimit");
    }
}
