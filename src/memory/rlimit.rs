use std::{os::unix::process::CommandExt, process::Command};

use super::{MemoryLimiter, BYTES_PER_MB};

/// Caps the child's virtual address space with `RLIMIT_AS`, set between `fork` and `exec`.
///
/// Allocations beyond the ceiling fail inside the child (`ENOMEM`), which usually ends it with
/// an error. Nothing runs in the parent, so no peak is measured.
pub struct RlimitMemoryLimiter {
    limit_mb: u64,
}

impl RlimitMemoryLimiter {
    pub fn new(limit_mb: u64) -> Self {
        Self { limit_mb }
    }
}

impl MemoryLimiter for RlimitMemoryLimiter {
    fn name(&self) -> &'static str {
        "rlimit"
    }

    fn limit_mb(&self) -> u64 {
        self.limit_mb
    }

    fn apply_pre_exec(&self, command: &mut Command) {
        let limit_bytes = self.limit_mb.saturating_mul(BYTES_PER_MB) as libc::rlim_t;
        // SAFETY: setrlimit is async-signal-safe and the closure touches no shared state.
        unsafe {
            command.pre_exec(move || {
                let limit = libc::rlimit {
                    rlim_cur: limit_bytes,
                    rlim_max: limit_bytes,
                };
                if libc::setrlimit(libc::RLIMIT_AS, &limit) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }
}
