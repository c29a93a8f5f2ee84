use std::{
    ffi::c_void,
    mem,
    os::windows::io::AsRawHandle,
    process::Child,
    ptr,
};

use anyhow::bail;
use tracing::{debug, warn};
use windows_sys::Win32::{
    Foundation::{CloseHandle, HANDLE},
    System::JobObjects::{
        AssignProcessToJobObject, CreateJobObjectW, JobObjectExtendedLimitInformation,
        QueryInformationJobObject, SetInformationJobObject, JOBOBJECT_EXTENDED_LIMIT_INFORMATION,
        JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE, JOB_OBJECT_LIMIT_PROCESS_MEMORY,
    },
};

use super::{ExceededCallback, MemoryLimiter, PollingMemoryLimiter, BYTES_PER_MB};

/// Owned job object handle, closed on drop. Closing it kills every process still inside.
struct JobHandle(HANDLE);

// SAFETY: a job object handle may be used and closed from any thread.
unsafe impl Send for JobHandle {}

impl Drop for JobHandle {
    fn drop(&mut self) {
        // SAFETY: the handle came from CreateJobObjectW and is closed exactly once.
        unsafe {
            CloseHandle(self.0);
        }
    }
}

/// Windows job object with a per-process memory ceiling and kill-on-close.
///
/// If the job cannot be created, configured, or the child cannot be assigned to it, the limiter
/// silently switches to polling for the rest of the run.
pub struct JobObjectMemoryLimiter {
    limit_mb: u64,
    job: Option<JobHandle>,
    /// Peak read just before the job handle was closed.
    closed_peak: Option<u64>,
    fallback: Option<PollingMemoryLimiter>,
}

impl JobObjectMemoryLimiter {
    pub fn new(limit_mb: u64) -> Self {
        Self {
            limit_mb,
            job: None,
            closed_peak: None,
            fallback: None,
        }
    }

    fn limit_bytes(&self) -> u64 {
        self.limit_mb.saturating_mul(BYTES_PER_MB)
    }

    fn create_job(&self, child: &Child) -> anyhow::Result<JobHandle> {
        // SAFETY: null attributes and name are allowed, a null return means failure.
        let handle = unsafe { CreateJobObjectW(ptr::null(), ptr::null()) };
        if handle.is_null() {
            bail!("CreateJobObjectW failed: {}", std::io::Error::last_os_error());
        }
        let job = JobHandle(handle);

        // SAFETY: the structure is plain data, all-zero is a valid initial value.
        let mut info: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = unsafe { mem::zeroed() };
        info.BasicLimitInformation.LimitFlags =
            JOB_OBJECT_LIMIT_PROCESS_MEMORY | JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;
        info.ProcessMemoryLimit = usize::try_from(self.limit_bytes()).unwrap_or(usize::MAX);

        // SAFETY: `info` outlives the call and the length matches its type.
        let configured = unsafe {
            SetInformationJobObject(
                job.0,
                JobObjectExtendedLimitInformation,
                &info as *const _ as *const c_void,
                mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
            )
        };
        if configured == 0 {
            bail!("SetInformationJobObject failed: {}", std::io::Error::last_os_error());
        }

        // SAFETY: the child handle stays valid while `child` is borrowed.
        let assigned = unsafe { AssignProcessToJobObject(job.0, child.as_raw_handle() as HANDLE) };
        if assigned == 0 {
            bail!("AssignProcessToJobObject failed: {}", std::io::Error::last_os_error());
        }
        Ok(job)
    }

    fn peak_bytes(&self) -> Option<u64> {
        let Some(job) = self.job.as_ref() else {
            return self.closed_peak;
        };
        // SAFETY: see `create_job`.
        let mut info: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = unsafe { mem::zeroed() };
        let queried = unsafe {
            QueryInformationJobObject(
                job.0,
                JobObjectExtendedLimitInformation,
                &mut info as *mut _ as *mut c_void,
                mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
                ptr::null_mut(),
            )
        };
        (queried != 0).then_some(info.PeakProcessMemoryUsed as u64)
    }
}

impl MemoryLimiter for JobObjectMemoryLimiter {
    fn name(&self) -> &'static str {
        "job-object"
    }

    fn limit_mb(&self) -> u64 {
        self.limit_mb
    }

    fn attach(&mut self, child: &Child) {
        match self.create_job(child) {
            Ok(job) => self.job = Some(job),
            Err(e) => {
                warn!("job object unavailable, polling memory instead: {e}");
                self.fallback = Some(PollingMemoryLimiter::new(self.limit_mb));
            }
        }
    }

    fn start_monitoring(&mut self, pid: u32, on_exceeded: ExceededCallback) -> anyhow::Result<()> {
        match &mut self.fallback {
            Some(fallback) => fallback.start_monitoring(pid, on_exceeded),
            None => Ok(()),
        }
    }

    fn stop_monitoring(&mut self) {
        if let Some(fallback) = &mut self.fallback {
            fallback.stop_monitoring();
        }
        if self.job.is_some() {
            self.closed_peak = self.peak_bytes();
            if let Some(peak) = self.closed_peak {
                debug!("job object peak: {} MB", peak / BYTES_PER_MB);
            }
            self.job = None;
        }
    }

    fn peak_memory_mb(&self) -> Option<u64> {
        match &self.fallback {
            Some(fallback) => fallback.peak_memory_mb(),
            None => self.peak_bytes().map(|bytes| bytes / BYTES_PER_MB),
        }
    }

    /// Allocations failing near the ceiling are how the kernel enforces it.
    fn limit_reached(&self) -> bool {
        match &self.fallback {
            Some(fallback) => fallback.limit_reached(),
            None => self
                .peak_bytes()
                .is_some_and(|peak| peak + BYTES_PER_MB >= self.limit_bytes()),
        }
    }
}
