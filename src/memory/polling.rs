use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc::{self, RecvTimeoutError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::Context;
use tracing::{debug, warn};

use super::{ExceededCallback, MemoryLimiter, BYTES_PER_MB};
use crate::process_tree::ProcessTree;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Samples the resident memory of a process tree from a background thread.
///
/// Each sample sums the child and all its live descendants, so an interpreter spawning a worker
/// is accounted for. A process that vanishes between samples ends the watch, it is never
/// reported as a violation.
pub struct PollingMemoryLimiter {
    limit_mb: u64,
    interval: Duration,
    peak_bytes: Arc<AtomicU64>,
    exceeded: Arc<AtomicBool>,
    monitor: Option<Monitor>,
}

struct Monitor {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl PollingMemoryLimiter {
    pub fn new(limit_mb: u64) -> Self {
        Self::with_interval(limit_mb, POLL_INTERVAL)
    }

    pub fn with_interval(limit_mb: u64, interval: Duration) -> Self {
        Self {
            limit_mb,
            interval,
            peak_bytes: Arc::new(AtomicU64::new(0)),
            exceeded: Arc::new(AtomicBool::new(false)),
            monitor: None,
        }
    }
}

impl MemoryLimiter for PollingMemoryLimiter {
    fn name(&self) -> &'static str {
        "polling"
    }

    fn limit_mb(&self) -> u64 {
        self.limit_mb
    }

    fn start_monitoring(&mut self, pid: u32, on_exceeded: ExceededCallback) -> anyhow::Result<()> {
        self.stop_monitoring();

        let limit_bytes = self.limit_mb.saturating_mul(BYTES_PER_MB);
        let interval = self.interval;
        let peak = Arc::clone(&self.peak_bytes);
        let exceeded = Arc::clone(&self.exceeded);
        let (stop, stop_rx) = mpsc::channel();

        let handle = thread::Builder::new()
            .name(format!("memory-monitor-{pid}"))
            .spawn(move || {
                let mut tree = ProcessTree::new();
                loop {
                    tree.refresh();
                    let Some(used) = tree.resident_bytes(pid) else {
                        debug!("process {pid} ended, memory watch stops");
                        break;
                    };
                    peak.fetch_max(used, Ordering::SeqCst);
                    if used > limit_bytes && !exceeded.swap(true, Ordering::SeqCst) {
                        debug!(
                            "process {pid} uses {} MB, above the {} MB limit",
                            used / BYTES_PER_MB,
                            limit_bytes / BYTES_PER_MB
                        );
                        on_exceeded();
                    }
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .context("could not spawn memory monitor thread")?;

        self.monitor = Some(Monitor { stop, handle });
        Ok(())
    }

    fn stop_monitoring(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            // the thread may already be gone, a closed channel is fine
            let _ = monitor.stop.send(());
            if monitor.handle.join().is_err() {
                warn!("memory monitor thread panicked");
            }
        }
    }

    fn peak_memory_mb(&self) -> Option<u64> {
        match self.peak_bytes.load(Ordering::SeqCst) {
            0 => None,
            bytes => Some(bytes / BYTES_PER_MB),
        }
    }

    fn limit_reached(&self) -> bool {
        self.exceeded.load(Ordering::SeqCst)
    }
}

impl Drop for PollingMemoryLimiter {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}
