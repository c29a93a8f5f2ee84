use std::{
    sync::mpsc::{self, RecvTimeoutError},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::Context;
use tracing::warn;

/// One-shot timer thread. Cancelled (and joined) on drop.
pub struct Watchdog {
    cancel: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Runs `on_expired` after `limit`, unless cancelled first.
    pub fn start(limit: Duration, on_expired: impl FnOnce() + Send + 'static) -> anyhow::Result<Self> {
        let (cancel, cancelled) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("timeout-watchdog".into())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = cancelled.recv_timeout(limit) {
                    on_expired();
                }
            })
            .context("could not spawn watchdog thread")?;
        Ok(Self {
            cancel: Some(cancel),
            handle: Some(handle),
        })
    }

    pub fn cancel(&mut self) {
        // dropping the sender wakes the thread up
        self.cancel.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("watchdog callback panicked");
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod watchdog_tests {
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        time::Instant,
    };

    use super::*;

    #[test]
    fn fires_after_the_limit() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let mut watchdog = Watchdog::start(Duration::from_millis(20), move || {
            flag.store(true, Ordering::SeqCst)
        })
        .unwrap();
        thread::sleep(Duration::from_millis(100));
        watchdog.cancel();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn cancel_is_prompt_and_silent() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let start = Instant::now();
        let watchdog = Watchdog::start(Duration::from_secs(30), move || {
            flag.store(true, Ordering::SeqCst)
        })
        .unwrap();
        drop(watchdog);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!fired.load(Ordering::SeqCst));
    }
}
