use std::{
    fs::File,
    process::{ExitStatus, Stdio},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use tracing::{debug, instrument, warn};

use super::{
    kill_gate::{KillGate, KillReason},
    watchdog::Watchdog,
    CommandLine, RunnerError, SolutionRunner, DEFAULT_MEMORY_LIMIT_MB,
};
use crate::{
    memory::{create_memory_limiter, MemoryLimiter},
    model::TestRun,
};

/// Runs the command as a direct child process of the grader.
#[derive(Debug, Clone)]
pub struct SubprocessRunner {
    wait_poll: Duration,
}

impl SubprocessRunner {
    pub fn new() -> Self {
        Self {
            wait_poll: Duration::from_millis(5),
        }
    }

    /// Starts both watchers and blocks until the child is gone.
    fn supervise(
        &self,
        gate: &Arc<KillGate>,
        limiter: &mut dyn MemoryLimiter,
        time_limit: Duration,
    ) -> anyhow::Result<ExitStatus> {
        let memory_gate = Arc::clone(gate);
        limiter.start_monitoring(
            gate.pid(),
            Box::new(move || {
                memory_gate.kill_tree(KillReason::MemoryExceeded);
            }),
        )?;

        let timer_gate = Arc::clone(gate);
        let _watchdog = Watchdog::start(time_limit, move || {
            timer_gate.kill_tree(KillReason::Timeout);
        })?;

        gate.wait(self.wait_poll)
            .context("could not wait for the solution process")
    }
}

impl Default for SubprocessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl SolutionRunner for SubprocessRunner {
    #[instrument(skip_all, fields(author = %run.solution.author, testcase = %run.testcase.name))]
    fn run(&self, run: &mut TestRun, command: &CommandLine) -> Result<ExitStatus, RunnerError> {
        let time_limit = run.effective_time_limit();
        let memory_limit_mb = match run.memory_limit_mb {
            0 => DEFAULT_MEMORY_LIMIT_MB,
            limit => limit,
        };
        let mut limiter =
            create_memory_limiter(run.solution.problem.config.memory_strategy, memory_limit_mb);

        let workdir = run
            .solution
            .root_dir
            .as_deref()
            .context("solution has no directory to run in")?;
        let stdout = File::create(&run.stdout_path)
            .with_context(|| format!("could not create {}", run.stdout_path.display()))?;
        let stderr = File::create(&run.stderr_path)
            .with_context(|| format!("could not create {}", run.stderr_path.display()))?;

        let mut process = command.to_command();
        process
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            process.process_group(0);
        }
        limiter.apply_pre_exec(&mut process);

        debug!(
            "running `{command}` ({:.2} s, {memory_limit_mb} MB, {} limiter)",
            time_limit.as_secs_f64(),
            limiter.name()
        );
        run.record_lean_start();
        let child = process.spawn().map_err(|source| RunnerError::Spawn {
            program: command.program.clone(),
            source,
        })?;
        limiter.attach(&child);
        let gate = Arc::new(KillGate::new(child));

        let waited = self.supervise(&gate, limiter.as_mut(), time_limit);
        run.record_lean_end();
        limiter.stop_monitoring();
        gate.kill_leftovers();
        let status = waited?;

        // a memory violation can surface as a crash or as a late timeout, it wins over both
        if gate.reason() == Some(KillReason::MemoryExceeded) || limiter.limit_reached() {
            let peak_mb = limiter.peak_memory_mb();
            warn!("memory limit exceeded (peak: {peak_mb:?} MB)");
            return Err(RunnerError::MemoryExceeded {
                limit_mb: memory_limit_mb,
                peak_mb,
            });
        }
        if gate.reason() == Some(KillReason::Timeout) {
            warn!("time limit exceeded");
            return Err(RunnerError::Timeout {
                limit_secs: time_limit.as_secs_f64(),
            });
        }
        debug!("process exited: {status}");
        Ok(status)
    }
}
