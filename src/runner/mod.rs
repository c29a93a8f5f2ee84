//! Resource-limited execution of a solution's run command.
//!
//! A [`SolutionRunner`] spawns the command for one [`TestRun`], enforces its wall-clock and memory
//! limits and reports how the process ended. Limit violations are typed errors
//! ([`RunnerError::Timeout`], [`RunnerError::MemoryExceeded`]) so the adapter can turn them into
//! verdicts without inspecting messages.
//!
//! Runners are looked up by name (`ProblemConfig::runner`) in a [`RunnerRegistry`]; the built-in
//! one is `"subprocess"`.

use std::{fmt::Display, process::ExitStatus};

use crate::{model::TestRun, registry::Registry};

mod kill_gate;
mod subprocess;
mod watchdog;

pub use kill_gate::{KillGate, KillReason};
pub use subprocess::SubprocessRunner;
pub use watchdog::Watchdog;

/// Memory ceiling used when a run carries none.
pub const DEFAULT_MEMORY_LIMIT_MB: u64 = 512;

/// How a run ended when it did not end on its own.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("process exceeded the time limit of {limit_secs:.2} s")]
    Timeout { limit_secs: f64 },
    #[error("process exceeded the memory limit of {limit_mb} MB")]
    MemoryExceeded { limit_mb: u64, peak_mb: Option<u64> },
    #[error("could not start '{program}'")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Executes a command for a test run under the run's limits.
pub trait SolutionRunner: Send + Sync {
    /// Runs `command` in the solution directory, stdout and stderr going to the run's files.
    ///
    /// Records the lean start and end times on `run`. Returns the natural exit status, or the
    /// limit that was violated.
    fn run(&self, run: &mut TestRun, command: &CommandLine) -> Result<ExitStatus, RunnerError>;
}

pub type RunnerRegistry = Registry<dyn SolutionRunner>;

/// Registry holding the built-in `"subprocess"` runner.
pub fn default_runners() -> RunnerRegistry {
    let mut registry = RunnerRegistry::new("runner");
    registry.register("subprocess", || Box::new(SubprocessRunner::new()));
    registry
}

/// A program, its arguments and extra environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Arguments are already quoted for the target program and go on the Windows command line
    /// as they are.
    pub raw_args: bool,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            raw_args: false,
        }
    }

    /// Builds a command from `[program, args...]`.
    pub fn from_parts(parts: impl IntoIterator<Item = String>) -> anyhow::Result<Self> {
        let mut parts = parts.into_iter();
        let program = parts
            .next()
            .filter(|program| !program.is_empty())
            .ok_or_else(|| anyhow::anyhow!("empty command line"))?;
        Ok(Self {
            program,
            args: parts.collect(),
            env: Vec::new(),
            raw_args: false,
        })
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Marks the arguments as pre-quoted, they are passed with `raw_arg` on Windows.
    ///
    /// `cmd.exe` does not understand the `\"` escapes the standard library writes, so a script
    /// containing quoted paths has to reach it verbatim.
    #[must_use]
    pub fn raw_args(mut self) -> Self {
        self.raw_args = true;
        self
    }

    pub fn to_command(&self) -> std::process::Command {
        let mut command = std::process::Command::new(&self.program);
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            if self.raw_args {
                for arg in &self.args {
                    command.raw_arg(arg);
                }
            } else {
                command.args(&self.args);
            }
        }
        #[cfg(not(windows))]
        {
            command.args(&self.args);
        }
        command.envs(self.env.iter().map(|(k, v)| (k, v)));
        command
    }
}

impl Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let quote = |part: &str| {
            if part.is_empty() || part.contains(char::is_whitespace) {
                format!("\"{part}\"")
            } else {
                part.to_string()
            }
        };
        write!(f, "{}", quote(&self.program))?;
        for arg in &self.args {
            if self.raw_args {
                write!(f, " {arg}")?;
            } else {
                write!(f, " {}", quote(arg))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod runner_tests {
    use super::*;

    #[test]
    fn command_line_display_quotes_spaces() {
        let command = CommandLine::new("java")
            .args(["-cp", "/my solutions/alice"])
            .arg("Main");
        assert_eq!(command.to_string(), "java -cp \"/my solutions/alice\" Main");
    }

    #[test]
    fn raw_arguments_are_displayed_verbatim() {
        let command = CommandLine::new("cmd")
            .args(["/S", "/C", "\"\"C:\\VS\\vcvarsall.bat\" x64 && cl\""])
            .raw_args();
        assert_eq!(
            command.to_string(),
            r#"cmd /S /C ""C:\VS\vcvarsall.bat" x64 && cl""#
        );
    }

    #[test]
    fn command_line_from_parts() {
        let command =
            CommandLine::from_parts(["python".to_string(), "main.py".to_string()]).unwrap();
        assert_eq!(command.program, "python");
        assert_eq!(command.args, ["main.py"]);
        assert!(CommandLine::from_parts(Vec::<String>::new()).is_err());
    }

    #[test]
    fn only_subprocess_runner_is_built_in() {
        let runners = default_runners();
        assert!(runners.create("subprocess").is_ok());
        let error = runners.create("docker").err().unwrap();
        assert!(error.to_string().contains("expected one of: subprocess"));
    }
}
