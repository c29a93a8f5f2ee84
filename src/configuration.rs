//! Config for the grader behaviors
//!
//! Two layers of configuration exist:
//!
//! - [`Configuration`] controls the grader itself (progress output, log file, report directory).
//! - [`ProblemConfig`] is the resolved configuration of one problem: resource limits, the
//!   verifier and runner to use, and per-test-case scores. It is normally produced by the
//!   configuration loader, which merges the problem's own settings over the defaults below.
//!
//! Both can be built programmatically with `new()` and the `with_*` setters, or read from
//! environment variables with `from_env()`.
//!
//! # Environment Variables
//!
//! All values are optional. Flags are case-insensitive, set them to `"true"` to enable.
//!
//! - `HAMMURABI_VERBOSE` — Print per test case progress (default: `true`)
//! - `HAMMURABI_LOG` — Enable logging to a file in the output directory (default: `false`)
//! - `HAMMURABI_OUTPUT_DIR` — Directory receiving run artifacts and logs (default: `reports`)
//! - `HAMMURABI_MEMORY_LIMIT_MB` — Memory ceiling per run, in MB (default: `512`)
//! - `HAMMURABI_TIME_MULTIPLIER` — Factor applied to every time limit (default: `1.0`)
//! - `HAMMURABI_VERIFIER` — Verifier name (default: `exact`)
//! - `HAMMURABI_MEMORY_STRATEGY` — `polling` or `kernel` (default: `polling`)

use std::{collections::HashMap, env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{bail, Context};
use tracing::warn;

/// Configuration for grader behaviors.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub(crate) verbose: bool,
    pub(crate) log: bool,
    pub(crate) output_dir: PathBuf,
}

impl Configuration {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - The grader prints one progress line per test case to stdout.
    /// - Logging to file is disabled.
    /// - Run artifacts are written under `reports/`.
    pub fn new() -> Self {
        Self {
            verbose: true,
            log: false,
            output_dir: PathBuf::from("reports"),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// The following environment variables are recognized:
    /// - `HAMMURABI_VERBOSE`: if set to `"true"`, enables progress output (default: `true`)
    /// - `HAMMURABI_LOG`: if set to `"true"`, enables logging to file (default: `false`)
    /// - `HAMMURABI_OUTPUT_DIR`: output directory (default: `reports`)
    ///
    /// Any other value (including unset) will result in using the default value for each field.
    pub fn from_env() -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        Self {
            verbose: get_env_flag("HAMMURABI_VERBOSE", true),
            log: get_env_flag("HAMMURABI_LOG", false),
            output_dir: env::var_os("HAMMURABI_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("reports")),
        }
    }

    /// Enable or disable progress output.
    pub fn with_verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Set the directory receiving run artifacts (`<output>/<problem>/<author>/<testcase>.*`).
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn output_dir(&self) -> &std::path::Path {
        &self.output_dir
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

/// How the memory ceiling of a run is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryStrategy {
    /// Sample the resident memory of the process tree in a background thread.
    #[default]
    Polling,
    /// Let the OS enforce the ceiling (address-space rlimit on Linux, job object on Windows).
    /// Falls back to polling where no kernel mechanism is available.
    Kernel,
}

impl FromStr for MemoryStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "polling" => Ok(MemoryStrategy::Polling),
            "kernel" => Ok(MemoryStrategy::Kernel),
            other => bail!("Unknown memory strategy '{other}' (expected 'polling' or 'kernel')"),
        }
    }
}

impl Display for MemoryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryStrategy::Polling => write!(f, "polling"),
            MemoryStrategy::Kernel => write!(f, "kernel"),
        }
    }
}

/// Per-language time limits, in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeLimits {
    default: f64,
    per_language: HashMap<String, f64>,
}

impl TimeLimits {
    /// Limits used when the problem does not override anything.
    pub fn new() -> Self {
        let per_language = [
            ("c", 4.0),
            ("cpp", 4.0),
            ("csharp", 6.0),
            ("java", 8.0),
            ("javascript", 20.0),
            ("php", 18.0),
            ("python", 20.0),
            ("ruby", 20.0),
            ("scala", 14.0),
        ]
        .into_iter()
        .map(|(lang, secs)| (lang.to_string(), secs))
        .collect();
        Self {
            default: 20.0,
            per_language,
        }
    }

    /// Limit for `language`, or the default one for unknown or missing languages.
    pub fn for_language(&self, language: Option<&str>) -> f64 {
        language
            .and_then(|lang| self.per_language.get(lang))
            .copied()
            .unwrap_or(self.default)
    }

    #[must_use]
    pub fn with_language(mut self, language: &str, secs: f64) -> Self {
        self.per_language.insert(language.to_string(), secs);
        self
    }

    #[must_use]
    pub fn with_default(self, secs: f64) -> Self {
        Self {
            default: secs,
            ..self
        }
    }
}

impl Default for TimeLimits {
    fn default() -> Self {
        Self::new()
    }
}

/// Resource limits of one problem.
#[derive(Debug, Clone, PartialEq)]
pub struct Limits {
    pub memory_mb: u64,
    pub time: TimeLimits,
    pub time_limit_multiplier: f64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            memory_mb: 512,
            time: TimeLimits::new(),
            time_limit_multiplier: 1.0,
        }
    }
}

impl Limits {
    /// Base limit times the multiplier.
    pub fn effective_time_limit(&self, language: Option<&str>) -> Duration {
        saturating_secs(self.time.for_language(language) * self.time_limit_multiplier)
    }
}

/// Converts seconds to a [`Duration`], out of range values saturate to [`Duration::MAX`].
pub(crate) fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Resolved configuration of a single problem.
///
/// # Examples
///
/// ```
/// # use hammurabi::configuration::{MemoryStrategy, ProblemConfig};
/// let config = ProblemConfig::new()
///     .with_memory_limit_mb(256)
///     .with_time_limit("python", 2.0)
///     .with_verifier("words")
///     .with_memory_strategy(MemoryStrategy::Polling);
/// assert_eq!(config.limits.time.for_language(Some("python")), 2.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ProblemConfig {
    pub limits: Limits,
    pub verifier: String,
    pub runner: String,
    pub memory_strategy: MemoryStrategy,
    testcase_scores: HashMap<String, u32>,
}

impl ProblemConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by environment variables.
    ///
    /// Values that cannot be parsed are ignored with a warning.
    ///
    /// - `HAMMURABI_MEMORY_LIMIT_MB`: memory ceiling in MB
    /// - `HAMMURABI_TIME_MULTIPLIER`: time limit multiplier (float)
    /// - `HAMMURABI_VERIFIER`: verifier name
    /// - `HAMMURABI_MEMORY_STRATEGY`: `polling` or `kernel`
    #[must_use]
    pub fn from_env() -> Self {
        fn parse_var<T: FromStr>(var: &str) -> Option<T> {
            let raw = env::var(var).ok()?;
            match raw.trim().parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring invalid value '{raw}' for {var}");
                    None
                }
            }
        }

        let mut config = Self::default();
        if let Some(memory_mb) = parse_var("HAMMURABI_MEMORY_LIMIT_MB") {
            config.limits.memory_mb = memory_mb;
        }
        if let Some(multiplier) = parse_var("HAMMURABI_TIME_MULTIPLIER") {
            config.limits.time_limit_multiplier = multiplier;
        }
        if let Ok(verifier) = env::var("HAMMURABI_VERIFIER") {
            config.verifier = verifier;
        }
        if let Some(strategy) = parse_var("HAMMURABI_MEMORY_STRATEGY") {
            config.memory_strategy = strategy;
        }
        config
    }

    /// Sets the memory ceiling of each run (in MB).
    #[must_use]
    pub fn with_memory_limit_mb(mut self, memory_mb: u64) -> Self {
        self.limits.memory_mb = memory_mb;
        self
    }

    /// Overrides the base time limit of one language (in seconds).
    #[must_use]
    pub fn with_time_limit(mut self, language: &str, secs: f64) -> Self {
        self.limits.time = self.limits.time.with_language(language, secs);
        self
    }

    /// Sets the time limit used for languages without their own entry (in seconds).
    #[must_use]
    pub fn with_default_time_limit(mut self, secs: f64) -> Self {
        self.limits.time = self.limits.time.with_default(secs);
        self
    }

    #[must_use]
    pub fn with_time_limit_multiplier(mut self, multiplier: f64) -> Self {
        self.limits.time_limit_multiplier = multiplier;
        self
    }

    #[must_use]
    pub fn with_verifier(mut self, name: impl Into<String>) -> Self {
        self.verifier = name.into();
        self
    }

    #[must_use]
    pub fn with_runner(mut self, name: impl Into<String>) -> Self {
        self.runner = name.into();
        self
    }

    #[must_use]
    pub fn with_memory_strategy(mut self, strategy: MemoryStrategy) -> Self {
        self.memory_strategy = strategy;
        self
    }

    /// Sets the score weight of the test case named `testcase`.
    #[must_use]
    pub fn with_testcase_score(mut self, testcase: &str, score: u32) -> Self {
        self.testcase_scores.insert(testcase.to_string(), score);
        self
    }

    /// Score weight of a test case, `1` unless overridden.
    pub fn testcase_score(&self, testcase: &str) -> u32 {
        self.testcase_scores.get(testcase).copied().unwrap_or(1)
    }

    /// Rejects limits no run could satisfy.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.limits.memory_mb == 0 {
            bail!("Memory limit must be positive");
        }
        let multiplier = self.limits.time_limit_multiplier;
        if !(multiplier.is_finite() && multiplier > 0.0) {
            bail!("Time limit multiplier must be a positive number, got {multiplier}");
        }
        let time = &self.limits.time;
        for (language, secs) in std::iter::once(("default", &time.default))
            .chain(time.per_language.iter().map(|(l, s)| (l.as_str(), s)))
        {
            if !(secs.is_finite() && *secs > 0.0) {
                bail!("Time limit for {language} must be a positive number, got {secs}");
            }
            Duration::try_from_secs_f64(secs * multiplier).with_context(|| {
                format!("Time limit for {language} is out of range ({secs} s x {multiplier})")
            })?;
        }
        Ok(())
    }
}

impl Default for ProblemConfig {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            verifier: "exact".to_string(),
            runner: "subprocess".to_string(),
            memory_strategy: MemoryStrategy::default(),
            testcase_scores: HashMap::new(),
        }
    }
}
