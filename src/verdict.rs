//! Outcome of a single (solution, test case) run.
//!
//! A [`Verdict`] is the classification of what happened, a [`TestRunResult`] pairs it with the
//! score it earned. Status codes are single characters and stable: reports key on them.
//!
//! | Code | Verdict            |
//! |------|--------------------|
//! | `C`  | Correct            |
//! | `W`  | Wrong answer       |
//! | `R`  | Runtime error      |
//! | `F`  | Format error       |
//! | `E`  | Compilation error  |
//! | `T`  | Timeout            |
//! | `M`  | Memory exceeded    |
//! | `N`  | Solution missing   |
//! | `U`  | Unverified         |
//! | `X`  | Judge internal error |

use std::fmt::Display;

/// What happened to a test run.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// The produced answer matched the expected one.
    Correct,
    /// The produced answer differs. Both sides are rendered for the report.
    WrongAnswer { expected: String, actual: String },
    /// The program failed without producing an answer and wrote to stderr.
    RuntimeError { stderr: String },
    /// The answer (or its absence) does not follow the expected format.
    FormatError { message: String },
    /// The solution did not compile.
    CompilationError { compiler_output: String },
    /// The program was killed after running for `limit_secs` seconds.
    Timeout { limit_secs: f64 },
    /// The program (or one of its descendants) used more memory than allowed.
    MemoryExceeded { limit_mb: u64, peak_mb: Option<u64> },
    /// No runnable entry point exists for this author and problem.
    SolutionMissing,
    /// The grader itself failed. `trace` holds the full error chain.
    InternalError { trace: String },
    /// Verification was skipped on purpose (reference solutions).
    Unverified { reason: String },
}

impl Verdict {
    /// Single-character wire identifier.
    pub fn status_code(&self) -> char {
        match self {
            Verdict::Correct => 'C',
            Verdict::WrongAnswer { .. } => 'W',
            Verdict::RuntimeError { .. } => 'R',
            Verdict::FormatError { .. } => 'F',
            Verdict::CompilationError { .. } => 'E',
            Verdict::Timeout { .. } => 'T',
            Verdict::MemoryExceeded { .. } => 'M',
            Verdict::SolutionMissing => 'N',
            Verdict::Unverified { .. } => 'U',
            Verdict::InternalError { .. } => 'X',
        }
    }

    /// Human readable status.
    pub fn status(&self) -> &'static str {
        match self {
            Verdict::Correct => "Correct Answer",
            Verdict::WrongAnswer { .. } => "Wrong Answer",
            Verdict::RuntimeError { .. } => "Runtime Error",
            Verdict::FormatError { .. } => "Invalid Output Format",
            Verdict::CompilationError { .. } => "Compilation Error",
            Verdict::Timeout { .. } => "Timeout",
            Verdict::MemoryExceeded { .. } => "Memory Limit Exceeded",
            Verdict::SolutionMissing => "Solution Missing",
            Verdict::Unverified { .. } => "Unverified",
            Verdict::InternalError { .. } => "Judge Internal Error",
        }
    }

    pub fn is_correct(&self) -> bool {
        matches!(self, Verdict::Correct)
    }

    /// Caused by the grader rather than by the candidate's program.
    pub fn is_judge_error(&self) -> bool {
        matches!(self, Verdict::InternalError { .. })
    }

    /// Reference runs are never scored.
    pub fn is_scored(&self) -> bool {
        !matches!(self, Verdict::Unverified { .. })
    }

    /// Diagnostic detail for reports, if the verdict carries any.
    pub fn details(&self) -> Option<String> {
        match self {
            Verdict::Correct | Verdict::SolutionMissing => None,
            Verdict::WrongAnswer { expected, actual } => {
                Some(format!("Expected: {expected}, Actual: {actual}"))
            }
            Verdict::RuntimeError { stderr } => Some(stderr.clone()),
            Verdict::FormatError { message } => Some(message.clone()),
            Verdict::CompilationError { compiler_output } => Some(compiler_output.clone()),
            Verdict::Timeout { limit_secs } => Some(format!(
                "Execution time exceeded the limit of {limit_secs:.2} seconds"
            )),
            Verdict::MemoryExceeded { limit_mb, peak_mb } => Some(match peak_mb {
                Some(peak) => {
                    format!("Memory usage of {peak} MB exceeded the limit of {limit_mb} MB")
                }
                None => format!("Memory usage exceeded the limit of {limit_mb} MB"),
            }),
            Verdict::InternalError { trace } if trace.is_empty() => None,
            Verdict::InternalError { trace } => Some(trace.clone()),
            Verdict::Unverified { reason } => Some(reason.clone()),
        }
    }

    /// Converts a judge-side failure into a verdict, keeping the whole context chain.
    pub fn internal(error: &anyhow::Error) -> Verdict {
        Verdict::InternalError {
            trace: format!("{error:?}"),
        }
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.status_code(), self.status())
    }
}

/// A verdict and the score it earned.
///
/// `score` is `None` until the orchestrator assigns it, and stays `None` for unverified runs.
#[derive(Debug, Clone, PartialEq)]
pub struct TestRunResult {
    pub verdict: Verdict,
    pub score: Option<u32>,
}

impl TestRunResult {
    pub fn new(verdict: Verdict) -> Self {
        Self {
            verdict,
            score: None,
        }
    }

    pub fn status_code(&self) -> char {
        self.verdict.status_code()
    }
}

impl Display for TestRunResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.score {
            Some(score) => write!(f, "{}, Score: {score}", self.verdict),
            None => write!(f, "{}", self.verdict),
        }
    }
}

#[cfg(test)]
mod verdict_tests {
    use super::*;

    #[test]
    fn status_codes_are_unique() {
        let verdicts = [
            Verdict::Correct,
            Verdict::WrongAnswer {
                expected: String::new(),
                actual: String::new(),
            },
            Verdict::RuntimeError {
                stderr: String::new(),
            },
            Verdict::FormatError {
                message: String::new(),
            },
            Verdict::CompilationError {
                compiler_output: String::new(),
            },
            Verdict::Timeout { limit_secs: 1.0 },
            Verdict::MemoryExceeded {
                limit_mb: 1,
                peak_mb: None,
            },
            Verdict::SolutionMissing,
            Verdict::InternalError {
                trace: String::new(),
            },
            Verdict::Unverified {
                reason: String::new(),
            },
        ];
        let mut codes = verdicts.iter().map(Verdict::status_code).collect::<Vec<_>>();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), verdicts.len());
    }

    #[test]
    fn only_unverified_is_unscored() {
        assert!(Verdict::Correct.is_scored());
        assert!(Verdict::SolutionMissing.is_scored());
        assert!(!Verdict::Unverified {
            reason: "reference".into()
        }
        .is_scored());
    }

    #[test]
    fn details_render_limits() {
        let timeout = Verdict::Timeout { limit_secs: 0.1 };
        assert_eq!(
            timeout.details().as_deref(),
            Some("Execution time exceeded the limit of 0.10 seconds")
        );
        let memory = Verdict::MemoryExceeded {
            limit_mb: 5,
            peak_mb: Some(12),
        };
        assert!(memory.details().unwrap().contains("12 MB"));
        assert_eq!(memory.to_string(), "[M] Memory Limit Exceeded");
    }

    #[test]
    fn internal_error_keeps_context_chain() {
        let error = anyhow::anyhow!("disk full").context("could not move answer file");
        let Verdict::InternalError { trace } = Verdict::internal(&error) else {
            panic!("expected an internal error");
        };
        assert!(trace.contains("could not move answer file"));
        assert!(trace.contains("disk full"));
    }
}
