//! # Hammurabi
//!
//! A sandboxed execution engine for grading programming-contest submissions.
//!
//! Given solutions in one of several languages, it compiles them when needed, runs each one
//! against a battery of test cases under hard wall-clock and memory ceilings, compares the
//! produced answers with the expected ones and reports one scored result per
//! (solution, test case) pair.
//!
//! It provides:
//! - Language adapters turning a solution into compile and run commands ([`adapter`])
//! - A resource-limited process runner with race-free process tree termination ([`runner`])
//! - Memory limiting through polling, `setrlimit` on Linux or job objects on Windows ([`memory`])
//! - Answer verifiers, exact or token based ([`verifier`])
//! - The grading loop tying them together ([`Grader`](crate::grader::Grader))
//!
//! Discovering problems and solutions on disk, loading configuration files and rendering
//! reports are left to the caller: the engine consumes a [`GraderJobScope`](crate::model::GraderJobScope)
//! and produces [`TestRun`](crate::model::TestRun) records.
//!
//! # Documentation Overview
//!
//! - For the grading lifecycle and its error policy, see the [`grader`] module.
//! - For limits, verifier and runner selection, see [`ProblemConfig`](crate::configuration::ProblemConfig)
//!   and [`Configuration`](crate::configuration::Configuration).
//! - For result codes and scoring, see [`Verdict`](crate::verdict::Verdict).
//! - To add a language, register a [`TemplateAdapter`](crate::adapter::TemplateAdapter) or
//!   implement [`LanguageAdapter`](crate::adapter::LanguageAdapter).
//!
//! # Usage Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use hammurabi::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = ProblemConfig::new()
//!         .with_memory_limit_mb(256)
//!         .with_time_limit("python", 2.0)
//!         .with_verifier("words");
//!     let problem = Arc::new(
//!         Problem::new("sum", "problems/sum")
//!             .with_io_filenames("sum.in", "sum.out")
//!             .with_testcase(TestCase::new("01", "problems/sum/testcases/01.in", "problems/sum/testcases/01.out"))
//!             .with_config(config),
//!     );
//!     let solution = Arc::new(Solution::new(
//!         Arc::clone(&problem),
//!         "alice",
//!         "problems/sum/solutions/alice",
//!         vec!["sum.py".into()],
//!         Some("python".into()),
//!     ));
//!
//!     let scope = GraderJobScope::build(&[solution], &ScopeFilter::default());
//!     let grader = Grader::new(Configuration::new().with_output_dir("reports"))?;
//!     for run in grader.grade(&scope)? {
//!         println!("{run}");
//!     }
//!     Ok(())
//! }
//! ```

pub use anyhow;

pub mod adapter;
pub mod configuration;
pub mod grader;
mod logger;
pub mod memory;
pub mod model;
mod process_tree;
pub mod registry;
pub mod runner;
pub mod verdict;
pub mod verifier;

/// Commonly used types and traits for quick access.
///
/// Import this prelude to get started easily:
/// ```rust
/// use hammurabi::prelude::*;
/// ```
pub mod prelude {
    pub use crate::adapter::{AdapterRegistry, CommandTemplate, LanguageAdapter, TemplateAdapter};
    pub use crate::configuration::{Configuration, MemoryStrategy, ProblemConfig};
    pub use crate::grader::Grader;
    pub use crate::model::{GraderJobScope, Problem, ScopeFilter, Solution, TestCase, TestRun};
    pub use crate::verdict::{TestRunResult, Verdict};
    pub use crate::verifier::Verifier;
}
