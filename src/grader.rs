//! Grading orchestration.
//!
//! The [`Grader`] walks a [`GraderJobScope`] problem by problem, solution by solution and test
//! case by test case, on a single thread. For each test case it:
//!
//! 1. creates a [`TestRun`] through the solution's [`SolutionAdapter`] and records the judge start,
//! 2. compiles (once per solution) and runs the program,
//! 3. verifies the answer with the problem's verifier, unless the solution is the reference one,
//! 4. assigns the score and records the judge end.
//!
//! Candidate failures end up as verdicts. Judge failures become [`Verdict::InternalError`] on the
//! affected run and grading moves on to the next test case. Authors who have runs for some
//! problems but not for others get `SolutionMissing` runs for the rest, so every
//! (author, problem) pair of the batch is reported.
//!
//! Setting the flag returned by [`Grader::interrupt_handle`] stops scheduling new test cases;
//! the runs completed so far are still returned.

use std::{
    collections::{BTreeMap, BTreeSet},
    process::Stdio,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::Context;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    adapter::{default_adapters, toolchain, AdapterRegistry, ExecutionOutcome, SolutionAdapter},
    configuration::Configuration,
    logger::init_logger,
    model::{GraderJobScope, Problem, Solution, TestCase, TestRun},
    runner::{default_runners, RunnerRegistry},
    verdict::Verdict,
    verifier::{default_verifiers, VerifierRegistry},
};

const REFERENCE_NOT_VERIFIED: &str = "Verification ignored - running the reference solution.";

/// Runs every solution of a scope against its test cases and classifies the results.
pub struct Grader {
    config: Configuration,
    adapters: AdapterRegistry,
    verifiers: VerifierRegistry,
    runners: RunnerRegistry,
    interrupted: Arc<AtomicBool>,
}

impl Grader {
    /// Create a [`Grader`] with the built-in languages, verifiers and runners.
    ///
    /// Installs the file logger when the configuration asks for it.
    #[instrument(skip_all)]
    pub fn new(config: Configuration) -> anyhow::Result<Self> {
        if config.log {
            init_logger(config.output_dir())?;
        }
        debug!(?config);

        Ok(Self {
            config,
            adapters: default_adapters(),
            verifiers: default_verifiers(),
            runners: default_runners(),
            interrupted: Arc::new(AtomicBool::new(false)),
        })
    }

    #[must_use]
    pub fn with_adapters(mut self, adapters: AdapterRegistry) -> Self {
        self.adapters = adapters;
        self
    }

    #[must_use]
    pub fn with_verifiers(mut self, verifiers: VerifierRegistry) -> Self {
        self.verifiers = verifiers;
        self
    }

    #[must_use]
    pub fn with_runners(mut self, runners: RunnerRegistry) -> Self {
        self.runners = runners;
        self
    }

    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    /// Flag stopping the batch once set, e.g. from a Ctrl-C handler.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    /// Grades the whole scope and returns the completed runs in order.
    ///
    /// # Errors
    /// Returns an error before running anything if a problem configuration is invalid or names
    /// an unknown verifier or runner.
    pub fn grade(&self, scope: &GraderJobScope) -> anyhow::Result<Vec<TestRun>> {
        let mut runs = Vec::new();
        self.grade_with(scope, |run| runs.push(run))?;
        Ok(runs)
    }

    /// Same as [`grade`](Self::grade), handing each run to `sink` as soon as it is complete.
    pub fn grade_with(
        &self,
        scope: &GraderJobScope,
        mut sink: impl FnMut(TestRun),
    ) -> anyhow::Result<()> {
        self.validate(scope)?;

        let mut graded = Graded::default();
        'problems: for problem in scope.problems() {
            self.print_header(&format!("Judging problem: {}", problem.name), '=');
            for (solution, testcases) in scope.solutions_of(&problem.name) {
                if self.is_interrupted() {
                    break 'problems;
                }
                self.print_header(&format!("Judging solution: {solution}"), '-');
                self.judge_solution(solution, testcases, &mut |run| {
                    graded.record(&run);
                    sink(run);
                });
            }
        }
        if self.is_interrupted() {
            warn!("grading interrupted");
        }

        for run in graded.missing_solution_runs(self.config.output_dir()) {
            sink(run);
        }
        Ok(())
    }

    /// Checks every problem of the scope before anything runs.
    fn validate(&self, scope: &GraderJobScope) -> anyhow::Result<()> {
        for problem in scope.problems() {
            let config = &problem.config;
            config
                .validate()
                .and_then(|()| self.verifiers.ensure(&config.verifier))
                .and_then(|()| self.runners.ensure(&config.runner))
                .with_context(|| format!("invalid configuration for problem '{}'", problem.name))?;
        }
        Ok(())
    }

    fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Relaxed)
    }

    #[instrument(skip_all, fields(problem = %solution.problem.name, author = %solution.author))]
    fn judge_solution(
        &self,
        solution: &Arc<Solution>,
        testcases: &[Arc<TestCase>],
        sink: &mut dyn FnMut(TestRun),
    ) {
        let mut adapter = match self.create_adapter(solution) {
            Ok(adapter) => adapter,
            Err(e) => {
                error!("cannot create solution adapter: {e:?}");
                if self.config.verbose {
                    println!("Cannot create solution adapter: {e:#}");
                }
                return;
            }
        };

        for testcase in testcases {
            if self.is_interrupted() {
                return;
            }
            let run = self.judge_testcase(&mut adapter, Arc::clone(testcase));
            self.print_run(&run);
            sink(run);
        }
    }

    fn create_adapter(&self, solution: &Arc<Solution>) -> anyhow::Result<SolutionAdapter> {
        let language = self.adapters.adapter_for(solution.language.as_deref());
        let runner = self.runners.create(&solution.problem.config.runner)?;
        let mut adapter = SolutionAdapter::new(
            Arc::clone(solution),
            language,
            runner,
            self.config.output_dir(),
        );
        adapter.prepare()?;
        Ok(adapter)
    }

    #[instrument(skip_all, fields(testcase = %testcase.name))]
    fn judge_testcase(&self, adapter: &mut SolutionAdapter, testcase: Arc<TestCase>) -> TestRun {
        let mut run = adapter.create_testrun(testcase);
        run.record_judge_start();

        if let Err(e) = self.execute(adapter, &mut run) {
            error!("judge error: {e:?}");
            if !run.is_finished() {
                // the run has no result yet, so this cannot fail
                let _ = run.set_result(Verdict::internal(&e));
            }
        }
        run.assign_score();
        run.record_judge_end();
        info!("{run}");
        run
    }

    fn execute(&self, adapter: &mut SolutionAdapter, run: &mut TestRun) -> anyhow::Result<()> {
        match adapter.run(run)? {
            ExecutionOutcome::Terminated(verdict) => run.set_result(verdict),
            ExecutionOutcome::OutputReady if run.solution.is_reference() => {
                run.set_result(Verdict::Unverified {
                    reason: REFERENCE_NOT_VERIFIED.to_string(),
                })
            }
            ExecutionOutcome::OutputReady => {
                let verifier = self.verifiers.create(&run.solution.problem.config.verifier)?;
                verifier.verify(run).map(|_| ())
            }
        }
    }

    fn print_header(&self, title: &str, underline: char) {
        if self.config.verbose {
            println!();
            println!("{title}");
            println!("{}", underline.to_string().repeat(75));
        }
    }

    fn print_run(&self, run: &TestRun) {
        if !self.config.verbose {
            return;
        }
        let lean = run.lean_elapsed().as_millis();
        let judge = run.judge_elapsed().as_millis();
        let result = run
            .result()
            .map_or_else(|| "no result".to_string(), ToString::to_string);
        println!(
            "Running test case: {} (score: {}) -> {result}, Time: {lean} ms, Overall time: {judge} (+{}) ms",
            run.testcase.name,
            run.testcase.score,
            judge.saturating_sub(lean),
        );
        if let Some(Verdict::InternalError { trace }) = run.verdict() {
            println!("{trace}");
        }
    }

    /// Logs the version of every registered language's toolchain.
    ///
    /// Returns the first line printed by each version command, by language. Missing tools are
    /// reported as such, never as errors.
    pub fn describe_toolchains(&self) -> BTreeMap<String, Vec<String>> {
        if let Some(native) = toolchain::detect() {
            info!("C/C++ toolchain: {}", native.description());
        }

        let mut versions = BTreeMap::new();
        for language in self.adapters.languages() {
            let adapter = self.adapters.adapter_for(Some(language));
            let lines = adapter
                .version_commands()
                .iter()
                .map(|command| {
                    let line = command
                        .to_command()
                        .stdin(Stdio::null())
                        .output()
                        .map(|output| {
                            // java and gcc disagree on which stream gets the version
                            let text = if output.stdout.is_empty() {
                                output.stderr
                            } else {
                                output.stdout
                            };
                            String::from_utf8_lossy(&text)
                                .lines()
                                .next()
                                .unwrap_or_default()
                                .trim()
                                .to_string()
                        })
                        .unwrap_or_else(|e| format!("not available ({e})"));
                    info!("{language}: `{command}` -> {line}");
                    line
                })
                .collect();
            versions.insert(language.to_string(), lines);
        }
        versions
    }
}

impl std::fmt::Debug for Grader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Grader")
            .field("config", &self.config)
            .field("adapters", &self.adapters)
            .field("verifiers", &self.verifiers)
            .field("runners", &self.runners)
            .finish()
    }
}

/// Which (problem, author) pairs produced runs, for the missing-solution padding.
#[derive(Default)]
struct Graded {
    problems: BTreeMap<String, Arc<Problem>>,
    authors: BTreeSet<String>,
    pairs: BTreeSet<(String, String)>,
}

impl Graded {
    fn record(&mut self, run: &TestRun) {
        let problem = &run.solution.problem;
        self.problems
            .entry(problem.name.clone())
            .or_insert_with(|| Arc::clone(problem));
        self.authors.insert(run.solution.author.clone());
        self.pairs
            .insert((problem.name.clone(), run.solution.author.clone()));
    }

    /// One `SolutionMissing` run per test case for every pair without runs.
    fn missing_solution_runs(&self, output_root: &std::path::Path) -> Vec<TestRun> {
        let mut runs = Vec::new();
        for (name, problem) in &self.problems {
            for author in &self.authors {
                if self.pairs.contains(&(name.clone(), author.clone())) {
                    continue;
                }
                debug!("no solution from {author} for {name}");
                let solution = Arc::new(Solution::missing(Arc::clone(problem), author.as_str()));
                for testcase in &problem.testcases {
                    let mut run =
                        TestRun::new(Arc::clone(&solution), Arc::clone(testcase), output_root);
                    run.record_judge_start();
                    run.record_lean_start();
                    run.record_lean_end();
                    // a fresh run has no result
                    let _ = run.set_result(Verdict::SolutionMissing);
                    run.assign_score();
                    run.record_judge_end();
                    runs.push(run);
                }
            }
        }
        runs
    }
}

#[cfg(test)]
mod grader_tests {
    use std::path::PathBuf;

    use super::*;
    use crate::configuration::ProblemConfig;

    fn problem(name: &str, config: ProblemConfig) -> Arc<Problem> {
        Arc::new(
            Problem::new(name, "/nonexistent")
                .with_testcase(TestCase::new("01", "/nonexistent/01.in", "/nonexistent/01.out"))
                .with_testcase(TestCase::new("02", "/nonexistent/02.in", "/nonexistent/02.out"))
                .with_config(config),
        )
    }

    fn grader(dir: &std::path::Path) -> Grader {
        Grader::new(
            Configuration::new()
                .with_verbose(false)
                .with_output_dir(dir),
        )
        .unwrap()
    }

    #[test]
    fn unknown_verifier_fails_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let problem = problem("sum", ProblemConfig::new().with_verifier("fuzzy"));
        let solution = Arc::new(Solution::missing(problem, "alice"));
        let mut scope = GraderJobScope::new();
        scope.insert(Arc::clone(&solution), solution.problem.testcases.clone());

        let error = grader(dir.path()).grade(&scope).unwrap_err();
        assert!(format!("{error:#}").contains("Unknown verifier 'fuzzy'"));
    }

    #[test]
    fn missing_solutions_are_padded() {
        let dir = tempfile::tempdir().unwrap();
        let first = problem("first", ProblemConfig::new());
        let second = problem("second", ProblemConfig::new());
        let mut scope = GraderJobScope::new();
        // alice has no files for `first`, bob only submitted `second`
        let alice = Arc::new(Solution::new(
            Arc::clone(&first),
            "alice",
            dir.path(),
            Vec::<PathBuf>::new(),
            None,
        ));
        let bob = Arc::new(Solution::new(
            Arc::clone(&second),
            "bob",
            dir.path(),
            Vec::<PathBuf>::new(),
            None,
        ));
        scope.insert(alice, first.testcases.clone());
        scope.insert(bob, second.testcases.clone());

        let runs = grader(dir.path()).grade(&scope).unwrap();
        let summary: Vec<(&str, &str, char, Option<u32>)> = runs
            .iter()
            .map(|run| {
                let result = run.result().unwrap();
                (
                    run.solution.problem.name.as_str(),
                    run.solution.author.as_str(),
                    result.status_code(),
                    result.score,
                )
            })
            .collect();
        assert_eq!(
            summary,
            [
                ("first", "alice", 'N', Some(0)),
                ("first", "alice", 'N', Some(0)),
                ("second", "bob", 'N', Some(0)),
                ("second", "bob", 'N', Some(0)),
                ("first", "bob", 'N', Some(0)),
                ("first", "bob", 'N', Some(0)),
                ("second", "alice", 'N', Some(0)),
                ("second", "alice", 'N', Some(0)),
            ]
        );
    }

    #[test]
    fn interrupted_batches_stop_scheduling() {
        let dir = tempfile::tempdir().unwrap();
        let first = problem("first", ProblemConfig::new());
        let solution = Arc::new(Solution::missing(Arc::clone(&first), "alice"));
        let mut scope = GraderJobScope::new();
        scope.insert(solution, first.testcases.clone());

        let grader = grader(dir.path());
        grader.interrupt_handle().store(true, Ordering::Relaxed);
        assert!(grader.grade(&scope).unwrap().is_empty());
    }
}
