//! Problems, solutions, test cases and the runs that tie them together.
//!
//! Everything except [`TestRun`] is created once by discovery and stays immutable while grading,
//! so it is shared through [`Arc`]. A solution points back to its problem; a problem never owns
//! its solutions, and test cases carry no back-reference at all (the run knows both sides).

use std::{
    collections::{BTreeMap, HashSet},
    fmt::Display,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::bail;
use time::OffsetDateTime;

use crate::{
    configuration::{saturating_secs, ProblemConfig},
    verdict::{TestRunResult, Verdict},
};

/// A programming problem to be graded.
#[derive(Debug)]
pub struct Problem {
    pub name: String,
    pub root_dir: PathBuf,
    /// Name of the file the program reads, relative to the solution directory.
    pub input_filename: String,
    /// Name of the file the program writes, relative to the solution directory.
    pub output_filename: String,
    pub testcases: Vec<Arc<TestCase>>,
    /// Author whose solution is the known-correct reference, if any.
    pub reference_author: Option<String>,
    pub config: ProblemConfig,
}

impl Problem {
    pub fn new(name: impl Into<String>, root_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root_dir: root_dir.into(),
            input_filename: String::new(),
            output_filename: String::new(),
            testcases: Vec::new(),
            reference_author: None,
            config: ProblemConfig::default(),
        }
    }

    #[must_use]
    pub fn with_io_filenames(mut self, input: impl Into<String>, output: impl Into<String>) -> Self {
        self.input_filename = input.into();
        self.output_filename = output.into();
        self
    }

    #[must_use]
    pub fn with_testcase(mut self, testcase: TestCase) -> Self {
        self.testcases.push(Arc::new(testcase));
        self
    }

    #[must_use]
    pub fn with_reference_author(mut self, author: impl Into<String>) -> Self {
        self.reference_author = Some(author.into());
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: ProblemConfig) -> Self {
        self.config = config;
        self
    }

    pub fn is_reference(&self, author: &str) -> bool {
        self.reference_author.as_deref() == Some(author)
    }
}

impl Display for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Problem: {}", self.name)
    }
}

/// A submitted solution to a problem.
#[derive(Debug)]
pub struct Solution {
    pub problem: Arc<Problem>,
    pub author: String,
    /// `None` for the placeholders synthesized for missing submissions.
    pub root_dir: Option<PathBuf>,
    /// Source files, as absolute paths or paths relative to `root_dir`.
    pub files: Vec<PathBuf>,
    pub language: Option<String>,
}

impl Solution {
    pub fn new(
        problem: Arc<Problem>,
        author: impl Into<String>,
        root_dir: impl Into<PathBuf>,
        files: Vec<PathBuf>,
        language: Option<String>,
    ) -> Self {
        Self {
            problem,
            author: author.into(),
            root_dir: Some(root_dir.into()),
            files,
            language,
        }
    }

    /// Placeholder for an author who did not submit anything for `problem`.
    pub fn missing(problem: Arc<Problem>, author: impl Into<String>) -> Self {
        Self {
            problem,
            author: author.into(),
            root_dir: None,
            files: Vec::new(),
            language: None,
        }
    }

    pub fn is_reference(&self) -> bool {
        self.problem.is_reference(&self.author)
    }

    /// Files whose extension (lowercased, with the dot) is one of `extensions`.
    pub fn files_with_extensions<'a>(&'a self, extensions: &'a [&str]) -> impl Iterator<Item = &'a PathBuf> {
        self.files.iter().filter(move |file| {
            file.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
                .is_some_and(|ext| extensions.contains(&ext.as_str()))
        })
    }

    /// `file` resolved against the solution directory.
    pub fn resolve(&self, file: &Path) -> PathBuf {
        match &self.root_dir {
            Some(root) if file.is_relative() => root.join(file),
            _ => file.to_path_buf(),
        }
    }
}

impl Display for Solution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Problem: {}   Author: {}   Language: {}",
            self.problem.name,
            self.author,
            self.language.as_deref().unwrap_or("unknown")
        )
    }
}

/// A single input/expected-answer pair.
#[derive(Debug, PartialEq, Eq)]
pub struct TestCase {
    pub name: String,
    pub input_path: PathBuf,
    pub answer_path: PathBuf,
    pub score: u32,
}

impl TestCase {
    pub fn new(
        name: impl Into<String>,
        input_path: impl Into<PathBuf>,
        answer_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            input_path: input_path.into(),
            answer_path: answer_path.into(),
            score: 1,
        }
    }

    #[must_use]
    pub fn with_score(self, score: u32) -> Self {
        Self { score, ..self }
    }
}

/// One execution of a solution against a test case, and its result.
///
/// The limits are captured when the run is created and never change afterwards.
#[derive(Debug)]
pub struct TestRun {
    pub solution: Arc<Solution>,
    pub testcase: Arc<TestCase>,
    pub output_dir: PathBuf,
    pub compiler_output_path: PathBuf,
    pub answer_path: PathBuf,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub memory_limit_mb: u64,
    /// Base limit of the solution's language, before the multiplier.
    pub time_limit: Duration,
    pub time_limit_multiplier: f64,
    pub judge_start: Option<OffsetDateTime>,
    pub judge_end: Option<OffsetDateTime>,
    pub lean_start: Option<OffsetDateTime>,
    pub lean_end: Option<OffsetDateTime>,
    result: Option<TestRunResult>,
}

impl TestRun {
    /// Creates the run record, artifacts go to `<output_root>/<problem>/<author>/`.
    pub fn new(solution: Arc<Solution>, testcase: Arc<TestCase>, output_root: &Path) -> Self {
        let problem = &solution.problem;
        let output_dir = output_root.join(&problem.name).join(&solution.author);
        let limits = &problem.config.limits;
        let time_limit = saturating_secs(limits.time.for_language(solution.language.as_deref()));
        let name = &testcase.name;

        Self {
            compiler_output_path: output_dir.join(format!("compiler_{name}.log")),
            answer_path: output_dir.join(format!("{name}.out")),
            stdout_path: output_dir.join(format!("{name}.stdout")),
            stderr_path: output_dir.join(format!("{name}.stderr")),
            output_dir,
            memory_limit_mb: limits.memory_mb,
            time_limit,
            time_limit_multiplier: limits.time_limit_multiplier,
            judge_start: None,
            judge_end: None,
            lean_start: None,
            lean_end: None,
            result: None,
            solution,
            testcase,
        }
    }

    /// Wall-clock limit actually enforced on the child process.
    pub fn effective_time_limit(&self) -> Duration {
        saturating_secs(self.time_limit.as_secs_f64() * self.time_limit_multiplier)
    }

    pub fn result(&self) -> Option<&TestRunResult> {
        self.result.as_ref()
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        self.result.as_ref().map(|r| &r.verdict)
    }

    pub fn is_finished(&self) -> bool {
        self.result.is_some()
    }

    /// Sets the terminal verdict. A run is classified exactly once.
    pub fn set_result(&mut self, verdict: Verdict) -> anyhow::Result<()> {
        if let Some(existing) = &self.result {
            bail!(
                "Result of {} / {} is already set to {}",
                self.solution.author,
                self.testcase.name,
                existing.verdict
            );
        }
        self.result = Some(TestRunResult::new(verdict));
        Ok(())
    }

    /// Scores the result: the test case weight if correct, zero otherwise, nothing if unverified.
    pub fn assign_score(&mut self) {
        let weight = self.testcase.score;
        if let Some(result) = &mut self.result {
            result.score = match &result.verdict {
                Verdict::Correct => Some(weight),
                v if v.is_scored() => Some(0),
                _ => None,
            };
        }
    }

    pub fn record_judge_start(&mut self) {
        self.judge_start = Some(now());
    }

    pub fn record_judge_end(&mut self) {
        self.judge_end = Some(now());
    }

    pub fn record_lean_start(&mut self) {
        self.lean_start = Some(now());
    }

    pub fn record_lean_end(&mut self) {
        self.lean_end = Some(now());
    }

    /// Duration of the whole lifecycle, zero if it was not recorded.
    pub fn judge_elapsed(&self) -> Duration {
        elapsed(self.judge_start, self.judge_end)
    }

    /// Duration of the child process alone, zero if it never ran.
    pub fn lean_elapsed(&self) -> Duration {
        elapsed(self.lean_start, self.lean_end)
    }
}

impl Display for TestRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Solution: {} / {}, Test case: {}",
            self.solution.problem.name, self.solution.author, self.testcase.name
        )?;
        if let Some(result) = &self.result {
            write!(f, ", Result: {result}")?;
        }
        Ok(())
    }
}

fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

fn elapsed(start: Option<OffsetDateTime>, end: Option<OffsetDateTime>) -> Duration {
    match (start, end) {
        (Some(start), Some(end)) => (end - start).try_into().unwrap_or(Duration::ZERO),
        _ => Duration::ZERO,
    }
}

/// Filters applied while building a [`GraderJobScope`]. `None` keeps everything.
#[derive(Debug, Default, Clone)]
pub struct ScopeFilter {
    pub problems: Option<HashSet<String>>,
    pub authors: Option<HashSet<String>>,
    pub testcases: Option<HashSet<String>>,
    /// Grade only the reference solutions.
    pub reference_only: bool,
}

/// The resolved work plan: problem, then solution, then test cases, each sorted by name.
#[derive(Debug, Default)]
pub struct GraderJobScope {
    tasks: BTreeMap<String, ProblemTasks>,
}

#[derive(Debug)]
struct ProblemTasks {
    problem: Arc<Problem>,
    solutions: BTreeMap<String, (Arc<Solution>, Vec<Arc<TestCase>>)>,
}

impl GraderJobScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `testcases` for `solution`. Test cases are kept sorted by name.
    pub fn insert(&mut self, solution: Arc<Solution>, mut testcases: Vec<Arc<TestCase>>) {
        testcases.sort_by(|a, b| a.name.cmp(&b.name));
        let problem = &solution.problem;
        let entry = self
            .tasks
            .entry(problem.name.clone())
            .or_insert_with(|| ProblemTasks {
                problem: Arc::clone(problem),
                solutions: BTreeMap::new(),
            });
        entry
            .solutions
            .insert(solution.author.clone(), (solution, testcases));
    }

    /// Builds the scope of `solutions` against their problems' test cases.
    ///
    /// Problems filtered out are skipped entirely, with `reference_only` only the reference
    /// solution of each problem is kept.
    pub fn build(solutions: &[Arc<Solution>], filter: &ScopeFilter) -> Self {
        fn keep(set: &Option<HashSet<String>>, name: &str) -> bool {
            set.as_ref().map_or(true, |names| names.contains(name))
        }

        let mut scope = Self::new();
        for solution in solutions {
            let problem = &solution.problem;
            if !keep(&filter.problems, &problem.name) {
                continue;
            }
            let selected = if filter.reference_only {
                solution.is_reference()
            } else {
                keep(&filter.authors, &solution.author)
            };
            if !selected {
                continue;
            }
            let testcases = problem
                .testcases
                .iter()
                .filter(|tc| keep(&filter.testcases, &tc.name))
                .cloned()
                .collect();
            scope.insert(Arc::clone(solution), testcases);
        }
        scope
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn problems(&self) -> impl Iterator<Item = &Arc<Problem>> {
        self.tasks.values().map(|tasks| &tasks.problem)
    }

    /// Solutions of `problem` with their test cases, sorted by author.
    pub fn solutions_of<'a>(
        &'a self,
        problem: &str,
    ) -> impl Iterator<Item = (&'a Arc<Solution>, &'a [Arc<TestCase>])> {
        self.tasks
            .get(problem)
            .into_iter()
            .flat_map(|tasks| tasks.solutions.values())
            .map(|(solution, testcases)| (solution, testcases.as_slice()))
    }
}

#[cfg(test)]
mod model_tests {
    use super::*;

    fn problem() -> Arc<Problem> {
        Arc::new(
            Problem::new("sum", "/problems/sum")
                .with_io_filenames("sum.in", "sum.out")
                .with_testcase(TestCase::new("02", "02.in", "02.ans").with_score(3))
                .with_testcase(TestCase::new("01", "01.in", "01.ans"))
                .with_reference_author("judge")
                .with_config(ProblemConfig::new().with_time_limit("python", 2.0)),
        )
    }

    fn solution(problem: &Arc<Problem>, author: &str) -> Arc<Solution> {
        Arc::new(Solution::new(
            Arc::clone(problem),
            author,
            format!("/solutions/{author}"),
            vec![PathBuf::from("sum.py")],
            Some("python".to_string()),
        ))
    }

    #[test]
    fn run_paths_and_limits() {
        let problem = problem();
        let run = TestRun::new(
            solution(&problem, "alice"),
            Arc::clone(&problem.testcases[0]),
            Path::new("/reports"),
        );
        assert_eq!(run.output_dir, Path::new("/reports/sum/alice"));
        assert_eq!(run.answer_path, Path::new("/reports/sum/alice/02.out"));
        assert_eq!(
            run.compiler_output_path,
            Path::new("/reports/sum/alice/compiler_02.log")
        );
        assert_eq!(run.time_limit, Duration::from_secs(2));
        assert_eq!(run.memory_limit_mb, 512);
    }

    #[test]
    fn huge_time_limits_saturate() {
        let problem = Arc::new(
            Problem::new("sum", "/problems/sum")
                .with_testcase(TestCase::new("01", "01.in", "01.ans"))
                .with_config(
                    ProblemConfig::new()
                        .with_time_limit("python", 1e20)
                        .with_time_limit_multiplier(2.0),
                ),
        );
        let run = TestRun::new(
            solution(&problem, "alice"),
            Arc::clone(&problem.testcases[0]),
            Path::new("/reports"),
        );
        assert_eq!(run.time_limit, Duration::MAX);
        assert_eq!(run.effective_time_limit(), Duration::MAX);
    }

    #[test]
    fn result_is_set_once() {
        let problem = problem();
        let mut run = TestRun::new(
            solution(&problem, "alice"),
            Arc::clone(&problem.testcases[0]),
            Path::new("/reports"),
        );
        run.set_result(Verdict::Correct).unwrap();
        assert!(run.set_result(Verdict::SolutionMissing).is_err());
        run.assign_score();
        assert_eq!(run.result().unwrap().score, Some(3));
        assert_eq!(run.verdict(), Some(&Verdict::Correct));
    }

    #[test]
    fn unverified_runs_are_not_scored() {
        let problem = problem();
        let mut run = TestRun::new(
            solution(&problem, "judge"),
            Arc::clone(&problem.testcases[1]),
            Path::new("/reports"),
        );
        run.set_result(Verdict::Unverified {
            reason: "reference".into(),
        })
        .unwrap();
        run.assign_score();
        assert_eq!(run.result().unwrap().score, None);
    }

    #[test]
    fn elapsed_is_zero_until_recorded() {
        let problem = problem();
        let mut run = TestRun::new(
            solution(&problem, "alice"),
            Arc::clone(&problem.testcases[0]),
            Path::new("/reports"),
        );
        assert_eq!(run.lean_elapsed(), Duration::ZERO);
        run.record_judge_start();
        run.record_judge_end();
        assert!(run.judge_elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn scope_is_sorted_and_filtered() {
        let problem = problem();
        let solutions = vec![
            solution(&problem, "zoe"),
            solution(&problem, "judge"),
            solution(&problem, "alice"),
        ];

        let scope = GraderJobScope::build(&solutions, &ScopeFilter::default());
        let authors: Vec<_> = scope
            .solutions_of("sum")
            .map(|(s, _)| s.author.as_str())
            .collect();
        assert_eq!(authors, ["alice", "judge", "zoe"]);
        let testcases: Vec<_> = scope
            .solutions_of("sum")
            .next()
            .unwrap()
            .1
            .iter()
            .map(|tc| tc.name.as_str())
            .collect();
        assert_eq!(testcases, ["01", "02"]);

        let filter = ScopeFilter {
            reference_only: true,
            testcases: Some(HashSet::from(["02".to_string()])),
            ..Default::default()
        };
        let scope = GraderJobScope::build(&solutions, &filter);
        let selected: Vec<_> = scope.solutions_of("sum").collect();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].0.author, "judge");
        assert_eq!(selected[0].1.len(), 1);

        let filter = ScopeFilter {
            problems: Some(HashSet::from(["other".to_string()])),
            ..Default::default()
        };
        assert!(GraderJobScope::build(&solutions, &filter).is_empty());
    }

    #[test]
    fn files_filtered_by_extension() {
        let problem = problem();
        let solution = Solution::new(
            problem,
            "bob",
            "/solutions/bob",
            vec!["Main.JAVA".into(), "notes.txt".into(), "util.java".into()],
            Some("java".into()),
        );
        assert_eq!(solution.files_with_extensions(&[".java"]).count(), 2);
        assert_eq!(
            solution.resolve(Path::new("util.java")),
            Path::new("/solutions/bob/util.java")
        );
    }
}
