use std::{
    fs, io,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
};

use anyhow::Context;
use tracing::{debug, instrument, trace, warn};

use super::{template::BuildContext, LanguageAdapter};
use crate::{
    model::{Solution, TestCase, TestRun},
    runner::{CommandLine, RunnerError, SolutionRunner},
    verdict::Verdict,
};

/// How [`SolutionAdapter::run`] ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The program exited and its answer file sits at `TestRun::answer_path`.
    OutputReady,
    /// The run is over before any answer exists. Verification is skipped.
    Terminated(Verdict),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CompileState {
    NotCompiled,
    Compiled,
    Failed(String),
}

/// Drives one solution through all of its test cases.
///
/// Compiles at most once, supplies each test input in the solution directory, runs the program
/// through a [`SolutionRunner`] and moves the produced answer next to the other run artifacts.
pub struct SolutionAdapter {
    solution: Arc<Solution>,
    language: Box<dyn LanguageAdapter>,
    runner: Box<dyn SolutionRunner>,
    output_root: PathBuf,
    compile_state: CompileState,
}

impl SolutionAdapter {
    pub fn new(
        solution: Arc<Solution>,
        language: Box<dyn LanguageAdapter>,
        runner: Box<dyn SolutionRunner>,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            solution,
            language,
            runner,
            output_root: output_root.into(),
            compile_state: CompileState::NotCompiled,
        }
    }

    pub fn solution(&self) -> &Arc<Solution> {
        &self.solution
    }

    pub fn language(&self) -> &dyn LanguageAdapter {
        self.language.as_ref()
    }

    /// `<output root>/<problem>/<author>`, where every run of this solution writes.
    pub fn output_dir(&self) -> PathBuf {
        self.output_root
            .join(&self.solution.problem.name)
            .join(&self.solution.author)
    }

    /// Creates the output directory. Called once, before the first run.
    pub fn prepare(&mut self) -> anyhow::Result<()> {
        let dir = self.output_dir();
        fs::create_dir_all(&dir)
            .with_context(|| format!("could not create output directory {}", dir.display()))
    }

    pub fn create_testrun(&self, testcase: Arc<TestCase>) -> TestRun {
        TestRun::new(Arc::clone(&self.solution), testcase, &self.output_root)
    }

    /// Compiles if needed, then executes the solution on the run's test case.
    ///
    /// Candidate failures come back as [`ExecutionOutcome::Terminated`]; `Err` means the
    /// grader itself failed.
    #[instrument(skip_all, fields(author = %run.solution.author, testcase = %run.testcase.name))]
    pub fn run(&mut self, run: &mut TestRun) -> anyhow::Result<ExecutionOutcome> {
        let solution = Arc::clone(&self.solution);
        let Some(context) = self.build_context(&solution)? else {
            debug!("no entry point, solution is missing");
            return Ok(ExecutionOutcome::Terminated(Verdict::SolutionMissing));
        };

        if let Some(verdict) = self.compile(&context, run)? {
            return Ok(ExecutionOutcome::Terminated(verdict));
        }

        let command = self.language.run_command(&context)?;
        let problem = &solution.problem;
        let produced = (!problem.output_filename.is_empty())
            .then(|| context.root_dir.join(&problem.output_filename));
        if let Some(stale) = &produced {
            remove_if_exists(stale)?;
        }

        let input = InputFileGuard::supply(
            &run.testcase.input_path,
            &context.root_dir,
            &problem.input_filename,
        )?;
        let status = match self.runner.run(run, &command) {
            Ok(status) => status,
            Err(RunnerError::Timeout { limit_secs }) => {
                return Ok(ExecutionOutcome::Terminated(Verdict::Timeout { limit_secs }))
            }
            Err(RunnerError::MemoryExceeded { limit_mb, peak_mb }) => {
                return Ok(ExecutionOutcome::Terminated(Verdict::MemoryExceeded {
                    limit_mb,
                    peak_mb,
                }))
            }
            Err(RunnerError::Internal(error)) => return Err(error),
            Err(error) => return Err(error.into()),
        };
        drop(input);
        trace!("exit status: {status}");

        self.collect_output(run, produced.as_deref())
    }

    /// `None` when the solution has nothing to run.
    fn build_context<'a>(&self, solution: &'a Solution) -> anyhow::Result<Option<BuildContext<'a>>> {
        let (Some(root), Some(entry)) = (
            solution.root_dir.as_deref(),
            self.language.entry_point_file(solution),
        ) else {
            return Ok(None);
        };
        let root_dir = std::path::absolute(root)
            .with_context(|| format!("could not resolve {}", root.display()))?;
        let extensions: Vec<&str> = self
            .language
            .preferred_extensions()
            .iter()
            .map(String::as_str)
            .collect();
        let sources = solution
            .files_with_extensions(&extensions)
            .map(|file| root_dir.join(file))
            .collect();

        Ok(Some(BuildContext {
            solution,
            entry_point: root_dir.join(&entry),
            root_dir,
            sources,
        }))
    }

    /// Returns the verdict ending the run when compilation failed, now or earlier.
    #[instrument(skip_all)]
    fn compile(
        &mut self,
        context: &BuildContext,
        run: &TestRun,
    ) -> anyhow::Result<Option<Verdict>> {
        match &self.compile_state {
            CompileState::Compiled => return Ok(None),
            CompileState::Failed(output) => {
                write_log(&run.compiler_output_path, output)?;
                return Ok(Some(Verdict::CompilationError {
                    compiler_output: output.clone(),
                }));
            }
            CompileState::NotCompiled => {}
        }

        self.language.prepare_build(context)?;
        let Some(command) = self.language.compile_command(context)? else {
            self.compile_state = CompileState::Compiled;
            return Ok(None);
        };
        debug!("compiling: {command}");
        let (success, output) = run_compiler(&command, &context.root_dir)?;
        write_log(&run.compiler_output_path, &output)?;

        if success {
            self.compile_state = CompileState::Compiled;
            Ok(None)
        } else {
            warn!(
                "compilation error: {}",
                output.lines().next().unwrap_or_default()
            );
            self.compile_state = CompileState::Failed(output.clone());
            Ok(Some(Verdict::CompilationError {
                compiler_output: output,
            }))
        }
    }

    /// Moves the produced answer into the run's answer slot.
    fn collect_output(
        &self,
        run: &TestRun,
        produced: Option<&Path>,
    ) -> anyhow::Result<ExecutionOutcome> {
        // without an output file name the answer is whatever went to stdout
        let moved = match produced {
            Some(produced) => move_file(produced, &run.answer_path)?,
            None => {
                fs::copy(&run.stdout_path, &run.answer_path).with_context(|| {
                    format!("could not copy {}", run.stdout_path.display())
                })?;
                true
            }
        };
        if moved {
            return Ok(ExecutionOutcome::OutputReady);
        }

        let stderr = fs::read(&run.stderr_path).unwrap_or_default();
        let stderr = String::from_utf8_lossy(&stderr).into_owned();
        let verdict = if stderr.is_empty() {
            Verdict::FormatError {
                message: format!(
                    "Output file '{}' is empty or missing.",
                    self.solution.problem.output_filename
                ),
            }
        } else {
            Verdict::RuntimeError { stderr }
        };
        Ok(ExecutionOutcome::Terminated(verdict))
    }
}

impl std::fmt::Debug for SolutionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolutionAdapter")
            .field("solution", &self.solution.to_string())
            .field("language", &self.language.language())
            .field("compile_state", &self.compile_state)
            .finish()
    }
}

/// Runs a compiler to completion, returning its success and combined stdout and stderr.
fn run_compiler(command: &CommandLine, workdir: &Path) -> anyhow::Result<(bool, String)> {
    let output = command
        .to_command()
        .current_dir(workdir)
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("could not launch `{command}`"))?;
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !text.is_empty() && !stderr.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(&stderr);
    Ok((output.status.success(), text))
}

fn write_log(path: &Path, content: &str) -> anyhow::Result<()> {
    fs::write(path, content).with_context(|| format!("could not write {}", path.display()))
}

fn remove_if_exists(path: &Path) -> anyhow::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => {
            Err(e).with_context(|| format!("could not remove stale {}", path.display()))
        }
        _ => Ok(()),
    }
}

/// Renames `from` to `to`, copying across file systems. `false` when `from` does not exist.
fn move_file(from: &Path, to: &Path) -> anyhow::Result<bool> {
    if !from.is_file() {
        return Ok(false);
    }
    if fs::rename(from, to).is_err() {
        fs::copy(from, to).with_context(|| {
            format!("could not move {} to {}", from.display(), to.display())
        })?;
        remove_if_exists(from)?;
    }
    Ok(true)
}

/// The test input, copied into the solution directory for the duration of one run.
struct InputFileGuard {
    path: Option<PathBuf>,
}

impl InputFileGuard {
    /// Copies `input` to `<dir>/<name>`. An empty `name` means the program takes no input file.
    fn supply(input: &Path, dir: &Path, name: &str) -> anyhow::Result<Self> {
        if name.is_empty() {
            return Ok(Self { path: None });
        }
        let path = dir.join(name);
        fs::copy(input, &path).with_context(|| {
            format!("could not copy {} to {}", input.display(), path.display())
        })?;
        Ok(Self { path: Some(path) })
    }
}

impl Drop for InputFileGuard {
    fn drop(&mut self) {
        if let Some(path) = &self.path {
            if let Err(e) = fs::remove_file(path) {
                warn!("could not remove {}: {e}", path.display());
            }
        }
    }
}

#[cfg(test)]
mod solution_tests {
    use std::process::ExitStatus;

    use super::*;
    use crate::{adapter::TemplateAdapter, model::Problem};

    /// Writes the answer file itself instead of running anything.
    struct FakeRunner {
        answer: Option<&'static str>,
        stderr: &'static str,
        error: Option<fn() -> RunnerError>,
    }

    impl SolutionRunner for FakeRunner {
        fn run(&self, run: &mut TestRun, _command: &CommandLine) -> Result<ExitStatus, RunnerError> {
            let dir = run.solution.root_dir.clone().unwrap();
            let problem = &run.solution.problem;
            // the input must be in place while the program runs
            assert!(dir.join(&problem.input_filename).is_file());
            fs::write(&run.stdout_path, "").unwrap();
            fs::write(&run.stderr_path, self.stderr).unwrap();
            if let Some(error) = self.error {
                return Err(error());
            }
            if let Some(answer) = self.answer {
                fs::write(dir.join(&problem.output_filename), answer).unwrap();
            }
            Ok(success())
        }
    }

    #[cfg(unix)]
    fn success() -> ExitStatus {
        std::os::unix::process::ExitStatusExt::from_raw(0)
    }

    #[cfg(windows)]
    fn success() -> ExitStatus {
        std::os::windows::process::ExitStatusExt::from_raw(0)
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        solution_dir: PathBuf,
        reports: PathBuf,
        testcase: Arc<TestCase>,
    }

    fn fixture() -> (Fixture, Arc<Solution>) {
        let dir = tempfile::tempdir().unwrap();
        let solution_dir = dir.path().join("alice");
        let reports = dir.path().join("reports");
        fs::create_dir_all(&solution_dir).unwrap();
        fs::write(solution_dir.join("sum.txt"), "").unwrap();
        let input = dir.path().join("01.in");
        fs::write(&input, "1 2\n").unwrap();
        let testcase = Arc::new(TestCase::new("01", &input, dir.path().join("01.out")));

        let problem = Arc::new(Problem::new("sum", dir.path()).with_io_filenames("sum.in", "sum.out"));
        let solution = Arc::new(Solution::new(
            problem,
            "alice",
            &solution_dir,
            vec![PathBuf::from("sum.txt")],
            Some("text".into()),
        ));
        let fixture = Fixture {
            _dir: dir,
            solution_dir,
            reports,
            testcase,
        };
        (fixture, solution)
    }

    fn solution_adapter(solution: Arc<Solution>, reports: &Path, runner: FakeRunner) -> SolutionAdapter {
        let language = TemplateAdapter::new("text", [".txt"]);
        let mut adapter = SolutionAdapter::new(solution, Box::new(language), Box::new(runner), reports);
        adapter.prepare().unwrap();
        adapter
    }

    #[test]
    fn output_is_moved_and_input_removed() {
        let (fx, solution) = fixture();
        let runner = FakeRunner {
            answer: Some("3\n"),
            stderr: "",
            error: None,
        };
        let mut adapter = solution_adapter(solution, &fx.reports, runner);
        let mut run = adapter.create_testrun(Arc::clone(&fx.testcase));

        assert_eq!(adapter.run(&mut run).unwrap(), ExecutionOutcome::OutputReady);
        assert_eq!(fs::read_to_string(&run.answer_path).unwrap(), "3\n");
        assert!(!fx.solution_dir.join("sum.out").exists());
        assert!(!fx.solution_dir.join("sum.in").exists());
    }

    #[test]
    fn missing_output_depends_on_stderr() {
        let (fx, solution) = fixture();
        let runner = FakeRunner {
            answer: None,
            stderr: "",
            error: None,
        };
        let mut adapter = solution_adapter(Arc::clone(&solution), &fx.reports, runner);
        let mut run = adapter.create_testrun(Arc::clone(&fx.testcase));
        let ExecutionOutcome::Terminated(verdict) = adapter.run(&mut run).unwrap() else {
            panic!("expected a terminated run");
        };
        assert_eq!(verdict.status_code(), 'F');

        let runner = FakeRunner {
            answer: None,
            stderr: "Segmentation fault\n",
            error: None,
        };
        let mut adapter = solution_adapter(solution, &fx.reports, runner);
        let mut run = adapter.create_testrun(Arc::clone(&fx.testcase));
        assert_eq!(
            adapter.run(&mut run).unwrap(),
            ExecutionOutcome::Terminated(Verdict::RuntimeError {
                stderr: "Segmentation fault\n".into()
            })
        );
    }

    #[test]
    fn limit_violations_become_verdicts() {
        let (fx, solution) = fixture();
        let runner = FakeRunner {
            answer: None,
            stderr: "",
            error: Some(|| RunnerError::Timeout { limit_secs: 0.5 }),
        };
        let mut adapter = solution_adapter(solution, &fx.reports, runner);
        let mut run = adapter.create_testrun(Arc::clone(&fx.testcase));
        assert_eq!(
            adapter.run(&mut run).unwrap(),
            ExecutionOutcome::Terminated(Verdict::Timeout { limit_secs: 0.5 })
        );
        assert!(!fx.solution_dir.join("sum.in").exists());
    }

    #[test]
    fn no_entry_point_means_missing() {
        let (fx, solution) = fixture();
        let missing = Arc::new(Solution::missing(Arc::clone(&solution.problem), "bob"));
        let runner = FakeRunner {
            answer: None,
            stderr: "",
            error: None,
        };
        let mut adapter = solution_adapter(missing, &fx.reports, runner);
        let mut run = adapter.create_testrun(Arc::clone(&fx.testcase));
        assert_eq!(
            adapter.run(&mut run).unwrap(),
            ExecutionOutcome::Terminated(Verdict::SolutionMissing)
        );
    }
}
