use std::{
    env::consts::EXE_SUFFIX,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context};
use regex::Regex;

use crate::{model::Solution, runner::CommandLine};

/// Everything a language needs to synthesize its commands for one solution.
///
/// All paths are absolute, so commands work whatever the working directory.
#[derive(Debug)]
pub struct BuildContext<'a> {
    pub solution: &'a Solution,
    pub root_dir: PathBuf,
    pub entry_point: PathBuf,
    /// Solution files with one of the language's preferred extensions.
    pub sources: Vec<PathBuf>,
}

impl BuildContext<'_> {
    pub fn problem_name(&self) -> &str {
        &self.solution.problem.name
    }

    /// Compiled program, named after the problem with the host executable suffix.
    pub fn executable(&self) -> PathBuf {
        self.root_dir
            .join(format!("{}{EXE_SUFFIX}", self.problem_name()))
    }

    /// Fully qualified main class of a Java entry point (`package.Class`).
    pub fn java_main_class(&self) -> anyhow::Result<String> {
        java_main_class(&self.entry_point)
    }
}

/// A command with placeholders, expanded against a [`BuildContext`].
///
/// | Placeholder  | Expands to                                             |
/// |--------------|--------------------------------------------------------|
/// | `{sources}`  | one argument per source file (whole argument only)     |
/// | `{entry}`    | the entry point file                                   |
/// | `{exe}`      | the executable named after the problem                 |
/// | `{class}`    | the Java main class, read from the entry point         |
/// | `{dir}`      | the solution directory                                 |
/// | `{problem}`  | the problem name                                       |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    parts: Vec<String>,
    env: Vec<(String, String)>,
}

impl CommandTemplate {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            parts: parts.into_iter().map(Into::into).collect(),
            env: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn render(&self, context: &BuildContext) -> anyhow::Result<CommandLine> {
        let mut rendered = Vec::with_capacity(self.parts.len());
        for part in &self.parts {
            if part == "{sources}" {
                rendered.extend(context.sources.iter().map(|s| display(s)));
                continue;
            }
            let mut value = part
                .replace("{entry}", &display(&context.entry_point))
                .replace("{exe}", &display(&context.executable()))
                .replace("{dir}", &display(&context.root_dir))
                .replace("{problem}", context.problem_name());
            if value.contains("{class}") {
                value = value.replace("{class}", &context.java_main_class()?);
            }
            rendered.push(value);
        }

        let mut command = CommandLine::from_parts(rendered)
            .with_context(|| format!("invalid command template {:?}", self.parts))?;
        for (key, value) in &self.env {
            command = command.env(key, value);
        }
        Ok(command)
    }
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Reads `package x.y;` and the first `class Name` from a Java source file.
pub(crate) fn java_main_class(entry_point: &Path) -> anyhow::Result<String> {
    let source = std::fs::read_to_string(entry_point)
        .with_context(|| format!("could not read {}", entry_point.display()))?;
    let package = Regex::new(r"package\s+([^\s;]+);").context("invalid package pattern")?;
    let class = Regex::new(r"class\s+(\w+)\W").context("invalid class pattern")?;

    let Some(class_name) = class.captures(&source).map(|c| c[1].to_string()) else {
        bail!("no class declaration in {}", entry_point.display());
    };
    Ok(match package.captures(&source) {
        Some(package) => format!("{}.{class_name}", &package[1]),
        None => class_name,
    })
}

#[cfg(test)]
mod template_tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::Problem;

    fn context(dir: &Path, files: &[&str]) -> (Arc<Solution>, Vec<PathBuf>) {
        let problem = Arc::new(Problem::new("sum", dir));
        let files: Vec<PathBuf> = files.iter().map(|f| dir.join(f)).collect();
        let solution = Arc::new(Solution::new(
            problem,
            "alice",
            dir,
            files.clone(),
            Some("c".into()),
        ));
        (solution, files)
    }

    #[cfg(unix)]
    #[test]
    fn sources_expand_to_separate_arguments() {
        let dir = Path::new("/work/alice");
        let (solution, files) = context(dir, &["a.c", "b.c"]);
        let ctx = BuildContext {
            solution: &solution,
            root_dir: dir.to_path_buf(),
            entry_point: files[0].clone(),
            sources: files,
        };
        let command = CommandTemplate::new(["gcc", "-O2", "{sources}", "-o", "{exe}"])
            .with_env("LANG", "C")
            .render(&ctx)
            .unwrap();
        assert_eq!(command.program, "gcc");
        assert_eq!(
            command.args,
            [
                "-O2".to_string(),
                "/work/alice/a.c".into(),
                "/work/alice/b.c".into(),
                "-o".into(),
                format!("/work/alice/sum{EXE_SUFFIX}"),
            ]
        );
        assert_eq!(command.env, [("LANG".to_string(), "C".to_string())]);
    }

    #[test]
    fn java_class_includes_the_package() {
        let dir = tempfile::tempdir().unwrap();
        let entry = dir.path().join("Sum.java");
        std::fs::write(
            &entry,
            "package contest.sum;\n\npublic class Sum {\n  public static void main(String[] a) {}\n}\n",
        )
        .unwrap();
        assert_eq!(java_main_class(&entry).unwrap(), "contest.sum.Sum");

        std::fs::write(&entry, "class Main{}").unwrap();
        assert_eq!(java_main_class(&entry).unwrap(), "Main");

        std::fs::write(&entry, "interface Nothing {}").unwrap();
        assert!(java_main_class(&entry).is_err());
    }
}
