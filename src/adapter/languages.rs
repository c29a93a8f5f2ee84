use anyhow::{bail, Context};

use super::{
    template::{BuildContext, CommandTemplate},
    toolchain::{self, Toolchain},
    LanguageAdapter,
};
use crate::runner::CommandLine;

/// A language described entirely by command templates.
///
/// ```
/// # use hammurabi::adapter::{CommandTemplate, TemplateAdapter};
/// let lua = TemplateAdapter::new("lua", [".lua"])
///     .with_run(CommandTemplate::new(["lua", "{entry}"]))
///     .with_version_command(["lua", "-v"]);
/// ```
#[derive(Debug, Clone)]
pub struct TemplateAdapter {
    language: String,
    extensions: Vec<String>,
    compile: Option<CommandTemplate>,
    run: CommandTemplate,
    versions: Vec<Vec<String>>,
}

impl TemplateAdapter {
    /// A language running `{entry}` directly until [`with_run`](Self::with_run) says otherwise.
    pub fn new<I, S>(language: impl Into<String>, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            language: language.into(),
            extensions: extensions.into_iter().map(Into::into).collect(),
            compile: None,
            run: CommandTemplate::new(["{entry}"]),
            versions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_compile(mut self, template: CommandTemplate) -> Self {
        self.compile = Some(template);
        self
    }

    #[must_use]
    pub fn with_run(mut self, template: CommandTemplate) -> Self {
        self.run = template;
        self
    }

    #[must_use]
    pub fn with_version_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.versions
            .push(command.into_iter().map(Into::into).collect());
        self
    }
}

impl LanguageAdapter for TemplateAdapter {
    fn language(&self) -> &str {
        &self.language
    }

    fn preferred_extensions(&self) -> &[String] {
        &self.extensions
    }

    fn compile_command(&self, context: &BuildContext) -> anyhow::Result<Option<CommandLine>> {
        self.compile
            .as_ref()
            .map(|template| template.render(context))
            .transpose()
    }

    fn run_command(&self, context: &BuildContext) -> anyhow::Result<CommandLine> {
        self.run.render(context)
    }

    fn version_commands(&self) -> Vec<CommandLine> {
        self.versions
            .iter()
            .filter_map(|parts| CommandLine::from_parts(parts.iter().cloned()).ok())
            .collect()
    }
}

pub fn java() -> TemplateAdapter {
    TemplateAdapter::new("java", [".java"])
        .with_compile(CommandTemplate::new(["javac", "-O", "-d", ".", "{sources}"]))
        .with_run(CommandTemplate::new(["java", "{class}"]))
        .with_version_command(["java", "-version"])
        .with_version_command(["javac", "-version"])
}

pub fn javascript() -> TemplateAdapter {
    TemplateAdapter::new("javascript", [".js"])
        .with_run(CommandTemplate::new(["node", "{entry}"]))
        .with_version_command(["node", "--version"])
}

pub fn python() -> TemplateAdapter {
    TemplateAdapter::new("python", [".py"])
        .with_run(CommandTemplate::new(["python", "{entry}"]))
        .with_version_command(["python", "--version"])
}

pub fn ruby() -> TemplateAdapter {
    TemplateAdapter::new("ruby", [".rb"])
        .with_run(CommandTemplate::new(["ruby", "{entry}"]))
        .with_version_command(["ruby", "--version"])
}

/// Which native language a [`NativeAdapter`] compiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeLanguage {
    C,
    Cpp,
}

/// C and C++: compiled with the host toolchain into `<problem>[.exe]`, then run directly.
#[derive(Debug, Clone)]
pub struct NativeAdapter {
    language: NativeLanguage,
    extensions: Vec<String>,
}

impl NativeAdapter {
    pub fn new(language: NativeLanguage) -> Self {
        let extension = match language {
            NativeLanguage::C => ".c",
            NativeLanguage::Cpp => ".cpp",
        };
        Self {
            language,
            extensions: vec![extension.to_string()],
        }
    }

    fn gnu_template(&self) -> CommandTemplate {
        let compiler: &[&str] = match self.language {
            NativeLanguage::C => &["gcc", "--std=c99", "-O2"],
            NativeLanguage::Cpp => &["g++", "-std=c++11", "-O3"],
        };
        let parts = compiler.iter().chain(&["{sources}", "-o", "{exe}"]).copied();
        // plain ASCII diagnostics, compiler logs end up in reports
        CommandTemplate::new(parts)
            .with_env("LC_ALL", "C")
            .with_env("LANG", "C")
    }

    fn msvc_command(&self, vcvarsall: &std::path::Path, context: &BuildContext) -> CommandLine {
        let sources = context
            .sources
            .iter()
            .map(|source| format!("\"{}\"", source.display()))
            .collect::<Vec<_>>()
            .join(" ");
        vcvars_command(
            vcvarsall,
            &format!(
                "cl /nologo /Ox /EHsc {sources} /Fe:\"{}\"",
                context.executable().display()
            ),
        )
    }
}

/// Runs `command` through `cmd.exe` once the MSVC environment is loaded.
///
/// `/S` strips exactly the outer pair of quotes, the rest of the line reaches `cmd` unchanged.
fn vcvars_command(vcvarsall: &std::path::Path, command: &str) -> CommandLine {
    let script = format!("\"\"{}\" x64 >nul 2>&1 && {command}\"", vcvarsall.display());
    CommandLine::new("cmd")
        .args(["/S", "/C", script.as_str()])
        .raw_args()
}

impl LanguageAdapter for NativeAdapter {
    fn language(&self) -> &str {
        match self.language {
            NativeLanguage::C => "c",
            NativeLanguage::Cpp => "cpp",
        }
    }

    fn preferred_extensions(&self) -> &[String] {
        &self.extensions
    }

    fn compile_command(&self, context: &BuildContext) -> anyhow::Result<Option<CommandLine>> {
        let command = match toolchain::detect() {
            Some(Toolchain::Gnu) => self.gnu_template().render(context)?,
            Some(Toolchain::Msvc { vcvarsall }) => self.msvc_command(vcvarsall, context),
            None => bail!("No C/C++ toolchain available on this host"),
        };
        Ok(Some(command))
    }

    fn run_command(&self, context: &BuildContext) -> anyhow::Result<CommandLine> {
        CommandTemplate::new(["{exe}"])
            .render(context)
            .context("could not build the run command")
    }

    fn version_commands(&self) -> Vec<CommandLine> {
        let compiler = match self.language {
            NativeLanguage::C => "gcc",
            NativeLanguage::Cpp => "g++",
        };
        match toolchain::detect() {
            Some(Toolchain::Gnu) => vec![CommandLine::new(compiler)
                .arg("--version")
                .env("LC_ALL", "C")],
            Some(Toolchain::Msvc { vcvarsall }) => vec![vcvars_command(vcvarsall, "cl")],
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod languages_tests {
    use std::{path::PathBuf, sync::Arc};

    use super::*;
    use crate::model::{Problem, Solution};

    fn render(adapter: &dyn LanguageAdapter, files: &[&str]) -> (Option<CommandLine>, CommandLine) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let files: Vec<PathBuf> = files.iter().map(|f| root.join(f)).collect();
        for file in &files {
            std::fs::write(file, "public class Sum {}\n").unwrap();
        }
        let problem = Arc::new(Problem::new("sum", &root));
        let solution = Solution::new(problem, "bob", &root, files.clone(), None);
        let context = BuildContext {
            solution: &solution,
            root_dir: root,
            entry_point: files[0].clone(),
            sources: files,
        };
        (
            adapter.compile_command(&context).unwrap(),
            adapter.run_command(&context).unwrap(),
        )
    }

    #[test]
    fn interpreted_languages_run_the_entry_point() {
        let (compile, run) = render(&python(), &["sum.py"]);
        assert!(compile.is_none());
        assert_eq!(run.program, "python");
        assert!(run.args[0].ends_with("sum.py"));
    }

    #[test]
    fn java_compiles_then_runs_the_main_class() {
        let (compile, run) = render(&java(), &["Sum.java"]);
        let compile = compile.unwrap();
        assert_eq!(compile.program, "javac");
        assert_eq!(&compile.args[..3], ["-O", "-d", "."]);
        assert_eq!(run.program, "java");
        assert_eq!(run.args, ["Sum"]);
    }

    #[test]
    fn msvc_script_reaches_cmd_verbatim() {
        let command = vcvars_command(
            std::path::Path::new(r"C:\Program Files\VC\vcvarsall.bat"),
            r#"cl "a b.c" /Fe:"sum.exe""#,
        );
        assert_eq!(command.program, "cmd");
        assert!(command.raw_args);
        assert_eq!(
            command.args,
            [
                "/S",
                "/C",
                r#"""C:\Program Files\VC\vcvarsall.bat" x64 >nul 2>&1 && cl "a b.c" /Fe:"sum.exe"""#
            ]
        );
    }

    #[cfg(not(windows))]
    #[test]
    fn c_compiles_to_an_executable_named_after_the_problem() {
        let (compile, run) = render(&NativeAdapter::new(NativeLanguage::C), &["sum.c", "util.c"]);
        let compile = compile.unwrap();
        assert_eq!(compile.program, "gcc");
        assert!(compile.args.iter().any(|a| a.ends_with("util.c")));
        assert!(compile.env.contains(&("LANG".to_string(), "C".to_string())));
        assert!(run.program.ends_with("/sum"));
        assert_eq!(compile.args.last(), Some(&run.program));
    }
}
