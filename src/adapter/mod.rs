//! Per-language knowledge: which files belong to a solution and how to build and run it.
//!
//! A [`LanguageAdapter`] only synthesizes commands. The per-solution lifecycle (entry point
//! resolution, compiling once, supplying the input file, collecting the answer) is shared by
//! every language and lives in [`SolutionAdapter`].
//!
//! Most languages are plain data, see [`TemplateAdapter`]. C and C++ branch on the host
//! toolchain ([`NativeAdapter`]), C# needs a generated project file ([`CSharpAdapter`]).
//!
//! | Language     | Extensions | Compile                               | Run                   |
//! |--------------|------------|---------------------------------------|-----------------------|
//! | `c`          | `.c`       | `gcc --std=c99 -O2` (or MSVC `cl`)    | `<problem>`           |
//! | `cpp`        | `.cpp`     | `g++ -std=c++11 -O3` (or MSVC `cl`)   | `<problem>`           |
//! | `csharp`     | `.cs`      | `dotnet build -c Release`             | `dotnet <problem>.dll`|
//! | `java`       | `.java`    | `javac -O -d .`                       | `java <package.Class>`|
//! | `javascript` | `.js`      |                                       | `node <entry>`        |
//! | `python`     | `.py`      |                                       | `python <entry>`      |
//! | `ruby`       | `.rb`      |                                       | `ruby <entry>`        |

use std::path::{Path, PathBuf};

use anyhow::bail;

use crate::{model::Solution, registry::Registry, runner::CommandLine};

mod csharp;
mod languages;
mod solution;
mod template;
pub mod toolchain;

pub use csharp::CSharpAdapter;
pub use languages::{NativeAdapter, NativeLanguage, TemplateAdapter};
pub use solution::{ExecutionOutcome, SolutionAdapter};
pub use template::{BuildContext, CommandTemplate};

/// Command synthesis for one language.
pub trait LanguageAdapter: Send + Sync {
    fn language(&self) -> &str;

    /// Extensions (lowercase, with the dot) of the files compiled or run for this language.
    fn preferred_extensions(&self) -> &[String];

    /// The file the program starts from, see [`entry_point_file`].
    fn entry_point_file(&self, solution: &Solution) -> Option<PathBuf> {
        entry_point_file(solution)
    }

    /// Writes whatever the compiler needs besides the sources. Called before each compilation.
    fn prepare_build(&self, _context: &BuildContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// `None` for interpreted languages.
    fn compile_command(&self, context: &BuildContext) -> anyhow::Result<Option<CommandLine>>;

    fn run_command(&self, context: &BuildContext) -> anyhow::Result<CommandLine>;

    /// Commands printing the version of the compiler or interpreter.
    fn version_commands(&self) -> Vec<CommandLine> {
        Vec::new()
    }
}

/// Resolves the entry point of a solution.
///
/// 1. the only file, if there is exactly one;
/// 2. else the file whose stem is the problem name (case-insensitive);
/// 3. else the file whose stem is `main` or `program` (case-insensitive);
/// 4. else none, and the solution is considered missing.
pub fn entry_point_file(solution: &Solution) -> Option<PathBuf> {
    if let [only] = solution.files.as_slice() {
        return Some(only.clone());
    }
    let problem = solution.problem.name.as_str();
    let find = |names: &[&str]| {
        solution
            .files
            .iter()
            .find(|file| stem_is_one_of(file, names))
            .cloned()
    };
    find(&[problem]).or_else(|| find(&["main", "program"]))
}

fn stem_is_one_of(file: &Path, names: &[&str]) -> bool {
    file.file_stem()
        .and_then(|stem| stem.to_str())
        .is_some_and(|stem| names.iter().any(|name| stem.eq_ignore_ascii_case(name)))
}

/// Used for solutions whose language has no adapter. Running one is a judge error.
#[derive(Debug, Clone)]
pub struct FallbackAdapter {
    language: String,
}

impl FallbackAdapter {
    pub fn new(language: Option<&str>) -> Self {
        Self {
            language: language.unwrap_or("unknown").to_string(),
        }
    }
}

impl LanguageAdapter for FallbackAdapter {
    fn language(&self) -> &str {
        &self.language
    }

    fn preferred_extensions(&self) -> &[String] {
        &[]
    }

    fn compile_command(&self, _context: &BuildContext) -> anyhow::Result<Option<CommandLine>> {
        Ok(None)
    }

    fn run_command(&self, _context: &BuildContext) -> anyhow::Result<CommandLine> {
        bail!("No adapter registered for language '{}'", self.language)
    }
}

/// Language name to adapter.
#[derive(Debug)]
pub struct AdapterRegistry {
    adapters: Registry<dyn LanguageAdapter>,
}

impl AdapterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            adapters: Registry::new("language"),
        }
    }

    pub fn register(
        &mut self,
        language: impl Into<String>,
        constructor: impl Fn() -> Box<dyn LanguageAdapter> + Send + Sync + 'static,
    ) -> &mut Self {
        self.adapters.register(language, constructor);
        self
    }

    /// Registers a data-driven language under its own name.
    pub fn register_template(&mut self, adapter: TemplateAdapter) -> &mut Self {
        let language = adapter.language().to_string();
        self.register(language, move || Box::new(adapter.clone()))
    }

    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.adapters.names()
    }

    /// The adapter of `language`, or a [`FallbackAdapter`] for unknown or missing languages.
    pub fn adapter_for(&self, language: Option<&str>) -> Box<dyn LanguageAdapter> {
        language
            .and_then(|language| self.adapters.create(language).ok())
            .unwrap_or_else(|| Box::new(FallbackAdapter::new(language)))
    }

    /// The language whose extensions match the most of `files`, ties broken by name.
    pub fn detect_language(&self, files: &[PathBuf]) -> Option<String> {
        let extensions: Vec<String> = files
            .iter()
            .filter_map(|file| file.extension().and_then(|ext| ext.to_str()))
            .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
            .collect();

        let mut best: Option<(usize, String)> = None;
        for language in self.languages() {
            let adapter = self.adapter_for(Some(language));
            let preferred = adapter.preferred_extensions();
            let matches = extensions.iter().filter(|ext| preferred.contains(ext)).count();
            // languages are visited in name order, so the first maximum wins ties
            if matches > 0 && best.as_ref().map_or(true, |(most, _)| matches > *most) {
                best = Some((matches, language.to_string()));
            }
        }
        best.map(|(_, language)| language)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        default_adapters()
    }
}

/// Registry with every built-in language.
pub fn default_adapters() -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    registry
        .register("c", || Box::new(NativeAdapter::new(NativeLanguage::C)))
        .register("cpp", || Box::new(NativeAdapter::new(NativeLanguage::Cpp)))
        .register("csharp", || Box::new(CSharpAdapter::new()))
        .register_template(languages::java())
        .register_template(languages::javascript())
        .register_template(languages::python())
        .register_template(languages::ruby());
    registry
}
