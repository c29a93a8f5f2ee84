use std::{process::Command, sync::OnceLock};

use anyhow::Context;
use tracing::debug;

use super::{template::BuildContext, LanguageAdapter};
use crate::runner::CommandLine;

const FALLBACK_FRAMEWORK: &str = "net8.0";

/// C#: builds a generated `<problem>.csproj` with `dotnet build`, then runs the produced dll.
#[derive(Debug, Clone)]
pub struct CSharpAdapter {
    extensions: Vec<String>,
}

impl CSharpAdapter {
    pub fn new() -> Self {
        Self {
            extensions: vec![".cs".to_string()],
        }
    }

    fn project_file(context: &BuildContext) -> std::path::PathBuf {
        context
            .root_dir
            .join(format!("{}.csproj", context.problem_name()))
    }
}

impl Default for CSharpAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// `netX.0` for the first installed SDK, detected once.
fn target_framework() -> &'static str {
    static FRAMEWORK: OnceLock<String> = OnceLock::new();
    FRAMEWORK.get_or_init(|| {
        let detected = Command::new("dotnet")
            .arg("--list-sdks")
            .output()
            .ok()
            .filter(|output| output.status.success())
            .and_then(|output| framework_from_sdk_list(&String::from_utf8_lossy(&output.stdout)));
        debug!("dotnet target framework: {detected:?}");
        detected.unwrap_or_else(|| FALLBACK_FRAMEWORK.to_string())
    })
}

/// Parses lines like `8.0.404 [/usr/share/dotnet/sdk]`.
fn framework_from_sdk_list(list: &str) -> Option<String> {
    let version = list.lines().next()?.split_whitespace().next()?;
    let major = version.split('.').next()?;
    major
        .parse::<u32>()
        .ok()
        .map(|major| format!("net{major}.0"))
}

fn project(name: &str, framework: &str, sources: &[String]) -> String {
    let includes = sources
        .iter()
        .map(|file| format!("    <Compile Include=\"{file}\" />"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"<Project Sdk="Microsoft.NET.Sdk">
  <PropertyGroup>
    <OutputType>Exe</OutputType>
    <TargetFramework>{framework}</TargetFramework>
    <EnableDefaultItems>false</EnableDefaultItems>
    <AssemblyName>{name}</AssemblyName>
  </PropertyGroup>
  <ItemGroup>
{includes}
  </ItemGroup>
</Project>
"#
    )
}

impl LanguageAdapter for CSharpAdapter {
    fn language(&self) -> &str {
        "csharp"
    }

    fn preferred_extensions(&self) -> &[String] {
        &self.extensions
    }

    fn prepare_build(&self, context: &BuildContext) -> anyhow::Result<()> {
        let sources: Vec<String> = context
            .sources
            .iter()
            .filter_map(|source| source.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        let path = Self::project_file(context);
        std::fs::write(
            &path,
            project(context.problem_name(), target_framework(), &sources),
        )
        .with_context(|| format!("could not write {}", path.display()))
    }

    fn compile_command(&self, context: &BuildContext) -> anyhow::Result<Option<CommandLine>> {
        let root = context.root_dir.to_string_lossy().into_owned();
        Ok(Some(CommandLine::new("dotnet").args([
            "build".to_string(),
            Self::project_file(context).to_string_lossy().into_owned(),
            "-c".into(),
            "Release".into(),
            "-o".into(),
            root,
        ])))
    }

    fn run_command(&self, context: &BuildContext) -> anyhow::Result<CommandLine> {
        let dll = context
            .root_dir
            .join(format!("{}.dll", context.problem_name()));
        Ok(CommandLine::new("dotnet").arg(dll.to_string_lossy()))
    }

    fn version_commands(&self) -> Vec<CommandLine> {
        vec![CommandLine::new("dotnet").arg("--version")]
    }
}
