//! C and C++ compiler detection.
//!
//! Everywhere but Windows the GNU toolchain is assumed. On Windows, MinGW (`gcc` and `g++` on
//! `PATH`) is preferred, then MSVC located through `vswhere`. Detection runs once per process.

use std::{path::PathBuf, sync::OnceLock};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Toolchain {
    /// `gcc` / `g++`, invoked directly.
    Gnu,
    /// `cl`, invoked through `cmd /C` after `vcvarsall.bat x64` set up its environment.
    Msvc { vcvarsall: PathBuf },
}

impl Toolchain {
    pub fn description(&self) -> &'static str {
        match self {
            Toolchain::Gnu => "GNU Compiler Collection",
            Toolchain::Msvc { .. } => "Microsoft Visual C++ (MSVC)",
        }
    }
}

/// The C/C++ toolchain of this host, `None` when no compiler could be found.
pub fn detect() -> Option<&'static Toolchain> {
    static TOOLCHAIN: OnceLock<Option<Toolchain>> = OnceLock::new();
    TOOLCHAIN
        .get_or_init(|| {
            let detected = detect_uncached();
            match &detected {
                Some(toolchain) => tracing::info!("C/C++ toolchain: {}", toolchain.description()),
                None => tracing::warn!("no C/C++ toolchain detected"),
            }
            detected
        })
        .as_ref()
}

#[cfg(not(windows))]
fn detect_uncached() -> Option<Toolchain> {
    Some(Toolchain::Gnu)
}

#[cfg(windows)]
fn detect_uncached() -> Option<Toolchain> {
    if on_path("gcc") && on_path("g++") {
        return Some(Toolchain::Gnu);
    }
    windows::find_vcvarsall().map(|vcvarsall| Toolchain::Msvc { vcvarsall })
}

#[cfg(windows)]
fn on_path(program: &str) -> bool {
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    let file = format!("{program}{}", std::env::consts::EXE_SUFFIX);
    std::env::split_paths(&path).any(|dir| dir.join(&file).is_file())
}

#[cfg(windows)]
mod windows {
    use std::{
        path::{Path, PathBuf},
        process::Command,
    };

    use tracing::debug;

    fn find_vswhere() -> Option<PathBuf> {
        let program_files = std::env::var_os("ProgramFiles(x86)")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(r"C:\Program Files (x86)"));
        let installed = program_files
            .join("Microsoft Visual Studio")
            .join("Installer")
            .join("vswhere.exe");
        if installed.is_file() {
            return Some(installed);
        }
        super::on_path("vswhere").then(|| PathBuf::from("vswhere"))
    }

    pub(super) fn find_vcvarsall() -> Option<PathBuf> {
        let vswhere = find_vswhere()?;
        let output = Command::new(&vswhere)
            .args([
                "-latest",
                "-products",
                "*",
                "-requires",
                "Microsoft.VisualStudio.Component.VC.Tools.x86.x64",
                "-property",
                "installationPath",
            ])
            .output()
            .map_err(|e| debug!("vswhere failed: {e}"))
            .ok()?;
        let install = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() || install.is_empty() {
            return None;
        }
        let vcvarsall = Path::new(&install)
            .join("VC")
            .join("Auxiliary")
            .join("Build")
            .join("vcvarsall.bat");
        vcvarsall.is_file().then_some(vcvarsall)
    }
}
