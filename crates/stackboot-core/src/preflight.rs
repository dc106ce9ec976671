//! Checks that run before anything is created: the working root must be a
//! writable directory, and the host interpreter must be new enough to build
//! a virtual environment.

use crate::config::{ConfigWarning, WarnLevel};
use crate::error::Result;
use crate::exec::{CommandSpec, Runner};
use crate::installer;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Oldest host interpreter that can create the venv.
pub const MIN_PYTHON: (u32, u32) = (3, 8);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostPython {
    pub path: PathBuf,
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Preflight {
    pub writable: bool,
    /// `None` when the interpreter was not checked or not found.
    pub python: Option<HostPython>,
    pub issues: Vec<ConfigWarning>,
}

impl Preflight {
    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.level == WarnLevel::Error)
    }

    /// Error-level messages, one per line.
    pub fn error_summary(&self) -> String {
        self.issues
            .iter()
            .filter(|i| i.level == WarnLevel::Error)
            .map(|i| format!("  - {}", i.message))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn push(&mut self, level: WarnLevel, message: String) {
        self.issues.push(ConfigWarning { level, message });
    }
}

/// Run every check. Only an interruption is returned as an error; everything
/// else lands in [`Preflight::issues`].
///
/// A missing interpreter is a warning: stages that need one report it
/// themselves. An interpreter older than [`MIN_PYTHON`] is an error.
pub fn run(
    runner: &mut dyn Runner,
    root: &Path,
    python: Option<&str>,
    check_python: bool,
) -> Result<Preflight> {
    let mut report = Preflight::default();

    // A root that does not exist yet is created under its nearest ancestor.
    let target = root.ancestors().find(|p| p.exists()).unwrap_or(root);
    if !target.is_dir() {
        report.push(
            WarnLevel::Error,
            format!("working root {} is not a directory", target.display()),
        );
    } else {
        match check_writable(target) {
            Ok(()) => report.writable = true,
            Err(e) => report.push(
                WarnLevel::Error,
                format!("no write permission in {}: {e}", target.display()),
            ),
        }
    }

    if !check_python {
        return Ok(report);
    }
    let Some(path) = installer::find_host_python(&*runner, python) else {
        report.push(
            WarnLevel::Warning,
            format!(
                "no Python interpreter found on PATH (looked for: {})",
                installer::host_python_names()
            ),
        );
        return Ok(report);
    };

    let spec = CommandSpec::new(&path).arg("--version").quiet();
    let output = match runner.run("preflight", &spec) {
        Ok(out) => format!("{}\n{}", out.stdout, out.stderr),
        Err(e) if e.is_interrupted() => return Err(e),
        Err(e) => {
            report.push(
                WarnLevel::Warning,
                format!("could not run {} --version: {e}", path.display()),
            );
            return Ok(report);
        }
    };

    match parse_version(&output) {
        Some((major, minor, version)) => {
            if (major, minor) < MIN_PYTHON {
                report.push(
                    WarnLevel::Error,
                    format!(
                        "Python {version} at {} is too old; {}.{}+ is required",
                        path.display(),
                        MIN_PYTHON.0,
                        MIN_PYTHON.1
                    ),
                );
            }
            report.python = Some(HostPython { path, version });
        }
        None => report.push(
            WarnLevel::Warning,
            format!("could not read the version of {}", path.display()),
        ),
    }
    Ok(report)
}

/// Create and remove a scratch directory inside `root`.
pub fn check_writable(root: &Path) -> std::io::Result<()> {
    tempfile::Builder::new()
        .prefix(".stackboot-write-check")
        .tempdir_in(root)
        .map(drop)
}

/// `Python 3.12.1` → `(3, 12, "3.12.1")`. Pre-release suffixes are ignored
/// when comparing.
fn parse_version(output: &str) -> Option<(u32, u32, String)> {
    let version = output
        .split_whitespace()
        .skip_while(|w| *w != "Python")
        .nth(1)?;
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor: String = parts
        .next()?
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    Some((major, minor.parse().ok()?, version.to_string()))
}
