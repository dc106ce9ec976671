//! Subprocess invocation for install and verification steps.
//!
//! Every external tool (uv, pip, the venv module, npm) goes through a
//! [`Runner`]. The system runner streams child output to the terminal line by
//! line while keeping a copy of both streams, so a failing step can dump
//! exactly what the tool said.
//!
//! # Exit classification
//! - exit 0: `Ok(Captured)`
//! - killed by SIGINT (or `STATUS_CONTROL_C_EXIT` on Windows): [`StackError::Interrupted`]
//! - anything else: [`StackError::CommandFailed`] with both streams attached

use std::ffi::{OsStr, OsString};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use crate::error::{CommandFailure, Result, StackError};

// ---------------------------------------------------------------------------
// CommandSpec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, OsString)>,
    /// Echo output lines to the terminal while the command runs.
    pub echo: bool,
}

impl CommandSpec {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            echo: true,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn cwd(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    pub fn env(mut self, key: &str, value: impl AsRef<OsStr>) -> Self {
        self.env.push((key.to_string(), value.as_ref().to_os_string()));
        self
    }

    /// Capture without echoing (probe scripts, availability checks).
    pub fn quiet(mut self) -> Self {
        self.echo = false;
        self
    }

    /// Human-readable command line, for logs and error messages.
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd
    }
}

/// Output of a command that exited successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    pub stdout: String,
    pub stderr: String,
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

pub trait Runner {
    /// Locate `program` on PATH.
    fn find(&self, program: &str) -> Option<PathBuf>;

    /// Run `spec` to completion. `step` names the pipeline step for errors.
    fn run(&mut self, step: &str, spec: &CommandSpec) -> Result<Captured>;
}

/// Runs real subprocesses.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl Runner for SystemRunner {
    fn find(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }

    fn run(&mut self, step: &str, spec: &CommandSpec) -> Result<Captured> {
        let command = spec.display();
        tracing::debug!(step, %command, "spawning");

        let mut child = spec
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| StackError::Spawn {
                command: command.clone(),
                source,
            })?;

        let out = child.stdout.take();
        let err = child.stderr.take();
        let echo = spec.echo;
        let (stdout, stderr) = std::thread::scope(|s| {
            let out = s.spawn(move || out.map(|r| pump(r, echo)).unwrap_or_default());
            let err = s.spawn(move || err.map(|r| pump(r, echo)).unwrap_or_default());
            (
                out.join().unwrap_or_default(),
                err.join().unwrap_or_default(),
            )
        });

        let status = child.wait()?;
        classify(step, command, status, stdout, stderr)
    }
}

/// Copy lines from `reader` into a buffer, echoing them when asked.
///
/// Echo goes to stderr for both pipes so stdout stays clean for `--json`.
fn pump<R: Read>(reader: R, echo: bool) -> String {
    let mut reader = BufReader::new(reader);
    let mut captured = String::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                if echo {
                    eprintln!("    {}", line.trim_end_matches(['\r', '\n']));
                }
                captured.push_str(&line);
            }
        }
    }
    captured
}

fn classify(
    step: &str,
    command: String,
    status: ExitStatus,
    stdout: String,
    stderr: String,
) -> Result<Captured> {
    if status.success() {
        return Ok(Captured { stdout, stderr });
    }
    if interrupted(&status) {
        return Err(StackError::Interrupted {
            step: step.to_string(),
        });
    }
    Err(StackError::CommandFailed(Box::new(CommandFailure {
        step: step.to_string(),
        command,
        code: status.code(),
        stdout,
        stderr,
    })))
}

#[cfg(unix)]
fn interrupted(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.signal() == Some(nix::libc::SIGINT)
}

#[cfg(windows)]
fn interrupted(status: &ExitStatus) -> bool {
    const STATUS_CONTROL_C_EXIT: u32 = 0xC000_013A;
    status.code() == Some(STATUS_CONTROL_C_EXIT as i32)
}

#[cfg(not(any(unix, windows)))]
fn interrupted(_status: &ExitStatus) -> bool {
    false
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::HashSet;

    type Handler = Box<dyn FnMut(&CommandSpec) -> Result<Captured>>;

    /// Scripted runner: records every command line and answers from
    /// substring-matched handlers. Unmatched commands succeed silently.
    #[derive(Default)]
    pub struct FakeRunner {
        pub tools: HashSet<String>,
        pub calls: Vec<String>,
        handlers: Vec<(String, Handler)>,
    }

    impl FakeRunner {
        pub fn with_tools(tools: &[&str]) -> Self {
            Self {
                tools: tools.iter().map(|t| t.to_string()).collect(),
                ..Self::default()
            }
        }

        pub fn on(
            &mut self,
            pattern: &str,
            handler: impl FnMut(&CommandSpec) -> Result<Captured> + 'static,
        ) -> &mut Self {
            self.handlers.push((pattern.to_string(), Box::new(handler)));
            self
        }

        pub fn ran(&self, pattern: &str) -> bool {
            self.calls.iter().any(|c| c.contains(pattern))
        }
    }

    impl Runner for FakeRunner {
        fn find(&self, program: &str) -> Option<PathBuf> {
            self.tools
                .contains(program)
                .then(|| PathBuf::from(format!("/usr/bin/{program}")))
        }

        fn run(&mut self, _step: &str, spec: &CommandSpec) -> Result<Captured> {
            let line = spec.display();
            self.calls.push(line.clone());
            for (pattern, handler) in self.handlers.iter_mut() {
                if line.contains(pattern.as_str()) {
                    return handler(spec);
                }
            }
            Ok(Captured::default())
        }
    }

    pub fn failed(step: &str, spec: &CommandSpec, stderr: &str) -> StackError {
        StackError::CommandFailed(Box::new(CommandFailure {
            step: step.to_string(),
            command: spec.display(),
            code: Some(1),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_program_and_args() {
        let spec = CommandSpec::new("python")
            .args(["-m", "pip", "install"])
            .arg("-r")
            .arg(Path::new("requirements.txt"));
        assert_eq!(spec.display(), "python -m pip install -r requirements.txt");
        assert!(spec.echo);
        assert!(!spec.quiet().echo);
    }

    #[cfg(unix)]
    #[test]
    fn captures_both_streams() {
        let spec = CommandSpec::new("sh")
            .args(["-c", "echo out; echo err 1>&2"])
            .quiet();
        let got = SystemRunner.run("probe", &spec).unwrap();
        assert_eq!(got.stdout, "out\n");
        assert_eq!(got.stderr, "err\n");
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_keeps_output() {
        let spec = CommandSpec::new("sh")
            .args(["-c", "echo partial; echo broken 1>&2; exit 3"])
            .quiet();
        match SystemRunner.run("install", &spec).unwrap_err() {
            StackError::CommandFailed(f) => {
                assert_eq!(f.step, "install");
                assert_eq!(f.code, Some(3));
                assert_eq!(f.stdout, "partial\n");
                assert_eq!(f.stderr, "broken\n");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn sigint_maps_to_interrupted() {
        let spec = CommandSpec::new("sh").args(["-c", "kill -INT $$"]).quiet();
        let err = SystemRunner.run("install", &spec).unwrap_err();
        assert!(err.is_interrupted());
    }

    #[cfg(unix)]
    #[test]
    fn env_and_cwd_are_applied() {
        let dir = tempfile::TempDir::new().unwrap();
        let spec = CommandSpec::new("sh")
            .args(["-c", "echo \"$STACKBOOT_TEST\"; pwd"])
            .env("STACKBOOT_TEST", "yes")
            .cwd(dir.path())
            .quiet();
        let got = SystemRunner.run("probe", &spec).unwrap();
        let mut lines = got.stdout.lines();
        assert_eq!(lines.next(), Some("yes"));
        let pwd = PathBuf::from(lines.next().unwrap());
        assert_eq!(
            pwd.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let spec = CommandSpec::new("stackboot-definitely-not-a-real-tool").quiet();
        let err = SystemRunner.run("create-venv", &spec).unwrap_err();
        assert!(matches!(err, StackError::Spawn { .. }));
    }
}
