//! Long-running child processes: the backend API server and the frontend
//! dev server.
//!
//! Each process is spawned detached into its own process group with stdout
//! and stderr merged into `<run_dir>/<name>.log`. Its PID goes into the
//! [`PidRegistry`] immediately, so a later `stop` from a different
//! invocation can find it. There is no restart logic: a process is either
//! registered or it is not.

use crate::config::StackConfig;
use crate::error::{Result, StackError};
use crate::health::{wait_healthy, HealthOutcome};
use crate::io::ensure_dir;
use crate::paths;
use crate::process;
use crate::registry::PidRegistry;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// ProcessName
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessName {
    Backend,
    Frontend,
}

impl ProcessName {
    /// Start order. Stop walks it in reverse.
    pub const ALL: [ProcessName; 2] = [ProcessName::Backend, ProcessName::Frontend];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessName::Backend => "backend",
            ProcessName::Frontend => "frontend",
        }
    }
}

impl fmt::Display for ProcessName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ManagedProcess
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ManagedProcess {
    pub name: ProcessName,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Added on top of the inherited environment.
    pub env: Vec<(String, String)>,
    pub log: PathBuf,
}

impl ManagedProcess {
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

enum Plan {
    Run(ManagedProcess),
    Skip(String),
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StartOutcome {
    Spawned {
        pid: u32,
        log: PathBuf,
        /// First lines of the log captured during the follow window.
        initial_output: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        health: Option<HealthOutcome>,
    },
    AlreadyRunning {
        pid: u32,
    },
    Skipped {
        reason: String,
    },
}

impl StartOutcome {
    pub fn pid(&self) -> Option<u32> {
        match self {
            StartOutcome::Spawned { pid, .. } | StartOutcome::AlreadyRunning { pid } => Some(*pid),
            StartOutcome::Skipped { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StartReport {
    pub processes: BTreeMap<ProcessName, StartOutcome>,
}

impl StartReport {
    /// Name → PID for every process that is now running.
    pub fn pids(&self) -> BTreeMap<String, u32> {
        self.processes
            .iter()
            .filter_map(|(name, outcome)| outcome.pid().map(|pid| (name.to_string(), pid)))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped { pid: u32 },
    NotRunning,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessStatus {
    pub name: ProcessName,
    pub pid: Option<u32>,
    pub alive: bool,
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

pub struct Supervisor {
    root: PathBuf,
    cfg: StackConfig,
    registry: PidRegistry,
}

impl Supervisor {
    pub fn new(root: &Path, cfg: &StackConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            cfg: cfg.clone(),
            registry: PidRegistry::new(cfg.registry_path(root)),
        }
    }

    pub fn registry(&self) -> &PidRegistry {
        &self.registry
    }

    /// Start backend then frontend. Live registered processes are left alone.
    pub fn start(&self) -> Result<StartReport> {
        let mut report = StartReport::default();
        for name in ProcessName::ALL {
            let outcome = self.start_one(name)?;
            report.processes.insert(name, outcome);
        }
        Ok(report)
    }

    fn start_one(&self, name: ProcessName) -> Result<StartOutcome> {
        if let Some(pid) = self.registry.get(name.as_str())? {
            if process::is_alive(pid) {
                tracing::info!(%name, pid, "already running");
                return Ok(StartOutcome::AlreadyRunning { pid });
            }
            tracing::warn!(%name, pid, "removing stale registry entry");
            self.registry.remove(name.as_str())?;
        }

        let managed = match self.plan(name)? {
            Plan::Run(m) => m,
            Plan::Skip(reason) => {
                tracing::info!(%name, %reason, "skipping");
                return Ok(StartOutcome::Skipped { reason });
            }
        };

        let pid = spawn_detached(&managed)?;
        self.registry.set(name.as_str(), pid)?;
        tracing::info!(%name, pid, log = %managed.log.display(), "started");

        let sup = &self.cfg.supervisor;
        let initial_output = follow_log(&managed.log, sup.log_lines, sup.log_follow());
        for line in &initial_output {
            eprintln!("  [{name}] {line}");
        }

        let health = match name {
            ProcessName::Backend => {
                let url = self.cfg.backend.health_url();
                let outcome = wait_healthy(&url, sup.health_interval(), sup.health_timeout());
                if let HealthOutcome::Unhealthy { last_error, .. } = &outcome {
                    tracing::warn!(%url, error = %last_error, "backend did not become healthy; check the log");
                }
                Some(outcome)
            }
            ProcessName::Frontend => None,
        };

        Ok(StartOutcome::Spawned {
            pid,
            log: managed.log,
            initial_output,
            health,
        })
    }

    /// Work out what to launch for `name`, or why not to.
    fn plan(&self, name: ProcessName) -> Result<Plan> {
        let log = paths::log_path(&self.cfg.run_dir(&self.root), name.as_str());
        match name {
            ProcessName::Backend => {
                let backend = &self.cfg.backend;
                let cwd = self.cfg.backend_dir(&self.root);
                let env = vec![
                    ("FLASK_APP".to_string(), backend.app.clone()),
                    ("PYTHONPATH".to_string(), cwd.display().to_string()),
                    ("FLASK_RUN_HOST".to_string(), backend.host.clone()),
                    ("FLASK_RUN_PORT".to_string(), backend.port.to_string()),
                ];
                let (program, args) = match &backend.command {
                    Some(cmd) => split_command(name, cmd)?,
                    None => {
                        let python = self.backend_python()?;
                        let mut args: Vec<String> = ["-m", "flask", "run", "--debug", "--host"]
                            .iter()
                            .map(|s| s.to_string())
                            .collect();
                        args.push(backend.host.clone());
                        args.push("--port".to_string());
                        args.push(backend.port.to_string());
                        (python, args)
                    }
                };
                Ok(Plan::Run(ManagedProcess {
                    name,
                    program,
                    args,
                    cwd,
                    env,
                    log,
                }))
            }
            ProcessName::Frontend => {
                let frontend = &self.cfg.frontend;
                if !self.cfg.frontend_manifest(&self.root).exists() {
                    return Ok(Plan::Skip(format!(
                        "no {} in {}",
                        frontend.manifest.display(),
                        frontend.dir.display()
                    )));
                }
                let (program, args) = match &frontend.command {
                    Some(cmd) => split_command(name, cmd)?,
                    None => match which::which("npm") {
                        Ok(npm) => (npm, vec!["run".to_string(), "dev".to_string()]),
                        Err(_) => return Ok(Plan::Skip("npm not found on PATH".to_string())),
                    },
                };
                Ok(Plan::Run(ManagedProcess {
                    name,
                    program,
                    args,
                    cwd: self.cfg.frontend_dir(&self.root),
                    env: vec![
                        ("HOST".to_string(), frontend.host.clone()),
                        ("PORT".to_string(), frontend.port.to_string()),
                    ],
                    log,
                }))
            }
        }
    }

    /// The venv interpreter, or the host's when the venv is missing.
    fn backend_python(&self) -> Result<PathBuf> {
        let venv_python = paths::venv_python(&self.cfg.venv_dir(&self.root));
        if venv_python.exists() {
            return Ok(venv_python);
        }
        tracing::warn!(venv = %self.cfg.venv_dir(&self.root).display(), "venv missing, using host python");
        which::which("python3")
            .or_else(|_| which::which("python"))
            .map_err(|_| StackError::ToolNotFound("python3 / python".to_string()))
    }

    /// Stop frontend then backend. Registry entries are removed even when the
    /// signal could not be delivered.
    pub fn stop(&self) -> Result<BTreeMap<ProcessName, StopOutcome>> {
        let mut out = BTreeMap::new();
        for name in ProcessName::ALL.into_iter().rev() {
            let outcome = match self.registry.get(name.as_str())? {
                None => {
                    tracing::info!(%name, "not running");
                    StopOutcome::NotRunning
                }
                Some(pid) => {
                    if let Err(e) = process::terminate(pid) {
                        tracing::warn!(%name, pid, error = %e, "could not signal process");
                    } else {
                        tracing::info!(%name, pid, "stopped");
                    }
                    self.registry.remove(name.as_str())?;
                    StopOutcome::Stopped { pid }
                }
            };
            out.insert(name, outcome);
        }
        Ok(out)
    }

    /// Registry contents with a liveness probe per entry. Never mutates.
    pub fn status(&self) -> Result<Vec<ProcessStatus>> {
        let entries = self.registry.load()?;
        Ok(ProcessName::ALL
            .into_iter()
            .map(|name| {
                let pid = entries.get(name.as_str()).copied();
                ProcessStatus {
                    name,
                    pid,
                    alive: pid.is_some_and(process::is_alive),
                }
            })
            .collect())
    }
}

fn split_command(name: ProcessName, cmd: &[String]) -> Result<(PathBuf, Vec<String>)> {
    let (program, args) = cmd.split_first().ok_or_else(|| {
        StackError::Io(std::io::Error::other(format!("{name}.command is empty")))
    })?;
    Ok((PathBuf::from(program), args.to_vec()))
}

fn spawn_detached(managed: &ManagedProcess) -> Result<u32> {
    if let Some(dir) = managed.log.parent() {
        ensure_dir(dir)?;
    }
    let log = File::create(&managed.log)?;
    let log_err = log.try_clone()?;

    let mut cmd = Command::new(&managed.program);
    cmd.args(&managed.args)
        .current_dir(&managed.cwd)
        .envs(managed.env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const DETACHED_PROCESS: u32 = 0x0000_0008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }

    let child = cmd.spawn().map_err(|source| StackError::Spawn {
        command: managed.command_line(),
        source,
    })?;
    Ok(child.id())
}

/// Read up to `max_lines` lines from the log, waiting at most `window` for
/// them to appear.
fn follow_log(path: &Path, max_lines: usize, window: Duration) -> Vec<String> {
    let deadline = Instant::now() + window;
    loop {
        let lines: Vec<String> = std::fs::read(path)
            .map(|bytes| {
                String::from_utf8_lossy(&bytes)
                    .lines()
                    .take(max_lines)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if lines.len() >= max_lines || Instant::now() >= deadline {
            return lines;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Config tuned so tests never wait on the follow window or a real
    /// health endpoint for long.
    fn fast_config() -> StackConfig {
        let mut cfg = StackConfig::default();
        cfg.backend.port = 9;
        cfg.supervisor.log_follow_ms = 0;
        cfg.supervisor.health_interval_ms = 50;
        cfg.supervisor.health_timeout_secs = 0;
        cfg
    }

    #[test]
    fn start_skips_live_registered_backend() {
        let dir = TempDir::new().unwrap();
        let cfg = fast_config();
        let sup = Supervisor::new(dir.path(), &cfg);
        let me = std::process::id();
        sup.registry().set("backend", me).unwrap();

        for _ in 0..2 {
            let report = sup.start().unwrap();
            assert!(matches!(
                report.processes[&ProcessName::Backend],
                StartOutcome::AlreadyRunning { pid } if pid == me
            ));
            assert!(matches!(
                report.processes[&ProcessName::Frontend],
                StartOutcome::Skipped { .. }
            ));
            assert_eq!(report.pids().get("backend"), Some(&me));
            assert_eq!(sup.registry().load().unwrap().len(), 1);
        }
    }

    #[test]
    fn stop_on_empty_registry_is_ok() {
        let dir = TempDir::new().unwrap();
        let sup = Supervisor::new(dir.path(), &fast_config());
        for _ in 0..2 {
            let out = sup.stop().unwrap();
            assert!(out.values().all(|o| matches!(o, StopOutcome::NotRunning)));
        }
        assert!(!sup.registry().path().exists());
    }

    #[test]
    fn status_does_not_mutate() {
        let dir = TempDir::new().unwrap();
        let sup = Supervisor::new(dir.path(), &fast_config());
        sup.registry().set("backend", std::process::id()).unwrap();
        let before = std::fs::read(sup.registry().path()).unwrap();

        let status = sup.status().unwrap();
        assert_eq!(status.len(), 2);
        assert!(status[0].alive);
        assert_eq!(status[1].pid, None);
        assert!(!status[1].alive);
        assert_eq!(std::fs::read(sup.registry().path()).unwrap(), before);
    }

    #[test]
    fn frontend_without_manifest_is_skipped() {
        let dir = TempDir::new().unwrap();
        let sup = Supervisor::new(dir.path(), &fast_config());
        match sup.plan(ProcessName::Frontend).unwrap() {
            Plan::Skip(reason) => assert!(reason.contains("package.json")),
            Plan::Run(_) => panic!("frontend should be skipped"),
        }
    }

    #[test]
    fn backend_plan_carries_flask_environment() {
        let dir = TempDir::new().unwrap();
        let mut cfg = fast_config();
        cfg.backend.command = Some(vec!["gunicorn".into(), "app.main:create_app()".into()]);
        let sup = Supervisor::new(dir.path(), &cfg);
        let Plan::Run(m) = sup.plan(ProcessName::Backend).unwrap() else {
            panic!("backend should run");
        };
        assert_eq!(m.program, PathBuf::from("gunicorn"));
        assert_eq!(m.cwd, dir.path().join("backend"));
        assert_eq!(m.log, dir.path().join(".stackboot-run/backend.log"));
        let env: BTreeMap<_, _> = m.env.into_iter().collect();
        assert_eq!(env["FLASK_APP"], "app.main:create_app");
        assert_eq!(env["FLASK_RUN_PORT"], "9");
    }

    #[cfg(unix)]
    #[test]
    fn start_status_stop_with_real_process() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("backend")).unwrap();
        let mut cfg = fast_config();
        cfg.backend.command = Some(vec![
            "sh".into(),
            "-c".into(),
            "echo booting; exec sleep 30".into(),
        ]);
        cfg.supervisor.log_lines = 1;
        cfg.supervisor.log_follow_ms = 2000;
        let sup = Supervisor::new(dir.path(), &cfg);

        let report = sup.start().unwrap();
        let (pid, initial_output) = match &report.processes[&ProcessName::Backend] {
            StartOutcome::Spawned {
                pid,
                initial_output,
                health,
                ..
            } => {
                assert!(matches!(health, Some(HealthOutcome::Unhealthy { .. })));
                (*pid, initial_output.clone())
            }
            other => panic!("expected spawn, got {other:?}"),
        };
        assert_eq!(initial_output, vec!["booting".to_string()]);
        assert_eq!(sup.registry().get("backend").unwrap(), Some(pid));

        let again = sup.start().unwrap();
        assert!(matches!(
            again.processes[&ProcessName::Backend],
            StartOutcome::AlreadyRunning { pid: p } if p == pid
        ));
        assert!(sup.status().unwrap()[0].alive);

        let stopped = sup.stop().unwrap();
        assert!(matches!(
            stopped[&ProcessName::Backend],
            StopOutcome::Stopped { pid: p } if p == pid
        ));
        assert!(sup.registry().load().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn stale_entry_is_replaced() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("backend")).unwrap();
        let mut cfg = fast_config();
        cfg.backend.command = Some(vec!["sleep".into(), "30".into()]);
        let sup = Supervisor::new(dir.path(), &cfg);

        let mut gone = Command::new("true").spawn().unwrap();
        let dead = gone.id();
        gone.wait().unwrap();
        sup.registry().set("backend", dead).unwrap();

        let report = sup.start().unwrap();
        let pid = report.pids()["backend"];
        assert_ne!(pid, dead);
        assert_eq!(sup.registry().get("backend").unwrap(), Some(pid));
        sup.stop().unwrap();
    }
}
