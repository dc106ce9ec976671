use crate::error::Result;
use crate::paths;
use crate::requirements::DependencySpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// BackendConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub health_path: String,
    /// Value exported as `FLASK_APP`.
    pub app: String,
    /// Relative to `dir`.
    pub venv_dir: PathBuf,
    /// Relative to `dir`.
    pub requirements: PathBuf,
    /// Replaces the default `python -m flask run ...` command when set.
    pub command: Option<Vec<String>>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(paths::BACKEND_DIR),
            host: "127.0.0.1".to_string(),
            port: 5000,
            health_path: "/api/health".to_string(),
            app: "app.main:create_app".to_string(),
            venv_dir: PathBuf::from(paths::VENV_DIR),
            requirements: PathBuf::from(paths::REQUIREMENTS_FILE),
            command: None,
        }
    }
}

impl BackendConfig {
    pub fn health_url(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, self.health_path)
    }
}

// ---------------------------------------------------------------------------
// FrontendConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontendConfig {
    pub dir: PathBuf,
    pub host: String,
    pub port: u16,
    /// Relative to `dir`. Frontend startup is skipped when it is absent.
    pub manifest: PathBuf,
    /// Replaces the default `npm run dev` command when set.
    pub command: Option<Vec<String>>,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(paths::FRONTEND_DIR),
            host: "127.0.0.1".to_string(),
            port: 5173,
            manifest: PathBuf::from(paths::FRONTEND_MANIFEST),
            command: None,
        }
    }
}

// ---------------------------------------------------------------------------
// InstallConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemediableConfig {
    pub package: String,
    pub module: String,
    /// Interpreter minor version known to ship wheels for `package`.
    pub recommended_python: String,
}

impl Default for RemediableConfig {
    fn default() -> Self {
        Self {
            package: "greenlet".to_string(),
            module: "greenlet".to_string(),
            recommended_python: "3.12".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// Host interpreter used to create the venv. Auto-detected when unset.
    pub python: Option<String>,
    pub prefer_uv: bool,
    pub allow_source_build: bool,
    pub must_have: Vec<DependencySpec>,
    pub remediable: RemediableConfig,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            python: None,
            prefer_uv: true,
            allow_source_build: false,
            must_have: default_must_have(),
            remediable: RemediableConfig::default(),
        }
    }
}

fn default_must_have() -> Vec<DependencySpec> {
    vec![
        DependencySpec::new("flask", ">=3.0", "flask"),
        DependencySpec::new("flask-cors", ">=4.0", "flask_cors"),
        DependencySpec::new("flask-socketio", ">=5.3", "flask_socketio"),
        DependencySpec::new("paho-mqtt", ">=2.0", "paho.mqtt.client"),
        DependencySpec::new("python-dotenv", ">=1.0", "dotenv"),
        DependencySpec::new("gevent", ">=24.2", "gevent"),
    ]
}

// ---------------------------------------------------------------------------
// SupervisorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub run_dir: PathBuf,
    pub registry_file: String,
    /// Initial output lines echoed after each spawn.
    pub log_lines: usize,
    /// Upper bound on how long to wait for those lines.
    pub log_follow_ms: u64,
    pub health_interval_ms: u64,
    pub health_timeout_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            run_dir: PathBuf::from(paths::RUN_DIR),
            registry_file: paths::REGISTRY_FILE.to_string(),
            log_lines: 20,
            log_follow_ms: 3000,
            health_interval_ms: 500,
            health_timeout_secs: 20,
        }
    }
}

impl SupervisorConfig {
    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn log_follow(&self) -> Duration {
        Duration::from_millis(self.log_follow_ms)
    }
}

// ---------------------------------------------------------------------------
// StackConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub backend: BackendConfig,
    pub frontend: FrontendConfig,
    pub install: InstallConfig,
    pub supervisor: SupervisorConfig,
}

impl StackConfig {
    /// Load `stackboot.yaml` from `root`. A missing file yields defaults.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: StackConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    // -----------------------------------------------------------------------
    // Resolved paths
    // -----------------------------------------------------------------------

    pub fn backend_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.backend.dir)
    }

    pub fn frontend_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.frontend.dir)
    }

    pub fn venv_dir(&self, root: &Path) -> PathBuf {
        self.backend_dir(root).join(&self.backend.venv_dir)
    }

    pub fn requirements_path(&self, root: &Path) -> PathBuf {
        self.backend_dir(root).join(&self.backend.requirements)
    }

    pub fn frontend_manifest(&self, root: &Path) -> PathBuf {
        self.frontend_dir(root).join(&self.frontend.manifest)
    }

    pub fn run_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.supervisor.run_dir)
    }

    pub fn registry_path(&self, root: &Path) -> PathBuf {
        self.run_dir(root).join(&self.supervisor.registry_file)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.backend.port == self.frontend.port && self.backend.host == self.frontend.host {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "backend and frontend both bind {}:{}",
                    self.backend.host, self.backend.port
                ),
            });
        }

        if self.install.must_have.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "install.must_have is empty; nothing will be verified".to_string(),
            });
        }

        if !self.backend.health_path.starts_with('/') {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "backend.health_path '{}' should start with '/'",
                    self.backend.health_path
                ),
            });
        }

        if self.supervisor.health_timeout_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "supervisor.health_timeout_secs is 0; the health probe runs once"
                    .to_string(),
            });
        }

        for (name, cmd) in [
            ("backend", &self.backend.command),
            ("frontend", &self.frontend.command),
        ] {
            if cmd.as_ref().is_some_and(|c| c.is_empty()) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("{name}.command is set but empty"),
                });
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = StackConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.backend.port, 5000);
        assert_eq!(cfg.frontend.port, 5173);
        assert_eq!(cfg.install.remediable.package, "greenlet");
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("stackboot.yaml"),
            "backend:\n  port: 8000\nsupervisor:\n  log_lines: 5\n",
        )
        .unwrap();
        let cfg = StackConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.backend.port, 8000);
        assert_eq!(cfg.backend.host, "127.0.0.1");
        assert_eq!(cfg.supervisor.log_lines, 5);
        assert_eq!(cfg.supervisor.health_interval_ms, 500);
        assert_eq!(cfg.backend.health_url(), "http://127.0.0.1:8000/api/health");
    }

    #[test]
    fn serialized_config_loads_back() {
        let dir = TempDir::new().unwrap();
        let mut cfg = StackConfig::default();
        cfg.install.allow_source_build = true;
        cfg.frontend.command = Some(vec!["pnpm".into(), "dev".into()]);
        std::fs::write(
            paths::config_path(dir.path()),
            serde_yaml::to_string(&cfg).unwrap(),
        )
        .unwrap();
        let loaded = StackConfig::load(dir.path()).unwrap();
        assert!(loaded.install.allow_source_build);
        assert_eq!(loaded.frontend.command, cfg.frontend.command);
        assert_eq!(loaded.install.must_have, cfg.install.must_have);
    }

    #[test]
    fn resolved_paths_nest_under_backend() {
        let cfg = StackConfig::default();
        let root = Path::new("/proj");
        assert_eq!(cfg.venv_dir(root), PathBuf::from("/proj/backend/.venv"));
        assert_eq!(
            cfg.requirements_path(root),
            PathBuf::from("/proj/backend/requirements.txt")
        );
        assert_eq!(
            cfg.registry_path(root),
            PathBuf::from("/proj/.stackboot-run/pids.json")
        );
    }

    #[test]
    fn port_clash_is_an_error() {
        let mut cfg = StackConfig::default();
        cfg.frontend.port = cfg.backend.port;
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("both bind")));
    }

    #[test]
    fn empty_command_is_flagged() {
        let mut cfg = StackConfig::default();
        cfg.backend.command = Some(vec![]);
        assert!(cfg
            .validate()
            .iter()
            .any(|w| w.message.contains("backend.command")));
    }
}
