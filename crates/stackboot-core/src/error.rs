use std::fmt;
use thiserror::Error;

/// Captured result of a subprocess that exited unsuccessfully.
///
/// Both streams are kept verbatim so the caller can dump them on a hard
/// failure.
#[derive(Debug, Clone)]
pub struct CommandFailure {
    pub step: String,
    pub command: String,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{}: `{}` exited with code {code}", self.step, self.command)?,
            None => write!(f, "{}: `{}` terminated by signal", self.step, self.command)?,
        }
        if !self.stdout.trim().is_empty() {
            write!(f, "\n--- stdout ---\n{}", self.stdout.trim_end())?;
        }
        if !self.stderr.trim().is_empty() {
            write!(f, "\n--- stderr ---\n{}", self.stderr.trim_end())?;
        }
        Ok(())
    }
}

/// One import that failed inside the runtime environment.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct ImportFailure {
    pub module: String,
    /// Name of the module Python reported as missing, when it was a
    /// `ModuleNotFoundError`. Usually a transitive dependency.
    #[serde(default)]
    pub missing: Option<String>,
    pub error: String,
}

impl ImportFailure {
    /// The module that actually needs installing.
    pub fn root_cause(&self) -> &str {
        self.missing.as_deref().unwrap_or(&self.module)
    }
}

fn format_failures(failures: &[ImportFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("  - {}: {}", f.module, f.error))
        .collect::<Vec<_>>()
        .join("\n")
}

fn last_attempt(last_error: &str) -> String {
    if last_error.trim().is_empty() {
        String::new()
    } else {
        format!("\n\nLast attempt:\n{}", last_error.trim_end())
    }
}

#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("could not create the virtual environment at {venv}:\n{attempts}")]
    CreationFailed { venv: String, attempts: String },

    #[error("dependency installation failed with every installer:\n{attempts}")]
    InstallFailed { attempts: String },

    #[error("modules missing from the virtual environment:\n{}", format_failures(.failures))]
    MissingModules { failures: Vec<ImportFailure> },

    #[error(
        "'{package}' has no prebuilt wheel for Python {python} on {platform} \
         (tried: {tried}).\n\n{remediation}{}",
        last_attempt(.last_error)
    )]
    KnownRemediable {
        package: String,
        python: String,
        platform: String,
        tried: String,
        remediation: String,
        /// Output of the final tier, which may show a network or index
        /// problem rather than a missing wheel.
        last_error: String,
    },

    #[error("no Python interpreter found on PATH (looked for: {0})")]
    NoInterpreter(String),
}

#[derive(Debug, Error)]
pub enum StackError {
    #[error("interrupted by user during '{step}'")]
    Interrupted { step: String },

    #[error("{0}")]
    CommandFailed(Box<CommandFailure>),

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("required tool not found on PATH: {0}")]
    ToolNotFound(String),

    #[error("invalid probe output: {0}")]
    Probe(String),

    #[error("preflight checks failed:\n{0}")]
    Preflight(String),

    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StackError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, StackError::Interrupted { .. })
    }
}

pub type Result<T> = std::result::Result<T, StackError>;
